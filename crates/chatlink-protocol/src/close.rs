//! WebSocket close codes the client acts on.

/// Orderly shutdown requested by either side. Never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// The connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Whether a close code ends the conversation for good.
///
/// Any code other than 1000 counts as abnormal, including 1001 (going away).
pub fn is_normal_closure(code: u16) -> bool {
    code == NORMAL_CLOSURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_1000_is_normal() {
        assert!(is_normal_closure(1000));
        assert!(!is_normal_closure(1001));
        assert!(!is_normal_closure(ABNORMAL_CLOSURE));
        assert!(!is_normal_closure(4000));
    }
}
