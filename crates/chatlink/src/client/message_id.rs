//! Locally generated message identifiers.

use chrono::Utc;

const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// `msg_<unix-millis>_<9 random base36 chars>`
pub fn generate_message_id() -> String {
    format!(
        "msg_{}_{}",
        Utc::now().timestamp_millis(),
        nanoid::nanoid!(9, &SUFFIX_ALPHABET)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_shape() {
        let id = generate_message_id();
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "msg");
        assert!(parts[1].parse::<i64>().unwrap() > 0);
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| SUFFIX_ALPHABET.contains(&c)));
    }

    #[test]
    fn test_message_ids_differ() {
        assert_ne!(generate_message_id(), generate_message_id());
    }
}
