use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};

use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};

use chatlink::session::{FileSessionStore, HttpChatApi, SessionManager};
use chatlink::{ApiConfig, ChatClient, ChatClientConfig, TungsteniteSocketFactory};

mod terminal;

const APP_NAME: &str = "chatlink";
/// Prefix of environment overrides, e.g. `CHATLINK__CLIENT__WS_BASE_URL`.
const ENV_PREFIX: &str = "CHATLINK";

/// Seconds to wait for a response stream when `--timeout` is not given.
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 120;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!(
        "config file {}, state dir {}",
        ctx.paths.config_file.display(),
        ctx.paths.state_dir.display()
    );

    match cli.command {
        Command::Chat(cmd) => block_on(handle_chat(&ctx, cmd)),
        Command::Send(cmd) => block_on(handle_send(&ctx, cmd)),
        Command::History(cmd) => block_on(handle_history(&ctx, cmd)),
        Command::Session { command } => block_on(handle_session(&ctx, command)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

/// Run a network command on a fresh multi-threaded runtime.
fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?
        .block_on(future)
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "chatlink - streaming chat client for the terminal.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Silence logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// More log output: -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// JSON log lines, and JSON output for `history` and `config show`
    #[arg(long, global = true)]
    json: bool,
    /// Plain log output without ANSI colors
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    /// Seconds to wait for an answer to finish streaming
    #[arg(long, value_name = "SECONDS", global = true)]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an interactive chat
    Chat(ChatCommand),
    /// Send one message and print the streamed answer
    Send(SendCommand),
    /// Print the conversation history of a session
    History(HistoryCommand),
    /// Manage the stored session id
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    /// Use this session instead of the stored one
    #[arg(long, value_name = "ID", conflicts_with = "new")]
    session: Option<String>,
    /// Start with a fresh session
    #[arg(long)]
    new: bool,
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    /// Message to send
    #[arg(value_name = "MESSAGE")]
    message: String,
    /// Use this session instead of the stored one
    #[arg(long, value_name = "ID")]
    session: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct HistoryCommand {
    /// Session to show (defaults to the stored one)
    #[arg(long, value_name = "ID")]
    session: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Print the stored session id
    Show,
    /// Create a new session and store it
    New,
    /// Forget the stored session id
    Clear,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths)?;
        let paths = paths.apply_overrides(&config)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = self.effective_log_level();
        let directive = format!("{APP_NAME}={}", level.as_str().to_lowercase());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
        let fmt = tracing_subscriber::fmt::layer().with_writer(io::stderr);
        let registry = tracing_subscriber::registry().with(filter);

        if self.common.json {
            registry.with(fmt.json()).try_init().ok();
        } else {
            let ansi = !self.common.no_color
                && env::var_os("NO_COLOR").is_none()
                && io::stderr().is_terminal();
            registry.with(fmt.with_ansi(ansi).with_target(false)).try_init().ok();
        }

        // Library code logs through `log`.
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .ok();

        Ok(())
    }

    /// `-v` flags win over the configured level.
    fn effective_log_level(&self) -> LevelFilter {
        match self.common.verbose {
            0 => self.config.logging.level.parse().unwrap_or(LevelFilter::Warn),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.common.timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECS))
    }

    fn session_file(&self) -> PathBuf {
        self.paths.state_dir.join("session_id")
    }
}

/// Client and session manager built from the effective configuration.
struct ChatApp {
    client: ChatClient,
    sessions: SessionManager,
}

impl ChatApp {
    fn new(ctx: &RuntimeContext) -> Result<Self> {
        let client = ChatClient::new(
            ctx.config.client.clone(),
            Arc::new(TungsteniteSocketFactory::new()),
        );
        let api = HttpChatApi::new(&ctx.config.api).context("creating HTTP client")?;
        let sessions = SessionManager::new(
            Arc::new(FileSessionStore::new(ctx.session_file())),
            Arc::new(api),
        );
        Ok(Self { client, sessions })
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    state_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(&path.to_string_lossy())?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => app_dir("XDG_CONFIG_HOME", dirs::config_dir, &[".config"])?.join("config.toml"),
        };
        let state_dir = app_dir("XDG_STATE_HOME", dirs::state_dir, &[".local", "state"])?;

        Ok(Self {
            config_file,
            state_dir,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(dir) = &cfg.paths.state_dir {
            self.state_dir = expand_path(dir)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    client: ChatClientConfig,
    api: ApiConfig,
    paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    state_dir: Option<String>,
}

async fn handle_chat(ctx: &RuntimeContext, cmd: ChatCommand) -> Result<()> {
    let app = ChatApp::new(ctx)?;
    let session_id = if cmd.new {
        app.sessions.new_session().await?
    } else {
        app.sessions.ensure_session(cmd.session.as_deref()).await?
    };

    terminal::run_chat(&app.client, &app.sessions, session_id, ctx.response_timeout()).await
}

async fn handle_send(ctx: &RuntimeContext, cmd: SendCommand) -> Result<()> {
    let app = ChatApp::new(ctx)?;
    let session_id = app.sessions.ensure_session(cmd.session.as_deref()).await?;

    terminal::send_once(&app.client, &session_id, &cmd.message, ctx.response_timeout()).await
}

async fn handle_history(ctx: &RuntimeContext, cmd: HistoryCommand) -> Result<()> {
    let app = ChatApp::new(ctx)?;
    let history = app
        .sessions
        .history(cmd.session.as_deref())
        .await
        .context("fetching chat history")?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&history).context("serializing history to JSON")?
        );
    } else {
        terminal::print_history(&history);
    }
    Ok(())
}

async fn handle_session(ctx: &RuntimeContext, command: SessionCommand) -> Result<()> {
    let app = ChatApp::new(ctx)?;
    match command {
        SessionCommand::Show => match app.sessions.current().await? {
            Some(session_id) => println!("{session_id}"),
            None => println!("(no session)"),
        },
        SessionCommand::New => {
            let session_id = app.sessions.new_session().await?;
            println!("{session_id}");
        }
        SessionCommand::Clear => {
            app.sessions.clear().await?;
            info!("Cleared session file {}", ctx.session_file().display());
        }
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    write_default_config(&ctx.paths.config_file)?;
    fs::create_dir_all(&ctx.paths.state_dir).with_context(|| {
        format!(
            "creating state directory {}",
            ctx.paths.state_dir.display()
        )
    })
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &AppPaths) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        write_default_config(&paths.config_file)?;
    }

    let defaults = ChatClientConfig::default();
    let built = Config::builder()
        .set_default("logging.level", "warn")?
        .set_default("client.ws_base_url", defaults.ws_base_url)?
        .set_default("client.chat_endpoint", defaults.chat_endpoint)?
        .set_default("client.max_reconnect_attempts", defaults.max_reconnect_attempts as i64)?
        .set_default("client.reconnect_interval_ms", defaults.reconnect_interval_ms as i64)?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    Ok(built.try_deserialize()?)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n# Environment overrides: {}__<SECTION>__<KEY>\n\n",
        path.display(),
        ENV_PREFIX
    )
}

/// Expand `~` and environment variables in a configured path.
fn expand_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).with_context(|| format!("expanding path {text}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// `$XDG_*` when set, else the platform directory, else `~/<fallback>`.
fn app_dir(
    xdg_var: &str,
    platform_dir: fn() -> Option<PathBuf>,
    fallback: &[&str],
) -> Result<PathBuf> {
    let base = env::var_os(xdg_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(platform_dir)
        .or_else(|| dirs::home_dir().map(|home| fallback.iter().fold(home, |p, part| p.join(part))))
        .ok_or_else(|| anyhow!("cannot determine a directory for {xdg_var}"))?;
    Ok(base.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from(["chatlink", "--timeout", "5", "send", "hello", "--session", "s1"])
            .unwrap();
        assert_eq!(cli.common.timeout, Some(5));
        match cli.command {
            Command::Send(cmd) => {
                assert_eq!(cmd.message, "hello");
                assert_eq!(cmd.session.as_deref(), Some("s1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_chat_session_conflicts_with_new() {
        assert!(Cli::try_parse_from(["chatlink", "chat", "--new", "--session", "s1"]).is_err());
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let body = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&body).unwrap();
        assert_eq!(parsed.client, ChatClientConfig::default());
        assert_eq!(parsed.api, ApiConfig::default());
        assert_eq!(parsed.logging.level, "warn");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_file = dir.path().join("config.toml");
        fs::write(
            &config_file,
            "[client]\nws_base_url = \"wss://chat.example\"\nmax_reconnect_attempts = 2\n",
        )
        .unwrap();

        let paths = AppPaths {
            config_file,
            state_dir: dir.path().join("state"),
        };
        let config = load_or_init_config(&paths).unwrap();

        assert_eq!(config.client.ws_base_url, "wss://chat.example");
        assert_eq!(config.client.max_reconnect_attempts, 2);
        assert_eq!(config.client.chat_endpoint, "ws/chat");
        assert_eq!(config.api.timeout_secs, 30);
    }

    #[test]
    fn test_verbose_flag_overrides_configured_level() {
        let cli = Cli::try_parse_from(["chatlink", "-vv", "config", "path"]).unwrap();
        let ctx = RuntimeContext {
            common: cli.common,
            paths: AppPaths {
                config_file: PathBuf::from("config.toml"),
                state_dir: PathBuf::from("state"),
            },
            config: AppConfig::default(),
        };
        assert_eq!(ctx.effective_log_level(), LevelFilter::Trace);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["chatlink", "-q", "-v", "config", "path"]).is_err());
    }

    #[test]
    fn test_app_dir_falls_back_to_platform_dir() {
        let dir = app_dir("CHATLINK_TEST_UNSET_DIR", || Some(PathBuf::from("/platform")), &[".config"])
            .unwrap();
        assert_eq!(dir, PathBuf::from("/platform/chatlink"));
    }
}
