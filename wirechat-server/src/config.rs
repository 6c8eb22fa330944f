//! Server configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "wirechat-server", version, about = "Single-room WebSocket chat relay")]
pub struct ServerConfig {
    /// Address for the WebSocket listener.
    #[arg(long, env = "WIRECHAT_LISTEN_ADDR", default_value = "127.0.0.1:12345")]
    pub listen_addr: String,

    /// Directory for day-partitioned message and operational logs.
    #[arg(long, env = "WIRECHAT_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Shared secret for the ADMIN command. Required.
    #[arg(long, env = "WIRECHAT_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// File of forbidden words/phrases, one per line.
    #[arg(long, env = "WIRECHAT_FORBIDDEN_WORDS")]
    pub forbidden_words_file: Option<PathBuf>,

    /// Forbidden entries resolved from `forbidden_words_file`.
    #[arg(skip)]
    pub forbidden_words: Vec<String>,

    /// Sentinel whose presence at shutdown means "restarting".
    #[arg(long, env = "WIRECHAT_RESTART_MARKER", default_value = "/run/chat-server.restart")]
    pub restart_marker: PathBuf,

    /// Store chat history in SQLite instead of flat files.
    #[arg(long, env = "WIRECHAT_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Messages replayed to a newly joined client.
    #[arg(long, default_value_t = 50)]
    pub history_lines: usize,

    /// Longest accepted line, in characters.
    #[arg(long, default_value_t = 2048)]
    pub max_message_len: usize,

    #[arg(long, default_value_t = 30)]
    pub ping_interval_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub ping_timeout_secs: u64,

    /// Bound on the single NICK read.
    #[arg(long, default_value_t = 60)]
    pub handshake_timeout_secs: u64,

    /// Per-connection bound while delivering the shutdown notice.
    #[arg(long, default_value_t = 2)]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:12345".to_string(),
            log_dir: PathBuf::from("logs"),
            admin_token: None,
            forbidden_words_file: None,
            forbidden_words: Vec::new(),
            restart_marker: PathBuf::from("/run/chat-server.restart"),
            db_path: None,
            history_lines: 50,
            max_message_len: 2048,
            ping_interval_secs: 30,
            ping_timeout_secs: 10,
            handshake_timeout_secs: 60,
            shutdown_timeout_secs: 2,
        }
    }
}

impl ServerConfig {
    /// Resolve `forbidden_words_file` into `forbidden_words`.
    pub fn load_forbidden_words(&mut self) -> Result<()> {
        if let Some(path) = &self.forbidden_words_file {
            self.forbidden_words = read_word_list(path)?;
        }
        Ok(())
    }

    /// The admin secret, or an error if it is unset or blank.
    pub fn require_admin_token(&self) -> Result<&str> {
        match self.admin_token.as_deref() {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => anyhow::bail!("admin token is not configured (set WIRECHAT_ADMIN_TOKEN)"),
        }
    }
}

/// One entry per line; blank lines and `#` comments are skipped.
pub fn read_word_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read forbidden words: {}", path.display()))?;
    Ok(parse_word_list(&content))
}

pub fn parse_word_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
