use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (WIRECHAT_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("WIRECHAT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("wirechat_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let mut config = wirechat_server::config::ServerConfig::parse();
    tracing::info!("Starting chat server on {}", config.listen_addr);

    // Resolve --forbidden-words-file into the word list
    config.load_forbidden_words()?;
    if let Some(ref path) = config.forbidden_words_file {
        tracing::info!(
            "Loaded {} forbidden entries from {}",
            config.forbidden_words.len(),
            path.display()
        );
    }
    if let Some(ref path) = config.db_path {
        tracing::info!("History stored in {}", path.display());
    }

    let server = wirechat_server::server::Server::new(config);
    server.run().await
}
