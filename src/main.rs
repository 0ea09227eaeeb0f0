use clap::Parser;

use wa_bot::{config::Config, daemon, logging, Result};

#[derive(Parser, Debug)]
#[command(name = "wa-bot", version, about = "WhatsApp assistant webhook server")]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "WA_BOT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "WA_BOT_PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing("wa_bot");

    let config = Config::from_env()?;
    tracing::info!(host = %cli.host, port = cli.port, "starting wa-bot");

    daemon::run_with_shutdown(&cli.host, cli.port, config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
}
