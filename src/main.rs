// ABOUTME: CLI entry point for sults-mirror
// ABOUTME: Runs the sync pipeline once and reports the outcome through Telegram

use std::path::PathBuf;

use clap::Parser;

use sults_mirror::config::Config;
use sults_mirror::context::RunContext;
use sults_mirror::notify::{self, Notifier, TelegramNotifier};
use sults_mirror::pipeline::Pipeline;
use sults_mirror::remote::ApiClient;
use sults_mirror::store::PgStore;

#[derive(Parser)]
#[command(name = "sults-mirror")]
#[command(about = "Mirrors Sults workspace collections into PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG has highest precedence, then --log, defaulting to "info"
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::load(&cli.config)?;
    let ctx = RunContext::new(config.extract.max_pages);
    let remote = ApiClient::new(&config.api.base_url, &config.api.token)?;
    let store = PgStore::new(config.store.url.clone());
    let notifier = TelegramNotifier::new(&config.telegram.bot_token, &config.telegram.chat_id)?;

    let outcome = Pipeline::new(&remote, &store, &ctx).run().await;

    let text = match &outcome {
        Ok(report) => {
            tracing::info!("Run completed: {}", report.summary());
            notify::success_text(&ctx, report)
        }
        Err(error) => {
            tracing::error!("Run failed: {error:#}");
            notify::failure_text(&ctx, error)
        }
    };

    // Delivery problems are logged but never change the run outcome.
    if let Err(error) = notifier.send(&text).await {
        tracing::warn!("Failed to deliver the run notification: {error:#}");
    }

    outcome.map(|_| ())
}
