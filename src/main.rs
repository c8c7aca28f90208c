mod context;
mod database;
mod devices;
mod host;
mod notifications;
mod scheduler;
mod settings;
mod telemetry;

use clap::Parser;
use context::AppContext;
use host::ServiceHost;
use settings::Settings;
use std::{error::Error, path::PathBuf};
use telemetry::metrics_registry::init_metrics_registry;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Periodically pushes remote notifications to registered devices")]
struct Cli {
    /// Path to the settings file. Defaults to `settings.*` in the working directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };

    init_metrics_registry();

    let context = AppContext::from_settings(&settings).await?;
    info!(development = settings.development, "Remote notification service configured");

    ServiceHost::new(context.dispatcher, settings.schedule.clone())
        .run()
        .await?;

    Ok(())
}
