use anyhow::{Context, Error};
use clap::Parser;
use envconfig::Envconfig;
use log_curator::{cmd::Cli, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    let cli = Cli::parse();

    info!("Starting up...");
    let config = Config::init_from_env().context("failed to load configuration from env")?;

    cli.run(config).await?;

    info!("Shutting down");
    Ok(())
}
