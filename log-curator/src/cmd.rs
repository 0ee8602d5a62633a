use std::sync::Arc;

use anyhow::{Context, Error};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::context::{load_aws_config, AppContext};
use crate::intake::{JobConsumer, SqsJobQueue};
use crate::job::{Job, JobMessage};
use crate::pipeline::Pipeline;
use crate::server;

#[derive(Parser)]
#[command(version, about = "Curates device log archives into the document store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Long-poll the job queue (SQS_QUEUE_URL) and run each job it delivers
    Consume,

    /// Run a single job and exit
    Run {
        /// Device id, as used in logs/<device>/ in the source bucket
        #[arg(long)]
        device: String,

        /// Window start: MMYYYY, YYYY-MM-DD or an RFC 3339 timestamp
        #[arg(long)]
        start: String,

        /// Window end, same encodings as --start
        #[arg(long)]
        end: String,
    },
}

impl Cli {
    pub async fn run(self, config: Config) -> Result<(), Error> {
        let context = Arc::new(AppContext::new(&config).await?);
        let pipeline = Pipeline::new(context);

        match self.command {
            Commands::Consume => consume(config, pipeline).await,
            Commands::Run { device, start, end } => {
                let job = Job::try_from(JobMessage {
                    device_id: device,
                    start_date: start,
                    end_date: end,
                })?;
                let report = pipeline.run_job(&job).await?;
                for (key, outcome) in &report.objects {
                    info!(key = %key, outcome = outcome.label(), "object");
                }
                for (key, skip) in &report.skipped {
                    info!(key = %key, reason = skip.label(), "not a candidate");
                }
                Ok(())
            }
        }
    }
}

async fn consume(config: Config, pipeline: Pipeline) -> Result<(), Error> {
    let queue_url = config
        .sqs_queue_url
        .clone()
        .context("SQS_QUEUE_URL must be set to consume jobs")?;

    let recorder_handle = server::setup_metrics_recorder()?;
    let shutdown = CancellationToken::new();

    let bind = format!("{}:{}", config.host, config.port);
    let router = server::router(recorder_handle);
    let server_shutdown = shutdown.clone();
    let server_handle =
        tokio::spawn(async move { server::serve(router, &bind, server_shutdown).await });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let aws_config = load_aws_config(&config).await;
    let queue = SqsJobQueue::new(
        aws_sdk_sqs::Client::new(&aws_config),
        queue_url,
        config.sqs_max_messages,
        config.sqs_wait_time_seconds,
    );
    JobConsumer::new(queue, pipeline).run(shutdown.clone()).await;

    shutdown.cancel();
    server_handle
        .await
        .context("health server task panicked")?
        .context("health server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = term => {},
        _ = signal::ctrl_c() => {},
    };

    info!("shutting down gracefully...");
}
