use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::Job;
use crate::metrics_consts::{
    JOBS_COMPLETED, JOBS_DROPPED, JOBS_FAILED, JOBS_RECEIVED, QUEUE_DELETE_ERROR,
    QUEUE_RECEIVE_ERROR,
};
use crate::pipeline::Pipeline;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("failed to receive messages: {0}")]
    Receive(String),
    #[error("failed to delete message: {0}")]
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub receipt_handle: String,
    pub body: String,
}

/// The job queue as the consumer sees it. Messages that aren't deleted come
/// back once their visibility timeout expires.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn receive(&self) -> Result<Vec<QueuedMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

pub struct SqsJobQueue {
    client: SqsClient,
    queue_url: String,
    max_messages: i32,
    wait_time_seconds: i32,
}

impl SqsJobQueue {
    pub fn new(
        client: SqsClient,
        queue_url: String,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Self {
        Self {
            client,
            queue_url,
            max_messages,
            wait_time_seconds,
        }
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    async fn receive(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                // A message without a receipt handle can't be acknowledged
                let receipt_handle = message.receipt_handle?;
                Some(QueuedMessage {
                    receipt_handle,
                    body: message.body.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

/// What the consumer does with a message once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Unparseable; deleted so it isn't redelivered
    Dropped,
    /// Job ran to completion; deleted
    Completed,
    /// Job failed fatally; left for redelivery
    Retry,
}

pub struct JobConsumer<Q> {
    queue: Q,
    pipeline: Pipeline,
}

impl<Q: JobQueue> JobConsumer<Q> {
    pub fn new(queue: Q, pipeline: Pipeline) -> Self {
        Self { queue, pipeline }
    }

    /// Long-polls until `shutdown` is cancelled. Cancellation is only observed
    /// between jobs.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("job consumer started");
        while !shutdown.is_cancelled() {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive() => received,
            };
            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!("{}", e);
                    metrics::counter!(QUEUE_RECEIVE_ERROR).increment(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
            };
            self.process(messages, &shutdown).await;
        }
        info!("job consumer shutting down");
    }

    /// Handles a received batch in order, stopping early on shutdown. Returns
    /// the disposition of each message that was handled.
    pub async fn process(
        &self,
        messages: Vec<QueuedMessage>,
        shutdown: &CancellationToken,
    ) -> Vec<Disposition> {
        let mut dispositions = Vec::with_capacity(messages.len());
        for message in messages {
            if shutdown.is_cancelled() {
                info!("shutdown requested, leaving remaining messages for redelivery");
                break;
            }
            let disposition = self.handle(&message.body).await;
            if disposition != Disposition::Retry {
                if let Err(e) = self.queue.delete(&message.receipt_handle).await {
                    warn!("{}", e);
                    metrics::counter!(QUEUE_DELETE_ERROR).increment(1);
                }
            }
            dispositions.push(disposition);
        }
        dispositions
    }

    pub async fn handle(&self, body: &str) -> Disposition {
        metrics::counter!(JOBS_RECEIVED).increment(1);
        let job = match Job::parse(body) {
            Ok(job) => job,
            Err(e) => {
                warn!(body = %body, "dropping job message: {}", e);
                metrics::counter!(JOBS_DROPPED).increment(1);
                return Disposition::Dropped;
            }
        };

        info!(
            device = %job.device_id,
            start = %job.window.start,
            end = %job.window.end,
            "starting job"
        );
        match self.pipeline.run_job(&job).await {
            Ok(_) => {
                metrics::counter!(JOBS_COMPLETED).increment(1);
                Disposition::Completed
            }
            Err(e) => {
                error!(device = %job.device_id, "job failed: {}", e);
                metrics::counter!(JOBS_FAILED, "reason" => e.label()).increment(1);
                Disposition::Retry
            }
        }
    }
}
