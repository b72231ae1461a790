#![allow(clippy::result_large_err)]

pub mod enricher;
pub mod pipeline;
pub mod scanner;
pub mod snippets;
pub mod stages;
pub mod utils;

use std::sync::Arc;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::queue_task::{QueueTask, DEFAULT_LEASE_SECS},
};
use futures::StreamExt;
pub use pipeline::{IngestionConfig, IngestionPipeline, PipelineServices};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claim-and-process loop for one worker. Idle workers sleep for the poll
/// interval but wake early on a queue notification, so fresh work starts
/// within milliseconds of its enqueue.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
    poll_interval: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS);

    let mut wake_stream = match QueueTask::listen_for_tasks(&db).await {
        Ok(stream) => Some(Box::pin(stream)),
        Err(err) => {
            warn!(%worker_id, error = %err, "queue live stream unavailable; polling only");
            None
        }
    };

    info!(%worker_id, "worker started");

    loop {
        match QueueTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, task_type = %task.task_type, "claimed task");
                if let Err(err) = ingestion_pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "task failed");
                }
            }
            Ok(None) => match wake_stream.as_mut() {
                Some(stream) => {
                    tokio::select! {
                        _ = sleep(poll_interval) => {}
                        notification = stream.next() => {
                            if notification.is_none() {
                                warn!(%worker_id, "queue live stream ended; polling only");
                                wake_stream = None;
                            }
                        }
                    }
                }
                None => sleep(poll_interval).await,
            },
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim task");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
