#[macro_use]
extern crate tracing;

use std::sync::Arc;
use std::time::Duration;

use bus::{Bus, KafkaBus};
use entities::{MarathonError, Task};
use queue::QueueClient;
use sqlx::PgPool;
use uuid::Uuid;

mod config;
mod control_group;
mod create_batches;
mod executor;
mod process_batch;
mod resolver;

use config::worker_config;
use executor::Outcome;

const CREATE_BATCHES_QUEUE: &str = "create_batches";
const PROCESS_BATCH_QUEUE: &str = "process_batch";

/// Periodically diffs each queue class's `in_progress` holders against
/// its registered consumers and reclaims whatever is left orphaned —
/// the heartbeat-free recovery path from §4.4.
fn spawn_orphan_reclaim_loop(queue: QueueClient) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
      interval.tick().await;
      for queue_class in [CREATE_BATCHES_QUEUE, PROCESS_BATCH_QUEUE] {
        match queue.reclaim_orphans(queue_class).await {
          Ok(0) => {}
          Ok(n) => warn!(queue_class, reclaimed = n, "reclaimed orphaned tasks"),
          Err(e) => error!(queue_class, error = %e, "orphan reclamation failed"),
        }
      }
    }
  });
}

/// Periodically promotes tasks whose scheduled retry/defer deadline
/// has passed from each queue class's ZSET back onto its ready list —
/// without this, `retry_or_dead_letter`'s backoff and `defer`'s
/// paused-job delay never actually resume the task (§4.4/§5).
fn spawn_scheduled_promotion_loop(queue: QueueClient) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
      interval.tick().await;
      for queue_class in [CREATE_BATCHES_QUEUE, PROCESS_BATCH_QUEUE] {
        match queue.enqueue_scheduled(queue_class).await {
          Ok(0) => {}
          Ok(n) => debug!(queue_class, promoted = n, "promoted scheduled tasks"),
          Err(e) => error!(queue_class, error = %e, "scheduled promotion failed"),
        }
      }
    }
  });
}

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = worker_config();
  logger::init(&config.logging)?;

  info!("Marathon Worker version: v{}", env!("CARGO_PKG_VERSION"));
  info!(
    concurrency = config.workers.concurrency,
    batch_size = config.workers.batch_size,
    "starting executor pools"
  );

  let pool: PgPool = database::connect(&config.store.database_url).await?;
  let queue = QueueClient::connect(&config.workers.redis.connection_url()).await?;
  let bus: Arc<dyn Bus> = Arc::new(KafkaBus::new(&config.store.kafka_brokers)?);

  let process_id = Arc::new(Uuid::new_v4().to_string());
  queue.register_process(CREATE_BATCHES_QUEUE, &process_id).await?;
  queue.register_process(PROCESS_BATCH_QUEUE, &process_id).await?;

  spawn_orphan_reclaim_loop(queue.clone());
  spawn_scheduled_promotion_loop(queue.clone());

  let workers_cfg = Arc::new(config.workers.clone());

  let create_batches_pool = {
    let pool = pool.clone();
    let queue = queue.clone();
    let cfg = workers_cfg.clone();
    executor::spawn_pool(
      pool.clone(),
      queue.clone(),
      workers_cfg.clone(),
      CREATE_BATCHES_QUEUE,
      process_id.clone(),
      move |task: Task| {
        let pool = pool.clone();
        let queue = queue.clone();
        let cfg = cfg.clone();
        async move {
          match task {
            Task::CreateBatches { job_id } => {
              create_batches::run_once(&pool, &queue, job_id, &cfg).await
            }
            other => Err(MarathonError::ValidationError(format!(
              "create_batches executor received a {} task",
              other.queue_class()
            ))),
          }
        }
      },
    )
  };

  let process_batch_pool = {
    let pool = pool.clone();
    let bus = bus.clone();
    let cfg = workers_cfg.clone();
    executor::spawn_pool(
      pool.clone(),
      queue.clone(),
      workers_cfg.clone(),
      PROCESS_BATCH_QUEUE,
      process_id.clone(),
      move |task: Task| {
        let pool = pool.clone();
        let bus = bus.clone();
        let cfg = cfg.clone();
        async move {
          match task {
            Task::ProcessBatch { job_id, app_name, users } => {
              process_batch::run_once(&pool, bus.as_ref(), job_id, &app_name, &users, &cfg).await
            }
            other => Err(MarathonError::ValidationError(format!(
              "process_batch executor received a {} task",
              other.queue_class()
            ))),
          }
        }
      },
    )
  };

  futures::future::join_all(create_batches_pool.into_iter().chain(process_batch_pool)).await;

  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
  tokio::select! {
    res = tokio::spawn(app()) => res?,
    _ = term_signal.recv() => Ok(()),
  }
}
