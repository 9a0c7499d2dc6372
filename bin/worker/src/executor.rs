//! Runs `workers.concurrency` executors per queue class, each pulling
//! one task at a time from Redis and driving it through the matching
//! handler. Mirrors the teacher's `tokio::spawn`-per-loop idiom in
//! `bin/core/src/main.rs` / `resource::spawn_*_refresh_loop`, scaled
//! out into a small fixed pool instead of a single background loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use database::jobs;
use entities::{config::WorkersConfig, JobStatus, MarathonError, Task};
use queue::QueueClient;
use sqlx::PgPool;
use tracing::{debug, error, warn};

/// What a task handler decided should happen to its reservation.
pub enum Outcome {
  /// Processing reached a durable state; remove the reservation.
  Ack,
  /// Re-queue without counting this as a retry attempt (a `paused`
  /// job, per Open Question (c)).
  Defer { delay_secs: i64 },
}

/// Spawns `cfg.concurrency` executors for `queue_class`, each looping
/// forever until the process exits. Returns their join handles so
/// `main` can await them (or let them run to process shutdown).
pub fn spawn_pool<H, Fut>(
  pool: PgPool,
  queue: QueueClient,
  cfg: Arc<WorkersConfig>,
  queue_class: &'static str,
  process_id: Arc<String>,
  handler: H,
) -> Vec<tokio::task::JoinHandle<()>>
where
  H: Fn(Task) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = Result<Outcome, MarathonError>> + Send + 'static,
{
  (0..cfg.concurrency)
    .map(|executor_id| {
      let pool = pool.clone();
      let queue = queue.clone();
      let cfg = cfg.clone();
      let process_id = process_id.clone();
      let handler = handler.clone();
      tokio::spawn(async move {
        run_executor(pool, queue, cfg, queue_class, process_id, executor_id, handler).await;
      })
    })
    .collect()
}

/// Marks `job_id`'s row `circuitbreak` once a task for it is
/// dead-lettered — either immediately (§7's `ValidationError`/
/// `UnknownService`) or after exhausting retries (§5) — so the REST
/// collaborator can surface the failure via `status`.
async fn mark_circuitbreak(pool: &PgPool, queue_class: &str, task_id: uuid::Uuid, job_id: uuid::Uuid) {
  if let Err(e) = jobs::mark_status(pool, job_id, JobStatus::Circuitbreak).await {
    error!(queue_class, %task_id, %job_id, error = %e, "failed to mark job circuitbreak");
  }
}

async fn run_executor<H, Fut>(
  pool: PgPool,
  queue: QueueClient,
  cfg: Arc<WorkersConfig>,
  queue_class: &'static str,
  process_id: Arc<String>,
  executor_id: usize,
  handler: H,
) where
  H: Fn(Task) -> Fut,
  Fut: Future<Output = Result<Outcome, MarathonError>>,
{
  loop {
    let reservation = match queue.reserve(queue_class, &process_id).await {
      Ok(Some(reservation)) => reservation,
      Ok(None) => {
        tokio::time::sleep(Duration::from_millis(200)).await;
        continue;
      }
      Err(e) => {
        error!(queue_class, executor_id, error = %e, "reserve failed");
        tokio::time::sleep(Duration::from_secs(1)).await;
        continue;
      }
    };

    let task_id = reservation.task_id;
    let task = reservation.task.clone();
    let job_id = task.job_id();

    let result = tokio::time::timeout(
      Duration::from_secs(cfg.task_timeout_secs),
      handler(task),
    )
    .await
    .unwrap_or_else(|_| {
      Err(MarathonError::TransientIO(anyhow::anyhow!(
        "task {task_id} exceeded {}s deadline",
        cfg.task_timeout_secs
      )))
    });

    match result {
      Ok(Outcome::Ack) => {
        if let Err(e) = queue.ack(queue_class, &process_id, &reservation).await {
          error!(queue_class, executor_id, %task_id, error = %e, "failed to ack task");
        } else {
          debug!(queue_class, executor_id, %task_id, "acked");
        }
      }
      Ok(Outcome::Defer { delay_secs }) => {
        if let Err(e) = queue.defer(queue_class, &process_id, &reservation, delay_secs).await {
          error!(queue_class, executor_id, %task_id, error = %e, "failed to defer task");
        }
      }
      Err(e) if matches!(e, MarathonError::ValidationError(_) | MarathonError::UnknownService(_)) => {
        warn!(queue_class, executor_id, %task_id, error = %e, "terminal error, dead-lettering without retry");
        if let Err(e) = queue.dead_letter_immediately(queue_class, &process_id, &reservation).await {
          error!(queue_class, executor_id, %task_id, error = %e, "failed to dead-letter task");
        }
        mark_circuitbreak(&pool, queue_class, task_id, job_id).await;
      }
      Err(e) if e.is_retryable() => {
        warn!(queue_class, executor_id, %task_id, error = %e, "transient failure, scheduling retry");
        match queue.retry_or_dead_letter(queue_class, &process_id, &reservation, &cfg).await {
          Ok(true) => {}
          Ok(false) => {
            warn!(queue_class, executor_id, %task_id, "retries exhausted, moved to dead-letter");
            mark_circuitbreak(&pool, queue_class, task_id, job_id).await;
          }
          Err(e) => error!(queue_class, executor_id, %task_id, error = %e, "failed to schedule retry"),
        }
      }
      Err(e) => {
        error!(queue_class, executor_id, %task_id, error = %e, "unretryable error, dead-lettering");
        if let Err(e) = queue.dead_letter_immediately(queue_class, &process_id, &reservation).await {
          error!(queue_class, executor_id, %task_id, error = %e, "failed to dead-letter task");
        }
        mark_circuitbreak(&pool, queue_class, task_id, job_id).await;
      }
    }
  }
}
