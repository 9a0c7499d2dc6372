//! Stage A (§4.7): resolves a job's cohort and fans it out into
//! `ProcessBatch` tasks.
//!
//! ```text
//! INIT -> RESOLVING -> WRITTEN_TOTALS -> FANOUT -> DONE
//! ```
//! All four states run inline in [`run_once`] — there is no
//! persisted state machine, since a retried `CreateBatches` task
//! simply restarts resolution from `INIT` (the worker holds no
//! cursor across task attempts).

use database::{apps, jobs as jobs_db};
use entities::{config::WorkersConfig, JobStatus, MarathonError, Task};
use queue::QueueClient;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::executor::Outcome;
use crate::resolver;

pub async fn run_once(
  pool: &PgPool,
  queue: &QueueClient,
  job_id: Uuid,
  cfg: &WorkersConfig,
) -> Result<Outcome, MarathonError> {
  let job = jobs_db::get(pool, job_id).await?;

  if job.status != JobStatus::Created {
    info!(%job_id, status = ?job.status, "job not in created state, skipping CreateBatches");
    return Ok(Outcome::Ack);
  }

  let app = apps::get(pool, job.app_id).await?;
  let app_short = app.short_name().ok_or_else(|| {
    MarathonError::ValidationError(format!(
      "app {} bundle_id `{}` has no third dotted segment for a short name",
      app.id, app.bundle_id
    ))
  })?;

  let page_size =
    if job.db_page_size > 0 { job.db_page_size as i64 } else { cfg.page_size as i64 };

  let outcome = resolver::resolve(
    pool,
    app_short,
    job.service.as_str(),
    &job,
    page_size,
    cfg.batch_size,
    &cfg.control_group_dir,
  )
  .await?;

  let total_batches = outcome.batches.len() as i64;

  // WRITTEN_TOTALS: persisted before any ProcessBatch task exists, so
  // the first batch to complete never observes total_batches == 0.
  jobs_db::set_totals(pool, job.id, total_batches, outcome.total_tokens).await?;

  if total_batches == 0 {
    info!(%job_id, "empty cohort, job completed with no ProcessBatch tasks");
    return Ok(Outcome::Ack);
  }

  // FANOUT
  for batch in outcome.batches {
    let task =
      Task::ProcessBatch { job_id: job.id, app_name: app_short.to_string(), users: batch };
    queue.enqueue(task).await?;
  }

  info!(
    %job_id,
    total_batches,
    total_tokens = outcome.total_tokens,
    "fanned out ProcessBatch tasks"
  );
  Ok(Outcome::Ack)
}
