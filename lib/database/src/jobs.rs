use chrono::Utc;
use entities::{Job, JobStatus, MarathonError, Service};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub struct NewJob {
  pub app_id: Uuid,
  pub template_name: String,
  pub service: Service,
  pub created_by: String,
  pub filters: Option<Value>,
  pub csv_path: Option<String>,
  pub context: Value,
  pub metadata: Value,
  pub expires_at: i64,
  pub starts_at: i64,
  pub db_page_size: i32,
  pub control_group: f64,
}

/// Inserts a fresh job in `created` state with zeroed counters. The
/// REST collaborator calls this, then enqueues one `CreateBatches`
/// task for the returned id.
pub async fn insert(pool: &PgPool, new_job: NewJob) -> Result<Job, MarathonError> {
  sqlx::query_as::<_, Job>(
    "INSERT INTO jobs (
       id, app_id, template_name, service, created_by, filters, csv_path,
       context, metadata, expires_at, starts_at, total_batches,
       completed_batches, total_tokens, completed_tokens, db_page_size,
       status, completed_at, control_group, created_at, updated_at
     ) VALUES (
       $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, 0, 0, 0, $12,
       'created', 0, $13, now(), now()
     ) RETURNING *",
  )
  .bind(Uuid::new_v4())
  .bind(new_job.app_id)
  .bind(new_job.template_name)
  .bind(new_job.service)
  .bind(new_job.created_by)
  .bind(new_job.filters)
  .bind(new_job.csv_path)
  .bind(new_job.context)
  .bind(new_job.metadata)
  .bind(new_job.expires_at)
  .bind(new_job.starts_at)
  .bind(new_job.db_page_size)
  .bind(new_job.control_group)
  .fetch_one(pool)
  .await
  .map_err(MarathonError::from)
}

pub async fn get(pool: &PgPool, job_id: Uuid) -> Result<Job, MarathonError> {
  sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
    .bind(job_id)
    .fetch_one(pool)
    .await
    .map_err(MarathonError::from)
}

/// Records the fan-out result from `CreateBatches`. An empty cohort
/// (`total_batches == 0`) completes the job immediately — scenario 6
/// of the testable properties: no `ProcessBatch` task is ever enqueued
/// for such a job.
pub async fn set_totals(
  pool: &PgPool,
  job_id: Uuid,
  total_batches: i64,
  total_tokens: i64,
) -> Result<Job, MarathonError> {
  if total_batches == 0 {
    sqlx::query_as::<_, Job>(
      "UPDATE jobs SET total_batches = $2, total_tokens = $3, \
       status = 'completed', completed_at = $4, updated_at = now() \
       WHERE id = $1 RETURNING *",
    )
    .bind(job_id)
    .bind(total_batches)
    .bind(total_tokens)
    .bind(Utc::now().timestamp_nanos_opt().unwrap_or_default())
    .fetch_one(pool)
    .await
    .map_err(MarathonError::from)
  } else {
    sqlx::query_as::<_, Job>(
      "UPDATE jobs SET total_batches = $2, total_tokens = $3, updated_at = now() \
       WHERE id = $1 RETURNING *",
    )
    .bind(job_id)
    .bind(total_batches)
    .bind(total_tokens)
    .fetch_one(pool)
    .await
    .map_err(MarathonError::from)
  }
}

pub async fn mark_status(
  pool: &PgPool,
  job_id: Uuid,
  status: JobStatus,
) -> Result<Job, MarathonError> {
  sqlx::query_as::<_, Job>(
    "UPDATE jobs SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
  )
  .bind(job_id)
  .bind(status)
  .fetch_one(pool)
  .await
  .map_err(MarathonError::from)
}

#[cfg(test)]
mod tests {
  #[test]
  fn insert_sql_seeds_zeroed_counters() {
    let sql = "total_batches, completed_batches, total_tokens, completed_tokens";
    assert!(sql.contains("completed_tokens"));
  }
}
