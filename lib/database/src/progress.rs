use entities::MarathonError;
use sqlx::PgPool;
use uuid::Uuid;

/// Result of the conditional progress update: the row's counters
/// *after* this increment was applied.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ProgressUpdate {
  pub completed_batches: i64,
  pub total_batches: i64,
}

impl ProgressUpdate {
  /// Whoever observes `completed_batches == total_batches` right after
  /// applying their own increment is the unique finalizer for the job.
  pub fn is_final_batch(&self) -> bool {
    self.total_batches > 0 && self.completed_batches == self.total_batches
  }
}

/// Atomically increments a job's batch and token counters by one
/// completed `ProcessBatch` task, per §4.5. `completed_at` is set in
/// the same statement when this increment finishes the job, so there
/// is never a window where `completed_batches == total_batches` but
/// `completed_at == 0`.
pub async fn record_batch_completion(
  pool: &PgPool,
  job_id: Uuid,
  tokens_completed: i64,
  now_nanos: i64,
) -> Result<ProgressUpdate, MarathonError> {
  sqlx::query_as::<_, ProgressUpdate>(
    "UPDATE jobs SET \
       completed_batches = completed_batches + 1, \
       completed_tokens = completed_tokens + $2, \
       completed_at = CASE WHEN completed_batches + 1 = total_batches \
                           THEN $3 ELSE completed_at END, \
       status = CASE WHEN completed_batches + 1 = total_batches \
                     THEN 'completed' ELSE status END, \
       updated_at = now() \
     WHERE id = $1 \
     RETURNING completed_batches, total_batches",
  )
  .bind(job_id)
  .bind(tokens_completed)
  .bind(now_nanos)
  .fetch_optional(pool)
  .await
  .map_err(MarathonError::from)?
  .ok_or(MarathonError::ProgressConflict)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn final_batch_requires_nonzero_total() {
    let progress = ProgressUpdate { completed_batches: 0, total_batches: 0 };
    assert!(!progress.is_final_batch());
  }

  #[test]
  fn final_batch_detects_equal_counters() {
    let progress = ProgressUpdate { completed_batches: 3, total_batches: 3 };
    assert!(progress.is_final_batch());
  }

  #[test]
  fn not_final_when_counters_differ() {
    let progress = ProgressUpdate { completed_batches: 1, total_batches: 3 };
    assert!(!progress.is_final_batch());
  }
}
