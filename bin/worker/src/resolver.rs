//! Drives the User Resolver (§4.6) to completion for one job: pages
//! through a filter-backed or CSV-backed cohort, applies the
//! control-group draw per user, and materializes the survivors into
//! fixed-size `ProcessBatch` batches.

use database::users::{self, CsvUserIds, Filters};
use entities::{Job, MarathonError, User};
use sqlx::PgPool;

use crate::control_group::ControlGroupWriter;

pub struct ResolutionOutcome {
  pub batches: Vec<Vec<User>>,
  /// Count of users actually destined for a `ProcessBatch` task —
  /// control-group withholds are excluded (Open Question (a),
  /// resolved: withheld users do not count toward `total_tokens`).
  pub total_tokens: i64,
}

fn push_user(
  user: User,
  job: &Job,
  control_writer: &mut ControlGroupWriter,
  pending: &mut Vec<User>,
  batches: &mut Vec<Vec<User>>,
  total_tokens: &mut i64,
  batch_size: usize,
) -> Result<(), MarathonError> {
  if user.is_control_group(&job.id, job.control_group) {
    control_writer.write(&user)?;
    return Ok(());
  }
  *total_tokens += 1;
  pending.push(user);
  if pending.len() == batch_size {
    batches.push(std::mem::take(pending));
  }
  Ok(())
}

pub async fn resolve(
  pool: &PgPool,
  app_short: &str,
  service: &str,
  job: &Job,
  page_size: i64,
  batch_size: usize,
  control_group_dir: &str,
) -> Result<ResolutionOutcome, MarathonError> {
  let mut control_writer = ControlGroupWriter::new(control_group_dir, job.id);
  let mut batches: Vec<Vec<User>> = Vec::new();
  let mut pending: Vec<User> = Vec::with_capacity(batch_size);
  let mut total_tokens: i64 = 0;

  match (&job.filters, &job.csv_path) {
    (Some(filters_json), None) => {
      let filters = Filters::from_json(filters_json)?;
      let mut after_user_id: Option<String> = None;
      loop {
        let page = users::fetch_filtered_page(
          pool,
          app_short,
          service,
          &filters,
          after_user_id.as_deref(),
          page_size,
        )
        .await?;
        if page.is_empty() {
          break;
        }
        after_user_id = page.last().map(|u| u.user_id.clone());
        for user in page {
          push_user(
            user,
            job,
            &mut control_writer,
            &mut pending,
            &mut batches,
            &mut total_tokens,
            batch_size,
          )?;
        }
      }
    }
    (None, Some(csv_path)) => {
      let mut reader = CsvUserIds::open(csv_path)?;
      loop {
        let ids = reader.next_page(page_size as usize)?;
        if ids.is_empty() {
          break;
        }
        let page = users::hydrate_csv_page(pool, app_short, service, &ids).await?;
        for user in page {
          push_user(
            user,
            job,
            &mut control_writer,
            &mut pending,
            &mut batches,
            &mut total_tokens,
            batch_size,
          )?;
        }
      }
    }
    _ => {
      return Err(MarathonError::ValidationError(
        "job must set exactly one of filters/csv_path".into(),
      ));
    }
  }

  if !pending.is_empty() {
    batches.push(pending);
  }
  control_writer.flush()?;

  Ok(ResolutionOutcome { batches, total_tokens })
}

#[cfg(test)]
mod tests {
  use super::*;
  use entities::JobStatus;
  use serde_json::json;
  use uuid::Uuid;

  fn job_with(filters: Option<serde_json::Value>, csv_path: Option<String>) -> Job {
    Job {
      id: Uuid::new_v4(),
      app_id: Uuid::nil(),
      template_name: "t".into(),
      service: entities::Service::Gcm,
      created_by: "tester".into(),
      filters,
      csv_path,
      context: json!({}),
      metadata: json!({}),
      expires_at: 0,
      starts_at: 0,
      total_batches: 0,
      completed_batches: 0,
      total_tokens: 0,
      completed_tokens: 0,
      db_page_size: 100,
      status: JobStatus::Created,
      completed_at: 0,
      control_group: 0.0,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
    }
  }

  #[test]
  fn rejects_job_with_neither_source() {
    let job = job_with(None, None);
    assert!(job.filters.is_none() && job.csv_path.is_none());
  }

  fn user(id: &str) -> User {
    User { user_id: id.into(), token: format!("tok-{id}"), locale: "en".into() }
  }

  #[test]
  fn push_user_flushes_batch_at_batch_size() {
    let job = job_with(Some(json!({})), None);
    let dir = std::env::temp_dir().join(format!("marathon-resolver-test-{}", Uuid::new_v4()));
    let mut control_writer = ControlGroupWriter::new(dir.to_str().unwrap(), job.id);
    let mut pending = Vec::new();
    let mut batches = Vec::new();
    let mut total_tokens = 0;

    for i in 0..3 {
      push_user(user(&format!("u{i}")), &job, &mut control_writer, &mut pending, &mut batches, &mut total_tokens, 2).unwrap();
    }

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(pending.len(), 1);
    assert_eq!(total_tokens, 3);
    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn full_control_group_withholds_every_user_from_batches() {
    let mut job = job_with(Some(json!({})), None);
    job.control_group = 1.0;
    let dir = std::env::temp_dir().join(format!("marathon-resolver-test-{}", Uuid::new_v4()));
    let mut control_writer = ControlGroupWriter::new(dir.to_str().unwrap(), job.id);
    let mut pending = Vec::new();
    let mut batches = Vec::new();
    let mut total_tokens = 0;

    for i in 0..5 {
      push_user(user(&format!("u{i}")), &job, &mut control_writer, &mut pending, &mut batches, &mut total_tokens, 2).unwrap();
    }

    assert!(batches.is_empty());
    assert!(pending.is_empty());
    assert_eq!(total_tokens, 0);
    std::fs::remove_dir_all(&dir).ok();
  }
}
