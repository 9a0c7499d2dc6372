use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Downstream push provider kind.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Service {
  Apns,
  Gcm,
}

impl Service {
  pub fn as_str(&self) -> &'static str {
    match self {
      Service::Apns => "apns",
      Service::Gcm => "gcm",
    }
  }
}

impl std::str::FromStr for Service {
  type Err = crate::MarathonError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "apns" => Ok(Service::Apns),
      "gcm" => Ok(Service::Gcm),
      other => {
        Err(crate::MarathonError::UnknownService(other.to_string()))
      }
    }
  }
}

/// Job lifecycle state. See the `jobs` table invariants: `completed_at`
/// is non-zero iff `status == Completed`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Created,
  Circuitbreak,
  Paused,
  Stopped,
  Expired,
  Completed,
}

impl JobStatus {
  /// Jobs in these states must not accept further `ProcessBatch`
  /// progress: `Stopped`/`Expired` are external cancellations, and
  /// `Circuitbreak` (§7) means a prior task for this job already
  /// dead-lettered fatally — the job "stops consuming batches".
  pub fn is_halted(&self) -> bool {
    matches!(self, JobStatus::Stopped | JobStatus::Expired | JobStatus::Circuitbreak)
  }
}

/// One bulk-push execution: a (cohort x template x context x service)
/// unit of work. Workers hold no copy of this beyond the current task —
/// every status decision re-reads or conditionally updates the row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
  pub id: Uuid,
  pub app_id: Uuid,
  pub template_name: String,
  pub service: Service,
  pub created_by: String,

  pub filters: Option<Value>,
  pub csv_path: Option<String>,

  pub context: Value,
  pub metadata: Value,

  /// Nanosecond epoch.
  pub expires_at: i64,
  /// Nanosecond epoch.
  pub starts_at: i64,

  pub total_batches: i64,
  pub completed_batches: i64,
  pub total_tokens: i64,
  pub completed_tokens: i64,

  pub db_page_size: i32,

  pub status: JobStatus,
  /// Nanosecond epoch; zero means "not completed yet".
  pub completed_at: i64,

  pub control_group: f64,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Job {
  /// `push_expiry = expires_at / 1e9` (seconds), per §3.
  pub fn push_expiry(&self) -> i64 {
    self.expires_at / 1_000_000_000
  }

  pub fn is_expired(&self, now_nanos: i64) -> bool {
    self.expires_at < now_nanos
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  #[test]
  fn push_expiry_divides_by_1e9() {
    let job = sample_job(1_700_000_000_000_000_000);
    assert_eq!(job.push_expiry(), 1_700_000_000);
  }

  #[test]
  fn service_round_trips_through_str() {
    assert_eq!(Service::from_str("apns").unwrap(), Service::Apns);
    assert_eq!(Service::from_str("gcm").unwrap(), Service::Gcm);
    assert!(Service::from_str("sms").is_err());
  }

  #[test]
  fn halted_statuses() {
    assert!(JobStatus::Stopped.is_halted());
    assert!(JobStatus::Expired.is_halted());
    assert!(JobStatus::Circuitbreak.is_halted());
    assert!(!JobStatus::Created.is_halted());
    assert!(!JobStatus::Paused.is_halted());
  }

  fn sample_job(expires_at: i64) -> Job {
    Job {
      id: Uuid::nil(),
      app_id: Uuid::nil(),
      template_name: "t".into(),
      service: Service::Gcm,
      created_by: "tester".into(),
      filters: None,
      csv_path: None,
      context: Value::Null,
      metadata: Value::Null,
      expires_at,
      starts_at: 0,
      total_batches: 0,
      completed_batches: 0,
      total_tokens: 0,
      completed_tokens: 0,
      db_page_size: 1000,
      status: JobStatus::Created,
      completed_at: 0,
      control_group: 0.0,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }
}
