use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::User;

/// The two stages of job execution, serialized as the queue's task
/// payload. `class` in the wire form mirrors the Go worker's job
/// class names so the queue layer can route by it without deserializing
/// the full payload first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class", content = "args")]
pub enum Task {
  #[serde(rename = "CreateBatches")]
  CreateBatches { job_id: Uuid },

  #[serde(rename = "ProcessBatch")]
  ProcessBatch {
    job_id: Uuid,
    app_name: String,
    users: Vec<User>,
  },
}

impl Task {
  pub fn job_id(&self) -> Uuid {
    match self {
      Task::CreateBatches { job_id } => *job_id,
      Task::ProcessBatch { job_id, .. } => *job_id,
    }
  }

  /// The queue class this task is dispatched on; batching and
  /// processing scale independently so each gets its own worker pool.
  pub fn queue_class(&self) -> &'static str {
    match self {
      Task::CreateBatches { .. } => "create_batches",
      Task::ProcessBatch { .. } => "process_batch",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn serializes_with_class_tag() {
    let task = Task::CreateBatches { job_id: Uuid::nil() };
    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["class"], "CreateBatches");
    assert_eq!(value["args"]["job_id"], Uuid::nil().to_string());
  }

  #[test]
  fn queue_class_differs_per_stage() {
    let create = Task::CreateBatches { job_id: Uuid::nil() };
    let process = Task::ProcessBatch {
      job_id: Uuid::nil(),
      app_name: "sample".into(),
      users: vec![],
    };
    assert_ne!(create.queue_class(), process.queue_class());
  }

  #[test]
  fn job_id_accessor_works_for_both_variants() {
    let id = Uuid::new_v4();
    let create = Task::CreateBatches { job_id: id };
    let process = Task::ProcessBatch {
      job_id: id,
      app_name: "sample".into(),
      users: vec![],
    };
    assert_eq!(create.job_id(), id);
    assert_eq!(process.job_id(), id);
  }
}
