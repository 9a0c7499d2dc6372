//! Redis-backed job queue, grounded in the pack's `apalis-redis` storage
//! backend: a ready list, a ZSET of deferred retries, and a hash of
//! in-progress tasks keyed by owning process for crash recovery.
//!
//! Unlike `apalis-redis` this does not reach for Lua `Script` atomics —
//! Marathon's protocol is simple enough for plain multi-command
//! pipelines (see DESIGN.md for why that tradeoff is acceptable here).

use entities::{config::WorkersConfig, MarathonError, Task};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

fn active_list(queue: &str) -> String {
  format!("queue:{queue}")
}

fn scheduled_set(queue: &str) -> String {
  format!("queue:{queue}:schedule")
}

fn dead_list(queue: &str) -> String {
  format!("queue:{queue}:dead")
}

fn in_progress_hash(queue: &str, process_id: &str) -> String {
  format!("queue:{queue}:in_progress:{process_id}")
}

fn consumers_set(queue: &str) -> String {
  format!("queue:{queue}:consumers")
}

fn now_secs() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .expect("system clock before epoch")
    .as_secs() as i64
}

/// The on-wire envelope, matching §6: `{ class, args, jid, retry, at }`
/// plus an `attempt` counter used locally to drive backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueMessage {
  #[serde(flatten)]
  task: Task,
  jid: Uuid,
  retry: bool,
  at: Option<i64>,
  #[serde(default)]
  attempt: u32,
}

/// A task popped off the queue, paired with the bookkeeping needed to
/// ack or retry it.
#[derive(Debug, Clone)]
pub struct Reservation {
  pub task_id: Uuid,
  pub task: Task,
  pub attempt: u32,
  payload: String,
}

#[derive(Clone)]
pub struct QueueClient {
  conn: ConnectionManager,
}

impl QueueClient {
  pub async fn connect(url: &str) -> Result<Self, MarathonError> {
    let client = Client::open(url)
      .map_err(|e| MarathonError::TransientIO(e.into()))?;
    let conn = client
      .get_connection_manager()
      .await
      .map_err(|e| MarathonError::TransientIO(e.into()))?;
    Ok(Self { conn })
  }

  /// Pushes a new task onto the ready list. Returns its task id.
  pub async fn enqueue(&self, task: Task) -> Result<Uuid, MarathonError> {
    let jid = Uuid::new_v4();
    let message = QueueMessage { task: task.clone(), jid, retry: true, at: None, attempt: 0 };
    let payload = serde_json::to_string(&message)
      .map_err(|e| MarathonError::Other(e.into()))?;
    let mut conn = self.conn.clone();
    let key = active_list(task.queue_class());
    let _: () = conn.lpush(&key, payload).await?;
    debug!(queue = task.queue_class(), jid = %jid, "enqueued task");
    Ok(jid)
  }

  /// Defers a task into the scheduled ZSET, to be promoted back onto
  /// the ready list once `delay_secs` has elapsed.
  async fn schedule_retry(
    &self,
    queue_class: &str,
    message: &QueueMessage,
    delay_secs: i64,
  ) -> Result<(), MarathonError> {
    let payload = serde_json::to_string(message)
      .map_err(|e| MarathonError::Other(e.into()))?;
    let score = now_secs() + delay_secs;
    let mut conn = self.conn.clone();
    let _: () = conn
      .zadd(scheduled_set(queue_class), payload, score)
      .await?;
    Ok(())
  }

  /// Promotes any scheduled tasks whose deadline has passed onto the
  /// ready list. Returns the number moved; callers run this on a timer
  /// per queue class.
  pub async fn enqueue_scheduled(&self, queue_class: &str) -> Result<u64, MarathonError> {
    let mut conn = self.conn.clone();
    let due: Vec<String> = conn
      .zrangebyscore(scheduled_set(queue_class), 0, now_secs())
      .await?;
    for payload in &due {
      let _: () = conn.lpush(active_list(queue_class), payload).await?;
      let _: () = conn.zrem(scheduled_set(queue_class), payload).await?;
    }
    Ok(due.len() as u64)
  }

  /// Registers this worker instance as alive so orphan reclamation can
  /// tell its in-progress entries apart from a dead process's.
  pub async fn register_process(&self, queue_class: &str, process_id: &str) -> Result<(), MarathonError> {
    let mut conn = self.conn.clone();
    let _: () = conn.sadd(consumers_set(queue_class), process_id).await?;
    Ok(())
  }

  pub async fn deregister_process(&self, queue_class: &str, process_id: &str) -> Result<(), MarathonError> {
    let mut conn = self.conn.clone();
    let _: () = conn.srem(consumers_set(queue_class), process_id).await?;
    Ok(())
  }

  /// Pops one task for `process_id` off the ready list and records it
  /// as in-progress. Returns `None` if nothing is ready.
  pub async fn reserve(
    &self,
    queue_class: &str,
    process_id: &str,
  ) -> Result<Option<Reservation>, MarathonError> {
    let mut conn = self.conn.clone();
    let payload: Option<String> = conn.rpop(active_list(queue_class), None).await?;
    let Some(payload) = payload else { return Ok(None) };
    let message: QueueMessage = serde_json::from_str(&payload)
      .map_err(|e| MarathonError::ValidationError(e.to_string()))?;
    let _: () = conn
      .hset(in_progress_hash(queue_class, process_id), message.jid.to_string(), &payload)
      .await?;
    Ok(Some(Reservation {
      task_id: message.jid,
      task: message.task,
      attempt: message.attempt,
      payload,
    }))
  }

  /// Marks a reservation as durably processed.
  pub async fn ack(
    &self,
    queue_class: &str,
    process_id: &str,
    reservation: &Reservation,
  ) -> Result<(), MarathonError> {
    let mut conn = self.conn.clone();
    let _: () = conn
      .hdel(in_progress_hash(queue_class, process_id), reservation.task_id.to_string())
      .await?;
    Ok(())
  }

  /// Either reschedules `reservation` with exponential backoff, or, past
  /// `max_retries`, moves it to the dead-letter list.
  pub async fn retry_or_dead_letter(
    &self,
    queue_class: &str,
    process_id: &str,
    reservation: &Reservation,
    cfg: &WorkersConfig,
  ) -> Result<bool, MarathonError> {
    let mut message: QueueMessage = serde_json::from_str(&reservation.payload)
      .map_err(|e| MarathonError::Other(e.into()))?;
    message.attempt += 1;

    let mut conn = self.conn.clone();
    let hash = in_progress_hash(queue_class, process_id);
    let _: () = conn.hdel(&hash, reservation.task_id.to_string()).await?;

    if message.attempt >= cfg.max_retries {
      let payload = serde_json::to_string(&message)
        .map_err(|e| MarathonError::Other(e.into()))?;
      let _: () = conn.lpush(dead_list(queue_class), payload).await?;
      warn!(queue = queue_class, jid = %reservation.task_id, "task moved to dead-letter");
      return Ok(false);
    }

    let delay = backoff_secs(&cfg.backoff, message.attempt);
    self.schedule_retry(queue_class, &message, delay).await?;
    Ok(true)
  }

  /// Reclaims tasks left in-progress by process ids no longer present
  /// in the consumers set, pushing them back onto the ready list.
  /// Heartbeat-free: a process that crashed never deregistered, so its
  /// hash key lingers until this runs.
  pub async fn reclaim_orphaned(
    &self,
    queue_class: &str,
    dead_process_ids: &[String],
  ) -> Result<u64, MarathonError> {
    let mut conn = self.conn.clone();
    let mut reclaimed = 0u64;
    for process_id in dead_process_ids {
      let hash = in_progress_hash(queue_class, process_id);
      let entries: std::collections::HashMap<String, String> = conn.hgetall(&hash).await?;
      for (_jid, payload) in entries {
        let _: () = conn.lpush(active_list(queue_class), &payload).await?;
        reclaimed += 1;
      }
      let _: () = conn.del(&hash).await?;
    }
    Ok(reclaimed)
  }

  /// Lists the process ids that currently own an `in_progress` hash
  /// for `queue_class`, alive or not — the candidate set for orphan
  /// detection.
  async fn in_progress_process_ids(&self, queue_class: &str) -> Result<Vec<String>, MarathonError> {
    let mut conn = self.conn.clone();
    let pattern = format!("{}:*", in_progress_hash(queue_class, ""));
    let keys: Vec<String> = conn.keys(&pattern).await?;
    let prefix = in_progress_hash(queue_class, "");
    Ok(
      keys
        .into_iter()
        .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
        .collect(),
    )
  }

  /// One pass of heartbeat-free orphan recovery: diffs the process ids
  /// holding `in_progress` entries against the registered consumers set
  /// and reclaims whatever is left over. Intended to run on a timer
  /// from each binary's startup, one call per queue class.
  pub async fn reclaim_orphans(&self, queue_class: &str) -> Result<u64, MarathonError> {
    let mut conn = self.conn.clone();
    let alive: std::collections::HashSet<String> =
      conn.smembers(consumers_set(queue_class)).await?;
    let holders = self.in_progress_process_ids(queue_class).await?;
    let dead: Vec<String> = holders.into_iter().filter(|p| !alive.contains(p)).collect();
    if dead.is_empty() {
      return Ok(0);
    }
    debug!(queue = queue_class, ?dead, "reclaiming orphaned in-progress tasks");
    self.reclaim_orphaned(queue_class, &dead).await
  }

  /// Defers a task without treating it as a retry attempt — used when
  /// a `ProcessBatch` task observes `status == paused` and should be
  /// re-tried later rather than acked or counted against
  /// `max_retries` (Open Question (c), resolved toward defer).
  pub async fn defer(
    &self,
    queue_class: &str,
    process_id: &str,
    reservation: &Reservation,
    delay_secs: i64,
  ) -> Result<(), MarathonError> {
    let message: QueueMessage = serde_json::from_str(&reservation.payload)
      .map_err(|e| MarathonError::Other(e.into()))?;
    let mut conn = self.conn.clone();
    let _: () = conn
      .hdel(in_progress_hash(queue_class, process_id), reservation.task_id.to_string())
      .await?;
    self.schedule_retry(queue_class, &message, delay_secs).await
  }

  /// Moves a reservation straight to the dead-letter list, bypassing
  /// the backoff schedule — for terminal errors (`ValidationError`,
  /// `UnknownService`) that must never be retried.
  pub async fn dead_letter_immediately(
    &self,
    queue_class: &str,
    process_id: &str,
    reservation: &Reservation,
  ) -> Result<(), MarathonError> {
    let mut conn = self.conn.clone();
    let _: () = conn
      .hdel(in_progress_hash(queue_class, process_id), reservation.task_id.to_string())
      .await?;
    let _: () = conn.lpush(dead_list(queue_class), &reservation.payload).await?;
    warn!(queue = queue_class, jid = %reservation.task_id, "task moved to dead-letter (terminal error)");
    Ok(())
  }
}

/// `min(base * 2^attempt, cap) + jitter`, per §5.
fn backoff_secs(backoff: &entities::config::BackoffConfig, attempt: u32) -> i64 {
  let exp = backoff.base_ms.saturating_mul(1u64 << attempt.min(20));
  let capped = exp.min(backoff.cap_ms);
  let jittered = capped.saturating_add(backoff.jitter_ms);
  (jittered / 1000).max(1) as i64
}

#[cfg(test)]
mod tests {
  use super::*;
  use entities::config::BackoffConfig;

  #[test]
  fn backoff_grows_exponentially_until_cap() {
    let cfg = BackoffConfig { base_ms: 500, cap_ms: 10_000, jitter_ms: 0 };
    let d0 = backoff_secs(&cfg, 0);
    let d1 = backoff_secs(&cfg, 1);
    let d2 = backoff_secs(&cfg, 2);
    assert!(d0 <= d1);
    assert!(d1 <= d2);
  }

  #[test]
  fn backoff_respects_cap() {
    let cfg = BackoffConfig { base_ms: 500, cap_ms: 2_000, jitter_ms: 0 };
    let d = backoff_secs(&cfg, 10);
    assert_eq!(d, 2);
  }

  #[test]
  fn queue_message_round_trips_with_class_tag() {
    let task = Task::CreateBatches { job_id: Uuid::nil() };
    let message = QueueMessage { task, jid: Uuid::nil(), retry: true, at: None, attempt: 0 };
    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["class"], "CreateBatches");
    assert_eq!(json["jid"], Uuid::nil().to_string());
    let back: QueueMessage = serde_json::from_value(json).unwrap();
    assert_eq!(back.jid, message.jid);
  }

  #[test]
  fn key_naming_is_namespaced_per_queue_class() {
    assert_eq!(active_list("process_batch"), "queue:process_batch");
    assert_eq!(dead_list("process_batch"), "queue:process_batch:dead");
    assert_eq!(
      in_progress_hash("process_batch", "p1"),
      "queue:process_batch:in_progress:p1"
    );
  }

  #[test]
  fn in_progress_hash_prefix_strips_cleanly() {
    let key = in_progress_hash("process_batch", "worker-7");
    let prefix = in_progress_hash("process_batch", "");
    assert_eq!(key.strip_prefix(&prefix), Some("worker-7"));
  }
}
