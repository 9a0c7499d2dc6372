use serde::Deserialize;

/// Exponential backoff schedule for retried tasks:
/// `min(base * 2^attempt, cap) + jitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
  pub base_ms: u64,
  pub cap_ms: u64,
  pub jitter_ms: u64,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self { base_ms: 500, cap_ms: 60_000, jitter_ms: 250 }
  }
}

/// `workers.redis.*` — the queue backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
  pub server: String,
  pub database: u8,
  pub pool_size: u32,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self { server: "localhost:6379".into(), database: 0, pool_size: 10 }
  }
}

impl RedisConfig {
  pub fn connection_url(&self) -> String {
    format!("redis://{}/{}", self.server, self.database)
  }
}

/// `workers.*` — shared by both executor pools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
  pub concurrency: usize,
  pub redis: RedisConfig,
  pub topic_template: String,
  pub batch_size: usize,
  pub page_size: u32,
  pub max_retries: u32,
  pub backoff: BackoffConfig,
  pub stats_port: u16,
  /// Directory control-group CSV artifacts are written to, one file
  /// per job (`{job_id}.csv`). Not one of the enumerated §6 keys in
  /// the distilled spec; added so §3's "written to a separate CSV
  /// artifact" has somewhere concrete to land.
  pub control_group_dir: String,
  /// Per-task deadline honored across the Redis reserve, database, and
  /// bus suspension points (§5); on expiry the task is released back
  /// to the queue for retry.
  pub task_timeout_secs: u64,
}

impl Default for WorkersConfig {
  fn default() -> Self {
    Self {
      concurrency: 10,
      redis: RedisConfig::default(),
      topic_template: "push-%s-%s".into(),
      batch_size: 1000,
      page_size: 1000,
      max_retries: 5,
      backoff: BackoffConfig::default(),
      stats_port: 8081,
      control_group_dir: "./control_groups".into(),
      task_timeout_secs: 30,
    }
  }
}

/// `database.url` and `kafka.brokers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub database_url: String,
  pub kafka_brokers: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      database_url: "postgres://localhost:5432/marathon?sslmode=disable"
        .into(),
      kafka_brokers: "localhost:9092".into(),
    }
  }
}

/// `api.bindIp` / `api.port` — the in-scope REST slice's listen address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub bind_ip: String,
  pub port: u16,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self { bind_ip: "0.0.0.0".into(), port: 9000 }
  }
}

/// `logging.*` — passed straight to `logger::init`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub level: String,
  pub stdio: bool,
  pub pretty: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self { level: "info".into(), stdio: true, pretty: false }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn worker_defaults_match_the_documented_values() {
    let cfg = WorkersConfig::default();
    assert_eq!(cfg.concurrency, 10);
    assert_eq!(cfg.batch_size, 1000);
    assert_eq!(cfg.redis.server, "localhost:6379");
    assert_eq!(cfg.redis.pool_size, 10);
  }

  #[test]
  fn redis_connection_url_embeds_database_index() {
    let cfg = RedisConfig { server: "redis.local:6379".into(), database: 3, pool_size: 5 };
    assert_eq!(cfg.connection_url(), "redis://redis.local:6379/3");
  }

  #[test]
  fn store_config_default_database_url_matches_original() {
    let cfg = StoreConfig::default();
    assert_eq!(cfg.database_url, "postgres://localhost:5432/marathon?sslmode=disable");
  }
}
