use std::sync::OnceLock;

use entities::config::{BackoffConfig, LoggingConfig, RedisConfig, StoreConfig, WorkersConfig};
use serde::Deserialize;

/// Flat environment shape, one field per §6 key with `.` replaced by
/// `_`, matching the original Go `viper` `SetEnvKeyReplacer(".", "_")`
/// convention. `envy::prefixed("MARATHON_")` maps
/// `MARATHON_WORKERS_BATCH_SIZE` onto `workers_batch_size` below.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
  workers_concurrency: usize,
  workers_redis_server: String,
  workers_redis_database: u8,
  workers_redis_pool_size: u32,
  workers_topic_template: String,
  workers_batch_size: usize,
  workers_page_size: u32,
  workers_max_retries: u32,
  workers_backoff_base_ms: u64,
  workers_backoff_cap_ms: u64,
  workers_backoff_jitter_ms: u64,
  workers_stats_port: u16,
  workers_control_group_dir: String,
  workers_task_timeout_secs: u64,
  database_url: String,
  kafka_brokers: String,
  logging_level: String,
  logging_stdio: bool,
  logging_pretty: bool,
}

impl Default for Env {
  fn default() -> Self {
    let workers = WorkersConfig::default();
    let store = StoreConfig::default();
    let logging = LoggingConfig::default();
    Self {
      workers_concurrency: workers.concurrency,
      workers_redis_server: workers.redis.server,
      workers_redis_database: workers.redis.database,
      workers_redis_pool_size: workers.redis.pool_size,
      workers_topic_template: workers.topic_template,
      workers_batch_size: workers.batch_size,
      workers_page_size: workers.page_size,
      workers_max_retries: workers.max_retries,
      workers_backoff_base_ms: workers.backoff.base_ms,
      workers_backoff_cap_ms: workers.backoff.cap_ms,
      workers_backoff_jitter_ms: workers.backoff.jitter_ms,
      workers_stats_port: workers.stats_port,
      workers_control_group_dir: workers.control_group_dir,
      workers_task_timeout_secs: workers.task_timeout_secs,
      database_url: store.database_url,
      kafka_brokers: store.kafka_brokers,
      logging_level: logging.level,
      logging_stdio: logging.stdio,
      logging_pretty: logging.pretty,
    }
  }
}

/// The worker binary's resolved configuration: everything
/// `bin/worker/src/main.rs` needs to build its pools.
pub struct WorkerConfig {
  pub workers: WorkersConfig,
  pub store: StoreConfig,
  pub logging: LoggingConfig,
}

/// Loads configuration once per process, following
/// `komodo_core::config::core_config()`: parse env, panic with context
/// on failure, cache in a `OnceLock` for the rest of the process.
pub fn worker_config() -> &'static WorkerConfig {
  static CONFIG: OnceLock<WorkerConfig> = OnceLock::new();
  CONFIG.get_or_init(|| {
    let env: Env = envy::prefixed("MARATHON_")
      .from_env()
      .unwrap_or_else(|e| panic!("failed to parse worker environment: {e:?}"));

    WorkerConfig {
      workers: WorkersConfig {
        concurrency: env.workers_concurrency,
        redis: RedisConfig {
          server: env.workers_redis_server,
          database: env.workers_redis_database,
          pool_size: env.workers_redis_pool_size,
        },
        topic_template: env.workers_topic_template,
        batch_size: env.workers_batch_size,
        page_size: env.workers_page_size,
        max_retries: env.workers_max_retries,
        backoff: BackoffConfig {
          base_ms: env.workers_backoff_base_ms,
          cap_ms: env.workers_backoff_cap_ms,
          jitter_ms: env.workers_backoff_jitter_ms,
        },
        stats_port: env.workers_stats_port,
        control_group_dir: env.workers_control_group_dir,
        task_timeout_secs: env.workers_task_timeout_secs,
      },
      store: StoreConfig { database_url: env.database_url, kafka_brokers: env.kafka_brokers },
      logging: LoggingConfig {
        level: env.logging_level,
        stdio: env.logging_stdio,
        pretty: env.logging_pretty,
      },
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn env_default_matches_entities_defaults() {
    let env = Env::default();
    assert_eq!(env.workers_concurrency, WorkersConfig::default().concurrency);
    assert_eq!(env.workers_batch_size, WorkersConfig::default().batch_size);
    assert_eq!(env.database_url, StoreConfig::default().database_url);
  }
}
