use std::sync::OnceLock;

use entities::config::{ApiConfig, LoggingConfig, RedisConfig, StoreConfig};
use serde::Deserialize;

/// Flat environment shape for the in-scope REST slice, following the
/// same `MARATHON_`-prefixed, `.`-to-`_` convention as the worker
/// binary's [`crate::config`] (see its doc comment for the rationale).
/// The API only ever enqueues — never reserves — so it shares the
/// `workers.redis.*` keys but none of the rest of `WorkersConfig`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
  api_bind_ip: String,
  api_port: u16,
  workers_redis_server: String,
  workers_redis_database: u8,
  workers_redis_pool_size: u32,
  database_url: String,
  kafka_brokers: String,
  logging_level: String,
  logging_stdio: bool,
  logging_pretty: bool,
}

impl Default for Env {
  fn default() -> Self {
    let api = ApiConfig::default();
    let redis = RedisConfig::default();
    let store = StoreConfig::default();
    let logging = LoggingConfig::default();
    Self {
      api_bind_ip: api.bind_ip,
      api_port: api.port,
      workers_redis_server: redis.server,
      workers_redis_database: redis.database,
      workers_redis_pool_size: redis.pool_size,
      database_url: store.database_url,
      kafka_brokers: store.kafka_brokers,
      logging_level: logging.level,
      logging_stdio: logging.stdio,
      logging_pretty: logging.pretty,
    }
  }
}

pub struct ApiRuntimeConfig {
  pub api: ApiConfig,
  pub redis: RedisConfig,
  pub store: StoreConfig,
  pub logging: LoggingConfig,
}

/// Loads configuration once per process, mirroring
/// `komodo_core::config::core_config()`.
pub fn api_config() -> &'static ApiRuntimeConfig {
  static CONFIG: OnceLock<ApiRuntimeConfig> = OnceLock::new();
  CONFIG.get_or_init(|| {
    let env: Env = envy::prefixed("MARATHON_")
      .from_env()
      .unwrap_or_else(|e| panic!("failed to parse api environment: {e:?}"));

    ApiRuntimeConfig {
      api: ApiConfig { bind_ip: env.api_bind_ip, port: env.api_port },
      redis: RedisConfig {
        server: env.workers_redis_server,
        database: env.workers_redis_database,
        pool_size: env.workers_redis_pool_size,
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
    assert_eq!(env.api_port, ApiConfig::default().port);
    assert_eq!(env.database_url, StoreConfig::default().database_url);
  }
}
