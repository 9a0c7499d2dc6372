use anyhow::Context;
use entities::config::LoggingConfig;
use tracing_subscriber::{
  layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Initializes the global `tracing` subscriber. Each binary calls this
/// exactly once from `main`, before anything else logs.
///
/// `stdio = true` writes human-oriented text (plain, or `pretty` when
/// `config.pretty` is set); `stdio = false` writes one JSON object per
/// line, for log-shipping setups.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
  let filter = EnvFilter::try_new(&config.level)
    .unwrap_or_else(|_| EnvFilter::new("info"));

  let registry = Registry::default().with(filter);

  match (config.stdio, config.pretty) {
    (true, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (true, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (false, _) => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
  }
  .context("failed to init logger")
}
