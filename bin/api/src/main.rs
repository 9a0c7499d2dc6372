#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod error;
mod routes;
mod state;

use config::api_config;
use state::AppState;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = api_config();
  logger::init(&config.logging)?;

  info!("Marathon API version: v{}", env!("CARGO_PKG_VERSION"));

  let pool = database::connect(&config.store.database_url).await?;
  let queue = queue::QueueClient::connect(&config.redis.connection_url()).await?;

  let state = AppState { pool, queue };

  let router = Router::new()
    .merge(routes::router())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(state);

  let addr = format!("{}:{}", config.api.bind_ip, config.api.port);
  let socket_addr = SocketAddr::from_str(&addr).context("failed to parse listen address")?;

  info!("Marathon API starting on http://{socket_addr}");
  let listener = tokio::net::TcpListener::bind(socket_addr).await?;
  axum::serve(listener, router).await.context("failed to start http server")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
  tokio::select! {
    res = tokio::spawn(app()) => res?,
    _ = term_signal.recv() => Ok(()),
  }
}
