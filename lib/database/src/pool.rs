use entities::MarathonError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Opens the shared Postgres pool. Both binaries call this once at
/// startup and hand the resulting `PgPool` down to their handlers.
pub async fn connect(database_url: &str) -> Result<PgPool, MarathonError> {
  PgPoolOptions::new()
    .max_connections(20)
    .connect(database_url)
    .await
    .map_err(MarathonError::from)
}
