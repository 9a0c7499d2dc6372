use queue::QueueClient;
use sqlx::PgPool;

/// Shared handler state: the database pool and the queue client used
/// to enqueue the one `CreateBatches` task a new job needs.
#[derive(Clone)]
pub struct AppState {
  pub pool: PgPool,
  pub queue: QueueClient,
}
