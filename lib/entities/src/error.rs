use thiserror::Error;

/// The error kinds a job execution or API call can surface. Each
/// variant maps to one retry/terminal decision in the worker and one
/// status code in the REST slice; see the queue's retry policy for how
/// `TransientIO` differs from the terminal variants.
#[derive(Debug, Error)]
pub enum MarathonError {
  #[error("validation error: {0}")]
  ValidationError(String),

  #[error("transient I/O error: {0}")]
  TransientIO(#[source] anyhow::Error),

  #[error("render error: {0}")]
  RenderError(String),

  #[error("unknown service: {0}")]
  UnknownService(String),

  #[error("job stopped")]
  JobStopped,

  #[error("progress update conflict")]
  ProgressConflict,

  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl MarathonError {
  /// Whether the queue should schedule a retry (with backoff) or move
  /// the task straight to the dead-letter set.
  pub fn is_retryable(&self) -> bool {
    matches!(self, MarathonError::TransientIO(_) | MarathonError::ProgressConflict)
  }
}

impl From<sqlx::Error> for MarathonError {
  fn from(err: sqlx::Error) -> Self {
    MarathonError::TransientIO(err.into())
  }
}

impl From<redis::RedisError> for MarathonError {
  fn from(err: redis::RedisError) -> Self {
    MarathonError::TransientIO(err.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transient_and_conflict_are_retryable() {
    assert!(MarathonError::TransientIO(anyhow::anyhow!("x")).is_retryable());
    assert!(MarathonError::ProgressConflict.is_retryable());
  }

  #[test]
  fn validation_and_stopped_are_terminal() {
    assert!(!MarathonError::ValidationError("x".into()).is_retryable());
    assert!(!MarathonError::JobStopped.is_retryable());
    assert!(!MarathonError::UnknownService("sms".into()).is_retryable());
  }
}
