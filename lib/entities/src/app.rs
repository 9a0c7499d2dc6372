use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered client application. `bundle_id` is a dotted identifier
/// (e.g. `com.example.sample`) whose third segment is the canonical
/// short name used to build bus topics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct App {
  pub id: Uuid,
  pub name: String,
  pub bundle_id: String,
  pub created_by: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl App {
  /// The short name used in bus topics: the third dot-separated segment
  /// of `bundle_id`. `com.example.sample` -> `sample`.
  pub fn short_name(&self) -> Option<&str> {
    self.bundle_id.split('.').nth(2)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn app(bundle_id: &str) -> App {
    App {
      id: Uuid::nil(),
      name: "test".into(),
      bundle_id: bundle_id.into(),
      created_by: "tester".into(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn short_name_takes_third_segment() {
    assert_eq!(
      app("com.example.sample").short_name(),
      Some("sample")
    );
  }

  #[test]
  fn short_name_missing_segment_is_none() {
    assert_eq!(app("com.example").short_name(), None);
  }
}
