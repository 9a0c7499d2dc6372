use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A message template: a JSON `body` with `{{placeholder}}` tokens and a
/// `defaults` map used as the base of the render context. Unique per
/// `(app_id, name, locale)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
  pub id: Uuid,
  pub app_id: Uuid,
  pub name: String,
  pub locale: String,
  pub defaults: Value,
  pub body: Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
