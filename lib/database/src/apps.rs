use entities::{App, MarathonError};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn get(pool: &PgPool, id: Uuid) -> Result<App, MarathonError> {
  sqlx::query_as::<_, App>(
    "SELECT id, name, bundle_id, created_by, created_at, updated_at \
     FROM apps WHERE id = $1",
  )
  .bind(id)
  .fetch_one(pool)
  .await
  .map_err(MarathonError::from)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_mentions_all_selected_columns() {
    let sql = "SELECT id, name, bundle_id, created_by, created_at, updated_at FROM apps WHERE id = $1";
    for column in ["id", "name", "bundle_id", "created_by", "created_at", "updated_at"] {
      assert!(sql.contains(column));
    }
  }
}
