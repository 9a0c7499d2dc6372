use entities::{MarathonError, User};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{PgPool, QueryBuilder};
use std::fs::File;

/// The filter predicate shape accepted in `Job.filters`, per §4.6.
/// `user_id`, `locale`, `region`, `tz`, `build_n` are plain equality
/// filters against the token table; `scope` excludes anyone whose
/// `opt_out` array already contains that scope; `opt_out` names
/// specific `user_id`s to exclude outright regardless of scope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filters {
  pub user_id: Option<String>,
  pub locale: Option<String>,
  pub region: Option<String>,
  pub tz: Option<String>,
  pub build_n: Option<i32>,
  pub scope: Option<String>,
  #[serde(default)]
  pub opt_out: Vec<String>,
}

impl Filters {
  pub fn from_json(value: &Value) -> Result<Self, MarathonError> {
    if value.is_null() {
      return Ok(Self::default());
    }
    serde_json::from_value(value.clone())
      .map_err(|e| MarathonError::ValidationError(e.to_string()))
  }
}

/// Per-app token tables are named `<app_short>_<service>_tokens`; this
/// only accepts the alphanumeric/underscore segments the resolver
/// itself derives, never raw user input, so string interpolation here
/// cannot carry injected SQL.
fn token_table(app_short: &str, service: &str) -> Result<String, MarathonError> {
  let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if !valid(app_short) || !valid(service) {
    return Err(MarathonError::ValidationError(format!(
      "invalid token table identifier: {app_short}/{service}"
    )));
  }
  Ok(format!("{app_short}_{service}_tokens"))
}

/// Fetches the next page of a filter-backed cohort, ordered by the
/// token table's primary key ascending so pagination is stable even
/// under concurrent inserts. Not restartable mid-stream: a retry that
/// lost its cursor starts again from `after_user_id = None`. Every
/// field §4.6 names (`user_id`, `locale`, `region`, `tz`, `build_n`,
/// `scope`, `opt_out`) is pushed into the `WHERE` clause rather than
/// filtered client-side, so a page never returns fewer rows than the
/// predicate actually allows.
pub async fn fetch_filtered_page(
  pool: &PgPool,
  app_short: &str,
  service: &str,
  filters: &Filters,
  after_user_id: Option<&str>,
  page_size: i64,
) -> Result<Vec<User>, MarathonError> {
  let table = token_table(app_short, service)?;
  let mut qb: QueryBuilder<sqlx::Postgres> =
    QueryBuilder::new(format!("SELECT user_id, token, locale FROM {table} WHERE 1=1"));

  if let Some(after) = after_user_id {
    qb.push(" AND user_id > ").push_bind(after.to_string());
  }
  if let Some(user_id) = &filters.user_id {
    qb.push(" AND user_id = ").push_bind(user_id.clone());
  }
  if let Some(locale) = &filters.locale {
    qb.push(" AND locale = ").push_bind(locale.clone());
  }
  if let Some(region) = &filters.region {
    qb.push(" AND region = ").push_bind(region.clone());
  }
  if let Some(tz) = &filters.tz {
    qb.push(" AND tz = ").push_bind(tz.clone());
  }
  if let Some(build_n) = filters.build_n {
    qb.push(" AND build_n = ").push_bind(build_n);
  }
  if let Some(scope) = &filters.scope {
    qb.push(" AND NOT (opt_out @> ARRAY[").push_bind(scope.clone()).push("])");
  }
  if !filters.opt_out.is_empty() {
    qb.push(" AND user_id <> ALL(").push_bind(filters.opt_out.clone()).push(")");
  }
  qb.push(" ORDER BY user_id ASC LIMIT ").push_bind(page_size);

  qb.build_query_as::<User>().fetch_all(pool).await.map_err(MarathonError::from)
}

/// Streams `user_id`s out of a local CSV file in pages, line-buffered,
/// without loading the whole file into memory.
pub struct CsvUserIds {
  reader: csv::Reader<File>,
}

impl CsvUserIds {
  pub fn open(path: &str) -> Result<Self, MarathonError> {
    let file = File::open(path).map_err(|e| MarathonError::TransientIO(e.into()))?;
    Ok(Self { reader: csv::ReaderBuilder::new().has_headers(true).from_reader(file) })
  }

  /// Pulls up to `page_size` ids from the stream. An empty result
  /// means the file is exhausted.
  pub fn next_page(&mut self, page_size: usize) -> Result<Vec<String>, MarathonError> {
    let mut ids = Vec::with_capacity(page_size);
    for record in self.reader.records().take(page_size) {
      let record = record.map_err(|e| MarathonError::ValidationError(e.to_string()))?;
      if let Some(user_id) = record.get(0) {
        ids.push(user_id.to_string());
      }
    }
    Ok(ids)
  }
}

/// Hydrates a page of bare `user_id`s with `(token, locale)` from the
/// token table.
pub async fn hydrate_csv_page(
  pool: &PgPool,
  app_short: &str,
  service: &str,
  user_ids: &[String],
) -> Result<Vec<User>, MarathonError> {
  if user_ids.is_empty() {
    return Ok(Vec::new());
  }
  let table = token_table(app_short, service)?;
  let sql = format!(
    "SELECT user_id, token, locale FROM {table} WHERE user_id = ANY($1)"
  );
  sqlx::query_as::<_, User>(&sql)
    .bind(user_ids)
    .fetch_all(pool)
    .await
    .map_err(MarathonError::from)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_table_rejects_non_alphanumeric_segments() {
    assert!(token_table("sample; drop table jobs;--", "gcm").is_err());
    assert!(token_table("sample", "gcm").is_ok());
  }

  #[test]
  fn token_table_name_follows_app_service_convention() {
    assert_eq!(token_table("sample", "gcm").unwrap(), "sample_gcm_tokens");
  }

  #[test]
  fn filters_from_null_json_is_default() {
    let filters = Filters::from_json(&Value::Null).unwrap();
    assert!(filters.locale.is_none());
    assert!(filters.opt_out.is_empty());
  }

  #[test]
  fn filters_from_json_parses_known_fields() {
    let value = serde_json::json!({"locale": "pt", "opt_out": ["u1"]});
    let filters = Filters::from_json(&value).unwrap();
    assert_eq!(filters.locale.as_deref(), Some("pt"));
    assert_eq!(filters.opt_out, vec!["u1".to_string()]);
  }

  #[test]
  fn filters_from_json_parses_region_tz_build_scope() {
    let value = serde_json::json!({
      "user_id": "u42",
      "region": "eu",
      "tz": "Europe/Lisbon",
      "build_n": 17,
      "scope": "marketing",
    });
    let filters = Filters::from_json(&value).unwrap();
    assert_eq!(filters.user_id.as_deref(), Some("u42"));
    assert_eq!(filters.region.as_deref(), Some("eu"));
    assert_eq!(filters.tz.as_deref(), Some("Europe/Lisbon"));
    assert_eq!(filters.build_n, Some(17));
    assert_eq!(filters.scope.as_deref(), Some("marketing"));
  }
}
