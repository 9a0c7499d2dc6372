use entities::{MarathonError, Template};
use sqlx::PgPool;
use uuid::Uuid;

const FALLBACK_LOCALE: &str = "en";

/// Fetches `(app_id, name, locale)` per §4.8's three-tier selection:
/// exact locale match, then `en`, then any locale at all (so a template
/// published under a single locale still renders for every user).
/// Open Question (b) resolved: the `en` tier is fixed, not
/// job-configurable.
pub async fn get_with_fallback(
  pool: &PgPool,
  app_id: Uuid,
  name: &str,
  locale: &str,
) -> Result<Template, MarathonError> {
  if let Some(template) = get_exact(pool, app_id, name, locale).await? {
    return Ok(template);
  }
  if locale != FALLBACK_LOCALE {
    if let Some(template) = get_exact(pool, app_id, name, FALLBACK_LOCALE).await? {
      return Ok(template);
    }
  }
  if let Some(template) = get_any(pool, app_id, name).await? {
    return Ok(template);
  }
  Err(MarathonError::ValidationError(format!(
    "no template `{name}` for app {app_id} in locale `{locale}`, fallback `{FALLBACK_LOCALE}`, or any locale"
  )))
}

async fn get_any(
  pool: &PgPool,
  app_id: Uuid,
  name: &str,
) -> Result<Option<Template>, MarathonError> {
  sqlx::query_as::<_, Template>(
    "SELECT id, app_id, name, locale, defaults, body, created_at, updated_at \
     FROM templates WHERE app_id = $1 AND name = $2 ORDER BY locale LIMIT 1",
  )
  .bind(app_id)
  .bind(name)
  .fetch_optional(pool)
  .await
  .map_err(MarathonError::from)
}

async fn get_exact(
  pool: &PgPool,
  app_id: Uuid,
  name: &str,
  locale: &str,
) -> Result<Option<Template>, MarathonError> {
  sqlx::query_as::<_, Template>(
    "SELECT id, app_id, name, locale, defaults, body, created_at, updated_at \
     FROM templates WHERE app_id = $1 AND name = $2 AND locale = $3",
  )
  .bind(app_id)
  .bind(name)
  .bind(locale)
  .fetch_optional(pool)
  .await
  .map_err(MarathonError::from)
}

#[cfg(test)]
mod tests {
  #[test]
  fn fallback_locale_is_english() {
    assert_eq!(super::FALLBACK_LOCALE, "en");
  }
}
