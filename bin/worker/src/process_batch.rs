//! Stage B (§4.8): renders and publishes one batch, then applies the
//! §4.5 conditional progress update exactly once.

use std::collections::HashMap;

use bus::Bus;
use chrono::Utc;
use database::{jobs as jobs_db, progress, templates};
use entities::{config::WorkersConfig, JobStatus, MarathonError, Template, User};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::executor::Outcome;

fn now_nanos() -> i64 {
  Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

pub async fn run_once(
  pool: &PgPool,
  bus: &dyn Bus,
  job_id: Uuid,
  app_name: &str,
  users: &[User],
  cfg: &WorkersConfig,
) -> Result<Outcome, MarathonError> {
  let job = jobs_db::get(pool, job_id).await?;

  // Cancellation (§5): a stopped/expired job skips remaining work and
  // acks without a progress increment. A paused job defers instead of
  // acking (Open Question (c)).
  if job.status.is_halted() || job.is_expired(now_nanos()) {
    return Ok(Outcome::Ack);
  }
  if job.status == JobStatus::Paused {
    return Ok(Outcome::Defer { delay_secs: 30 });
  }

  let topic = bus::topic_name(&cfg.topic_template, app_name, job.service);
  let mut template_cache: HashMap<String, Template> = HashMap::new();
  let mut sent: i64 = 0;
  let mut failed: i64 = 0;

  for user in users {
    let template = match template_cache.get(&user.locale) {
      Some(template) => template.clone(),
      None => {
        match templates::get_with_fallback(pool, job.app_id, &job.template_name, &user.locale)
          .await
        {
          Ok(template) => {
            template_cache.insert(user.locale.clone(), template.clone());
            template
          }
          Err(e) => {
            warn!(%job_id, user_id = %user.user_id, error = %e, "no template for user's locale, skipping user");
            failed += 1;
            continue;
          }
        }
      }
    };

    let extra = serde_json::json!({
      "token": user.token,
      "locale": user.locale,
      "user_id": user.user_id,
    });
    let params = render::merge_params(&[&template.defaults, &job.context, &extra]);

    let content = match render::render_json(&template.body, &params) {
      Ok(content) => content,
      Err(e) => {
        warn!(%job_id, user_id = %user.user_id, error = %e, "render failed, skipping user");
        failed += 1;
        continue;
      }
    };

    let envelope =
      render::build_envelope(job.service, &user.token, job.push_expiry(), content, &job.metadata);

    // Bus failures are transient-IO at the task level (§5): propagate
    // so the whole task retries, unlike a render failure which only
    // costs this one user.
    bus.send(&topic, &envelope).await.map_err(MarathonError::TransientIO)?;
    sent += 1;
  }

  if failed > 0 {
    warn!(%job_id, failed, sent, total = users.len(), "batch had per-user render failures");
  }

  // Re-check before the conditional update: a job that flipped to
  // stopped/expired mid-batch must not have its counters advanced.
  let fresh = jobs_db::get(pool, job.id).await?;
  if fresh.status.is_halted() {
    return Ok(Outcome::Ack);
  }

  match progress::record_batch_completion(pool, job.id, sent, now_nanos()).await {
    Ok(_) => Ok(Outcome::Ack),
    Err(MarathonError::ProgressConflict) => {
      let refreshed = jobs_db::get(pool, job.id).await?;
      if refreshed.status == JobStatus::Completed {
        Ok(Outcome::Ack)
      } else {
        Err(MarathonError::ProgressConflict)
      }
    }
    Err(e) => Err(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn topic_uses_app_name_from_task_as_short_name() {
    let topic = bus::topic_name("push-%s-%s", "sample", entities::Service::Gcm);
    assert_eq!(topic, "push-sample-gcm");
  }
}
