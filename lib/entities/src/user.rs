use serde::{Deserialize, Serialize};

/// One recipient, as resolved by the cohort filter or a CSV upload.
/// `token` is the raw device token or GCM registration id; `locale`
/// drives template selection with fallback to `en`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
  pub user_id: String,
  pub token: String,
  pub locale: String,
}

impl User {
  /// Stable, non-cryptographic draw used to assign a user to the
  /// control group for a given job. Must reproduce the same result on
  /// every retry of the same `(job_id, user_id)` pair, so this never
  /// uses an RNG.
  pub fn control_group_draw(&self, job_id: &uuid::Uuid) -> f64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    job_id.hash(&mut hasher);
    self.user_id.hash(&mut hasher);
    (hasher.finish() as f64) / (u64::MAX as f64)
  }

  pub fn is_control_group(&self, job_id: &uuid::Uuid, control_group: f64) -> bool {
    self.control_group_draw(job_id) < control_group
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;

  fn user(id: &str) -> User {
    User {
      user_id: id.into(),
      token: "tok".into(),
      locale: "en".into(),
    }
  }

  #[test]
  fn control_group_draw_is_deterministic() {
    let job_id = Uuid::new_v4();
    let u = user("user-1");
    assert_eq!(
      u.control_group_draw(&job_id),
      u.control_group_draw(&job_id)
    );
  }

  #[test]
  fn zero_control_group_excludes_everyone() {
    let job_id = Uuid::new_v4();
    for i in 0..50 {
      let u = user(&format!("user-{i}"));
      assert!(!u.is_control_group(&job_id, 0.0));
    }
  }

  #[test]
  fn full_control_group_includes_everyone() {
    let job_id = Uuid::new_v4();
    for i in 0..50 {
      let u = user(&format!("user-{i}"));
      assert!(u.is_control_group(&job_id, 1.0));
    }
  }

  #[test]
  fn different_users_can_draw_differently() {
    let job_id = Uuid::new_v4();
    let draws: std::collections::HashSet<_> = (0..20)
      .map(|i| {
        let u = user(&format!("user-{i}"));
        u.control_group_draw(&job_id).to_bits()
      })
      .collect();
    assert!(draws.len() > 1);
  }
}
