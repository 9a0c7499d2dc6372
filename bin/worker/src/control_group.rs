use std::fs::{self, File};
use std::path::PathBuf;

use entities::{MarathonError, User};
use uuid::Uuid;

/// Writes users withheld from a job's cohort (per §4.6's control-group
/// draw) to `{control_group_dir}/{job_id}.csv`, one file per job.
/// Opened lazily — a job with `control_group == 0.0` never creates a
/// file.
pub struct ControlGroupWriter {
  writer: Option<csv::Writer<File>>,
  dir: PathBuf,
  job_id: Uuid,
}

impl ControlGroupWriter {
  pub fn new(dir: &str, job_id: Uuid) -> Self {
    Self { writer: None, dir: PathBuf::from(dir), job_id }
  }

  fn writer(&mut self) -> Result<&mut csv::Writer<File>, MarathonError> {
    if self.writer.is_none() {
      fs::create_dir_all(&self.dir).map_err(|e| MarathonError::TransientIO(e.into()))?;
      let path = self.dir.join(format!("{}.csv", self.job_id));
      let file = File::create(&path).map_err(|e| MarathonError::TransientIO(e.into()))?;
      let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(file);
      writer
        .write_record(["user_id", "token", "locale"])
        .map_err(|e| MarathonError::Other(e.into()))?;
      self.writer = Some(writer);
    }
    Ok(self.writer.as_mut().unwrap())
  }

  pub fn write(&mut self, user: &User) -> Result<(), MarathonError> {
    self
      .writer()?
      .write_record([user.user_id.as_str(), user.token.as_str(), user.locale.as_str()])
      .map_err(|e| MarathonError::Other(e.into()))
  }

  pub fn flush(&mut self) -> Result<(), MarathonError> {
    if let Some(writer) = self.writer.as_mut() {
      writer.flush().map_err(|e| MarathonError::TransientIO(e.into()))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lazily_creates_file_only_on_first_write() {
    let dir = std::env::temp_dir().join(format!("marathon-test-{}", Uuid::new_v4()));
    let job_id = Uuid::new_v4();
    let path = dir.join(format!("{job_id}.csv"));
    assert!(!path.exists());

    let mut writer = ControlGroupWriter::new(dir.to_str().unwrap(), job_id);
    writer
      .write(&User { user_id: "u1".into(), token: "t1".into(), locale: "en".into() })
      .unwrap();
    writer.flush().unwrap();

    assert!(path.exists());
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("u1,t1,en"));

    fs::remove_dir_all(&dir).ok();
  }
}
