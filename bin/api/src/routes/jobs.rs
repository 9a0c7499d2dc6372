use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use database::jobs::{self, NewJob};
use entities::{Job, MarathonError, Service, Task};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
  Router::new()
    .route("/apps/{app_id}/templates/{template_name}/jobs", post(create_job))
    .route("/apps/{app_id}/templates/{template_name}/jobs/{job_id}", get(get_job))
}

/// Body of `POST /apps/{app_id}/templates/{template_name}/jobs`. Exactly
/// one of `filters`/`csv_path` must be set (§3's Job invariant).
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
  pub service: String,
  pub created_by: String,
  #[serde(default)]
  pub filters: Option<Value>,
  #[serde(default)]
  pub csv_path: Option<String>,
  #[serde(default)]
  pub context: Value,
  #[serde(default)]
  pub metadata: Value,
  pub expires_at: i64,
  #[serde(default)]
  pub starts_at: i64,
  #[serde(default)]
  pub db_page_size: i32,
  #[serde(default)]
  pub control_group: f64,
}

#[instrument(skip(state, body), fields(app_id = %app_id, template_name))]
async fn create_job(
  State(state): State<AppState>,
  Path((app_id, template_name)): Path<(Uuid, String)>,
  Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
  if body.filters.is_some() == body.csv_path.is_some() {
    return Err(
      MarathonError::ValidationError(
        "job must set exactly one of `filters` or `csv_path`".into(),
      )
      .into(),
    );
  }
  let service = Service::from_str(&body.service)?;

  let job = jobs::insert(
    &state.pool,
    NewJob {
      app_id,
      template_name,
      service,
      created_by: body.created_by,
      filters: body.filters,
      csv_path: body.csv_path,
      context: body.context,
      metadata: body.metadata,
      expires_at: body.expires_at,
      starts_at: body.starts_at,
      db_page_size: body.db_page_size,
      control_group: body.control_group,
    },
  )
  .await?;

  state.queue.enqueue(Task::CreateBatches { job_id: job.id }).await?;
  info!(job_id = %job.id, "enqueued CreateBatches task");

  Ok((StatusCode::CREATED, Json(job)))
}

#[instrument(skip(state), fields(app_id = %app_id, template_name, job_id = %job_id))]
async fn get_job(
  State(state): State<AppState>,
  Path((app_id, template_name, job_id)): Path<(Uuid, String, Uuid)>,
) -> Result<Json<Job>, ApiError> {
  let job = jobs::get(&state.pool, job_id).await?;
  if job.app_id != app_id || job.template_name != template_name {
    return Err(MarathonError::ValidationError(format!("no job {job_id} under that app/template")).into());
  }
  Ok(Json(job))
}
