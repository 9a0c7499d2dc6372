use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use entities::MarathonError;
use serde_json::json;

/// Wraps [`MarathonError`] for the one boundary that needs to turn it
/// into an HTTP response — everywhere else in the workspace it stays a
/// plain `Result<_, MarathonError>`, in the style the teacher reserves
/// `serror` for its axum handlers only.
pub struct ApiError(pub MarathonError);

impl From<MarathonError> for ApiError {
  fn from(err: MarathonError) -> Self {
    Self(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      MarathonError::ValidationError(_) | MarathonError::UnknownService(_) => {
        StatusCode::BAD_REQUEST
      }
      MarathonError::JobStopped => StatusCode::CONFLICT,
      MarathonError::ProgressConflict => StatusCode::CONFLICT,
      MarathonError::RenderError(_) => StatusCode::UNPROCESSABLE_ENTITY,
      MarathonError::TransientIO(_) | MarathonError::Other(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    let body = Json(json!({ "error": self.0.to_string() }));
    (status, body).into_response()
  }
}
