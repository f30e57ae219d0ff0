use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// Everything that can go wrong between a job id arriving and artifact
/// bytes leaving. All variants are recovered at the handler boundary;
/// none are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The remote server refused or failed the archive download.
    #[error("archive unavailable: {0}")]
    RemoteUnavailable(String),

    /// The archive downloaded fine but held none of the candidate paths.
    /// `nearby` lists present entries that loosely match the artifact's
    /// domain keywords; it is advisory only and never used for matching.
    #[error("artifact not found, tried: {tried:?} (similar entries present: {nearby:?})")]
    NotFound {
        tried: Vec<String>,
        nearby: Vec<String>,
    },

    /// Bytes matched a candidate path but could not be parsed or transcoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The matched path's extension has no decoder.
    #[error("no decoder for {0:?} entries")]
    Unsupported(String),
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
