use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::archive::RemoteArchive;
use crate::cache::CacheKey;
use crate::error::ExtractError;
use crate::mesh::{self, MeshPart};
use crate::pointcloud;
use crate::raster;
use crate::resolve::{self, ArtifactFormat, ORTHOMOSAIC_CANDIDATES, POINTCLOUD_CANDIDATES};
use crate::state::AppState;

const ORTHO_KEY: CacheKey = CacheKey::new("orthomosaic", "png");
const POINTS_KEY: CacheKey = CacheKey::new("pointcloud", "points");
/// Raw cloud cache variants, in candidate-table order.
const RAW_CLOUD_KEYS: [CacheKey; 2] = [
    CacheKey::new("pointcloud", "laz"),
    CacheKey::new("pointcloud", "las"),
];

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/orthomosaic/:job_id", get(orthomosaic))
        .route("/pointcloud/:job_id", get(pointcloud_handler))
        .route("/mesh/:job_id", get(mesh_handler))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// ---------------------------------------------------------------------
// Orthomosaic
// ---------------------------------------------------------------------

async fn orthomosaic(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    state
        .metrics
        .extraction_requests_total
        .with_label_values(&["orthomosaic"])
        .inc();
    if let Err(response) = validate_job_id(&job_id) {
        return response;
    }

    if let Some(path) = state.cache.get(&job_id, &ORTHO_KEY) {
        state
            .metrics
            .cache_hits_total
            .with_label_values(&["orthomosaic"])
            .inc();
        return match tokio::fs::read(&path).await {
            Ok(bytes) => png_response(bytes, "HIT"),
            Err(e) => ExtractError::Decode(format!("cache read failed: {}", e)).into_response(),
        };
    }

    state
        .metrics
        .cache_misses_total
        .with_label_values(&["orthomosaic"])
        .inc();
    match extract_orthomosaic(&state, &job_id).await {
        Ok(bytes) => png_response(bytes, "MISS"),
        Err(e) => {
            record_failure(&state, &e);
            tracing::warn!(job_id, error = %e, "Orthomosaic extraction failed");
            e.into_response()
        }
    }
}

async fn extract_orthomosaic(state: &AppState, job_id: &str) -> Result<Vec<u8>, ExtractError> {
    let mut archive = fetch_archive(state, job_id).await?;
    let names = archive.entry_names();
    let matched = resolve::resolve(&names, ORTHOMOSAIC_CANDIDATES, &["ortho"])?.to_string();
    let format = ArtifactFormat::from_path(&matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.clone()))?;

    let raw = archive.read(&matched)?;
    let png = match format {
        // Already browser-displayable; pass through.
        ArtifactFormat::Png => raw,
        ArtifactFormat::Tif | ArtifactFormat::Jpg => raster::to_png(&raw, format)?,
        other => return Err(ExtractError::Unsupported(other.as_str().to_string())),
    };

    if let Err(e) = state.cache.put(job_id, &ORTHO_KEY, &png) {
        tracing::warn!(job_id, error = %e, "Cache write failed");
    }
    Ok(png)
}

fn png_response(bytes: Vec<u8>, cache_state: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "max-age=3600")
        .header("X-Cache", cache_state)
        .body(Body::from(bytes))
        .unwrap()
}

// ---------------------------------------------------------------------
// Point cloud
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PointcloudQuery {
    info: Option<bool>,
    format: Option<String>,
    #[serde(rename = "maxPoints")]
    max_points: Option<usize>,
}

async fn pointcloud_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<PointcloudQuery>,
) -> Response {
    state
        .metrics
        .extraction_requests_total
        .with_label_values(&["pointcloud"])
        .inc();
    if let Err(response) = validate_job_id(&job_id) {
        return response;
    }

    if query.info == Some(true) {
        return match pointcloud_info(&state, &job_id).await {
            Ok(info) => Json(info).into_response(),
            Err(e) => {
                record_failure(&state, &e);
                Json(json!({ "available": false, "error": e.to_string() })).into_response()
            }
        };
    }

    match query.format.as_deref() {
        None => raw_cloud(&state, &job_id).await,
        Some("points") => points_binary(&state, &job_id, &query).await,
        Some(other) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown format {:?}", other) })),
        )
            .into_response(),
    }
}

/// Availability/size/format report; never transfers the payload.
async fn pointcloud_info(
    state: &AppState,
    job_id: &str,
) -> Result<serde_json::Value, ExtractError> {
    for key in &RAW_CLOUD_KEYS {
        if let Some(path) = state.cache.get(job_id, key) {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            return Ok(cloud_info_json(job_id, key.ext, size, true));
        }
    }

    let mut archive = fetch_archive(state, job_id).await?;
    let names = archive.entry_names();
    let matched =
        resolve::resolve(&names, POINTCLOUD_CANDIDATES, &["georef", "point"])?.to_string();
    let format = ArtifactFormat::from_path(&matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.clone()))?;
    let size = archive.entry_size(&matched).unwrap_or(0);
    Ok(cloud_info_json(job_id, format.as_str(), size, false))
}

fn cloud_info_json(job_id: &str, ext: &str, size: u64, cached: bool) -> serde_json::Value {
    json!({
        "available": true,
        "filename": format!("pointcloud_{}.{}", job_id, ext),
        "format": ext,
        "size": size,
        "sizeFormatted": fmt_size(size),
        "cached": cached,
    })
}

/// The decoded GPU buffer: `[count:u32][positions][colors]`.
async fn points_binary(state: &AppState, job_id: &str, query: &PointcloudQuery) -> Response {
    let max_points = query.max_points.unwrap_or(state.default_max_points).max(1);

    if let Some(path) = state.cache.get(job_id, &POINTS_KEY) {
        state
            .metrics
            .cache_hits_total
            .with_label_values(&["pointcloud"])
            .inc();
        return match tokio::fs::read(&path).await {
            Ok(wire) => points_response(wire, "HIT"),
            Err(e) => ExtractError::Decode(format!("cache read failed: {}", e)).into_response(),
        };
    }

    state
        .metrics
        .cache_misses_total
        .with_label_values(&["pointcloud"])
        .inc();
    match decode_points(state, job_id, max_points).await {
        Ok(wire) => points_response(wire, "MISS"),
        Err(e) => {
            record_failure(state, &e);
            tracing::warn!(job_id, error = %e, "Point decode failed");
            e.into_response()
        }
    }
}

async fn decode_points(
    state: &AppState,
    job_id: &str,
    max_points: usize,
) -> Result<Vec<u8>, ExtractError> {
    let mut archive = fetch_archive(state, job_id).await?;
    let names = archive.entry_names();
    let matched =
        resolve::resolve(&names, POINTCLOUD_CANDIDATES, &["georef", "point"])?.to_string();
    let format = ArtifactFormat::from_path(&matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.clone()))?;

    let raw = archive.read(&matched)?;
    let buffer = pointcloud::decode(&raw, format, max_points)?;
    tracing::info!(job_id, points = buffer.len(), "Decoded point cloud");

    let wire = buffer.encode();
    if let Err(e) = state.cache.put(job_id, &POINTS_KEY, &wire) {
        tracing::warn!(job_id, error = %e, "Cache write failed");
    }
    Ok(wire)
}

fn points_response(wire: Vec<u8>, cache_state: &str) -> Response {
    let count = wire
        .get(0..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header("X-Point-Count", count.to_string())
        .header("X-Cache", cache_state)
        .body(Body::from(wire))
        .unwrap()
}

/// The raw LAS/LAZ file, served as a download.
async fn raw_cloud(state: &AppState, job_id: &str) -> Response {
    for key in &RAW_CLOUD_KEYS {
        if let Some(path) = state.cache.get(job_id, key) {
            state
                .metrics
                .cache_hits_total
                .with_label_values(&["pointcloud"])
                .inc();
            return match tokio::fs::read(&path).await {
                Ok(bytes) => attachment_response(bytes, job_id, key.ext),
                Err(e) => {
                    ExtractError::Decode(format!("cache read failed: {}", e)).into_response()
                }
            };
        }
    }

    state
        .metrics
        .cache_misses_total
        .with_label_values(&["pointcloud"])
        .inc();
    match extract_raw_cloud(state, job_id).await {
        Ok((bytes, ext)) => attachment_response(bytes, job_id, ext),
        Err(e) => {
            record_failure(state, &e);
            tracing::warn!(job_id, error = %e, "Raw cloud extraction failed");
            e.into_response()
        }
    }
}

async fn extract_raw_cloud(
    state: &AppState,
    job_id: &str,
) -> Result<(Vec<u8>, &'static str), ExtractError> {
    let mut archive = fetch_archive(state, job_id).await?;
    let names = archive.entry_names();
    let matched =
        resolve::resolve(&names, POINTCLOUD_CANDIDATES, &["georef", "point"])?.to_string();
    let format = ArtifactFormat::from_path(&matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.clone()))?;
    let bytes = archive.read(&matched)?;

    let key = match format {
        ArtifactFormat::Laz => &RAW_CLOUD_KEYS[0],
        ArtifactFormat::Las => &RAW_CLOUD_KEYS[1],
        other => return Err(ExtractError::Unsupported(other.as_str().to_string())),
    };
    if let Err(e) = state.cache.put(job_id, key, &bytes) {
        tracing::warn!(job_id, error = %e, "Cache write failed");
    }
    Ok((bytes, key.ext))
}

fn attachment_response(bytes: Vec<u8>, job_id: &str, ext: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"pointcloud_{}.{}\"", job_id, ext),
        )
        .body(Body::from(bytes))
        .unwrap()
}

// ---------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeshQuery {
    #[serde(rename = "type")]
    part: Option<String>,
    info: Option<bool>,
}

async fn mesh_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<MeshQuery>,
) -> Response {
    state
        .metrics
        .extraction_requests_total
        .with_label_values(&["mesh"])
        .inc();
    if let Err(response) = validate_job_id(&job_id) {
        return response;
    }

    let part_name = query.part.as_deref().unwrap_or("mesh");
    let Some(part) = MeshPart::from_query(part_name) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown mesh part {:?}", part_name) })),
        )
            .into_response();
    };

    if query.info == Some(true) {
        return match mesh_info(&state, &job_id, part).await {
            Ok(info) => Json(info).into_response(),
            Err(e) => {
                record_failure(&state, &e);
                Json(json!({ "available": false, "error": e.to_string() })).into_response()
            }
        };
    }

    for &ext in part.cache_exts() {
        let key = CacheKey::new("mesh", ext);
        if let Some(path) = state.cache.get(&job_id, &key) {
            state
                .metrics
                .cache_hits_total
                .with_label_values(&["mesh"])
                .inc();
            let content_type = ArtifactFormat::from_path(&format!("x.{}", ext))
                .map(|f| f.content_type())
                .unwrap_or("application/octet-stream");
            return match tokio::fs::read(&path).await {
                Ok(bytes) => bytes_response(bytes, content_type),
                Err(e) => {
                    ExtractError::Decode(format!("cache read failed: {}", e)).into_response()
                }
            };
        }
    }

    state
        .metrics
        .cache_misses_total
        .with_label_values(&["mesh"])
        .inc();
    match extract_mesh_part(&state, &job_id, part).await {
        Ok((bytes, format)) => bytes_response(bytes, format.content_type()),
        Err(e) => {
            record_failure(&state, &e);
            tracing::warn!(job_id, part = part.as_str(), error = %e, "Mesh extraction failed");
            e.into_response()
        }
    }
}

async fn mesh_info(
    state: &AppState,
    job_id: &str,
    part: MeshPart,
) -> Result<serde_json::Value, ExtractError> {
    for &ext in part.cache_exts() {
        let key = CacheKey::new("mesh", ext);
        if let Some(path) = state.cache.get(job_id, &key) {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            return Ok(mesh_info_json(job_id, part, ext, size, true));
        }
    }

    let mut archive = fetch_archive(state, job_id).await?;
    let names = archive.entry_names();
    let matched = resolve::resolve(&names, part.candidates(), part.keywords())?.to_string();
    let format = ArtifactFormat::from_path(&matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.clone()))?;
    let size = archive.entry_size(&matched).unwrap_or(0);
    Ok(mesh_info_json(job_id, part, format.as_str(), size, false))
}

fn mesh_info_json(
    job_id: &str,
    part: MeshPart,
    ext: &str,
    size: u64,
    cached: bool,
) -> serde_json::Value {
    json!({
        "available": true,
        "filename": format!("{}_{}.{}", part.as_str(), job_id, ext),
        "format": ext,
        "size": size,
        "sizeFormatted": fmt_size(size),
        "cached": cached,
    })
}

async fn extract_mesh_part(
    state: &AppState,
    job_id: &str,
    part: MeshPart,
) -> Result<(Vec<u8>, ArtifactFormat), ExtractError> {
    let mut archive = fetch_archive(state, job_id).await?;
    let artifact = mesh::extract(&mut archive, part)?;
    let key = CacheKey::new("mesh", artifact.format.as_str());
    if let Err(e) = state.cache.put(job_id, &key, &artifact.bytes) {
        tracing::warn!(job_id, error = %e, "Cache write failed");
    }
    Ok((artifact.bytes, artifact.format))
}

fn bytes_response(bytes: Vec<u8>, content_type: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .unwrap()
}

// ---------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------

async fn fetch_archive(state: &AppState, job_id: &str) -> Result<RemoteArchive, ExtractError> {
    let started = Instant::now();
    state.metrics.archive_downloads_total.inc();
    match RemoteArchive::fetch(&state.http, &state.nodeodm_url, job_id).await {
        Ok(archive) => {
            state
                .metrics
                .archive_download_seconds
                .observe(started.elapsed().as_secs_f64());
            Ok(archive)
        }
        Err(e) => {
            state.metrics.archive_download_failures_total.inc();
            Err(e)
        }
    }
}

fn record_failure(state: &AppState, error: &ExtractError) {
    if matches!(error, ExtractError::Decode(_)) {
        state.metrics.decode_failures_total.inc();
    }
}

/// Job ids become cache file names and URL segments; anything outside the
/// remote server's id alphabet is rejected up front.
fn validate_job_id(job_id: &str) -> Result<(), Response> {
    let ok = !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid job id" })),
        )
            .into_response())
    }
}

fn fmt_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_formatting_picks_sensible_units() {
        assert_eq!(fmt_size(512), "512 B");
        assert_eq!(fmt_size(2048), "2.0 KB");
        assert_eq!(fmt_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn job_ids_are_restricted_to_the_id_alphabet() {
        assert!(validate_job_id("job-123_abc").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc/passwd").is_err());
        assert!(validate_job_id("a/b").is_err());
    }
}
