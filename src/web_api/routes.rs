//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::header,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{ApiResponse, StatusResponse, UploadStatus};
use crate::settings;
use crate::state::AppState;

use super::auth;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Status & stats
        .route("/api/status", get(system_status))
        .route("/api/stats", get(system_stats))
        .route("/api/health", get(system_health))
        // Images
        .route("/api/images", get(list_images))
        .route("/api/images/by-date", get(list_images_by_date))
        .route("/api/images/:filename", get(image_raw))
        // Actions
        .route("/api/capture/:source", post(manual_capture))
        .route("/api/cleanup/run", post(run_cleanup))
        // GPIO
        .route("/api/gpio/status", get(gpio_status))
        // Config
        .route("/api/config/get", get(config_get))
        .route("/api/config/update", post(config_update))
        .route("/api/config/reload", post(config_reload))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/login", get(auth::login_form).post(auth::login))
        .route("/logout", get(auth::logout))
        .merge(api)
        .with_state(state)
}

// ========================================
// Status Handlers
// ========================================

async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.settings.current().await;
    let db_connected = state.repo.queue_stats().await.is_ok();

    let response = StatusResponse {
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        db_connected,
        gpio_available: state.gpio.available(),
        upload: UploadStatus {
            enabled: settings.upload_enabled,
            online: state.uploader.online().await,
            config_error: state.uploader.config_error().await,
        },
        cameras_enabled: settings.enabled_cameras().count(),
    };

    Json(response)
}

async fn system_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let queue = state.repo.queue_stats().await?;
    let storage = state.repo.storage_stats().await?;

    Ok(Json(json!({
        "captures": state.capture.stats().await,
        "triggers": state.gpio.counters().await,
        "queue": queue,
        "storage": storage,
        "cleanup": state.cleanup.stats().await,
    })))
}

async fn system_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "cameras": state.health.camera_health().await,
        "system": state.health.system_telemetry().await,
    }))
}

// ========================================
// Image Handlers
// ========================================

#[derive(Deserialize)]
struct ImageQuery {
    source: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let images = state
        .repo
        .list_recent(query.source.as_deref(), limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(images)))
}

#[derive(Deserialize)]
struct ByDateQuery {
    /// Calendar day, YYYY-MM-DD (UTC)
    date: String,
    source: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_images_by_date(
    State(state): State<AppState>,
    Query(query): Query<ByDateQuery>,
) -> Result<impl IntoResponse> {
    let day = query
        .date
        .parse::<chrono::NaiveDate>()
        .map_err(|_| Error::Validation(format!("bad date: {}", query.date)))?;
    let start = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Validation("bad date".to_string()))?
        .and_utc()
        .timestamp();
    let end = start + 86_400;

    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let images = state
        .repo
        .list_by_range(start, end, query.source.as_deref(), limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(images)))
}

async fn image_raw(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    if !valid_image_filename(&filename) {
        return Err(Error::Validation(format!("bad filename: {}", filename)));
    }

    let record = state
        .repo
        .get_by_filename(&filename)
        .await?
        .ok_or_else(|| Error::NotFound(filename.clone()))?;

    let bytes = tokio::fs::read(&record.path)
        .await
        .map_err(|_| Error::NotFound(filename))?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

/// Only `<tag>_<epoch>.jpg` shapes reach the filesystem.
fn valid_image_filename(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".jpg") else {
        return false;
    };
    let Some((source, epoch)) = stem.split_once('_') else {
        return false;
    };
    !source.is_empty()
        && source
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && !epoch.is_empty()
        && epoch.chars().all(|c| c.is_ascii_digit())
}

// ========================================
// Action Handlers
// ========================================

async fn manual_capture(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<impl IntoResponse> {
    let record = state.capture.capture_blocking(&source).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn run_cleanup(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let run = state.cleanup.run_once().await?;
    Ok(Json(ApiResponse::success(run)))
}

// ========================================
// GPIO Handlers
// ========================================

async fn gpio_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "available": state.gpio.available(),
        "pin_states": state.gpio.pin_states().await,
        "trigger_counts": state.gpio.counters().await,
        "trigger_events": state.gpio.trigger_log().recent(20).await,
    }))
}

// ========================================
// Config Handlers
// ========================================

async fn config_get(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "config": state.settings.redacted().await,
        "hot_keys": settings::hot_keys(),
        "cold_keys": settings::cold_keys(),
    }))
}

async fn config_update(
    State(state): State<AppState>,
    Json(patch): Json<HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    let outcome = state.settings.update(patch).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn config_reload(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.settings.reload().await?;
    Ok(Json(json!({"ok": true})))
}
