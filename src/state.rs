//! Application state
//!
//! Holds all shared components and state

use crate::capture::CaptureService;
use crate::cleanup::CleanupWorker;
use crate::gpio::GpioService;
use crate::health::HealthMonitor;
use crate::settings::SettingsStore;
use crate::store::ImageRepository;
use crate::uploader::UploadWorker;
use crate::web_api::SessionStore;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings store (single source of truth)
    pub settings: Arc<SettingsStore>,
    /// Image repository (queue + listings)
    pub repo: ImageRepository,
    /// Capture service
    pub capture: Arc<CaptureService>,
    /// GPIO event loop
    pub gpio: Arc<GpioService>,
    /// Upload worker
    pub uploader: Arc<UploadWorker>,
    /// Health monitor
    pub health: Arc<HealthMonitor>,
    /// Cleanup worker
    pub cleanup: Arc<CleanupWorker>,
    /// Session-cookie store for the web auth middleware
    pub sessions: Arc<SessionStore>,
    /// Process start, for the uptime counter
    pub started_at: Instant,
}
