//! CamCap - button-triggered RTSP capture daemon
//!
//! ## Architecture
//!
//! 1. SettingsStore - env-file backed, hot-reloadable configuration
//! 2. ImageStore - JPEG directory + SQLite queue of capture rows
//! 3. FrameGrabber - single-frame ffmpeg grab with bounded time
//! 4. CaptureService - filename convention, file + row, statistics
//! 5. GpioService - debounced button edges to capture dispatch
//! 6. UploadWorker - durable at-least-once drain to the HTTP intake
//! 7. HealthMonitor - camera liveness + host telemetry
//! 8. CleanupWorker - retention enforcement
//! 9. WebAPI - operator dashboard endpoints
//!
//! Every component reads settings on use; edits through the config
//! API take effect without a restart for hot keys.

pub mod capture;
pub mod cleanup;
pub mod error;
pub mod gpio;
pub mod grabber;
pub mod health;
pub mod models;
pub mod settings;
pub mod state;
pub mod store;
pub mod uploader;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
