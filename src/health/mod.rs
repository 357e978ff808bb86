//! Health monitor
//!
//! ## Responsibilities
//!
//! - Periodic reachability probe of every enabled camera (ffprobe
//!   against the RTSP URL, short budget)
//! - Host telemetry: CPU temperature from sysfs, vendor tool fallback
//!
//! Outputs are snapshots: always the last observed value, never a
//! stream. Online/offline transitions are logged once per transition
//! so a flapping camera does not spam the log. Runs in its own task
//! and never blocks capture or upload.

use crate::settings::SettingsStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{watch, RwLock};

/// Probe cadence.
const CHECK_INTERVAL_SECS: u64 = 60;

/// Per-camera probe budget.
const CAMERA_PROBE_TIMEOUT_SECS: u64 = 10;

const THERMAL_SYSFS: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Last observed camera state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraHealth {
    pub online: Option<bool>,
    /// Epoch seconds of the last probe
    pub last_check: Option<i64>,
    pub last_error: Option<String>,
}

/// Host telemetry snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemTelemetry {
    /// Degrees Celsius; absent when no source is available
    pub cpu_temp_c: Option<f64>,
    pub last_update: Option<i64>,
}

/// Online/offline transition, for one-shot logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthTransition {
    Lost,
    Recovered,
}

pub struct HealthMonitor {
    settings: Arc<SettingsStore>,
    cameras: RwLock<HashMap<String, CameraHealth>>,
    system: RwLock<SystemTelemetry>,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            cameras: RwLock::new(HashMap::new()),
            system: RwLock::new(SystemTelemetry::default()),
            check_interval: Duration::from_secs(CHECK_INTERVAL_SECS),
        }
    }

    /// Monitor loop; runs until the stop flag flips. A panicking probe
    /// round is caught here and the loop re-enters on the next tick.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        use futures::FutureExt;

        tracing::info!("Health monitor started");
        loop {
            if *stop.borrow() {
                break;
            }
            if std::panic::AssertUnwindSafe(self.tick())
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::error!("Health tick panicked, continuing on next interval");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = stop.changed() => {}
            }
        }
        tracing::info!("Health monitor stopped");
    }

    /// One probe round over the currently enabled cameras.
    pub async fn tick(&self) {
        let settings = self.settings.current().await;

        for camera in settings.enabled_cameras() {
            let url = camera.rtsp_url(&settings.camera_username, &settings.camera_password);
            let online = probe_rtsp(&url).await;

            let mut cameras = self.cameras.write().await;
            let entry = cameras.entry(camera.tag.clone()).or_default();
            match transition(entry.online, online) {
                Some(HealthTransition::Lost) => {
                    tracing::warn!(source = %camera.tag, "Camera connection lost");
                }
                Some(HealthTransition::Recovered) => {
                    tracing::info!(source = %camera.tag, "Camera connection recovered");
                }
                None => {}
            }
            entry.online = Some(online);
            entry.last_check = Some(Utc::now().timestamp());
            entry.last_error = if online {
                None
            } else {
                Some("Camera offline or unreachable".to_string())
            };
        }

        // Disabled cameras drop out of the snapshot
        {
            let enabled: Vec<String> =
                settings.enabled_cameras().map(|c| c.tag.clone()).collect();
            let mut cameras = self.cameras.write().await;
            cameras.retain(|tag, _| enabled.contains(tag));
        }

        let temp = read_cpu_temp().await;
        let mut system = self.system.write().await;
        system.cpu_temp_c = temp;
        system.last_update = Some(Utc::now().timestamp());
    }

    pub async fn camera_health(&self) -> HashMap<String, CameraHealth> {
        self.cameras.read().await.clone()
    }

    pub async fn system_telemetry(&self) -> SystemTelemetry {
        self.system.read().await.clone()
    }
}

fn transition(prev: Option<bool>, now: bool) -> Option<HealthTransition> {
    match (prev, now) {
        (Some(true), false) => Some(HealthTransition::Lost),
        (Some(false), true) => Some(HealthTransition::Recovered),
        // First probe failing is worth one log line too
        (None, false) => Some(HealthTransition::Lost),
        _ => None,
    }
}

/// ffprobe exits 0 quickly when a video stream is present.
async fn probe_rtsp(rtsp_url: &str) -> bool {
    let child = Command::new("ffprobe")
        .args([
            "-rtsp_transport",
            "tcp",
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            rtsp_url,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(_) => return false,
    };

    match tokio::time::timeout(
        Duration::from_secs(CAMERA_PROBE_TIMEOUT_SECS),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) => output.status.success(),
        _ => false,
    }
}

/// CPU temperature in Celsius, sysfs first, vcgencmd fallback.
async fn read_cpu_temp() -> Option<f64> {
    if let Ok(raw) = tokio::fs::read_to_string(THERMAL_SYSFS).await {
        if let Some(temp) = parse_millidegrees(&raw) {
            return Some(temp);
        }
    }

    let output = tokio::time::timeout(
        Duration::from_secs(2),
        Command::new("vcgencmd").arg("measure_temp").output(),
    )
    .await
    .ok()?
    .ok()?;

    parse_vcgencmd(&String::from_utf8_lossy(&output.stdout))
}

fn parse_millidegrees(raw: &str) -> Option<f64> {
    let millis: i64 = raw.trim().parse().ok()?;
    Some((millis as f64 / 100.0).round() / 10.0)
}

fn parse_vcgencmd(raw: &str) -> Option<f64> {
    raw.trim()
        .strip_prefix("temp=")?
        .trim_end_matches("'C")
        .parse()
        .ok()
}
