//! Frame grabber - single-frame capture from an RTSP URL
//!
//! ## Responsibilities
//!
//! - Drive one ffmpeg subprocess per grab, bounded by a wall-clock
//!   timeout
//! - Verify the output is a non-empty JPEG before publishing it
//! - Map subprocess failures onto the typed `CameraError` taxonomy
//!
//! Uses kill_on_drop(true) so that when the timeout fires and the
//! future is cancelled, dropping the Child sends SIGKILL to ffmpeg.
//! This prevents zombie ffmpeg processes from accumulating when
//! cameras are unresponsive.

use crate::error::CameraError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Default grab budget in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// ffmpeg `-q:v` scale; 2 is near-lossless JPEG.
const DEFAULT_QUALITY: u8 = 2;

/// JPEG start-of-image marker.
const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];

pub struct FrameGrabber {
    quality: u8,
}

impl FrameGrabber {
    pub fn new() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
        }
    }

    /// Pull one frame from `rtsp_url` and write it to `out_path`.
    ///
    /// The frame is written to a sibling temp file first and renamed
    /// into place only after validation, so `out_path` either does not
    /// exist or is a complete JPEG.
    pub async fn grab(
        &self,
        rtsp_url: &str,
        out_path: &Path,
        timeout_secs: u64,
    ) -> Result<(), CameraError> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CameraError::DecodeFailed(format!("storage dir: {}", e)))?;
        }

        let tmp = temp_path(out_path);

        let child = Command::new("ffmpeg")
            .args(build_args(rtsp_url, self.quality, &tmp))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CameraError::ToolMissing
                } else {
                    CameraError::DecodeFailed(format!("ffmpeg spawn failed: {}", e))
                }
            })?;

        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    remove_quietly(&tmp).await;
                    return Err(classify_stderr(stderr.trim()));
                }
            }
            Ok(Err(e)) => {
                remove_quietly(&tmp).await;
                return Err(CameraError::DecodeFailed(format!(
                    "ffmpeg execution failed: {}",
                    e
                )));
            }
            Err(_) => {
                // Future cancelled, Child dropped, SIGKILL delivered
                remove_quietly(&tmp).await;
                tracing::warn!(
                    timeout_sec = timeout_secs,
                    rtsp_url = %rtsp_url,
                    "ffmpeg timeout, process killed via kill_on_drop"
                );
                return Err(CameraError::Timeout(timeout_secs));
            }
        }

        if !validate_jpeg(&tmp).await {
            remove_quietly(&tmp).await;
            return Err(CameraError::DecodeFailed(
                "empty or non-JPEG output".to_string(),
            ));
        }

        tokio::fs::rename(&tmp, out_path)
            .await
            .map_err(|e| CameraError::DecodeFailed(format!("rename failed: {}", e)))?;

        Ok(())
    }

    /// Check that ffmpeg is on PATH; returns its version banner line.
    pub async fn check_tool() -> Result<String, CameraError> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|_| CameraError::ToolMissing)?;

        if !output.status.success() {
            return Err(CameraError::ToolMissing);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }
}

impl Default for FrameGrabber {
    fn default() -> Self {
        Self::new()
    }
}

fn build_args(rtsp_url: &str, quality: u8, tmp: &Path) -> Vec<String> {
    vec![
        "-rtsp_transport".to_string(),
        "tcp".to_string(),
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        rtsp_url.to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        quality.to_string(),
        "-f".to_string(),
        "image2".to_string(),
        tmp.display().to_string(),
    ]
}

fn temp_path(out_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.tmp", out_path.display()))
}

/// Non-empty and starts with the JPEG SOI marker.
async fn validate_jpeg(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut magic = [0u8; 2];
    matches!(file.read_exact(&mut magic).await, Ok(_)) && magic == JPEG_MAGIC
}

async fn remove_quietly(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

/// Map ffmpeg stderr onto the error taxonomy. Connection-level
/// failures become Unreachable; everything else is DecodeFailed with
/// the stderr tail attached.
fn classify_stderr(stderr: &str) -> CameraError {
    let lower = stderr.to_lowercase();
    let unreachable_markers = [
        "connection refused",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "host is unreachable",
        "name or service not known",
        "failed to resolve",
        "401 unauthorized",
        "access denied",
    ];
    if unreachable_markers.iter().any(|m| lower.contains(m)) {
        CameraError::Unreachable(tail(stderr))
    } else {
        CameraError::DecodeFailed(tail(stderr))
    }
}

fn tail(s: &str) -> String {
    let line = s.lines().last().unwrap_or(s);
    line.chars().take(200).collect()
}
