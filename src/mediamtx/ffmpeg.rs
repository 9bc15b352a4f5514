//! FFmpeg subprocess orchestration: process spawn/terminate/kill and
//! segmented-recording argv construction.
//!
//! The process table is consulted under a `parking_lot::Mutex`, but
//! the `.wait()` calls that suspend on the OS always happen after the
//! lock is dropped, so a hung process can never block a lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{AppError, Result};

struct ManagedProcess {
    child: Child,
    output_path: PathBuf,
}

/// Owns the table of in-flight FFmpeg subprocesses, keyed by PID.
#[derive(Default)]
pub struct FfmpegManager {
    processes: Mutex<HashMap<u32, ManagedProcess>>,
}

impl FfmpegManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `ffmpeg` with `argv`, writing to `output_path`. Requires
    /// a non-empty argv and output path.
    pub async fn start_process(&self, argv: &[String], output_path: &Path) -> Result<u32> {
        if argv.is_empty() {
            return Err(AppError::InvalidParam("ffmpeg argv must not be empty".to_string()));
        }
        if output_path.as_os_str().is_empty() {
            return Err(AppError::InvalidParam("output path must not be empty".to_string()));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args(argv)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|e| AppError::SubprocessFailed(format!("spawning ffmpeg: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::SubprocessFailed("ffmpeg exited before pid was assigned".to_string()))?;

        self.processes.lock().insert(
            pid,
            ManagedProcess {
                child,
                output_path: output_path.to_path_buf(),
            },
        );
        info!(pid, output = %output_path.display(), "started ffmpeg process");
        Ok(pid)
    }

    /// Graceful terminate, wait up to `graceful_timeout`, then force
    /// kill and wait up to `kill_timeout`.
    pub async fn stop_process(
        &self,
        pid: u32,
        graceful_timeout: Duration,
        kill_timeout: Duration,
    ) -> Result<()> {
        let entry = self.processes.lock().remove(&pid);
        let Some(mut managed) = entry else {
            return Err(AppError::NotFound(format!("ffmpeg process {pid}")));
        };

        if signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_err() {
            warn!(pid, "SIGTERM failed, process may already be gone");
        }

        if tokio::time::timeout(graceful_timeout, managed.child.wait())
            .await
            .is_ok()
        {
            info!(pid, "ffmpeg terminated gracefully");
            return Ok(());
        }

        warn!(pid, "graceful termination timed out, sending SIGKILL");
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);

        match tokio::time::timeout(kill_timeout, managed.child.wait()).await {
            Ok(Ok(_)) => {
                info!(pid, "ffmpeg force-killed");
                Ok(())
            }
            Ok(Err(e)) => Err(AppError::SubprocessFailed(format!("waiting on killed ffmpeg {pid}: {e}"))),
            Err(_) => Err(AppError::Timeout(format!("killing ffmpeg process {pid}"))),
        }
    }

    pub fn is_process_running(&self, pid: u32) -> bool {
        if !self.processes.lock().contains_key(&pid) {
            return false;
        }
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    pub fn output_path(&self, pid: u32) -> Option<PathBuf> {
        self.processes.lock().get(&pid).map(|p| p.output_path.clone())
    }

    /// Builds the argv for a segmented recording: numbered segments of
    /// `segment_duration_secs`, retaining at most `max_segments`.
    pub fn segmented_recording_argv(
        device_path: &str,
        output_dir: &Path,
        basename: &str,
        segment_duration_secs: u64,
        max_segments: u32,
    ) -> Vec<String> {
        let pattern = output_dir
            .join(format!("{basename}_%03d.mp4"))
            .to_string_lossy()
            .to_string();
        vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            device_path.to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            segment_duration_secs.to_string(),
            "-segment_wrap".to_string(),
            max_segments.to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            pattern,
        ]
    }

    /// Atomically rotates a finalized segment into place.
    pub async fn rotate_file(old: &Path, new: &Path) -> Result<()> {
        tokio::fs::rename(old, new)
            .await
            .map_err(|e| AppError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_process_rejects_empty_argv() {
        let manager = FfmpegManager::new();
        let result = tokio_test::block_on(manager.start_process(&[], Path::new("/tmp/out.mp4")));
        assert!(matches!(result, Err(AppError::InvalidParam(_))));
    }

    #[test]
    fn start_process_rejects_empty_output_path() {
        let manager = FfmpegManager::new();
        let result = tokio_test::block_on(
            manager.start_process(&["-version".to_string()], Path::new("")),
        );
        assert!(matches!(result, Err(AppError::InvalidParam(_))));
    }

    #[test]
    fn unknown_pid_is_not_running() {
        let manager = FfmpegManager::new();
        assert!(!manager.is_process_running(999_999));
    }

    #[test]
    fn segmented_argv_contains_rotation_parameters() {
        let argv = FfmpegManager::segmented_recording_argv(
            "/dev/video0",
            Path::new("/tmp"),
            "camera0",
            60,
            5,
        );
        assert!(argv.contains(&"segment".to_string()));
        assert!(argv.contains(&"60".to_string()));
        assert!(argv.contains(&"5".to_string()));
    }
}
