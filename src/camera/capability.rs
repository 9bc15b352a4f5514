//! Polymorphic capability seams for device discovery and their
//! production implementations driving `v4l2-ctl`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

use super::types::{Capabilities, Format};

/// `exists(path) → bool` — checks whether a device node is present.
#[async_trait]
pub trait DeviceChecker: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
}

/// Runs a V4L2 query command out-of-process and returns raw stdout.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, device_path: &str, args: &str, timeout: Duration) -> Result<String>;
}

/// Parses free-form `v4l2-ctl` text output into structured records.
/// Missing or unparseable sections never error; they yield empty
/// fields and fall back to defaults.
pub trait InfoParser: Send + Sync {
    fn parse_info(&self, text: &str) -> Capabilities;
    fn parse_formats(&self, text: &str) -> Vec<Format>;
}

/// Checks for device presence by stat-ing the filesystem path.
pub struct FsDeviceChecker;

#[async_trait]
impl DeviceChecker for FsDeviceChecker {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

/// Shells out to `v4l2-ctl -d <device> <args>` with a wall-clock
/// timeout, driven as an async task rather than a blocking
/// thread+channel pair since execution is just a subprocess wait.
pub struct V4l2CtlExecutor {
    pub binary: String,
}

impl Default for V4l2CtlExecutor {
    fn default() -> Self {
        Self {
            binary: "v4l2-ctl".to_string(),
        }
    }
}

#[async_trait]
impl CommandExecutor for V4l2CtlExecutor {
    async fn execute(&self, device_path: &str, args: &str, timeout: Duration) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-d")
            .arg(device_path)
            .args(args.split_whitespace())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::SubprocessFailed(format!("spawning v4l2-ctl: {e}")))?;
        let mut stdout = child.stdout.take().expect("piped stdout");

        let read_fut = async {
            let mut buf = String::new();
            stdout
                .read_to_string(&mut buf)
                .await
                .map_err(|e| AppError::Internal(format!("reading v4l2-ctl output: {e}")))?;
            let status = child
                .wait()
                .await
                .map_err(|e| AppError::Internal(format!("waiting for v4l2-ctl: {e}")))?;
            if !status.success() {
                return Err(AppError::SubprocessFailed(format!(
                    "v4l2-ctl exited with {status}"
                )));
            }
            Ok(buf)
        };

        match tokio::time::timeout(timeout, read_fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(device = %device_path, args, "v4l2-ctl probe timed out");
                Err(AppError::Timeout(format!(
                    "probing {device_path} with args '{args}'"
                )))
            }
        }
    }
}

/// Line/regex-free (deliberately simple, line-oriented) parser for
/// `v4l2-ctl --all`/`--list-formats-ext` output.
pub struct LineInfoParser;

impl InfoParser for LineInfoParser {
    fn parse_info(&self, text: &str) -> Capabilities {
        let mut caps = Capabilities::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().to_string();
            match key {
                "Driver name" => caps.driver_name = value,
                "Card type" => caps.card_name = value,
                "Bus info" => caps.bus_info = value,
                "Driver version" => caps.driver_version = value,
                "Capabilities" => {
                    caps.capabilities = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            }
        }
        caps
    }

    fn parse_formats(&self, text: &str) -> Vec<Format> {
        let mut formats = Vec::new();
        let mut current_fourcc: Option<String> = None;
        let mut current_size: Option<(u32, u32)> = None;
        let mut current_rates: Vec<String> = Vec::new();

        let flush = |fourcc: &Option<String>,
                     size: &Option<(u32, u32)>,
                     rates: &mut Vec<String>,
                     out: &mut Vec<Format>| {
            if let (Some(fourcc), Some((w, h))) = (fourcc, size) {
                if !rates.is_empty() {
                    out.push(Format {
                        pixel_format: fourcc.clone(),
                        width: *w,
                        height: *h,
                        frame_rates: std::mem::take(rates),
                    });
                }
            }
        };

        for line in text.lines() {
            let line = line.trim();
            if let Some(start) = line.find("Pixel Format: '") {
                flush(
                    &current_fourcc,
                    &current_size,
                    &mut current_rates,
                    &mut formats,
                );
                let rest = &line[start + "Pixel Format: '".len()..];
                current_fourcc = rest.split('\'').next().map(str::to_string);
                current_size = None;
            } else if let Some(idx) = line.find("Size: Discrete") {
                let rest = line[idx + "Size: Discrete".len()..].trim();
                current_size = parse_wxh(rest);
                if current_size.is_none() {
                    debug!(line, "malformed Size: line, defaulting to 0x0");
                    current_size = Some((0, 0));
                }
            } else if let Some(idx) = line.find("Interval: Discrete") {
                if let Some(fps) = parse_fps(&line[idx..]) {
                    current_rates.push(fps);
                }
            }
        }
        flush(
            &current_fourcc,
            &current_size,
            &mut current_rates,
            &mut formats,
        );
        formats
    }
}

fn parse_wxh(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// `Interval: Discrete 0.033s (30.000 fps)` → `"30.000"`.
fn parse_fps(s: &str) -> Option<String> {
    let start = s.find('(')? + 1;
    let end = s[start..].find("fps")?;
    Some(s[start..start + end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "\
Driver Info:
	Driver name : uvcvideo
	Card type : USB Camera
	Bus info : usb-0000:00:14.0-1
	Driver version : 6.1.0
	Capabilities : 0x84a00001
";

    const FORMATS: &str = "\
ioctl: VIDIOC_ENUM_FMT
	Type: Video Capture

	[0]: 'YUYV' (YUYV 4:2:2)
		Size: Discrete 640x480
			Interval: Discrete 0.033s (30.000 fps)
			Interval: Discrete 0.040s (25.000 fps)
	[1]: 'MJPG' (Motion-JPEG, compressed)
		Size: Discrete 1280x720
			Interval: Discrete 0.033s (30.000 fps)
";

    #[test]
    fn parses_device_info() {
        let parser = LineInfoParser;
        let caps = parser.parse_info(INFO);
        assert_eq!(caps.driver_name, "uvcvideo");
        assert_eq!(caps.card_name, "USB Camera");
        assert_eq!(caps.bus_info, "usb-0000:00:14.0-1");
        assert_eq!(caps.driver_version, "6.1.0");
        assert_eq!(caps.capabilities, vec!["0x84a00001"]);
    }

    #[test]
    fn parses_format_blocks() {
        let parser = LineInfoParser;
        let formats = parser.parse_formats(FORMATS);
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].pixel_format, "YUYV");
        assert_eq!(formats[0].width, 640);
        assert_eq!(formats[0].height, 480);
        assert_eq!(formats[0].frame_rates, vec!["30.000", "25.000"]);
        assert_eq!(formats[1].pixel_format, "MJPG");
    }

    #[test]
    fn malformed_size_line_yields_zero_and_keeps_parsing_siblings() {
        let text = "\
	[0]: 'YUYV' (YUYV 4:2:2)
		Size: Discrete garbage
			Interval: Discrete 0.033s (30.000 fps)
	[1]: 'MJPG' (Motion-JPEG, compressed)
		Size: Discrete 1280x720
			Interval: Discrete 0.033s (30.000 fps)
";
        let parser = LineInfoParser;
        let formats = parser.parse_formats(text);
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].width, 0);
        assert_eq!(formats[0].height, 0);
        assert_eq!(formats[1].pixel_format, "MJPG");
    }

    #[test]
    fn empty_text_yields_empty_fields() {
        let parser = LineInfoParser;
        assert_eq!(parser.parse_info(""), Capabilities::default());
        assert!(parser.parse_formats("").is_empty());
    }
}
