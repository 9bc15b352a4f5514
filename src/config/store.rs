//! Read-only configuration source with env-var overlay and optional
//! file-watch hot reload.
//!
//! The core treats configuration as a read-only record plus an
//! update-callback registration: loading, YAML parsing and file
//! watching live here; everything else only ever calls [`ConfigStore::get`]
//! or [`ConfigStore::subscribe`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::AppConfig;
use crate::error::{AppError, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Published whenever the backing configuration file is reloaded.
/// Subscribers re-read only the fields they own.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub config: Arc<AppConfig>,
}

/// Lock-free configuration store. Reads are `ArcSwap::load` (no lock).
#[derive(Clone)]
pub struct ConfigStore {
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
    path: PathBuf,
}

impl ConfigStore {
    /// Load the YAML file at `path`, falling back to an all-default
    /// record if it does not exist, then apply the
    /// `CAMERA_SERVICE_<SECTION>_<KEY>` environment overlay.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Self::read_config(&path).await?;
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            cache: Arc::new(ArcSwap::new(Arc::new(config))),
            change_tx,
            path,
        })
    }

    async fn read_config(path: &Path) -> Result<AppConfig> {
        let mut config = if path.exists() {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AppError::Config(format!("reading {}: {e}", path.display())))?;
            serde_yaml::from_str(&text)
                .map_err(|e| AppError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            AppConfig::default()
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Current configuration snapshot. Cheap: an `Arc` clone, no lock.
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Subscribe to reload notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    /// Re-read the file from disk and publish a [`ConfigChange`] if it
    /// parses successfully. Parse failures are logged and the previous
    /// configuration is kept — a reload must never crash the process
    /// or drop in-flight work.
    pub async fn reload(&self) {
        match Self::read_config(&self.path).await {
            Ok(config) => {
                let config = Arc::new(config);
                self.cache.store(config.clone());
                info!(path = %self.path.display(), "configuration reloaded");
                let _ = self.change_tx.send(ConfigChange { config });
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to reload configuration, keeping previous");
            }
        }
    }

    /// Start a `notify`-backed file watcher that calls [`Self::reload`]
    /// whenever the backing file changes. Only active when the caller
    /// enables it (`CAMERA_SERVICE_ENABLE_HOT_RELOAD=true`).
    pub fn spawn_hot_reload(self: Arc<Self>) -> Result<tokio::task::JoinHandle<()>> {
        use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher = notify::Watcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| AppError::Config(format!("creating file watcher: {e}")))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| AppError::Config(format!("watching {}: {e}", self.path.display())))?;

        let store = self.clone();
        let handle = tokio::spawn(async move {
            // Keep the watcher alive for the lifetime of the task.
            let _watcher = watcher;
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                        store.reload().await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "config watcher error"),
                }
            }
        });
        Ok(handle)
    }
}

/// Read `CAMERA_SERVICE_<SECTION>_<KEY>` for every known field and
/// overlay it onto `config`. Unknown keys are ignored, never fatal.
fn apply_env_overrides(config: &mut AppConfig) {
    macro_rules! overlay {
        ($section:literal, $key:literal, $field:expr, $parse:expr) => {
            if let Ok(raw) = std::env::var(format!("CAMERA_SERVICE_{}_{}", $section, $key)) {
                match $parse(raw.as_str()) {
                    Ok(value) => $field = value,
                    Err(_) => warn!(
                        var = %format!("CAMERA_SERVICE_{}_{}", $section, $key),
                        value = %raw,
                        "ignoring unparsable environment override"
                    ),
                }
            }
        };
    }

    fn parse_str(s: &str) -> std::result::Result<String, ()> {
        Ok(s.to_string())
    }
    fn parse_num<T: std::str::FromStr>(s: &str) -> std::result::Result<T, ()> {
        s.parse().map_err(|_| ())
    }
    fn parse_bool(s: &str) -> std::result::Result<bool, ()> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(()),
        }
    }

    overlay!("SERVER", "HOST", config.server.host, parse_str);
    overlay!("SERVER", "PORT", config.server.port, parse_num::<u16>);
    overlay!(
        "SERVER",
        "WEBSOCKET_PATH",
        config.server.websocket_path,
        parse_str
    );
    overlay!(
        "SERVER",
        "MAX_CONNECTIONS",
        config.server.max_connections,
        parse_num::<usize>
    );

    overlay!("MEDIAMTX", "HOST", config.mediamtx.host, parse_str);
    overlay!(
        "MEDIAMTX",
        "API_PORT",
        config.mediamtx.api_port,
        parse_num::<u16>
    );
    overlay!(
        "MEDIAMTX",
        "RECORDINGS_PATH",
        config.mediamtx.recordings_path,
        parse_str
    );
    overlay!(
        "MEDIAMTX",
        "SNAPSHOTS_PATH",
        config.mediamtx.snapshots_path,
        parse_str
    );

    overlay!(
        "CAMERA",
        "POLL_INTERVAL",
        config.camera.poll_interval_secs,
        parse_num::<u64>
    );
    overlay!(
        "CAMERA",
        "ENABLE_CAPABILITY_DETECTION",
        config.camera.enable_capability_detection,
        parse_bool
    );
    overlay!(
        "CAMERA",
        "AUTO_START_STREAMS",
        config.camera.auto_start_streams,
        parse_bool
    );

    overlay!(
        "SECURITY",
        "JWT_SECRET_KEY",
        config.security.jwt_secret_key,
        parse_str
    );
    overlay!(
        "SECURITY",
        "RATE_LIMIT_REQUESTS",
        config.security.rate_limit_requests,
        parse_num::<u32>
    );
    overlay!(
        "SECURITY",
        "RATE_LIMIT_WINDOW",
        config.security.rate_limit_window_secs,
        parse_num::<u64>
    );

    overlay!("LOGGING", "LEVEL", config.logging.level, parse_str);
    overlay!("LOGGING", "FORMAT", config.logging.format, parse_str);
}

/// Whether hot reload was requested via environment flag.
pub fn hot_reload_enabled() -> bool {
    std::env::var("CAMERA_SERVICE_ENABLE_HOT_RELOAD")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_defaults_when_file_missing() {
        let store = ConfigStore::load("/nonexistent/camera-service.yaml")
            .await
            .unwrap();
        assert_eq!(store.get().server.port, 8002);
    }

    #[tokio::test]
    async fn loads_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "server:\n  port: 9001\n").unwrap();
        }
        let store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get().server.port, 9001);

        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "server:\n  port: 9002\n").unwrap();
        }
        let mut rx = store.subscribe();
        store.reload().await;
        assert_eq!(store.get().server.port, 9002);
        let change = rx.recv().await.unwrap();
        assert_eq!(change.config.server.port, 9002);
    }

    #[test]
    fn env_override_applies_known_field() {
        std::env::set_var("CAMERA_SERVICE_SERVER_PORT", "7000");
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.server.port, 7000);
        std::env::remove_var("CAMERA_SERVICE_SERVER_PORT");
    }
}
