//! Device discovery & capability probing engine.
//!
//! A background poller that watches the device filesystem, probes each
//! device out-of-process, and maintains a live device map with event
//! notifications.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{AppError, Result};

use super::capability::{CommandExecutor, DeviceChecker, InfoParser};
use super::types::{
    default_formats, CameraDevice, CameraEvent, CameraEventKind, Capabilities, DeviceMap,
    DeviceStatus, MonitorStats,
};

/// Fire-and-forget listener invoked for every device event.
pub type EventCallback = Arc<dyn Fn(CameraEvent) + Send + Sync>;

/// Listener invoked with a cancellable context; may fail.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: CameraEvent) -> Result<()>;
}

#[derive(Default)]
struct Counters {
    polling_cycles: AtomicU32,
    device_state_changes: AtomicU32,
    capability_probes_attempted: AtomicU32,
    capability_probes_succeeded: AtomicU32,
    capability_timeouts: AtomicU32,
    capability_parse_errors: AtomicU32,
    polling_failure_count: AtomicU32,
    active_probe_tasks: AtomicU32,
}

/// Maintains the live device map and dispatches [`CameraEvent`]s.
///
/// `getConnectedCameras`/`getDevice` never error and never block on
/// I/O: the device map is a `parking_lot::RwLock` read out fully
/// before being handed to the caller, so no lock is held across a
/// suspension point.
pub struct CameraMonitor {
    device_checker: Arc<dyn DeviceChecker>,
    command_executor: Arc<dyn CommandExecutor>,
    info_parser: Arc<dyn InfoParser>,
    config: CameraConfig,
    devices: Arc<RwLock<DeviceMap>>,
    counters: Arc<Counters>,
    poll_interval: Arc<parking_lot::Mutex<f64>>,
    running: Arc<AtomicBool>,
    cancel: Arc<RwLock<Option<CancellationToken>>>,
    callbacks: Arc<RwLock<Vec<EventCallback>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    poll_task: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl CameraMonitor {
    pub fn new(
        config: CameraConfig,
        device_checker: Arc<dyn DeviceChecker>,
        command_executor: Arc<dyn CommandExecutor>,
        info_parser: Arc<dyn InfoParser>,
    ) -> Self {
        let base_interval = config.poll_interval_secs as f64;
        Self {
            device_checker,
            command_executor,
            info_parser,
            config,
            devices: Arc::new(RwLock::new(DeviceMap::new())),
            counters: Arc::new(Counters::default()),
            poll_interval: Arc::new(parking_lot::Mutex::new(base_interval)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(RwLock::new(None)),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            handlers: Arc::new(RwLock::new(Vec::new())),
            poll_task: Arc::new(RwLock::new(None)),
        }
    }

    /// Start background polling. Idempotent-fail: returns
    /// `AlreadyRunning` if already started.
    pub fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        *self.cancel.write() = Some(token.clone());

        let device_checker = self.device_checker.clone();
        let command_executor = self.command_executor.clone();
        let info_parser = self.info_parser.clone();
        let config = self.config.clone();
        let devices = self.devices.clone();
        let counters = self.counters.clone();
        let poll_interval = self.poll_interval.clone();
        let callbacks = self.callbacks.clone();
        let handlers = self.handlers.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            poll_loop(
                token,
                device_checker,
                command_executor,
                info_parser,
                config,
                devices,
                counters,
                poll_interval,
                callbacks,
                handlers,
            )
            .await;
            running.store(false, Ordering::SeqCst);
        });
        *self.poll_task.write() = Some(handle);
        info!("camera monitor started");
        Ok(())
    }

    /// Stop polling. Returns `NotRunning` if not started; safe to call
    /// exactly once after each `start`.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::NotRunning);
        }
        if let Some(token) = self.cancel.write().take() {
            token.cancel();
        }
        info!("camera monitor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of connected devices; always non-null, possibly empty.
    pub fn get_connected_cameras(&self) -> DeviceMap {
        self.devices.read().clone()
    }

    /// O(1) lookup. Never errors: returns `(None, false)` for unknown
    /// or empty paths.
    pub fn get_device(&self, path: &str) -> (Option<CameraDevice>, bool) {
        if path.is_empty() {
            return (None, false);
        }
        match self.devices.read().get(path) {
            Some(device) => (Some(device.clone()), true),
            None => (None, false),
        }
    }

    pub fn add_event_callback(&self, callback: EventCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn get_monitor_stats(&self) -> MonitorStats {
        MonitorStats {
            running: self.is_running(),
            active_probe_tasks: self.counters.active_probe_tasks.load(Ordering::SeqCst) as usize,
            polling_cycles: self.counters.polling_cycles.load(Ordering::SeqCst) as u64,
            device_state_changes: self.counters.device_state_changes.load(Ordering::SeqCst) as u64,
            capability_probes_attempted: self
                .counters
                .capability_probes_attempted
                .load(Ordering::SeqCst) as u64,
            capability_probes_succeeded: self
                .counters
                .capability_probes_succeeded
                .load(Ordering::SeqCst) as u64,
            capability_timeouts: self.counters.capability_timeouts.load(Ordering::SeqCst) as u64,
            capability_parse_errors: self
                .counters
                .capability_parse_errors
                .load(Ordering::SeqCst) as u64,
            polling_failure_count: self.counters.polling_failure_count.load(Ordering::SeqCst)
                as u64,
            current_poll_interval_secs: *self.poll_interval.lock(),
            known_device_count: self.devices.read().len(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    cancel: CancellationToken,
    device_checker: Arc<dyn DeviceChecker>,
    command_executor: Arc<dyn CommandExecutor>,
    info_parser: Arc<dyn InfoParser>,
    config: CameraConfig,
    devices: Arc<RwLock<DeviceMap>>,
    counters: Arc<Counters>,
    poll_interval: Arc<parking_lot::Mutex<f64>>,
    callbacks: Arc<RwLock<Vec<EventCallback>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let cycle_ok = run_poll_cycle(
            &cancel,
            &device_checker,
            &command_executor,
            &info_parser,
            &config,
            &devices,
            &counters,
            &callbacks,
            &handlers,
        )
        .await;

        counters.polling_cycles.fetch_add(1, Ordering::SeqCst);

        let base = config.poll_interval_secs as f64;
        let ceiling = config.max_backoff_interval_secs as f64;
        let mut interval = poll_interval.lock();
        *interval = if cycle_ok {
            base
        } else {
            counters.polling_failure_count.fetch_add(1, Ordering::SeqCst);
            (*interval * 2.0).min(ceiling).max(base)
        };
        let sleep_for = *interval;
        drop(interval);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs_f64(sleep_for)) => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_poll_cycle(
    cancel: &CancellationToken,
    device_checker: &Arc<dyn DeviceChecker>,
    command_executor: &Arc<dyn CommandExecutor>,
    info_parser: &Arc<dyn InfoParser>,
    config: &CameraConfig,
    devices: &Arc<RwLock<DeviceMap>>,
    counters: &Arc<Counters>,
    callbacks: &Arc<RwLock<Vec<EventCallback>>>,
    handlers: &Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) -> bool {
    let known_paths: HashSet<String> = devices.read().keys().cloned().collect();
    let mut seen_paths = HashSet::new();
    let mut to_probe = Vec::new();
    let mut cycle_ok = true;

    for device_num in &config.device_range {
        if cancel.is_cancelled() {
            return cycle_ok;
        }
        let path = CameraDevice::canonical_path(*device_num);
        let exists = device_checker.exists(&path).await;
        if exists {
            seen_paths.insert(path.clone());
            let status = devices.read().get(&path).map(|d| d.status);
            match status {
                None => to_probe.push((*device_num, path)),
                Some(DeviceStatus::Connected) => {}
                Some(_) => to_probe.push((*device_num, path)),
            }
        }
    }

    for path in known_paths.difference(&seen_paths) {
        let removed = devices.write().remove(path);
        if let Some(mut device) = removed {
            device.status = DeviceStatus::Disconnected;
            device.last_seen = Utc::now();
            counters.device_state_changes.fetch_add(1, Ordering::SeqCst);
            dispatch_event(
                CameraEvent {
                    device_path: path.clone(),
                    kind: CameraEventKind::Disconnected,
                    timestamp: Utc::now(),
                    device,
                },
                callbacks,
                handlers,
            )
            .await;
        }
    }

    if !to_probe.is_empty() {
        counters
            .active_probe_tasks
            .fetch_add(to_probe.len() as u32, Ordering::SeqCst);
        let mut tasks = Vec::new();
        for (device_num, path) in to_probe {
            let command_executor = command_executor.clone();
            let info_parser: Arc<dyn InfoParser> = info_parser.clone();
            let config = config.clone();
            let devices = devices.clone();
            let counters = counters.clone();
            let callbacks = callbacks.clone();
            let handlers = handlers.clone();
            tasks.push(tokio::spawn(async move {
                probe_device(
                    device_num,
                    path,
                    command_executor,
                    info_parser,
                    config,
                    devices,
                    counters.clone(),
                    callbacks,
                    handlers,
                )
                .await;
                counters.active_probe_tasks.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            if task.await.is_err() {
                cycle_ok = false;
            }
        }
    }

    cycle_ok
}

#[allow(clippy::too_many_arguments)]
async fn probe_device(
    device_num: u32,
    path: String,
    command_executor: Arc<dyn CommandExecutor>,
    info_parser: Arc<dyn InfoParser>,
    config: CameraConfig,
    devices: Arc<RwLock<DeviceMap>>,
    counters: Arc<Counters>,
    callbacks: Arc<RwLock<Vec<EventCallback>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) {
    let timeout = Duration::from_secs(config.capability_timeout_secs);
    let retry_interval = Duration::from_secs(config.capability_retry_interval_secs);

    let mut last_err = None;
    let mut result = None;
    for attempt in 0..=config.capability_max_retries {
        counters
            .capability_probes_attempted
            .fetch_add(1, Ordering::SeqCst);
        match probe_once(&path, &command_executor, info_parser.as_ref(), timeout).await {
            Ok(caps) => {
                result = Some(caps);
                break;
            }
            Err(e) => {
                if matches!(e, AppError::Timeout(_)) {
                    counters.capability_timeouts.fetch_add(1, Ordering::SeqCst);
                }
                last_err = Some(e);
                if attempt < config.capability_max_retries {
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    let device = match result {
        Some((capabilities, formats)) => {
            counters
                .capability_probes_succeeded
                .fetch_add(1, Ordering::SeqCst);
            CameraDevice {
                path: path.clone(),
                device_num,
                name: if capabilities.card_name.is_empty() {
                    format!("Camera {device_num}")
                } else {
                    capabilities.card_name.clone()
                },
                status: DeviceStatus::Connected,
                capabilities,
                formats,
                last_seen: Utc::now(),
            }
        }
        None => {
            if let Some(AppError::Timeout(_)) = &last_err {
            } else {
                counters
                    .capability_parse_errors
                    .fetch_add(1, Ordering::SeqCst);
            }
            if let Some(e) = &last_err {
                warn!(device = %path, error = %e, "capability probe failed, using fallback defaults");
            }
            CameraDevice {
                path: path.clone(),
                device_num,
                name: format!("Camera {device_num}"),
                status: DeviceStatus::Error,
                capabilities: Capabilities::default(),
                formats: default_formats(),
                last_seen: Utc::now(),
            }
        }
    };

    // A probe only emits `Connected` on success; a failed probe — first
    // sighting or not — emits `StatusChanged`.
    let kind = if device.status == DeviceStatus::Connected {
        CameraEventKind::Connected
    } else {
        CameraEventKind::StatusChanged
    };

    devices.write().insert(path.clone(), device.clone());
    counters.device_state_changes.fetch_add(1, Ordering::SeqCst);

    dispatch_event(
        CameraEvent {
            device_path: path,
            kind,
            timestamp: Utc::now(),
            device,
        },
        &callbacks,
        &handlers,
    )
    .await;
}

async fn probe_once(
    path: &str,
    command_executor: &Arc<dyn CommandExecutor>,
    info_parser: &dyn InfoParser,
    timeout: Duration,
) -> Result<(Capabilities, Vec<super::types::Format>)> {
    let info_text = command_executor.execute(path, "--info", timeout).await?;
    let formats_text = command_executor
        .execute(path, "--list-formats-ext", timeout)
        .await?;
    let capabilities = info_parser.parse_info(&info_text);
    let formats = info_parser.parse_formats(&formats_text);
    Ok((capabilities, formats))
}

/// Deliver to every registered callback and handler synchronously from
/// the dispatch task. Per-device ordering is preserved because probes
/// for the same device never run concurrently (a single poll cycle
/// probes each path at most once, and the next cycle only re-probes
/// after this one completes).
async fn dispatch_event(
    event: CameraEvent,
    callbacks: &Arc<RwLock<Vec<EventCallback>>>,
    handlers: &Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) {
    debug!(device = %event.device_path, kind = ?event.kind, "dispatching camera event");
    let callbacks = callbacks.read().clone();
    for callback in callbacks {
        callback(event.clone());
    }
    let handlers = handlers.read().clone();
    for handler in handlers {
        if let Err(e) = handler.handle(event.clone()).await {
            warn!(error = %e, "event handler returned an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::capability::{CommandExecutor, DeviceChecker, InfoParser};
    use std::collections::HashSet as StdHashSet;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeChecker {
        present: Arc<AsyncMutex<StdHashSet<String>>>,
    }

    #[async_trait]
    impl DeviceChecker for FakeChecker {
        async fn exists(&self, path: &str) -> bool {
            self.present.lock().await.contains(path)
        }
    }

    struct FakeExecutor;

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn execute(&self, _path: &str, args: &str, _timeout: Duration) -> Result<String> {
            if args == "--info" {
                Ok("Driver name : fake\nCard type : Fake Cam\nBus info : usb-fake\nDriver version : 1.0\nCapabilities : 0x1\n".to_string())
            } else {
                Ok("[0]: 'YUYV'\n\tSize: Discrete 640x480\n\t\tInterval: Discrete 0.033s (30.000 fps)\n".to_string())
            }
        }
    }

    struct FakeParser;
    impl InfoParser for FakeParser {
        fn parse_info(&self, text: &str) -> Capabilities {
            super::super::capability::LineInfoParser.parse_info(text)
        }
        fn parse_formats(&self, text: &str) -> Vec<super::super::types::Format> {
            super::super::capability::LineInfoParser.parse_formats(text)
        }
    }

    fn test_config() -> CameraConfig {
        CameraConfig {
            poll_interval_secs: 0,
            max_backoff_interval_secs: 1,
            detection_timeout_secs: 1,
            device_range: vec![0, 1, 2],
            enable_capability_detection: true,
            auto_start_streams: false,
            capability_timeout_secs: 1,
            capability_retry_interval_secs: 0,
            capability_max_retries: 0,
        }
    }

    #[tokio::test]
    async fn discovers_present_device_and_emits_connected_event() {
        let present = Arc::new(AsyncMutex::new(StdHashSet::new()));
        present.lock().await.insert("/dev/video0".to_string());

        let monitor = CameraMonitor::new(
            test_config(),
            Arc::new(FakeChecker {
                present: present.clone(),
            }),
            Arc::new(FakeExecutor),
            Arc::new(FakeParser),
        );

        let events = Arc::new(RwLock::new(Vec::new()));
        let events_clone = events.clone();
        monitor.add_event_callback(Arc::new(move |e: CameraEvent| {
            events_clone.write().push(e);
        }));

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.stop().unwrap();

        let cameras = monitor.get_connected_cameras();
        assert_eq!(cameras.len(), 1);
        let device = cameras.get("/dev/video0").unwrap();
        assert_eq!(device.path, "/dev/video0");
        assert_eq!(device.status, DeviceStatus::Connected);

        let recorded = events.read();
        assert!(recorded
            .iter()
            .any(|e| e.kind == CameraEventKind::Connected && e.device_path == "/dev/video0"));
    }

    #[tokio::test]
    async fn start_twice_returns_already_running() {
        let monitor = CameraMonitor::new(
            test_config(),
            Arc::new(FakeChecker {
                present: Arc::new(AsyncMutex::new(StdHashSet::new())),
            }),
            Arc::new(FakeExecutor),
            Arc::new(FakeParser),
        );
        monitor.start().unwrap();
        assert!(matches!(monitor.start(), Err(AppError::AlreadyRunning)));
        monitor.stop().unwrap();
    }

    #[tokio::test]
    async fn stop_twice_returns_not_running() {
        let monitor = CameraMonitor::new(
            test_config(),
            Arc::new(FakeChecker {
                present: Arc::new(AsyncMutex::new(StdHashSet::new())),
            }),
            Arc::new(FakeExecutor),
            Arc::new(FakeParser),
        );
        monitor.start().unwrap();
        monitor.stop().unwrap();
        assert!(matches!(monitor.stop(), Err(AppError::NotRunning)));
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn device_removal_emits_disconnected_and_clears_map() {
        let present = Arc::new(AsyncMutex::new(StdHashSet::new()));
        present.lock().await.insert("/dev/video0".to_string());

        let monitor = CameraMonitor::new(
            test_config(),
            Arc::new(FakeChecker {
                present: present.clone(),
            }),
            Arc::new(FakeExecutor),
            Arc::new(FakeParser),
        );
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(monitor.get_connected_cameras().len(), 1);

        present.lock().await.clear();
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.stop().unwrap();

        assert_eq!(monitor.get_connected_cameras().len(), 0);
    }

    #[tokio::test]
    async fn unknown_path_lookup_never_errors() {
        let monitor = CameraMonitor::new(
            test_config(),
            Arc::new(FakeChecker {
                present: Arc::new(AsyncMutex::new(StdHashSet::new())),
            }),
            Arc::new(FakeExecutor),
            Arc::new(FakeParser),
        );
        let (device, exists) = monitor.get_device("/dev/video99");
        assert!(device.is_none());
        assert!(!exists);
        let (device, exists) = monitor.get_device("");
        assert!(device.is_none());
        assert!(!exists);
    }
}
