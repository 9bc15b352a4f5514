//! Camera discovery & capability probing engine.

pub mod capability;
pub mod monitor;
pub mod types;

pub use capability::{CommandExecutor, DeviceChecker, FsDeviceChecker, InfoParser, LineInfoParser, V4l2CtlExecutor};
pub use monitor::{CameraMonitor, EventCallback, EventHandler};
pub use types::{
    CameraDevice, CameraEvent, CameraEventKind, Capabilities, DeviceMap, DeviceStatus, Format,
    MonitorStats,
};
