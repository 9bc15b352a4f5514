//! WebSocket JSON-RPC 2.0 control surface.

pub mod connection;
pub mod dispatch;
pub mod methods;
pub mod metrics;
pub mod protocol;

pub use connection::{ws_handler, ClientConnection, ConnectionHandle, ConnectionRegistry};
pub use metrics::{Metrics, MetricsSnapshot};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
