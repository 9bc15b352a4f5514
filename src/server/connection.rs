//! Connection lifecycle: per-connection state, the outbound queue,
//! and the `axum` WebSocket upgrade handler.
//!
//! A single-topic subscribe/broadcast loop generalized to the
//! JSON-RPC 2.0 envelope, with a bounded per-connection outbound
//! channel so a slow client cannot block a fast one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::security::Role;
use crate::state::AppState;

use super::dispatch::dispatch_request;
use super::protocol::{RpcRequest, RpcResponse, INVALID_REQUEST, PARSE_ERROR};

/// Default capacity of a connection's outbound queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// A connection's public state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClientConnection {
    pub client_id: String,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub role: Role,
    pub auth_method: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub subscriptions: HashSet<String>,
    pub last_activity: DateTime<Utc>,
}

impl ClientConnection {
    fn new(client_id: String) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            authenticated: false,
            user_id: None,
            role: Role::Viewer,
            auth_method: None,
            connected_at: now,
            subscriptions: HashSet::new(),
            last_activity: now,
        }
    }
}

/// Owns one connection's mutable state and outbound sender. Readers
/// across the dispatch pipeline take a snapshot rather than holding
/// the lock across a suspension point.
pub struct ConnectionHandle {
    pub client_id: String,
    state: RwLock<ClientConnection>,
    outbound: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn snapshot(&self) -> ClientConnection {
        self.state.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    pub fn role(&self) -> Role {
        self.state.read().role
    }

    pub fn authenticate(&self, user_id: &str, role: Role, auth_method: &str) {
        let mut state = self.state.write();
        state.authenticated = true;
        state.user_id = Some(user_id.to_string());
        state.role = role;
        state.auth_method = Some(auth_method.to_string());
    }

    pub fn touch(&self) {
        self.state.write().last_activity = Utc::now();
    }

    pub fn subscribe(&self, topics: &[String]) {
        let mut state = self.state.write();
        for topic in topics {
            state.subscriptions.insert(topic.clone());
        }
    }

    pub fn unsubscribe(&self, topics: &[String]) {
        let mut state = self.state.write();
        for topic in topics {
            state.subscriptions.remove(topic);
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        let subs = &self.state.read().subscriptions;
        subs.contains("*") || subs.contains(topic)
    }

    /// Best-effort send. Returns `false` if the outbound queue is
    /// full, signalling the caller to disconnect this client.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.try_send(message).is_ok()
    }
}

/// Registry of live connections, owned exclusively by the WebSocket
/// server.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (Arc<ConnectionHandle>, mpsc::Receiver<Message>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Arc::new(ConnectionHandle {
            client_id: client_id.clone(),
            state: RwLock::new(ClientConnection::new(client_id.clone())),
            outbound: tx,
        });
        self.connections.write().insert(client_id, handle.clone());
        (handle, rx)
    }

    pub fn remove(&self, client_id: &str) {
        self.connections.write().remove(client_id);
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn snapshot(&self) -> Vec<ClientConnection> {
        self.connections.read().values().map(|c| c.snapshot()).collect()
    }
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (handle, mut outbound_rx) = state.connections.register();
    state.metrics.connection_opened();
    info!(client_id = %handle.client_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let mut notifications = state.events.subscribe();

    let ping_interval = Duration::from_secs(state.config.get().server.ping_interval_secs);
    let mut ping_ticker = tokio::time::interval(ping_interval);
    let max_message_size = state.config.get().server.max_message_size;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_message_size {
                            warn!(client_id = %handle.client_id, "oversize frame, closing connection");
                            break;
                        }
                        handle.touch();
                        let response = match serde_json::from_str::<RpcRequest>(&text) {
                            Ok(request) => {
                                if !request.is_valid_envelope() {
                                    RpcResponse::error(request.id.clone(), INVALID_REQUEST, "invalid JSON-RPC 2.0 envelope")
                                } else {
                                    dispatch_request(&state, &handle, request).await
                                }
                            }
                            Err(_) => RpcResponse::error(None, PARSE_ERROR, "malformed JSON"),
                        };
                        if let Ok(json) = serde_json::to_string(&response) {
                            if sink.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(client_id = %handle.client_id, "pong received");
                        handle.touch();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(client_id = %handle.client_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(event) => {
                        if handle.is_subscribed(event.topic()) {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if sink.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client_id = %handle.client_id, missed = n, "client lagged on notification bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.connections.remove(&handle.client_id);
    state.security.rate_limiter.remove_client(&handle.client_id);
    state.metrics.connection_closed();
    info!(client_id = %handle.client_id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_unauthenticated_with_no_subscriptions() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        assert!(!handle.is_authenticated());
        assert!(handle.snapshot().subscriptions.is_empty());
    }

    #[test]
    fn authenticate_updates_role_and_flag() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        handle.authenticate("alice", Role::Operator, "jwt");
        assert!(handle.is_authenticated());
        assert_eq!(handle.role(), Role::Operator);
        assert_eq!(handle.snapshot().user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn subscribe_and_unsubscribe_round_trip() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        handle.subscribe(&["camera_event".to_string()]);
        assert!(handle.is_subscribed("camera_event"));
        handle.unsubscribe(&["camera_event".to_string()]);
        assert!(!handle.is_subscribed("camera_event"));
    }

    #[test]
    fn wildcard_subscription_matches_every_topic() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        handle.subscribe(&["*".to_string()]);
        assert!(handle.is_subscribed("camera_event"));
        assert!(handle.is_subscribed("recording_status_update"));
    }

    #[test]
    fn registry_tracks_connection_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count(), 0);
        let (handle, _rx) = registry.register();
        assert_eq!(registry.count(), 1);
        registry.remove(&handle.client_id);
        assert_eq!(registry.count(), 0);
    }
}
