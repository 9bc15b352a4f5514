use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::{Parser, ValueEnum};
use parking_lot::RwLock;
use rand::Rng;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_service::camera::{
    CameraMonitor, FsDeviceChecker, LineInfoParser, V4l2CtlExecutor,
};
use camera_service::config::{self, hot_reload_enabled, ConfigStore};
use camera_service::events::{EventBus, Notification};
use camera_service::mediamtx::MediaMtxController;
use camera_service::security::{
    JwtHandler, PermissionChecker, RateLimiter, SecuritySubsystem, SessionManager,
};
use camera_service::server::connection::ConnectionRegistry;
use camera_service::server::methods::RetentionPolicy;
use camera_service::server::metrics::Metrics;
use camera_service::server::ws_handler;
use camera_service::state::AppState;
use camera_service::utils::bind_tcp_listener;

/// Process log level, overridable by `-v`/`-vv`/`-vvv`.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// camerad command line arguments.
#[derive(Parser, Debug)]
#[command(name = "camerad")]
#[command(version, about = "Camera discovery, MediaMTX orchestration, and a JSON-RPC 2.0 WebSocket control surface", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides the configuration file).
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// WebSocket port (overrides the configuration file).
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("starting camera-service v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config_store = ConfigStore::load(&config_path).await?;
    let mut config = (*config_store.get()).clone();

    if let Some(addr) = args.address {
        config.server.host = addr;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tokio::fs::create_dir_all(&config.mediamtx.recordings_path).await?;
    tokio::fs::create_dir_all(&config.mediamtx.snapshots_path).await?;

    let jwt_secret = effective_jwt_secret(&config.security.jwt_secret_key);

    let cameras = Arc::new(CameraMonitor::new(
        config.camera.clone(),
        Arc::new(FsDeviceChecker),
        Arc::new(V4l2CtlExecutor::default()),
        Arc::new(LineInfoParser),
    ));
    let mediamtx = Arc::new(MediaMtxController::new(config.mediamtx.clone())?);

    let state = Arc::new(AppState {
        security: SecuritySubsystem {
            jwt: JwtHandler::new(&jwt_secret)?,
            permissions: PermissionChecker::new(),
            sessions: SessionManager::new(
                Duration::from_secs(config.security.session_timeout_secs),
                Duration::from_secs(config.security.session_cleanup_interval_secs),
            ),
            rate_limiter: RateLimiter::new(
                config.security.rate_limit_requests,
                Duration::from_secs(config.security.rate_limit_window_secs),
            ),
        },
        connections: ConnectionRegistry::new(),
        metrics: Metrics::new(),
        events: EventBus::new(),
        retention_policy: RwLock::new(RetentionPolicy::default()),
        cameras: cameras.clone(),
        mediamtx: mediamtx.clone(),
        config: config_store.clone(),
    });

    spawn_camera_event_bridge(&cameras, &state);

    cameras.start()?;
    tracing::info!(
        device_range = ?config.camera.device_range,
        "camera monitor started"
    );

    mediamtx.start_health_supervisor();
    tracing::info!("mediamtx health supervisor started");

    if hot_reload_enabled() {
        config_store.clone().spawn_hot_reload()?;
        tracing::info!("configuration hot reload enabled");
    }

    let app = build_router(state.clone(), &config);

    let bind_ip: IpAddr = config
        .server
        .host
        .parse()
        .unwrap_or_else(|_| "0.0.0.0".parse().unwrap());
    let addr = SocketAddr::new(bind_ip, config.server.port);
    let listener = bind_tcp_listener(addr)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!(websocket_path = %config.server.websocket_path, "listening on ws://{}", addr);

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
        tracing::info!("shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    cleanup(&state);
    tracing::info!("server shutdown complete");
    Ok(())
}

fn build_router(state: Arc<AppState>, config: &config::AppConfig) -> Router {
    Router::new()
        .route(&config.server.websocket_path, get(ws_handler))
        .route("/healthz", get(healthz))
        .nest_service(
            "/files/recordings",
            ServeDir::new(&config.mediamtx.recordings_path),
        )
        .nest_service(
            "/files/snapshots",
            ServeDir::new(&config.mediamtx.snapshots_path),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: the process is up and serving, independent of
/// camera/MediaMTX health (those are queried via `get_system_status`).
async fn healthz() -> &'static str {
    "ok"
}

/// Forward every camera event onto the shared notification bus so
/// subscribed WebSocket clients observe `camera_event` broadcasts
/// (spec.md §4.3 "Event broadcasting").
fn spawn_camera_event_bridge(cameras: &Arc<CameraMonitor>, state: &Arc<AppState>) {
    let state = state.clone();
    cameras.add_event_callback(Arc::new(move |event| {
        state.events.publish(Notification::CameraEvent { event });
    }));
}

/// A blank `jwt_secret_key` is only tolerable for local/dev runs: mint
/// a random one for this process lifetime and warn loudly, since
/// `JwtHandler::new` refuses an empty secret outright.
fn effective_jwt_secret(configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    tracing::warn!(
        "security.jwt_secret_key is empty; generating an ephemeral secret for this process \
         (tokens will not validate across restarts)"
    );
    let mut rng = rand::thread_rng();
    (0..32).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

fn default_config_path() -> PathBuf {
    std::env::var("CAMERA_SERVICE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/camera-service/config.yaml"))
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camera_service=error,tower_http=error",
        LogLevel::Warn => "camera_service=warn,tower_http=warn",
        LogLevel::Info => "camera_service=info,tower_http=info",
        LogLevel::Debug => "camera_service=debug,tower_http=debug",
        LogLevel::Trace => "camera_service=trace,tower_http=debug",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {err}");
    }
}

fn cleanup(state: &Arc<AppState>) {
    if let Err(e) = state.cameras.stop() {
        tracing::warn!(error = %e, "camera monitor was already stopped");
    }
    state.mediamtx.shutdown();
    state.shutdown_ambient_tasks();
}
