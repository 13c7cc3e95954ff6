//! Reusable notification server runtime.
//!
//! [`ServerHandle`] owns the full lifecycle: metrics recorder, the tenant
//! broadcast hub with its flush loops, the HTTP/WebSocket surface and
//! graceful shutdown. The CLI and embedding services both start through it.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::notifications::{ChangeNotifier, SessionHashInvalidator};
use crate::auth::{JwtConfig, JwtTenantVerifier, TokenVerifier};
use crate::config::AppConfig;
use crate::interfaces::http::{create_router, RouterState};
use crate::interfaces::ws::{HubConfig, SharedHub, TenantBroadcastHub};
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};

// ── Options ────────────────────────────────────────────────────────

/// Options for starting the notification server.
#[derive(Default)]
pub struct ServerOptions {
    pub config: AppConfig,
    /// Hook invalidating cached sessions when users or tenants change.
    pub session_hashes: Option<Arc<dyn SessionHashInvalidator>>,
    /// Replaces the JWT verifier built from `[security]`.
    pub verifier: Option<Arc<dyn TokenVerifier>>,
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running notification server.
///
/// ```rust,no_run
/// use csms_realtime::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     // ... wait for shutdown signal ...
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    /// Tenant rooms and buffered notifications.
    pub hub: SharedHub,
    /// The configuration the server was started with.
    pub config: AppConfig,
    /// Address the HTTP listener is bound to.
    pub local_addr: SocketAddr,

    notifier: ChangeNotifier,
    shutdown: ShutdownCoordinator,
    api_task: JoinHandle<()>,
}

/// The global recorder can only be installed once per process; restarts
/// within the same process reuse it.
fn prometheus_handle() -> Option<PrometheusHandle> {
    static PROM_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

    PROM_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("📊 Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                error!("Failed to install Prometheus metrics recorder: {}", e);
                None
            }
        })
        .clone()
}

impl ServerHandle {
    /// Start the hub flush loops and the HTTP server.
    pub async fn start(opts: ServerOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let app_cfg = opts.config;
        app_cfg.validate()?;

        info!("Starting CSMS realtime notifications...");

        let prometheus = if app_cfg.server.metrics_enabled {
            prometheus_handle()
        } else {
            None
        };

        // ── Hub ────────────────────────────────────────────────
        let shutdown = ShutdownCoordinator::new(app_cfg.server.shutdown_timeout);
        let shutdown_signal = shutdown.signal();

        let hub = TenantBroadcastHub::shared(HubConfig::from(&app_cfg));
        hub.start(shutdown_signal.clone());

        let mut notifier = hub.notifier();
        if let Some(hook) = opts.session_hashes {
            notifier = notifier.with_session_hash_invalidator(hook);
        }

        // ── Auth ───────────────────────────────────────────────
        let verifier = match opts.verifier {
            Some(verifier) => verifier,
            None => {
                let jwt_config = JwtConfig::from(&app_cfg);
                info!(issuer = %jwt_config.issuer, "JWT subscriber verification configured");
                Arc::new(JwtTenantVerifier::new(jwt_config))
            }
        };

        // ── HTTP server ────────────────────────────────────────
        let router = create_router(RouterState {
            hub: hub.clone(),
            verifier,
            shutdown: shutdown_signal.clone(),
            metrics: prometheus,
            started_at: Arc::new(Instant::now()),
        });

        let listener = tokio::net::TcpListener::bind(app_cfg.server.address()).await?;
        let local_addr = listener.local_addr()?;
        info!("HTTP server listening on http://{}", local_addr);
        info!("📡 Subscribers connect to ws://{}/notifications/ws", local_addr);
        info!("Swagger UI available at http://{}/docs/", local_addr);

        let api_shutdown = shutdown_signal.clone();
        let api_server = axum::serve(listener, router).with_graceful_shutdown(async move {
            api_shutdown.wait().await;
            info!("🛑 HTTP server received shutdown signal");
        });

        let api_task = tokio::spawn(async move {
            if let Err(e) = api_server.await {
                error!("HTTP server error: {}", e);
            }
        });

        info!("🚀 Notification server started.");

        Ok(Self {
            hub,
            config: app_cfg,
            local_addr,
            notifier,
            shutdown,
            api_task,
        })
    }

    /// Producer façade for the running hub.
    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Trigger graceful shutdown (non-blocking).
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for the server to fully stop after shutdown has been triggered.
    /// Notifications still queued at that point are dropped.
    pub async fn wait(self) {
        let Self {
            hub,
            shutdown,
            api_task,
            ..
        } = self;

        let completed = shutdown
            .shutdown_with_cleanup(move || async move {
                match api_task.await {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => error!("HTTP server task panicked: {}", e),
                }
            })
            .await;
        if !completed {
            warn!("HTTP server did not stop within the shutdown timeout");
        }

        hub.stop();
        info!("👋 CSMS realtime shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down notification server...");
        self.trigger_shutdown();
        self.wait().await;
    }

    /// Check if the server is still running.
    pub fn is_running(&self) -> bool {
        !self.api_task.is_finished()
    }
}

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServerHandle::start`]).
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
