//! HTTP server: route table, listener and the idle-room reaper

use crate::config::ServerConfig;
use crate::error::SignalingError;
use crate::handler::{self, AppState};
use crate::registry::RoomRegistry;
use crate::router::SignalingRouter;
use crate::socket;
use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Build the route table
///
/// - `POST /create-room` - create a room (shared secret required)
/// - `GET /rooms` - list rooms and member counts (shared secret required)
/// - `GET /ws` - signaling WebSocket
/// - `GET /health` - health check
///
/// Anything else falls through to `public_dir` when one is given.
pub fn app(state: AppState, public_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/create-room", post(handler::create_room))
        .route("/rooms", get(handler::list_rooms))
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(handler::health))
        .with_state(state);

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Signaling server bound to a socket
pub struct Server {
    listener: TcpListener,
    router: Arc<SignalingRouter>,
    config: ServerConfig,
}

impl Server {
    /// Bind the listener and set up an empty registry
    pub async fn bind(config: ServerConfig) -> Result<Self, SignalingError> {
        let listener = TcpListener::bind(config.bind_address).await?;
        let router = Arc::new(SignalingRouter::new(Arc::new(RoomRegistry::new())));
        Ok(Self {
            listener,
            router,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SignalingError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the router, for in-process inspection
    pub fn signaling(&self) -> Arc<SignalingRouter> {
        Arc::clone(&self.router)
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<(), SignalingError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), SignalingError> {
        let state = AppState::new(Arc::clone(&self.router), &self.config.admin_password);
        let app = app(state, self.config.public_dir.as_deref());

        let reaper = self.spawn_reaper();

        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(reaper) = reaper {
            reaper.abort();
        }
        Ok(served?)
    }

    fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
        let ttl = self.config.room_ttl?;
        let period = self.config.reap_interval()?;
        let router = Arc::clone(&self.router);

        Some(tokio::spawn(reap_idle_rooms(router, ttl, period)))
    }
}

async fn reap_idle_rooms(router: Arc<SignalingRouter>, ttl: Duration, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        for code in router.registry().reap_idle(ttl, Instant::now()) {
            tracing::info!(%code, "reclaimed idle room");
        }
    }
}
