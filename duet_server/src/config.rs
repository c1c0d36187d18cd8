//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Password used when none is configured
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Upper bound on the interval between idle-room sweeps
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Runtime configuration for the signaling server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:3000")
    pub bind_address: SocketAddr,
    /// Shared secret for room creation and the room listing
    pub admin_password: String,
    /// Directory served as static files, if any
    pub public_dir: Option<PathBuf>,
    /// Empty rooms older than this are reclaimed; `None` keeps them forever
    pub room_ttl: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            public_dir: None,
            room_ttl: None,
        }
    }
}

impl ServerConfig {
    pub fn uses_default_password(&self) -> bool {
        self.admin_password == DEFAULT_ADMIN_PASSWORD
    }

    /// How often the idle-room reaper runs, when enabled
    pub fn reap_interval(&self) -> Option<Duration> {
        self.room_ttl.map(|ttl| ttl.min(MAX_REAP_INTERVAL).max(Duration::from_secs(1)))
    }
}
