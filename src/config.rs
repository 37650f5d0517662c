//! Defaults and runtime configuration. CLI flags (see `src/bin`) layer over
//! these; there is no on-disk config file, matching the original's
//! header-only constants (`protocol.h`).

use std::time::Duration;

/// Magic prefix for UDP discovery beacons: `"<MAGIC>:<tcpPort>"`.
pub const BEACON_MAGIC: &str = "LANMGR_SERVER";

/// Default TCP port the controller listens on.
pub const DEFAULT_TCP_PORT: u16 = 8899;

/// Default UDP port used for discovery beacons.
pub const DEFAULT_BROADCAST_PORT: u16 = 8898;

/// How often the controller heartbeats a session / scans for timeouts.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long a session may go without a heartbeat before being torn down.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// How often the controller broadcasts its discovery beacon.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(3);

/// Delay before an agent retries a failed or dropped connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// File-transfer chunk size (last chunk may be shorter).
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Package executor timeouts.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Controller-side runtime configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tcp_port: u16,
    pub broadcast_port: u16,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub broadcast_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            broadcast_interval: BROADCAST_INTERVAL,
        }
    }
}

/// Describes how an agent locates its controller: either a fixed endpoint, or
/// discovery via the UDP beacon.
#[derive(Debug, Clone)]
pub enum ControllerTarget {
    Explicit { host: String, port: u16 },
    Discover { broadcast_port: u16 },
}

/// Agent-side runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub target: ControllerTarget,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    pub fn explicit(host: String, port: u16) -> Self {
        Self {
            target: ControllerTarget::Explicit { host, port },
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn discover(broadcast_port: u16) -> Self {
        Self {
            target: ControllerTarget::Discover { broadcast_port },
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}
