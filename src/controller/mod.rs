//! Controller-side connection manager: accepts agent connections, emits the
//! UDP discovery beacon, and exposes the request/event API described in the
//! component design. Grounded on `Server/tcpserver.cpp` for the per-session
//! algorithm and on the protocol core's broadcast-channel event pattern for
//! fan-out to (potentially several) operator UIs.

mod session;
mod transfer;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::client_id::{ClientId, ClientIdAllocator};
use crate::config::ControllerConfig;
use crate::discovery::encode_beacon;
use crate::error::ControllerError;
use crate::messages::{
    ClientInfo, InstallResultPayload, SoftwareListPayload, SysInfoPayload, UninstallResultPayload,
};
use session::SessionCommand;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub(crate) type SessionRegistry = Arc<Mutex<HashMap<ClientId, mpsc::Sender<SessionCommand>>>>;

/// Everything the controller publishes for consumption by an operator UI/CLI.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ClientConnected {
        id: ClientId,
        addr: SocketAddr,
    },
    ClientDisconnected {
        id: ClientId,
    },
    ClientInfoUpdated {
        id: ClientId,
        info: ClientInfo,
    },
    SysInfoReceived {
        id: ClientId,
        info: SysInfoPayload,
    },
    SoftwareListReceived {
        id: ClientId,
        list: SoftwareListPayload,
    },
    InstallResult {
        id: ClientId,
        result: InstallResultPayload,
    },
    UninstallResult {
        id: ClientId,
        result: UninstallResultPayload,
    },
    TransferProgress {
        id: ClientId,
        percent: u8,
    },
    Log {
        message: String,
    },
}

/// Handle to a running controller. Dropping it does not stop the controller;
/// call [`Controller::stop`] for a graceful shutdown.
pub struct Controller {
    config: ControllerConfig,
    tcp_port: u16,
    registry: SessionRegistry,
    id_alloc: Arc<ClientIdAllocator>,
    events_tx: broadcast::Sender<ControllerEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl Controller {
    /// Binds the TCP listener and UDP beacon socket and spawns the accept
    /// loop, beacon emitter, and every per-session task that follows.
    ///
    /// A `tcp_port` of `0` binds an ephemeral port; read it back with
    /// [`Controller::tcp_port`] (tests rely on this to avoid port clashes).
    pub async fn start(config: ControllerConfig) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(("0.0.0.0", config.tcp_port))
            .await
            .map_err(|e| ControllerError::BindFailed(config.tcp_port, e))?;
        let tcp_port = listener
            .local_addr()
            .map_err(|e| ControllerError::BindFailed(config.tcp_port, e))?
            .port();

        let beacon_socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| ControllerError::BroadcastBindFailed(config.broadcast_port, e))?;
        beacon_socket
            .set_broadcast(true)
            .map_err(|e| ControllerError::BroadcastBindFailed(config.broadcast_port, e))?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry: SessionRegistry = Arc::new(Mutex::new(HashMap::new()));
        let id_alloc = Arc::new(ClientIdAllocator::new());

        tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            id_alloc.clone(),
            events_tx.clone(),
            shutdown_rx.clone(),
            config.clone(),
        ));

        tokio::spawn(beacon_loop(
            beacon_socket,
            tcp_port,
            config.broadcast_port,
            config.broadcast_interval,
            shutdown_rx,
        ));

        info!(port = tcp_port, "controller listening");
        let _ = events_tx.send(ControllerEvent::Log {
            message: format!("controller listening on port {tcp_port}"),
        });

        Ok(Self {
            config,
            tcp_port,
            registry,
            id_alloc,
            events_tx,
            shutdown_tx,
        })
    }

    /// The TCP port actually bound (useful when `start` was given port `0`).
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Subscribes to the controller's event stream. Each subscriber gets its
    /// own lagging-tolerant receiver; a slow consumer misses older events
    /// rather than blocking the controller.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events_tx.subscribe()
    }

    pub fn request_sys_info(&self, id: ClientId) {
        self.publish_log(format!("requesting sysinfo from client {id}"));
        self.send_command(id, SessionCommand::RequestSysInfo);
    }

    pub fn request_software_list(&self, id: ClientId) {
        self.publish_log(format!("requesting software list from client {id}"));
        self.send_command(id, SessionCommand::RequestSoftwareList);
    }

    /// Reads `path` fully into memory and begins pushing it to `id` as a
    /// chunked file transfer. A file that can't be opened emits an immediate
    /// failed `InstallResult` rather than starting a transfer.
    pub async fn install_software(&self, id: ClientId, path: &Path, install_args: String) {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload.bin".to_string());

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(err) => {
                warn!(%id, path = %path.display(), %err, "failed to open install payload");
                self.publish_log(format!(
                    "failed to open install payload for client {id}: {err}"
                ));
                let result = InstallResultPayload {
                    success: false,
                    message: format!("failed to read {}: {err}", path.display()),
                    file_path: path.display().to_string(),
                    received_size: None,
                };
                let _ = self
                    .events_tx
                    .send(ControllerEvent::InstallResult { id, result });
                return;
            }
        };

        self.publish_log(format!(
            "starting file transfer to client {id}: {file_name} ({} bytes)",
            data.len()
        ));
        self.send_command(
            id,
            SessionCommand::PushInstall {
                file_name,
                install_args,
                data,
            },
        );
    }

    pub fn uninstall_software(&self, id: ClientId, name: String, uninstall_cmd: String) {
        self.publish_log(format!("sending uninstall command to client {id}: {name}"));
        self.send_command(
            id,
            SessionCommand::UninstallSoftware {
                name,
                uninstall_cmd,
            },
        );
    }

    /// Signals every session task and the accept/beacon loops to shut down.
    /// Idempotent: calling it again after sessions have already drained is a
    /// harmless no-op.
    pub fn stop(&self) {
        self.publish_log("controller stopping".to_string());
        let _ = self.shutdown_tx.send(true);
    }

    /// Silently drops the command if `id` is unknown or its session has
    /// already gone away: commands to a vanished session are silently dropped
    /// rather than erroring.
    fn send_command(&self, id: ClientId, cmd: SessionCommand) {
        let sender = self.registry.lock().get(&id).cloned();
        if let Some(sender) = sender {
            if sender.try_send(cmd).is_err() {
                warn!(%id, "session command queue full or closed, dropping command");
            }
        }
    }

    /// Publishes a human-readable log line alongside the typed events,
    /// mirroring the original's `logMessage` signal firing next to every
    /// typed signal.
    fn publish_log(&self, message: String) {
        let _ = self.events_tx.send(ControllerEvent::Log { message });
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: SessionRegistry,
    id_alloc: Arc<ClientIdAllocator>,
    events_tx: broadcast::Sender<ControllerEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: ControllerConfig,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        let _ = events_tx.send(ControllerEvent::Log {
                            message: format!("accept failed: {err}"),
                        });
                        continue;
                    }
                };
                let id = id_alloc.allocate();
                let (cmd_tx, cmd_rx) = mpsc::channel(32);
                registry.lock().insert(id, cmd_tx);
                tokio::spawn(session::run_session(
                    stream,
                    addr,
                    id,
                    cmd_rx,
                    events_tx.clone(),
                    registry.clone(),
                    shutdown_rx.clone(),
                    config.clone(),
                ));
            }
        }
    }
}

async fn beacon_loop(
    socket: UdpSocket,
    tcp_port: u16,
    broadcast_port: u16,
    interval: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let payload = encode_beacon(tcp_port);
    let target: SocketAddr = ([255, 255, 255, 255], broadcast_port).into();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = socket.send_to(&payload, target).await {
                    warn!(%err, "failed to send discovery beacon");
                }
            }
        }
    }
}
