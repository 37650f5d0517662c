//! Agent runtime: connects (or discovers) the controller, answers its
//! requests, and drives the receive side of a file transfer. Grounded on
//! `Client/agent.cpp` for the dial/reconnect/dispatch algorithm.

mod transfer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ControllerTarget};
use crate::discovery::{normalize_sender_ip, parse_beacon};
use crate::error::AgentError;
use crate::framing::{Command, CommandType, Frame, FrameCodec};
use crate::installer::PackageExecutor;
use crate::inventory::InventoryProvider;
use crate::messages::{
    ClientInfo, FileTransferAckPayload, FileTransferStartPayload, InstallResultPayload,
    InstallSoftwarePayload, SoftwareListPayload, UninstallResultPayload, UninstallSoftwarePayload,
};
use transfer::ReceivingFile;

/// Everything the agent publishes for consumption by whatever drives the
/// `lanmgr-agentd` binary's main loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Connected { addr: SocketAddr },
    Disconnected,
    TransferProgress { percent: u8 },
    Log { message: String },
    Error { message: String },
}

pub struct Agent {
    config: AgentConfig,
    inventory: Arc<dyn InventoryProvider>,
    executor: Arc<dyn PackageExecutor>,
    temp_dir: PathBuf,
    events_tx: mpsc::Sender<AgentEvent>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        inventory: Arc<dyn InventoryProvider>,
        executor: Arc<dyn PackageExecutor>,
        temp_dir: PathBuf,
    ) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Self {
                config,
                inventory,
                executor,
                temp_dir,
                events_tx,
            },
            events_rx,
        )
    }

    /// Runs until `shutdown_rx` observes `true`. Reconnects after every
    /// disconnect with the configured delay; in discovery mode, rediscovers
    /// the controller's address on each reconnect attempt.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), AgentError> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            let addr = match self.resolve_target(&mut shutdown_rx).await? {
                Some(addr) => addr,
                None => return Ok(()), // shutdown observed while discovering
            };

            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(%addr, "connected to controller");
                    self.publish_log(format!("connecting to server {addr}..."));
                    let shutdown_requested = self.run_connection(stream, addr, &mut shutdown_rx).await;
                    if shutdown_requested {
                        return Ok(());
                    }
                }
                Err(err) => {
                    warn!(%addr, %err, "failed to connect to controller");
                    self.publish_log(format!("connection error: {err}"));
                    let _ = self.events_tx.try_send(AgentEvent::Error {
                        message: format!("connect to {addr} failed: {err}"),
                    });
                }
            }

            self.publish_log(format!(
                "reconnecting in {}s...",
                self.config.reconnect_delay.as_secs()
            ));
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn resolve_target(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Option<SocketAddr>, AgentError> {
        match &self.config.target {
            ControllerTarget::Explicit { host, port } => {
                let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|source| AgentError::ConnectFailed {
                        host: host.clone(),
                        port: *port,
                        source,
                    })?;
                Ok(Some(addrs.next().ok_or_else(|| AgentError::ConnectFailed {
                    host: host.clone(),
                    port: *port,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "host resolved to no addresses",
                    ),
                })?))
            }
            ControllerTarget::Discover { broadcast_port } => {
                self.discover_once(*broadcast_port, shutdown_rx).await
            }
        }
    }

    async fn discover_once(
        &self,
        broadcast_port: u16,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Option<SocketAddr>, AgentError> {
        let socket = crate::discovery::bind_shared_discovery_socket(broadcast_port)
            .map_err(|e| AgentError::DiscoveryBindFailed(broadcast_port, e))?;

        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    return Ok(None);
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, sender) = received?;
                    let Some(beacon) = parse_beacon(&buf[..len]) else {
                        continue;
                    };
                    let ip = normalize_sender_ip(&sender.ip().to_string());
                    let Ok(ip) = ip.parse::<std::net::IpAddr>() else {
                        continue;
                    };
                    info!(%ip, port = beacon.tcp_port, "discovered controller");
                    self.publish_log(format!("discovered server: {ip}:{}", beacon.tcp_port));
                    return Ok(Some(SocketAddr::new(ip, beacon.tcp_port)));
                }
            }
        }
    }

    /// Drives one TCP connection end-to-end. Returns `true` if shutdown was
    /// requested while connected, `false` if the connection simply dropped.
    async fn run_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut framed = Framed::new(stream, FrameCodec::new());
        let mut heartbeat_timer = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat_timer.tick().await;
        let mut receiving: Option<ReceivingFile> = None;

        let sys_info = self.inventory.system_info();
        let identity = ClientInfo {
            computer_name: sys_info.computer_name,
            ip_address: sys_info.ip_address,
            mac_address: sys_info.mac_address,
            os_version: sys_info.os_version,
        };
        let identity_frame =
            Frame::json(CommandType::ClientInfo, &identity).expect("ClientInfo always serializes");
        let _ = framed.send(identity_frame).await;

        let _ = self.events_tx.try_send(AgentEvent::Connected { addr });
        self.publish_log("connected to server".to_string());

        let shutdown_requested = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    break *shutdown_rx.borrow();
                }

                _ = heartbeat_timer.tick() => {
                    let _ = framed.send(Frame::empty(CommandType::Heartbeat)).await;
                }

                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            self.handle_incoming(frame, &mut framed, &mut receiving).await;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "framing error, disconnecting");
                            self.publish_log(format!("framing error: {err}"));
                            break false;
                        }
                        None => {
                            break false;
                        }
                    }
                }
            }
        };

        let _ = self.events_tx.try_send(AgentEvent::Disconnected);
        self.publish_log("disconnected from server".to_string());
        shutdown_requested
    }

    async fn handle_incoming(
        &self,
        frame: Frame,
        framed: &mut Framed<TcpStream, FrameCodec>,
        receiving: &mut Option<ReceivingFile>,
    ) {
        let cmd = match frame.cmd {
            Command::Known(cmd) => cmd,
            Command::Unknown(code) => {
                debug!(code, "ignoring unknown command code");
                self.publish_log(format!("received unknown command code {code}"));
                return;
            }
        };

        match cmd {
            CommandType::HeartbeatAck => {}
            CommandType::GetSysInfo => {
                self.publish_log("received sysinfo request".to_string());
                let info = self.inventory.system_info();
                if let Ok(reply) = Frame::json(CommandType::SysInfoResponse, &info) {
                    let _ = framed.send(reply).await;
                }
            }
            CommandType::GetSoftware => {
                self.publish_log("received software list request".to_string());
                let list = SoftwareListPayload::new(self.inventory.installed_software());
                if let Ok(reply) = Frame::json(CommandType::SoftwareResponse, &list) {
                    let _ = framed.send(reply).await;
                }
            }
            CommandType::InstallSoftware => {
                if let Ok(request) = frame.parse_json::<InstallSoftwarePayload>() {
                    self.publish_log(format!("installing: {}", request.file_path));
                    let result = match self
                        .executor
                        .install(&request.file_path, &request.args)
                        .await
                    {
                        Ok(()) => InstallResultPayload {
                            success: true,
                            message: "install succeeded".into(),
                            file_path: request.file_path,
                            received_size: None,
                        },
                        Err(err) => InstallResultPayload {
                            success: false,
                            message: err.to_string(),
                            file_path: request.file_path,
                            received_size: None,
                        },
                    };
                    self.publish_log(if result.success {
                        "install succeeded".to_string()
                    } else {
                        "install failed".to_string()
                    });
                    if let Ok(reply) = Frame::json(CommandType::InstallResponse, &result) {
                        let _ = framed.send(reply).await;
                    }
                }
            }
            CommandType::UninstallSoftware => {
                if let Ok(request) = frame.parse_json::<UninstallSoftwarePayload>() {
                    self.publish_log(format!("uninstalling: {}", request.name));
                    let result = match self.executor.uninstall(&request.uninstall_cmd, "").await {
                        Ok(()) => UninstallResultPayload {
                            success: true,
                            message: "uninstall succeeded".into(),
                            name: request.name,
                        },
                        Err(err) => UninstallResultPayload {
                            success: false,
                            message: err.to_string(),
                            name: request.name,
                        },
                    };
                    self.publish_log(if result.success {
                        "uninstall succeeded".to_string()
                    } else {
                        "uninstall failed".to_string()
                    });
                    if let Ok(reply) = Frame::json(CommandType::UninstallResponse, &result) {
                        let _ = framed.send(reply).await;
                    }
                }
            }
            CommandType::FileTransferStart => {
                self.handle_transfer_start(&frame, framed, receiving).await;
            }
            CommandType::FileTransferData => {
                self.handle_transfer_data(&frame, receiving).await;
            }
            CommandType::FileTransferEnd => {
                self.handle_transfer_end(framed, receiving).await;
            }
            other => {
                debug!(?other, "ignoring command not expected on the agent side");
            }
        }
    }

    /// Publishes a human-readable log line alongside the typed events,
    /// mirroring the original's `logMessage` signal firing next to every
    /// typed signal.
    fn publish_log(&self, message: String) {
        let _ = self.events_tx.try_send(AgentEvent::Log { message });
    }

    async fn handle_transfer_start(
        &self,
        frame: &Frame,
        framed: &mut Framed<TcpStream, FrameCodec>,
        receiving: &mut Option<ReceivingFile>,
    ) {
        let Ok(start) = frame.parse_json::<FileTransferStartPayload>() else {
            warn!("malformed FILE_TRANSFER_START payload");
            return;
        };

        self.publish_log(format!(
            "receiving file transfer start: {} ({} bytes)",
            start.file_name, start.file_size
        ));

        // A new transfer discards any in-flight one, matching the "at most
        // one ReceivingFile per agent" invariant.
        *receiving = None;

        let dest = self.temp_dir.join(&start.file_name);
        let ack = match ReceivingFile::create(dest, start.file_size, start.install_args).await {
            Ok(file) => {
                *receiving = Some(file);
                FileTransferAckPayload {
                    success: true,
                    message: "ready".into(),
                    file_path: None,
                    received_size: None,
                }
            }
            Err(err) => {
                self.publish_log(format!("failed to open destination file: {err}"));
                FileTransferAckPayload {
                    success: false,
                    message: format!("failed to open destination file: {err}"),
                    file_path: None,
                    received_size: None,
                }
            }
        };

        if let Ok(reply) = Frame::json(CommandType::FileTransferAck, &ack) {
            let _ = framed.send(reply).await;
        }
    }

    async fn handle_transfer_data(&self, frame: &Frame, receiving: &mut Option<ReceivingFile>) {
        let Some(active) = receiving.as_mut() else {
            debug!("FILE_TRANSFER_DATA with no active transfer, dropping");
            return;
        };

        if let Err(err) = active.write_chunk(&frame.payload).await {
            warn!(%err, "failed to write transfer chunk");
            return;
        }

        if let Some(percent) = active.progress_on_boundary_cross() {
            self.publish_log(format!("receiving file: {percent}%"));
            let _ = self
                .events_tx
                .try_send(AgentEvent::TransferProgress { percent });
        }
    }

    async fn handle_transfer_end(
        &self,
        framed: &mut Framed<TcpStream, FrameCodec>,
        receiving: &mut Option<ReceivingFile>,
    ) {
        let Some(active) = receiving.take() else {
            debug!("FILE_TRANSFER_END with no active transfer, dropping");
            return;
        };

        let expected = active.expected_size();
        let received = active.received_size();
        let size_matches = active.is_size_match();
        let path = active.path.clone();
        let install_args = active.install_args.clone();
        if let Err(err) = active.finish().await {
            warn!(%err, "failed to finalize received file");
        }

        if !size_matches {
            self.publish_log(format!(
                "file transfer size mismatch: expected {expected} got {received}"
            ));
            let ack = FileTransferAckPayload {
                success: false,
                message: format!("expected {expected} got {received}"),
                file_path: None,
                received_size: Some(received),
            };
            if let Ok(reply) = Frame::json(CommandType::FileTransferAck, &ack) {
                let _ = framed.send(reply).await;
            }
            let _ = tokio::fs::remove_file(&path).await;
            return;
        }

        self.publish_log(format!("file received, installing: {}", path.display()));
        let result = match self.executor.install(&path.display().to_string(), &install_args).await {
            Ok(()) => InstallResultPayload {
                success: true,
                message: "install succeeded".into(),
                file_path: path.display().to_string(),
                received_size: Some(received),
            },
            Err(err) => InstallResultPayload {
                success: false,
                message: err.to_string(),
                file_path: path.display().to_string(),
                received_size: Some(received),
            },
        };
        self.publish_log(if result.success {
            "install succeeded".to_string()
        } else {
            "install failed".to_string()
        });

        if let Ok(reply) = Frame::json(CommandType::InstallResponse, &result) {
            let _ = framed.send(reply).await;
        }

        // Delete strictly after the executor has terminated: the original
        // deletes before reporting, which races the install against cleanup.
        let _ = tokio::fs::remove_file(&path).await;
    }
}
