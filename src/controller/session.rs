//! Per-client connection task. Each session owns its framed stream, receive
//! state, and pending transfer exclusively; the only thing shared with the
//! rest of the controller is the registry entry used to route commands in
//! and the broadcast sender used to publish events out.

use std::net::SocketAddr;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::client_id::ClientId;
use crate::config::ControllerConfig;
use crate::controller::transfer::{ActiveTransfer, TransferStage};
use crate::controller::{ControllerEvent, SessionRegistry};
use crate::framing::{Command, CommandType, Frame, FrameCodec};
use crate::messages::{
    ClientInfo, FileTransferAckPayload, FileTransferStartPayload, InstallResultPayload,
    SoftwareListPayload, SysInfoPayload, UninstallResultPayload, UninstallSoftwarePayload,
};

/// Requests the controller's public API routes into a running session.
pub(crate) enum SessionCommand {
    RequestSysInfo,
    RequestSoftwareList,
    PushInstall {
        file_name: String,
        install_args: String,
        data: Vec<u8>,
    },
    UninstallSoftware {
        name: String,
        uninstall_cmd: String,
    },
}

pub(crate) async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    id: ClientId,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    events_tx: broadcast::Sender<ControllerEvent>,
    registry: SessionRegistry,
    mut shutdown_rx: watch::Receiver<bool>,
    config: ControllerConfig,
) {
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut last_heartbeat = Instant::now();
    let mut client_info: Option<ClientInfo> = None;
    let mut transfer: Option<ActiveTransfer> = None;
    let mut heartbeat_timer = tokio::time::interval(config.heartbeat_interval);
    heartbeat_timer.tick().await; // first tick fires immediately; consume it

    let _ = events_tx.send(ControllerEvent::ClientConnected { id, addr });
    info!(%id, %addr, "client connected");
    publish_log(&events_tx, format!("client {id} connected ({addr})"));

    loop {
        let streaming = transfer
            .as_ref()
            .is_some_and(|t| t.stage == TransferStage::Streaming);

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                break;
            }

            _ = heartbeat_timer.tick() => {
                if last_heartbeat.elapsed() > config.heartbeat_timeout {
                    warn!(%id, "heartbeat timeout, disconnecting");
                    publish_log(&events_tx, format!("client {id} heartbeat timed out, disconnecting"));
                    break;
                }
            }

            frame = framed.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        handle_incoming(
                            frame,
                            id,
                            &mut framed,
                            &mut last_heartbeat,
                            &mut client_info,
                            &mut transfer,
                            &events_tx,
                        )
                        .await;
                    }
                    Some(Err(err)) => {
                        warn!(%id, error = %err, "framing error, tearing down session");
                        publish_log(&events_tx, format!("client {id} framing error: {err}"));
                        break;
                    }
                    None => {
                        debug!(%id, "connection closed by peer");
                        publish_log(&events_tx, format!("client {id} disconnected by peer"));
                        break;
                    }
                }
            }

            Some(cmd) = cmd_rx.recv() => {
                handle_command(cmd, &mut framed, &mut transfer).await;
            }

            _ = std::future::ready(()), if streaming => {
                step_transfer(&mut framed, &mut transfer, id, &events_tx).await;
            }
        }
    }

    registry.lock().remove(&id);
    let _ = events_tx.send(ControllerEvent::ClientDisconnected { id });
    info!(%id, "client disconnected");
    publish_log(&events_tx, format!("client {id} disconnected"));
}

/// Publishes a human-readable log line alongside the typed events, mirroring
/// the original's `logMessage` signal firing next to every typed signal.
fn publish_log(events_tx: &broadcast::Sender<ControllerEvent>, message: impl Into<String>) {
    let _ = events_tx.send(ControllerEvent::Log {
        message: message.into(),
    });
}

async fn handle_incoming(
    frame: Frame,
    id: ClientId,
    framed: &mut Framed<TcpStream, FrameCodec>,
    last_heartbeat: &mut Instant,
    client_info: &mut Option<ClientInfo>,
    transfer: &mut Option<ActiveTransfer>,
    events_tx: &broadcast::Sender<ControllerEvent>,
) {
    let cmd = match frame.cmd {
        Command::Known(cmd) => cmd,
        Command::Unknown(code) => {
            debug!(%id, code, "ignoring unknown command code");
            return;
        }
    };

    match cmd {
        CommandType::ClientInfo => match frame.parse_json::<ClientInfo>() {
            Ok(info) => {
                publish_log(
                    events_tx,
                    format!("client {id} info: {} ({})", info.computer_name, info.os_version),
                );
                *client_info = Some(info.clone());
                let _ = events_tx.send(ControllerEvent::ClientInfoUpdated { id, info });
            }
            Err(err) => {
                warn!(%id, %err, "malformed CLIENT_INFO payload");
                publish_log(events_tx, format!("malformed CLIENT_INFO payload from client {id}: {err}"));
            }
        },
        CommandType::Heartbeat => {
            *last_heartbeat = Instant::now();
            let _ = framed.send(Frame::empty(CommandType::HeartbeatAck)).await;
        }
        CommandType::SysInfoResponse => match frame.parse_json::<SysInfoPayload>() {
            Ok(info) => {
                publish_log(events_tx, format!("received sysinfo from client {id}"));
                let _ = events_tx.send(ControllerEvent::SysInfoReceived { id, info });
            }
            Err(err) => {
                warn!(%id, %err, "malformed SYSINFO_RESPONSE payload");
                publish_log(events_tx, format!("malformed SYSINFO_RESPONSE payload from client {id}: {err}"));
            }
        },
        CommandType::SoftwareResponse => match frame.parse_json::<SoftwareListPayload>() {
            Ok(list) => {
                publish_log(
                    events_tx,
                    format!("received software list from client {id} ({} entries)", list.count),
                );
                let _ = events_tx.send(ControllerEvent::SoftwareListReceived { id, list });
            }
            Err(err) => {
                warn!(%id, %err, "malformed SOFTWARE_RESPONSE payload");
                publish_log(events_tx, format!("malformed SOFTWARE_RESPONSE payload from client {id}: {err}"));
            }
        },
        CommandType::InstallResponse => match frame.parse_json::<InstallResultPayload>() {
            Ok(result) => {
                publish_log(
                    events_tx,
                    format!("client {id} install result: {} - {}", result.success, result.message),
                );
                *transfer = None;
                let _ = events_tx.send(ControllerEvent::InstallResult { id, result });
            }
            Err(err) => {
                warn!(%id, %err, "malformed INSTALL_RESPONSE payload");
                publish_log(events_tx, format!("malformed INSTALL_RESPONSE payload from client {id}: {err}"));
            }
        },
        CommandType::UninstallResponse => match frame.parse_json::<UninstallResultPayload>() {
            Ok(result) => {
                publish_log(
                    events_tx,
                    format!(
                        "client {id} uninstall {}: {} - {}",
                        result.name, result.success, result.message
                    ),
                );
                let _ = events_tx.send(ControllerEvent::UninstallResult { id, result });
            }
            Err(err) => {
                warn!(%id, %err, "malformed UNINSTALL_RESPONSE payload");
                publish_log(events_tx, format!("malformed UNINSTALL_RESPONSE payload from client {id}: {err}"));
            }
        },
        CommandType::FileTransferAck => match frame.parse_json::<FileTransferAckPayload>() {
            Ok(ack) if ack.success => {
                if let Some(active) = transfer.as_mut() {
                    if active.stage == TransferStage::AwaitingStartAck {
                        active.stage = TransferStage::Streaming;
                    }
                }
            }
            Ok(ack) => {
                publish_log(events_tx, format!("file transfer to client {id} failed: {}", ack.message));
                *transfer = None;
                let result = InstallResultPayload {
                    success: false,
                    message: ack.message,
                    file_path: String::new(),
                    received_size: ack.received_size,
                };
                let _ = events_tx.send(ControllerEvent::InstallResult { id, result });
            }
            Err(err) => {
                warn!(%id, %err, "malformed FILE_TRANSFER_ACK payload");
                publish_log(events_tx, format!("malformed FILE_TRANSFER_ACK payload from client {id}: {err}"));
            }
        },
        other => {
            debug!(%id, ?other, "ignoring command not expected on the controller side");
        }
    }
}

async fn handle_command(
    cmd: SessionCommand,
    framed: &mut Framed<TcpStream, FrameCodec>,
    transfer: &mut Option<ActiveTransfer>,
) {
    match cmd {
        SessionCommand::RequestSysInfo => {
            let _ = framed.send(Frame::empty(CommandType::GetSysInfo)).await;
        }
        SessionCommand::RequestSoftwareList => {
            let _ = framed.send(Frame::empty(CommandType::GetSoftware)).await;
        }
        SessionCommand::PushInstall {
            file_name,
            install_args,
            data,
        } => {
            let file_size = data.len() as u64;
            *transfer = Some(ActiveTransfer::new(file_name.clone(), install_args.clone(), data));
            let payload = FileTransferStartPayload {
                file_name,
                file_size,
                install_args,
            };
            if let Ok(frame) = Frame::json(CommandType::FileTransferStart, &payload) {
                let _ = framed.send(frame).await;
            }
        }
        SessionCommand::UninstallSoftware {
            name,
            uninstall_cmd,
        } => {
            let payload = UninstallSoftwarePayload {
                name,
                uninstall_cmd,
            };
            if let Ok(frame) = Frame::json(CommandType::UninstallSoftware, &payload) {
                let _ = framed.send(frame).await;
            }
        }
    }
}

async fn step_transfer(
    framed: &mut Framed<TcpStream, FrameCodec>,
    transfer: &mut Option<ActiveTransfer>,
    id: ClientId,
    events_tx: &broadcast::Sender<ControllerEvent>,
) {
    let Some(active) = transfer.as_mut() else {
        return;
    };

    if active.is_complete() {
        active.stage = TransferStage::Finalizing;
        let _ = framed.send(Frame::empty(CommandType::FileTransferEnd)).await;
    } else {
        let chunk = active.next_chunk().to_vec();
        let percent = active.percent();
        let _ = framed
            .send(Frame::new(CommandType::FileTransferData, chunk))
            .await;
        let _ = events_tx.send(ControllerEvent::TransferProgress { id, percent });
    }

    // Cooperative yield: guarantees heartbeats and other session traffic get
    // a turn between chunks instead of this task monopolizing the loop.
    tokio::task::yield_now().await;
}
