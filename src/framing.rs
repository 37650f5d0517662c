//! Wire framing shared by the controller and the agent.
//!
//! Every message on the TCP stream is `[u32 BE dataLength][u32 BE cmdType][payload]`.
//! Payloads are either compact UTF-8 JSON or opaque bytes (file-transfer chunks).
//! Framing is implemented as a `tokio_util::codec` pair so both sides drive the
//! wire through `Framed<TcpStream, FrameCodec>` instead of hand-rolled buffer
//! slicing.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Header size: 4 bytes length + 4 bytes command type.
pub const HEADER_LEN: usize = 8;

/// Default cap on a single frame's payload size (16 MiB). Frames larger than
/// this tear down the session rather than being buffered indefinitely.
pub const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Command codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    Heartbeat = 0x0001,
    HeartbeatAck = 0x0002,
    GetSysInfo = 0x0010,
    SysInfoResponse = 0x0011,
    GetSoftware = 0x0020,
    SoftwareResponse = 0x0021,
    InstallSoftware = 0x0030,
    InstallResponse = 0x0031,
    UninstallSoftware = 0x0040,
    UninstallResponse = 0x0041,
    FileTransferStart = 0x0050,
    FileTransferData = 0x0051,
    FileTransferEnd = 0x0052,
    FileTransferAck = 0x0053,
    ClientInfo = 0x0060,
    Error = 0x00FF,
}

impl CommandType {
    fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0x0001 => Self::Heartbeat,
            0x0002 => Self::HeartbeatAck,
            0x0010 => Self::GetSysInfo,
            0x0011 => Self::SysInfoResponse,
            0x0020 => Self::GetSoftware,
            0x0021 => Self::SoftwareResponse,
            0x0030 => Self::InstallSoftware,
            0x0031 => Self::InstallResponse,
            0x0040 => Self::UninstallSoftware,
            0x0041 => Self::UninstallResponse,
            0x0050 => Self::FileTransferStart,
            0x0051 => Self::FileTransferData,
            0x0052 => Self::FileTransferEnd,
            0x0053 => Self::FileTransferAck,
            0x0060 => Self::ClientInfo,
            0x00FF => Self::Error,
            _ => return None,
        })
    }
}

/// One parsed frame: a recognized or raw command type plus its payload bytes.
///
/// Unknown command codes are represented by `Unknown(code)` rather than
/// rejected outright: a newer peer's command code should be logged and
/// skipped, never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Known(CommandType),
    Unknown(u32),
}

impl Command {
    pub fn code(&self) -> u32 {
        match self {
            Command::Known(cmd) => *cmd as u32,
            Command::Unknown(code) => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(cmd: CommandType, payload: Vec<u8>) -> Self {
        Self {
            cmd: Command::Known(cmd),
            payload,
        }
    }

    pub fn empty(cmd: CommandType) -> Self {
        Self::new(cmd, Vec::new())
    }

    pub fn json(cmd: CommandType, value: &impl serde::Serialize) -> Result<Self, FramingError> {
        let payload = serde_json::to_vec(value).map_err(FramingError::Json)?;
        Ok(Self::new(cmd, payload))
    }

    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, FramingError> {
        serde_json::from_slice(&self.payload).map_err(FramingError::Json)
    }
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame payload of {0} bytes exceeds the {1} byte cap")]
    PayloadTooLarge(u32, u32),
    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec implementing the length-prefixed frame protocol over a byte stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: u32,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_FRAME_PAYLOAD,
        }
    }

    pub fn with_max_payload(max_payload: u32) -> Self {
        Self { max_payload }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes(src[0..4].try_into().unwrap());
        let cmd = u32::from_be_bytes(src[4..8].try_into().unwrap());

        if len > self.max_payload {
            return Err(FramingError::PayloadTooLarge(len, self.max_payload));
        }

        let total = HEADER_LEN + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(total);
        frame_bytes.advance(HEADER_LEN);
        let payload = frame_bytes.to_vec();

        let cmd = match CommandType::from_u32(cmd) {
            Some(known) => Command::Known(known),
            None => Command::Unknown(cmd),
        };

        Ok(Some(Frame { cmd, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FramingError> {
        let len = frame.payload.len();
        if len as u64 > self.max_payload as u64 {
            return Err(FramingError::PayloadTooLarge(len as u32, self.max_payload));
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_u32(len as u32);
        dst.put_u32(frame.cmd.code());
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Encodes `(cmd, payload)` into a standalone byte buffer, independent of the
/// `Encoder` trait. Used by tests and by the UDP beacon path, which doesn't go
/// through a `Framed` stream.
pub fn pack(cmd: CommandType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&(cmd as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_decode_round_trips() {
        let bytes = pack(CommandType::Heartbeat, b"");
        let mut buf = BytesMut::from(&bytes[..]);
        let mut codec = FrameCodec::new();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.cmd, Command::Known(CommandType::Heartbeat));
        assert!(frame.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_yields_no_frame() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 0, 0, 0][..]);
        let mut codec = FrameCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn partial_payload_retains_whole_buffer() {
        let full = pack(CommandType::ClientInfo, b"{\"a\":1}");
        let mut buf = BytesMut::from(&full[..full.len() - 2]);
        let mut codec = FrameCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), full.len() - 2);
    }

    #[test]
    fn sequence_of_frames_decodes_in_order() {
        let mut bytes = pack(CommandType::Heartbeat, b"");
        bytes.extend(pack(CommandType::HeartbeatAck, b""));
        bytes.extend(pack(CommandType::ClientInfo, b"{}"));

        let mut buf = BytesMut::from(&bytes[..]);
        let mut codec = FrameCodec::new();
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame.cmd);
        }
        assert_eq!(
            frames,
            vec![
                Command::Known(CommandType::Heartbeat),
                Command::Known(CommandType::HeartbeatAck),
                Command::Known(CommandType::ClientInfo),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_command_code_is_preserved_not_rejected() {
        let bytes = pack_raw(0x9999, b"hi");
        let mut buf = BytesMut::from(&bytes[..]);
        let mut codec = FrameCodec::new();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.cmd, Command::Unknown(0x9999));
        assert_eq!(frame.payload, b"hi");
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let mut codec = FrameCodec::with_max_payload(4);
        let bytes = pack(CommandType::FileTransferData, b"12345");
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::PayloadTooLarge(5, 4))
        ));
    }

    #[test]
    fn payload_exactly_at_cap_succeeds() {
        let mut codec = FrameCodec::with_max_payload(4);
        let bytes = pack(CommandType::FileTransferData, b"1234");
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn encode_then_decode_round_trip() {
        let mut codec = FrameCodec::new();
        let original = Frame::new(CommandType::InstallResponse, b"{\"ok\":true}".to_vec());
        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    fn pack_raw(cmd: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&cmd.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}
