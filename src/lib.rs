//! LAN fleet-management protocol core.
//!
//! Provides the wire framing, controller connection manager, agent runtime,
//! UDP discovery, and file-transfer/install state machines that let a single
//! controller inventory and patch a fleet of agents over a private network.

pub mod agent;
pub mod client_id;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod installer;
pub mod inventory;
pub mod messages;

pub use agent::{Agent, AgentEvent};
pub use client_id::{ClientId, ClientIdAllocator};
pub use config::{AgentConfig, ControllerConfig, ControllerTarget};
pub use controller::{Controller, ControllerEvent};
pub use error::{AgentError, ControllerError, InstallerError, TransferError};
pub use framing::{Command, CommandType, Frame, FrameCodec, FramingError};
pub use installer::{PackageExecutor, ProcessExecutor};
pub use inventory::{InventoryProvider, SysinfoInventory};
