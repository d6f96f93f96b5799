//! Error taxonomy for channels, stages, the composer and the guest bridge.
//!
//! Per-message failures (`CapacityExceeded`, `SlotOccupied`, `MalformedInput`,
//! `ValidationDrop`) are handled where they occur and counted. `FatalStage` and
//! `Topology` are surfaced through `tracing` and halt only the stage or build
//! they belong to.

use std::time::Duration;
use thiserror::Error;

/// Numeric status codes shared by the C ABI and dataport acknowledgements.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const NULL_POINTER: i32 = -1;
    pub const INVALID_ARG: i32 = -2;
    pub const CAPACITY_EXCEEDED: i32 = -3;
    pub const SLOT_OCCUPIED: i32 = -4;
    pub const EMPTY: i32 = -5;
    pub const MALFORMED_INPUT: i32 = -6;
    pub const CHANNEL_CLOSED: i32 = -7;
    pub const TIMEOUT: i32 = -8;
    pub const VALIDATION_DROP: i32 = -9;
    pub const FATAL_STAGE: i32 = -10;
    pub const TOPOLOGY: i32 = -11;
    pub const INTERNAL: i32 = -12;
}

/// Reasons a raw guest frame is rejected at the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes is shorter than the {needed}-byte header")]
    Truncated { len: usize, needed: usize },

    #[error("unknown protocol tag 0x{0:02x}")]
    UnknownProtocol(u8),

    #[error("declared payload length {declared} exceeds limit {max}")]
    Oversize { declared: usize, max: usize },

    #[error("declared payload length {declared} does not match {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Message larger than the channel's declared payload capacity
    #[error("message of {length} bytes exceeds channel capacity of {capacity} bytes")]
    CapacityExceeded { length: usize, capacity: usize },

    /// Non-blocking write found every slot still unconsumed
    #[error("channel {channel}: slot occupied, consumer has not drained")]
    SlotOccupied { channel: u32 },

    /// Guest dataport still holds an unacknowledged frame
    #[error("dataport busy: previous frame not acknowledged")]
    DataportBusy,

    /// External input rejected before it reached any channel
    #[error("malformed input: {0}")]
    MalformedInput(#[from] FrameError),

    /// A stage rejected a message per protocol or policy rules
    #[error("validation drop: {0}")]
    ValidationDrop(String),

    /// Internal invariant violated inside one stage
    #[error("stage '{stage}' fatal: {message}")]
    FatalStage { stage: String, message: String },

    /// Build-time misconfiguration of the pipeline
    #[error("topology error: {0}")]
    Topology(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel {channel} closed")]
    ChannelClosed { channel: u32 },

    /// The endpoint capability was already handed out
    #[error("channel {channel}: {side} endpoint already claimed")]
    EndpointClaimed { channel: u32, side: &'static str },

    /// Slot contents failed the integrity check on read
    #[error("channel {channel} corrupted: {detail}")]
    Corrupted { channel: u32, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Taxonomy name, stable across releases and suitable for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            BridgeError::SlotOccupied { .. } | BridgeError::DataportBusy => "SLOT_OCCUPIED",
            BridgeError::MalformedInput(_) => "MALFORMED_INPUT",
            BridgeError::ValidationDrop(_) => "VALIDATION_DROP",
            BridgeError::FatalStage { .. } | BridgeError::Corrupted { .. } => "FATAL_STAGE_ERROR",
            BridgeError::Topology(_) => "TOPOLOGY_ERROR",
            BridgeError::Timeout(_) => "TIMEOUT",
            BridgeError::ChannelClosed { .. } => "CHANNEL_CLOSED",
            BridgeError::EndpointClaimed { .. } | BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }

    /// Negative status code for C callers and dataport acks.
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::CapacityExceeded { .. } => status::CAPACITY_EXCEEDED,
            BridgeError::SlotOccupied { .. } | BridgeError::DataportBusy => status::SLOT_OCCUPIED,
            BridgeError::MalformedInput(_) => status::MALFORMED_INPUT,
            BridgeError::ValidationDrop(_) => status::VALIDATION_DROP,
            BridgeError::FatalStage { .. } | BridgeError::Corrupted { .. } => status::FATAL_STAGE,
            BridgeError::Topology(_) => status::TOPOLOGY,
            BridgeError::Timeout(_) => status::TIMEOUT,
            BridgeError::ChannelClosed { .. } => status::CHANNEL_CLOSED,
            BridgeError::EndpointClaimed { .. } | BridgeError::Config(_) => status::INVALID_ARG,
            BridgeError::Io(_) => status::INTERNAL,
        }
    }

    /// True for failures scoped to a single message.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            BridgeError::CapacityExceeded { .. }
                | BridgeError::SlotOccupied { .. }
                | BridgeError::DataportBusy
                | BridgeError::MalformedInput(_)
                | BridgeError::ValidationDrop(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
