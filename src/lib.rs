//! Isolated processing stages connected by shared-memory SPSC channels.
//!
//! A pipeline is a fixed chain of stages. Every hop between two stages is a
//! dataport channel: a slot ring in shared memory with producer-owned `tail`,
//! consumer-owned `head` and a futex event word. Untrusted input (a VM guest,
//! a NIC) enters only through the guest bridge, which rejects malformed
//! framing before anything reaches a channel.
//!
//! ```text
//! guest ──► [ingress] ──► ExtFrontend ──► ParserNorm ──► PolicyEmit ──► [egress] ──► guest / NIC
//! ```

// Module naming follows project convention (SPSC = Single-Producer Single-Consumer)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod SPSC;
#[allow(non_snake_case)]
mod Debug;

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod pipeline;
pub mod stage;

pub use bridge::{GuestBridge, GuestEgress, GuestIngress};
pub use config::{PipelineConfig, RuntimeSettings};
pub use error::{BridgeError, Result};
pub use pipeline::{PipelineComposer, RunningPipeline, TopologySpec};
pub use SPSC::{ChannelBuilder, Consumer, Message, Producer, ProtocolTag};
