use super::Buffer::layout::{CHANNEL_FLAG_BLOCKING_READ, CHANNEL_FLAG_BLOCK_ON_FULL};
use serde::{Deserialize, Serialize};

/// Single-slot channel, as in the dataport designs.
pub const DEFAULT_DEPTH: usize = 1;
/// Upper bound on the "small fixed-depth queue".
pub const MAX_DEPTH: usize = 64;
/// Default per-message payload capacity in bytes.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 4096;
/// The bridge frame carries a u16 length, so no channel may accept more.
pub const MAX_PAYLOAD_CAPACITY: usize = u16::MAX as usize;

/// What a producer does when every slot still holds an unconsumed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the write with `SlotOccupied` and bump the channel's drop counter
    #[default]
    DropAndCount,
    /// Suspend the producer until the consumer drains a slot or the channel closes
    Block,
}

/// What a consumer's `read()` does on an empty channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Return immediately with nothing
    #[default]
    Poll,
    /// Suspend until the producer raises `notify` or the channel closes
    Block,
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_payload_capacity() -> usize {
    DEFAULT_PAYLOAD_CAPACITY
}

/// Fixed, creation-time parameters of one channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default)]
    pub read_policy: ReadPolicy,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            overflow: OverflowPolicy::default(),
            read_policy: ReadPolicy::default(),
        }
    }
}

impl ChannelParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.depth == 0 || !self.depth.is_power_of_two() || self.depth > MAX_DEPTH {
            return Err(format!(
                "depth {} must be a power of two in 1..={}",
                self.depth, MAX_DEPTH
            ));
        }
        if self.payload_capacity == 0 || self.payload_capacity > MAX_PAYLOAD_CAPACITY {
            return Err(format!(
                "payload capacity {} must be in 1..={}",
                self.payload_capacity, MAX_PAYLOAD_CAPACITY
            ));
        }
        Ok(())
    }

    pub(crate) fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.overflow == OverflowPolicy::Block {
            flags |= CHANNEL_FLAG_BLOCK_ON_FULL;
        }
        if self.read_policy == ReadPolicy::Block {
            flags |= CHANNEL_FLAG_BLOCKING_READ;
        }
        flags
    }
}

pub(crate) fn overflow_from_flags(flags: u32) -> OverflowPolicy {
    if flags & CHANNEL_FLAG_BLOCK_ON_FULL != 0 {
        OverflowPolicy::Block
    } else {
        OverflowPolicy::DropAndCount
    }
}

pub(crate) fn read_policy_from_flags(flags: u32) -> ReadPolicy {
    if flags & CHANNEL_FLAG_BLOCKING_READ != 0 {
        ReadPolicy::Block
    } else {
        ReadPolicy::Poll
    }
}
