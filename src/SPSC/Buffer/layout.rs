use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// The maximum number of channels that can be configured in one dataport region.
/// This must be a constant to allow for a fixed-size array in the GlobalHeader.
pub const MAX_CHANNELS: usize = 32;

/// Producer suspends on a full ring instead of dropping.
pub const CHANNEL_FLAG_BLOCK_ON_FULL: u32 = 1 << 0;
/// Consumer `read()` suspends on an empty ring instead of returning nothing.
pub const CHANNEL_FLAG_BLOCKING_READ: u32 = 1 << 1;

/// Control block for a single SPSC channel within the global header.
///
/// Every mutable field has exactly one writer: the producer owns `tail`,
/// `notify` and `dropped`; the consumer owns `head` and `space`. `closed` and
/// the claim words are the only fields either side (or the composer) may set.
/// An all-zero entry is a valid "unused" entry.
#[repr(C, align(128))]
pub struct ChannelEntry {
    /// Logical identifier, equal to the entry's index in the table.
    pub channel_id: u32,

    /// `CHANNEL_FLAG_*` policy bits, fixed at creation.
    pub flags: u32,

    /// Number of slots (power of two). Zero marks the entry unused.
    pub depth: u32,

    /// Maximum payload bytes per message.
    pub payload_capacity: u32,

    /// Byte distance between consecutive slots in the band.
    pub slot_stride: u32,

    pub _reserved: u32,

    /// Byte offset from the start of the region to this channel's slot band.
    pub band_offset: u64,

    /// Producer → consumer event word, incremented after every publish.
    pub notify: AtomicU32,

    /// Consumer → producer event word, incremented after every drain.
    pub space: AtomicU32,

    /// Non-zero once either side or the composer closed the channel.
    pub closed: AtomicU32,

    /// Set once the producer endpoint has been handed out.
    pub producer_claimed: AtomicU32,

    /// Set once the consumer endpoint has been handed out.
    pub consumer_claimed: AtomicU32,

    /// Writes rejected with `SlotOccupied` under the drop-and-count policy.
    pub dropped: AtomicU64,

    /// Write cursor. Only the producer stores to it.
    pub tail: CachePadded<AtomicU64>,

    /// Read cursor. Only the consumer stores to it.
    pub head: CachePadded<AtomicU64>,
}

/// The global header located at the very beginning of the dataport region.
///
/// It acts as the entry point for any process, containing versioning info
/// and the table of channel entries.
#[repr(C, align(128))]
pub struct GlobalHeader {
    /// A "magic number" identifying an initialized dataport region.
    pub magic: u64,

    /// The version of the memory layout.
    pub version: u32,

    /// Compiled/allocated maximum channel entries.
    pub max_channels: u32,

    /// The number of channels currently configured.
    pub channel_count: u32,

    pub reserved: u32,

    /// The table of control blocks, one per channel.
    pub channels: [ChannelEntry; MAX_CHANNELS],
}
