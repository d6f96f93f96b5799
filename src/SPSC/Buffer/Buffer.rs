// Slot ring view over one channel's band in the dataport region

use super::layout::ChannelEntry;

/// Slots are laid out on cache-line boundaries.
pub const SLOT_ALIGN: usize = 64;

/// Fixed header preceding each payload in a slot.
///
/// This struct represents the actual data layout in shared memory.
/// It is marked `#[repr(C)]` to ensure a defined and stable memory layout.
/// All fields are native-endian; both sides of a dataport share a host.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotHeader {
    /// Producer cursor value at publish time. A consumer at `head == n`
    /// must find `sequence == n`, otherwise the slot is corrupt.
    pub sequence: u64,

    /// Monotonic capture time of the message.
    pub timestamp_ns: u64,

    /// Payload bytes following the header.
    pub length: u32,

    /// `ProtocolTag` discriminant.
    pub protocol_tag: u16,

    /// Reserved, written as zero.
    pub flags: u16,
}

/// A single-producer, single-consumer ring buffer view.
///
/// This struct is NOT stored in shared memory. It is a transient view that holds
/// pointers to the shared memory region.
///
/// ### Concurrency Design:
/// - **Producer**: reads `head` (Acquire) to find free slots, writes the slot,
///   then publishes with a Release store to `tail`.
/// - **Consumer**: reads `tail` (Acquire) to find ready slots, copies the slot
///   out, then frees it with a Release store to `head`.
///
/// Neither side ever stores to the other's cursor, so no CAS and no lock is needed.
pub struct SpscRing {
    /// Pointer to the channel control block in the header area.
    pub(crate) metadata: *const ChannelEntry,

    /// Pointer to the start of this channel's slot band.
    pub(crate) buffer_base: *mut u8,

    /// Number of slots.
    pub(crate) depth: usize,

    /// `depth - 1`, used to wrap cursors onto slot indices.
    pub(crate) mask: usize,

    /// Maximum payload bytes per slot.
    pub(crate) payload_capacity: usize,

    /// Byte distance between slots.
    pub(crate) stride: usize,
}

unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}
