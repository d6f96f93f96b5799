use std::fmt;
use crate::Core::alloc::DataportAllocator;
use crate::SPSC::Buffer::SpscRing;

/// Debug function for DataportAllocator
///
/// Provides a safe debug representation that shows:
/// - Header pointer location
/// - Region size and channel count
/// - Initialization status
pub fn debug_dataport_allocator(allocator: &DataportAllocator, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DataportAllocator")
        .field("shm", &allocator.shm().raw_handle())
        .field("header", &format_args!("{:p}", allocator.header_ptr()))
        .field("region_size", &allocator.region_size())
        .field("channel_count", &allocator.channel_count())
        .field("initialized", &allocator.is_initialized())
        .finish()
}

/// Debug function for SpscRing
///
/// Shows the band location and geometry without dereferencing slot contents
pub fn debug_spsc_ring(ring: &SpscRing, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpscRing")
        .field("channel_id", &ring.channel_id())
        .field("buffer", &format_args!("0x{:x}", ring.buffer_base as usize))
        .field("depth", &ring.depth)
        .field("stride", &ring.stride)
        .field("payload_capacity", &ring.payload_capacity)
        .finish_non_exhaustive()
}

/// Debug function for Producer / Consumer endpoints
///
/// Shows the channel and its live occupancy
pub fn debug_endpoint(kind: &str, ring: &SpscRing, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct(kind)
        .field("channel_id", &ring.channel_id())
        .field("pending", &ring.len())
        .field("depth", &ring.depth())
        .field("closed", &ring.is_closed())
        .field("dropped", &ring.dropped())
        .finish()
}
