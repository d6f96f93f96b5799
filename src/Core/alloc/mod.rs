use crate::error::{BridgeError, Result};
use crate::Core::SharedMemory::{page_align, RegionBacking, SharedMemoryBackend, PAGE_SIZE};
use crate::SPSC::Buffer::layout::{ChannelEntry, GlobalHeader, MAX_CHANNELS};
use crate::SPSC::Buffer::SpscRing;
use crate::SPSC::{ChannelParams, Consumer, Producer, MAX_DEPTH, MAX_PAYLOAD_CAPACITY};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
mod debug;
mod getters;

// Use parking_lot's Mutex for better performance
use parking_lot::Mutex;

const MAGIC_NUMBER: u64 = 0x4450_4F52_545F_5350; // "DPORT_SP"
const LAYOUT_VERSION: u32 = 1;

/// Lays out channel control blocks and slot bands inside one dataport region.
///
/// ```text
/// page 0..      GlobalHeader { magic, version, channels[MAX_CHANNELS] }
/// page-aligned  band of channel 0: depth × slot stride
/// page-aligned  band of channel 1
/// ...
/// ```
pub struct DataportAllocator {
    shm: Arc<dyn SharedMemoryBackend>,
    header: *mut GlobalHeader,
    allocation_mutex: Mutex<()>, // For thread-safe channel creation
}

impl DataportAllocator {
    /// Bytes a region needs to hold the header plus one band per channel.
    pub fn required_size(channels: &[ChannelParams]) -> usize {
        let bands: usize = channels
            .iter()
            .map(|p| page_align(SpscRing::band_size(p.depth, p.payload_capacity)))
            .sum();
        page_align(std::mem::size_of::<GlobalHeader>()) + bands
    }

    /// Create a fresh region and initialize its header.
    pub fn new(size: usize, backing: &RegionBacking) -> Result<Self> {
        let control_size = std::mem::size_of::<GlobalHeader>();
        let aligned_size = page_align(size.max(control_size));

        let shm = crate::Core::SharedMemory::create_shared_memory(aligned_size, backing).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "Failed to create dataport region:\n\
                    ├─ Aligned size: {aligned_size}\n\
                    ├─ Header size:  {control_size}\n\
                    ╰─ Error: {e}"
                ),
            )
        })?;

        let header_ptr = shm.as_ptr() as *mut GlobalHeader;
        if (header_ptr as usize) % PAGE_SIZE != 0 {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "Dataport region not page aligned",
            )));
        }

        // The mapping is zero-filled, which is a valid table of unused entries;
        // only the scalar header fields need writing.
        unsafe {
            (*header_ptr).version = LAYOUT_VERSION;
            (*header_ptr).max_channels = MAX_CHANNELS as u32;
            (*header_ptr).channel_count = 0;
            (*header_ptr).reserved = 0;
            std::sync::atomic::fence(Ordering::Release);
            (*header_ptr).magic = MAGIC_NUMBER;
        }

        tracing::debug!(size = shm.size(), ?backing, "dataport region created");

        Ok(Self {
            shm,
            header: header_ptr,
            allocation_mutex: Mutex::new(()),
        })
    }

    /// Attach to a named region initialized by another process.
    pub fn attach(name: &str, size: usize) -> Result<Self> {
        let min_required_size = std::mem::size_of::<GlobalHeader>();
        let shm = crate::Core::SharedMemory::attach_shared_memory(name, size.max(min_required_size))?;

        let header = shm.as_ptr() as *mut GlobalHeader;
        unsafe {
            if (*header).magic != MAGIC_NUMBER {
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid magic number - dataport region not initialized",
                )));
            }
            if (*header).version != LAYOUT_VERSION {
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unsupported dataport layout version {}", (*header).version),
                )));
            }
        }

        Ok(Self {
            shm,
            header,
            allocation_mutex: Mutex::new(()),
        })
    }

    /// Create a channel with fixed parameters; returns its ID.
    pub fn create_channel(&self, params: &ChannelParams) -> Result<u32> {
        params.validate().map_err(BridgeError::Config)?;

        let stride = SpscRing::slot_stride(params.payload_capacity);
        let band_size = page_align(params.depth * stride);

        // Use a mutex to prevent multiple threads from allocating overlapping memory
        let _guard = self.allocation_mutex.lock();

        let channel_id = unsafe { (*self.header).channel_count } as usize;
        if channel_id >= MAX_CHANNELS {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "Maximum number of channels reached",
            )));
        }

        // Bands are appended after the last one in use
        let offset = self.used_memory();
        if offset + band_size > self.shm.size() {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!(
                    "Not enough space in dataport region: need {} more bytes at offset {}, region is {}",
                    band_size,
                    offset,
                    self.shm.size()
                ),
            )));
        }

        unsafe {
            let channel = &mut (*self.header).channels[channel_id];
            channel.channel_id = channel_id as u32;
            channel.flags = params.flags();
            channel.payload_capacity = params.payload_capacity as u32;
            channel.slot_stride = stride as u32;
            channel.band_offset = offset as u64;
            // depth != 0 marks the entry live; set it last
            std::sync::atomic::fence(Ordering::Release);
            channel.depth = params.depth as u32;
            (*self.header).channel_count += 1;
        }

        tracing::debug!(
            channel = channel_id,
            depth = params.depth,
            payload_capacity = params.payload_capacity,
            overflow = ?params.overflow,
            read_policy = ?params.read_policy,
            "channel created"
        );

        Ok(channel_id as u32)
    }

    fn entry(&self, channel_id: u32) -> Result<&ChannelEntry> {
        if channel_id as usize >= MAX_CHANNELS {
            return Err(BridgeError::Config(format!("channel ID {} out of bounds", channel_id)));
        }
        let entry = unsafe { &(*self.header).channels[channel_id as usize] };
        if entry.depth == 0 {
            return Err(BridgeError::Config(format!("channel {} not initialized", channel_id)));
        }
        self.check_geometry(channel_id, entry)?;
        Ok(entry)
    }

    /// Entries in an attached region are written by another process, so the
    /// band they describe must be re-checked against this mapping.
    fn check_geometry(&self, channel_id: u32, entry: &ChannelEntry) -> Result<()> {
        let corrupted = |detail: String| BridgeError::Corrupted {
            channel: channel_id,
            detail,
        };

        let depth = entry.depth as usize;
        if !depth.is_power_of_two() || depth > MAX_DEPTH {
            return Err(corrupted(format!("depth {} is not a power of two up to {}", depth, MAX_DEPTH)));
        }
        let capacity = entry.payload_capacity as usize;
        if capacity == 0 || capacity > MAX_PAYLOAD_CAPACITY {
            return Err(corrupted(format!("payload capacity {} out of range", capacity)));
        }
        if entry.slot_stride as usize != SpscRing::slot_stride(capacity) {
            return Err(corrupted(format!(
                "slot stride {} does not match payload capacity {}",
                entry.slot_stride, capacity
            )));
        }

        let header_end = page_align(std::mem::size_of::<GlobalHeader>()) as u64;
        let band_end = (depth as u64 * entry.slot_stride as u64)
            .checked_add(entry.band_offset)
            .filter(|_| entry.band_offset >= header_end && entry.band_offset % PAGE_SIZE as u64 == 0);
        match band_end {
            Some(end) if end <= self.shm.size() as u64 => Ok(()),
            _ => Err(corrupted(format!(
                "band at offset {} with {} slots of {} bytes lies outside the {} byte region",
                entry.band_offset,
                depth,
                entry.slot_stride,
                self.shm.size()
            ))),
        }
    }

    fn ring(&self, entry: &ChannelEntry) -> SpscRing {
        unsafe {
            let base = self.shm.as_ptr().add(entry.band_offset as usize);
            SpscRing::new(entry, base)
        }
    }

    /// Hand out the write end of a channel. Succeeds once per channel.
    pub fn claim_producer(&self, channel_id: u32) -> Result<Producer> {
        let entry = self.entry(channel_id)?;
        if entry
            .producer_claimed
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::EndpointClaimed {
                channel: channel_id,
                side: "producer",
            });
        }
        Ok(Producer::new(Arc::clone(&self.shm), self.ring(entry)))
    }

    /// Hand out the read end of a channel. Succeeds once per channel.
    pub fn claim_consumer(&self, channel_id: u32) -> Result<Consumer> {
        let entry = self.entry(channel_id)?;
        if entry
            .consumer_claimed
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::EndpointClaimed {
                channel: channel_id,
                side: "consumer",
            });
        }
        Ok(Consumer::new(Arc::clone(&self.shm), self.ring(entry)))
    }

    /// Close one channel, waking both sides.
    pub fn close_channel(&self, channel_id: u32) -> Result<()> {
        let entry = self.entry(channel_id)?;
        self.ring(entry).close();
        Ok(())
    }

    /// Close every live channel. Used as the shutdown broadcast.
    pub fn close_all(&self) {
        for channel_id in 0..self.channel_count() {
            if let Ok(entry) = self.entry(channel_id) {
                self.ring(entry).close();
            }
        }
    }

    /// Writes dropped on a channel under drop-and-count.
    pub fn dropped(&self, channel_id: u32) -> Result<u64> {
        Ok(self.entry(channel_id)?.dropped.load(Ordering::Relaxed))
    }

    /// Messages currently pending on a channel.
    pub fn pending(&self, channel_id: u32) -> Result<usize> {
        let entry = self.entry(channel_id)?;
        Ok(self.ring(entry).len())
    }

    // Get the total used memory in bytes
    pub fn used_memory(&self) -> usize {
        let mut max_offset = page_align(std::mem::size_of::<GlobalHeader>());

        unsafe {
            for i in 0..self.channel_count() as usize {
                let ch = &(*self.header).channels[i];
                let ch_end = (ch.band_offset as usize).saturating_add(page_align(ch.depth as usize * ch.slot_stride as usize));
                max_offset = max_offset.max(ch_end);
            }
        }

        max_offset
    }

    // Get the total available memory in bytes
    pub fn available_memory(&self) -> usize {
        self.shm.size().saturating_sub(self.used_memory())
    }

    // Get the number of configured channels
    pub fn channel_count(&self) -> u32 {
        // Clamped so a foreign header cannot index past the table
        unsafe { (*self.header).channel_count }.min(MAX_CHANNELS as u32)
    }
}

// Implement Send + Sync since we manage synchronization internally
unsafe impl Send for DataportAllocator {}
unsafe impl Sync for DataportAllocator {}
