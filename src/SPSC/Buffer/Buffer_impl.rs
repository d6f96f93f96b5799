use std::mem::size_of;
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::Duration;

use super::layout::ChannelEntry;
use super::Buffer::{SlotHeader, SpscRing, SLOT_ALIGN};
use crate::Core::futex::{futex_wait, futex_wake, futex_wake_all};

const HEADER_LEN: usize = size_of::<SlotHeader>();

impl SpscRing {
    /// Create a ring view over an initialized control block and its band.
    ///
    /// # Safety
    /// `metadata` must point at a `ChannelEntry` whose `depth`, `payload_capacity`
    /// and `slot_stride` are set, and `buffer_base` at a writable band of at least
    /// `depth * slot_stride` bytes, both valid for the lifetime of the view.
    pub unsafe fn new(metadata: *const ChannelEntry, buffer_base: *mut u8) -> Self {
        let depth = (*metadata).depth as usize;
        Self {
            metadata,
            buffer_base,
            depth,
            mask: depth - 1,
            payload_capacity: (*metadata).payload_capacity as usize,
            stride: (*metadata).slot_stride as usize,
        }
    }

    /// Size in bytes of one slot stride for a given payload capacity.
    #[inline]
    pub fn slot_stride(payload_capacity: usize) -> usize {
        (HEADER_LEN + payload_capacity + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1)
    }

    /// Bytes needed for a whole band.
    #[inline]
    pub fn band_size(depth: usize, payload_capacity: usize) -> usize {
        depth * Self::slot_stride(payload_capacity)
    }

    #[inline]
    fn entry(&self) -> &ChannelEntry {
        // Safety: the view never outlives the region holding the entry
        unsafe { &*self.metadata }
    }

    #[inline]
    unsafe fn slot_mut(&self, cursor: u64) -> *mut u8 {
        let index = (cursor as usize) & self.mask;
        self.buffer_base.add(index * self.stride)
    }

    pub fn channel_id(&self) -> u32 {
        self.entry().channel_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    pub fn flags(&self) -> u32 {
        self.entry().flags
    }

    /// Messages published but not yet consumed.
    pub fn len(&self) -> usize {
        let entry = self.entry();
        let head = entry.head.load(Acquire);
        let tail = entry.tail.load(Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.depth
    }

    /// Producer side: copy one message into the next free slot and publish it.
    /// Returns the published sequence number, or None if the ring is full.
    ///
    /// The caller guarantees `payload.len() <= payload_capacity`.
    pub fn push(&self, protocol_tag: u16, timestamp_ns: u64, payload: &[u8]) -> Option<u64> {
        debug_assert!(payload.len() <= self.payload_capacity);
        let entry = self.entry();

        let tail = entry.tail.load(Relaxed);
        let head = entry.head.load(Acquire);
        if tail.wrapping_sub(head) >= self.depth as u64 {
            return None;
        }

        unsafe {
            let slot = self.slot_mut(tail);
            ptr::write(
                slot as *mut SlotHeader,
                SlotHeader {
                    sequence: tail,
                    timestamp_ns,
                    length: payload.len() as u32,
                    protocol_tag,
                    flags: 0,
                },
            );
            ptr::copy_nonoverlapping(payload.as_ptr(), slot.add(HEADER_LEN), payload.len());
        }

        // Publish: the slot contents become visible before the new tail
        entry.tail.store(tail.wrapping_add(1), Release);
        Some(tail)
    }

    /// Consumer side: copy the oldest message out and free its slot.
    /// Returns None if the ring is empty.
    ///
    /// The payload copy is clamped to the slot capacity; callers validate the
    /// returned header against the cursor they expected.
    pub fn pop(&self) -> Option<(u64, SlotHeader, Vec<u8>)> {
        let entry = self.entry();

        let head = entry.head.load(Relaxed);
        let tail = entry.tail.load(Acquire);
        if head == tail {
            return None;
        }

        let (header, payload) = unsafe {
            let slot = self.slot_mut(head);
            let header = ptr::read(slot as *const SlotHeader);
            let len = (header.length as usize).min(self.payload_capacity);
            let mut payload = vec![0u8; len];
            ptr::copy_nonoverlapping(slot.add(HEADER_LEN), payload.as_mut_ptr(), len);
            (header, payload)
        };

        // Free the slot only after the copy completed
        entry.head.store(head.wrapping_add(1), Release);
        Some((head, header, payload))
    }

    /// Current value of the producer → consumer event word.
    pub fn notify_word(&self) -> u32 {
        self.entry().notify.load(Acquire)
    }

    /// Current value of the consumer → producer event word.
    pub fn space_word(&self) -> u32 {
        self.entry().space.load(Acquire)
    }

    /// Raise `notify` after a publish.
    pub fn signal_consumer(&self) {
        let notify = &self.entry().notify;
        notify.fetch_add(1, Release);
        futex_wake(notify);
    }

    /// Raise `space` after a drain.
    pub fn signal_producer(&self) {
        let space = &self.entry().space;
        space.fetch_add(1, Release);
        futex_wake(space);
    }

    /// Wait until `notify` moves past `observed` (or `timeout` elapses).
    pub fn wait_for_data(&self, observed: u32, timeout: Option<Duration>) {
        futex_wait(&self.entry().notify, observed, timeout);
    }

    /// Wait until `space` moves past `observed` (or `timeout` elapses).
    pub fn wait_for_space(&self, observed: u32, timeout: Option<Duration>) {
        futex_wait(&self.entry().space, observed, timeout);
    }

    /// Mark the channel closed and wake both sides.
    pub fn close(&self) {
        let entry = self.entry();
        if entry.closed.swap(1, Release) != 0 {
            return;
        }
        entry.notify.fetch_add(1, Release);
        entry.space.fetch_add(1, Release);
        futex_wake_all(&entry.notify);
        futex_wake_all(&entry.space);
    }

    pub fn is_closed(&self) -> bool {
        self.entry().closed.load(Acquire) != 0
    }

    /// Count one write rejected by the drop-and-count policy; returns the new total.
    pub fn record_drop(&self) -> u64 {
        self.entry().dropped.fetch_add(1, Relaxed) + 1
    }

    pub fn dropped(&self) -> u64 {
        self.entry().dropped.load(Relaxed)
    }
}
