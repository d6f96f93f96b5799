// In src/SPSC/producer.rs
use super::policy::{overflow_from_flags, OverflowPolicy};
use super::Buffer::SpscRing;
use super::Message;
use crate::error::{BridgeError, Result};
use crate::Core::SharedMemoryBackend;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on one futex sleep while blocked, so a missed wake costs at
/// most this much latency before `closed` is re-checked.
pub(crate) const WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// The write end of a channel.
///
/// There is exactly one per channel: the allocator hands it out once, it is
/// not `Clone`, and it is `Send` but not `Sync`. Dropping it closes the
/// channel, which the consumer observes as end-of-stream after draining.
pub struct Producer {
    _region: Arc<dyn SharedMemoryBackend>,
    ring: SpscRing,
    channel_id: u32,
    overflow: OverflowPolicy,
    _not_sync: PhantomData<Cell<()>>,
}

impl Producer {
    pub(crate) fn new(region: Arc<dyn SharedMemoryBackend>, ring: SpscRing) -> Self {
        let channel_id = ring.channel_id();
        let overflow = overflow_from_flags(ring.flags());
        Self {
            _region: region,
            ring,
            channel_id,
            overflow,
            _not_sync: PhantomData,
        }
    }

    /// Writes one message into the channel.
    ///
    /// # Returns
    /// * `Ok(())` once the message is published and `notify` raised
    /// * `Err(CapacityExceeded)` if the payload is larger than the channel's
    ///   payload capacity; nothing is written
    /// * `Err(SlotOccupied)` if the ring is full under `DropAndCount`
    /// * `Err(ChannelClosed)` if either side closed the channel
    pub fn write(&self, message: &Message) -> Result<()> {
        let capacity = self.ring.payload_capacity();
        if message.len() > capacity {
            return Err(BridgeError::CapacityExceeded {
                length: message.len(),
                capacity,
            });
        }

        loop {
            if self.ring.is_closed() {
                return Err(BridgeError::ChannelClosed {
                    channel: self.channel_id,
                });
            }

            // Capture the event word before looking at the ring so a drain
            // between the check and the wait is not lost
            let observed = self.ring.space_word();
            let published = self.ring.push(
                message.protocol_tag().as_u16(),
                message.timestamp(),
                message.payload(),
            );

            if published.is_some() {
                self.ring.signal_consumer();
                return Ok(());
            }

            match self.overflow {
                OverflowPolicy::DropAndCount => {
                    let total = self.ring.record_drop();
                    tracing::trace!(channel = self.channel_id, dropped = total, "slot occupied");
                    return Err(BridgeError::SlotOccupied {
                        channel: self.channel_id,
                    });
                }
                OverflowPolicy::Block => self.ring.wait_for_space(observed, Some(WAKE_INTERVAL)),
            }
        }
    }

    /// Returns the channel ID for this producer
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Returns the maximum payload size that can be written
    pub fn payload_capacity(&self) -> usize {
        self.ring.payload_capacity()
    }

    pub fn depth(&self) -> usize {
        self.ring.depth()
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Messages written but not yet consumed.
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    /// Writes rejected with `SlotOccupied` over the channel's lifetime.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    /// Close the channel. Already-published messages remain readable.
    pub fn close(&self) {
        self.ring.close();
    }

    pub(crate) fn ring(&self) -> &SpscRing {
        &self.ring
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.ring.close();
    }
}
