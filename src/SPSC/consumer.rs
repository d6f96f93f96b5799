// src/SPSC/consumer.rs

use super::policy::{read_policy_from_flags, ReadPolicy};
use super::producer::WAKE_INTERVAL;
use super::Buffer::SpscRing;
use super::{Message, ProtocolTag};
use crate::error::{BridgeError, Result};
use crate::Core::SharedMemoryBackend;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The read end of a channel. Same single-owner rules as `Producer`.
pub struct Consumer {
    _region: Arc<dyn SharedMemoryBackend>,
    ring: SpscRing,
    channel_id: u32,
    read_policy: ReadPolicy,
    _not_sync: PhantomData<Cell<()>>,
}

impl Consumer {
    pub(crate) fn new(region: Arc<dyn SharedMemoryBackend>, ring: SpscRing) -> Self {
        let channel_id = ring.channel_id();
        let read_policy = read_policy_from_flags(ring.flags());
        Self {
            _region: region,
            ring,
            channel_id,
            read_policy,
            _not_sync: PhantomData,
        }
    }

    /// Take the oldest pending message without waiting.
    fn take(&self) -> Result<Option<Message>> {
        let Some((expected, header, payload)) = self.ring.pop() else {
            return Ok(None);
        };
        self.ring.signal_producer();

        if header.sequence != expected {
            return Err(BridgeError::Corrupted {
                channel: self.channel_id,
                detail: format!("slot sequence {} at cursor {}", header.sequence, expected),
            });
        }
        if header.length as usize != payload.len() {
            return Err(BridgeError::Corrupted {
                channel: self.channel_id,
                detail: format!(
                    "slot length {} exceeds capacity {}",
                    header.length,
                    self.ring.payload_capacity()
                ),
            });
        }
        let tag = ProtocolTag::from_u16(header.protocol_tag).ok_or_else(|| BridgeError::Corrupted {
            channel: self.channel_id,
            detail: format!("unknown protocol tag {}", header.protocol_tag),
        })?;

        Ok(Some(Message::with_timestamp(tag, header.timestamp_ns, payload)))
    }

    /// Reads the next message according to the channel's read policy.
    ///
    /// # Returns
    /// * `Ok(Some(message))` if a message was available (or arrived)
    /// * `Ok(None)` under `Poll` if the channel is empty; under `Block` only
    ///   once the channel is closed and fully drained
    /// * `Err(Corrupted)` if the slot failed its integrity check
    pub fn read(&self) -> Result<Option<Message>> {
        match self.read_policy {
            ReadPolicy::Poll => self.take(),
            ReadPolicy::Block => loop {
                let observed = self.ring.notify_word();
                if let Some(message) = self.take()? {
                    return Ok(Some(message));
                }
                if self.ring.is_closed() {
                    return Ok(None);
                }
                self.ring.wait_for_data(observed, Some(WAKE_INTERVAL));
            },
        }
    }

    /// Reads the next message, waiting up to `timeout` regardless of the read policy.
    ///
    /// # Returns
    /// * `Ok(message)` if a message arrived in time
    /// * `Err(Timeout)` if the timeout was reached
    /// * `Err(ChannelClosed)` if the channel is closed and drained
    pub fn try_read_with_timeout(&self, timeout: Duration) -> Result<Message> {
        // A timeout past the end of the clock means no deadline
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let observed = self.ring.notify_word();
            if let Some(message) = self.take()? {
                return Ok(message);
            }
            if self.ring.is_closed() {
                return Err(BridgeError::ChannelClosed {
                    channel: self.channel_id,
                });
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(BridgeError::Timeout(timeout));
                    }
                    remaining
                }
                None => WAKE_INTERVAL,
            };
            self.ring.wait_for_data(observed, Some(wait));
        }
    }

    /// Takes the next message if one is ready, never waiting, whatever the
    /// channel's read policy.
    pub fn try_read(&self) -> Result<Option<Message>> {
        self.take()
    }

    /// Returns the channel ID for this consumer
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn payload_capacity(&self) -> usize {
        self.ring.payload_capacity()
    }

    pub fn depth(&self) -> usize {
        self.ring.depth()
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    /// Messages published but not yet read.
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    /// Close the channel; a producer blocked or about to write gets `ChannelClosed`.
    pub fn close(&self) {
        self.ring.close();
    }

    pub(crate) fn ring(&self) -> &SpscRing {
        &self.ring
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.ring.close();
    }
}
