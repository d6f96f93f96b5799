//! The trust boundary between an untrusted guest and the pipeline.
//!
//! The guest never maps a pipeline channel. It hands the bridge raw frames
//! (directly or through a `Dataport` mailbox); the bridge validates each one
//! completely before writing the decoded message to the single ingress
//! channel it holds the producer end of. In the other direction it holds
//! only the egress consumer and serializes messages back into frames.

pub mod dataport;
pub mod frame;

pub use dataport::{Dataport, MailboxReceiver, MailboxSender, DATAPORT_CAPACITY};
pub use frame::{decode_frame, encode_frame, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};

use crate::error::{status, BridgeError, Result};
use crate::Core::clock::monotonic_ns;
use crate::SPSC::{Consumer, Message, Producer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct StatsCell {
    accepted: AtomicU64,
    rejected: AtomicU64,
    write_failures: AtomicU64,
    delivered: AtomicU64,
}

/// Counters for one bridge, shared by its two halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Frames decoded and written to the ingress channel
    pub accepted: u64,
    /// Frames rejected as malformed; none of these reached a channel
    pub rejected: u64,
    /// Well-formed frames the ingress channel refused (full, closed, oversize)
    pub write_failures: u64,
    /// Messages serialized back to the guest
    pub delivered: u64,
}

impl StatsCell {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

/// Guest → pipeline half.
pub struct GuestIngress {
    name: String,
    producer: Producer,
    max_payload: usize,
    stats: Arc<StatsCell>,
}

impl GuestIngress {
    /// Validate a raw guest frame and, only if it is well formed, write it
    /// to the ingress channel stamped with the bridge's capture time.
    ///
    /// # Returns
    /// * `Ok(())` once the message is in the channel
    /// * `Err(MalformedInput)` for any framing violation; the channel is untouched
    /// * the channel's write error (`SlotOccupied`, `ChannelClosed`) otherwise
    pub fn guest_to_pipeline(&self, raw: &[u8]) -> Result<()> {
        let message = match decode_frame(raw, self.max_payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(bridge = %self.name, len = raw.len(), error = %e, "malformed guest frame rejected");
                return Err(BridgeError::MalformedInput(e));
            }
        };

        // Guest clocks are not trusted
        let message = message.restamped(monotonic_ns());
        match self.producer.write(&message) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(bridge = %self.name, code = e.code(), error = %e, "ingress write failed");
                Err(e)
            }
        }
    }

    /// Take one frame from a guest mailbox, submit it and acknowledge it with
    /// the numeric outcome. Returns the submission result.
    pub fn service_dataport(&self, mailbox: &MailboxReceiver, timeout: Duration) -> Result<()> {
        let frame = mailbox.wait(timeout)?;
        let outcome = self.guest_to_pipeline(&frame);
        mailbox.ack(match &outcome {
            Ok(()) => status::SUCCESS,
            Err(e) => e.status_code(),
        });
        outcome
    }

    /// Largest payload a frame may declare.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn channel_id(&self) -> u32 {
        self.producer.channel_id()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }
}

/// Pipeline → guest half.
pub struct GuestEgress {
    name: String,
    consumer: Consumer,
    stats: Arc<StatsCell>,
}

impl GuestEgress {
    /// Serialize a message into the guest frame format.
    pub fn pipeline_to_guest(&self, message: &Message) -> Result<Vec<u8>> {
        let frame = encode_frame(message)?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    /// Wait up to `timeout` for the next egress message and frame it.
    pub fn receive(&self, timeout: Duration) -> Result<Vec<u8>> {
        let message = self.consumer.try_read_with_timeout(timeout)?;
        self.pipeline_to_guest(&message)
    }

    /// Non-blocking variant of `receive`. Never waits, even on a channel
    /// whose read policy is `Block`.
    pub fn try_receive(&self) -> Result<Option<Vec<u8>>> {
        match self.consumer.try_read()? {
            Some(message) => self.pipeline_to_guest(&message).map(Some),
            None => Ok(None),
        }
    }

    /// Move one egress message into a guest mailbox and wait for the guest's
    /// acknowledgement. Returns the status code the guest acked with.
    pub fn deliver_to_dataport(&self, mailbox: &MailboxSender, timeout: Duration) -> Result<i32> {
        let frame = self.receive(timeout)?;
        mailbox.post(&frame)?;
        let code = mailbox.wait_ack(timeout)?;
        tracing::trace!(bridge = %self.name, len = frame.len(), code, "frame delivered to dataport");
        Ok(code)
    }

    pub fn channel_id(&self) -> u32 {
        self.consumer.channel_id()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }
}

/// Both halves of a bridge. Split it to drive each direction from its own thread.
pub struct GuestBridge {
    name: String,
    ingress: GuestIngress,
    egress: GuestEgress,
}

impl GuestBridge {
    /// `max_payload` is clamped to the ingress channel's payload capacity.
    pub fn new(name: impl Into<String>, ingress: Producer, egress: Consumer, max_payload: usize) -> Self {
        let name = name.into();
        let stats = Arc::new(StatsCell::default());
        let max_payload = max_payload.min(ingress.payload_capacity()).min(MAX_FRAME_PAYLOAD);
        tracing::debug!(
            bridge = %name,
            ingress = ingress.channel_id(),
            egress = egress.channel_id(),
            max_payload,
            "guest bridge attached"
        );
        Self {
            ingress: GuestIngress {
                name: name.clone(),
                producer: ingress,
                max_payload,
                stats: Arc::clone(&stats),
            },
            egress: GuestEgress {
                name: name.clone(),
                consumer: egress,
                stats,
            },
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guest_to_pipeline(&self, raw: &[u8]) -> Result<()> {
        self.ingress.guest_to_pipeline(raw)
    }

    pub fn pipeline_to_guest(&self, message: &Message) -> Result<Vec<u8>> {
        self.egress.pipeline_to_guest(message)
    }

    pub fn receive(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.egress.receive(timeout)
    }

    pub fn stats(&self) -> BridgeStats {
        self.ingress.stats()
    }

    pub fn ingress(&self) -> &GuestIngress {
        &self.ingress
    }

    pub fn egress(&self) -> &GuestEgress {
        &self.egress
    }

    pub fn split(self) -> (GuestIngress, GuestEgress) {
        (self.ingress, self.egress)
    }
}
