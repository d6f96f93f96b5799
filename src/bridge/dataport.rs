// One-page shared mailbox between a guest and its bridge.
//
// page offset 0    MailboxHeader (doorbell, ack, status, length, claims)
// page offset 64   frame bytes, up to DATAPORT_CAPACITY
//
// The sender may post only when `ack == doorbell`, i.e. the receiver has
// acknowledged the previous frame. Posting bumps `doorbell`; acknowledging
// copies `doorbell` into `ack` and stores a status code. Both words are
// futex event words so either side can sleep on them across processes.

use crate::error::{status, BridgeError, Result};
use crate::Core::futex::{futex_wait, futex_wake};
use crate::Core::{attach_shared_memory, create_shared_memory, RegionBacking, SharedMemoryBackend, PAGE_SIZE};
use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAILBOX_HEADER_LEN: usize = 64;
/// Largest frame one dataport can carry.
pub const DATAPORT_CAPACITY: usize = PAGE_SIZE - MAILBOX_HEADER_LEN;

#[repr(C, align(64))]
pub struct MailboxHeader {
    pub doorbell: AtomicU32,
    pub ack: AtomicU32,
    pub status: AtomicI32,
    pub length: AtomicU32,
    pub sender_claimed: AtomicU32,
    pub receiver_claimed: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<MailboxHeader>() == MAILBOX_HEADER_LEN);

/// A mapped mailbox page.
#[derive(Debug, Clone)]
pub struct Dataport {
    region: Arc<dyn SharedMemoryBackend>,
}

impl Dataport {
    /// Map a fresh, zeroed mailbox page.
    pub fn new(backing: &RegionBacking) -> Result<Self> {
        let region = create_shared_memory(PAGE_SIZE, backing)?;
        tracing::debug!(?backing, "dataport created");
        Ok(Self { region })
    }

    /// Map a named mailbox created by the other side.
    pub fn attach(name: &str) -> Result<Self> {
        let region = attach_shared_memory(name, PAGE_SIZE)?;
        if region.size() < PAGE_SIZE {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "dataport region smaller than one page",
            )));
        }
        Ok(Self { region })
    }

    fn header(&self) -> &MailboxHeader {
        // Safety: the region is at least one page and page-aligned
        unsafe { &*(self.region.as_ptr() as *const MailboxHeader) }
    }

    /// Claim the single sending side.
    pub fn sender(&self) -> Result<MailboxSender> {
        claim(&self.header().sender_claimed, "sender")?;
        Ok(MailboxSender {
            region: Arc::clone(&self.region),
            _not_sync: PhantomData,
        })
    }

    /// Claim the single receiving side.
    pub fn receiver(&self) -> Result<MailboxReceiver> {
        claim(&self.header().receiver_claimed, "receiver")?;
        Ok(MailboxReceiver {
            region: Arc::clone(&self.region),
            _not_sync: PhantomData,
        })
    }

    /// True while a posted frame awaits acknowledgement.
    pub fn is_pending(&self) -> bool {
        pending(self.header())
    }
}

fn claim(word: &AtomicU32, side: &'static str) -> Result<()> {
    word.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| BridgeError::EndpointClaimed { channel: u32::MAX, side })
}

fn pending(header: &MailboxHeader) -> bool {
    header.doorbell.load(Ordering::Acquire) != header.ack.load(Ordering::Acquire)
}

fn header_of(region: &Arc<dyn SharedMemoryBackend>) -> &MailboxHeader {
    unsafe { &*(region.as_ptr() as *const MailboxHeader) }
}

// `None` when the timeout overflows the clock: wait without a deadline
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn remaining(deadline: Option<Instant>, timeout: Duration) -> Result<Option<Duration>> {
    let Some(deadline) = deadline else {
        return Ok(None);
    };
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(BridgeError::Timeout(timeout));
    }
    Ok(Some(left))
}

/// Writes frames into the mailbox and rings the doorbell.
pub struct MailboxSender {
    region: Arc<dyn SharedMemoryBackend>,
    _not_sync: PhantomData<Cell<()>>,
}

impl MailboxSender {
    /// Post one frame. Fails with `DataportBusy` while the previous frame is
    /// unacknowledged and with `CapacityExceeded` if it does not fit the page.
    pub fn post(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > DATAPORT_CAPACITY {
            return Err(BridgeError::CapacityExceeded {
                length: frame.len(),
                capacity: DATAPORT_CAPACITY,
            });
        }
        let header = header_of(&self.region);
        if pending(header) {
            return Err(BridgeError::DataportBusy);
        }

        unsafe {
            let data = self.region.as_ptr().add(MAILBOX_HEADER_LEN);
            ptr::copy_nonoverlapping(frame.as_ptr(), data, frame.len());
        }
        header.length.store(frame.len() as u32, Ordering::Relaxed);
        header.doorbell.fetch_add(1, Ordering::Release);
        futex_wake(&header.doorbell);
        Ok(())
    }

    /// Wait for the receiver to acknowledge the last post; returns its status.
    pub fn wait_ack(&self, timeout: Duration) -> Result<i32> {
        let header = header_of(&self.region);
        let deadline = deadline_after(timeout);
        loop {
            let observed = header.ack.load(Ordering::Acquire);
            if observed == header.doorbell.load(Ordering::Acquire) {
                return Ok(header.status.load(Ordering::Acquire));
            }
            futex_wait(&header.ack, observed, remaining(deadline, timeout)?);
        }
    }
}

/// Waits on the doorbell and acknowledges frames.
pub struct MailboxReceiver {
    region: Arc<dyn SharedMemoryBackend>,
    _not_sync: PhantomData<Cell<()>>,
}

impl MailboxReceiver {
    /// Wait for a posted frame and copy it out. The frame stays pending
    /// until `ack` is called.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<u8>> {
        let header = header_of(&self.region);
        let deadline = deadline_after(timeout);
        loop {
            let doorbell = header.doorbell.load(Ordering::Acquire);
            if doorbell != header.ack.load(Ordering::Acquire) {
                break;
            }
            futex_wait(&header.doorbell, doorbell, remaining(deadline, timeout)?);
        }

        // The length word is written by the guest; never trust it past the page
        let len = (header.length.load(Ordering::Relaxed) as usize).min(DATAPORT_CAPACITY);
        let mut frame = vec![0u8; len];
        unsafe {
            let data = self.region.as_ptr().add(MAILBOX_HEADER_LEN);
            ptr::copy_nonoverlapping(data, frame.as_mut_ptr(), len);
        }
        Ok(frame)
    }

    /// Acknowledge the pending frame with a status code (`status::SUCCESS`
    /// or a negative error code).
    pub fn ack(&self, code: i32) {
        let header = header_of(&self.region);
        header.status.store(code, Ordering::Relaxed);
        let doorbell = header.doorbell.load(Ordering::Acquire);
        header.ack.store(doorbell, Ordering::Release);
        futex_wake(&header.ack);
    }

    pub fn ack_ok(&self) {
        self.ack(status::SUCCESS);
    }
}
