// Externally observable state of one stage, shared between its runner
// thread, the watchdog and the pipeline handle.

use crate::Core::clock::monotonic_ns;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    Idle = 0,
    Processing = 1,
    Emitting = 2,
    Dropping = 3,
    /// Terminal: left the run loop on teardown or end-of-stream
    Shutdown = 4,
    /// Terminal: `on_message` returned `Fatal` or the input failed its integrity check
    Faulted = 5,
}

impl StageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StageState::Idle,
            1 => StageState::Processing,
            2 => StageState::Emitting,
            3 => StageState::Dropping,
            4 => StageState::Shutdown,
            _ => StageState::Faulted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Shutdown | StageState::Faulted)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Idle => "IDLE",
            StageState::Processing => "PROCESSING",
            StageState::Emitting => "EMITTING",
            StageState::Dropping => "DROPPING",
            StageState::Shutdown => "SHUTDOWN",
            StageState::Faulted => "FAULTED",
        };
        f.write_str(name)
    }
}

pub struct StageStatus {
    name: String,
    state: AtomicU8,
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    liveness_faults: AtomicU64,
    // 0 while not processing
    processing_since: AtomicU64,
    liveness_flagged: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl StageStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(StageState::Idle as u8),
            received: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            liveness_faults: AtomicU64::new(0),
            processing_since: AtomicU64::new(0),
            liveness_flagged: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless already in a terminal state.
    pub(crate) fn transition(&self, next: StageState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if StageState::from_u8(current).is_terminal() {
                None
            } else {
                Some(next as u8)
            }
        });
    }

    pub(crate) fn begin_processing(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.liveness_flagged.store(false, Ordering::Relaxed);
        self.processing_since.store(monotonic_ns().max(1), Ordering::Release);
        self.transition(StageState::Processing);
    }

    pub(crate) fn end_processing(&self) {
        self.processing_since.store(0, Ordering::Release);
    }

    pub(crate) fn record_forward(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    /// How long the current message has been in `on_message`, if any.
    pub fn processing_for(&self) -> Option<Duration> {
        match self.processing_since.load(Ordering::Acquire) {
            0 => None,
            since => Some(Duration::from_nanos(monotonic_ns().saturating_sub(since))),
        }
    }

    /// Count a liveness fault once per stuck message. Returns true the first
    /// time it is called for the current message.
    pub(crate) fn flag_liveness_fault(&self) -> bool {
        if self.liveness_flagged.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.liveness_faults.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn report(&self) -> StageReport {
        StageReport {
            name: self.name.clone(),
            state: self.state(),
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            liveness_faults: self.liveness_faults.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

impl fmt::Debug for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.report(), f)
    }
}

/// Point-in-time snapshot of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub liveness_faults: u64,
    pub last_error: Option<String>,
}

impl StageReport {
    pub fn is_faulted(&self) -> bool {
        self.state == StageState::Faulted
    }
}
