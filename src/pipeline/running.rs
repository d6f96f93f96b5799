use crate::bridge::GuestBridge;
use crate::error::{BridgeError, Result};
use crate::stage::runner::StageExit;
use crate::stage::{StageReport, StageState, StageStatus};
use crate::Core::DataportAllocator;
use crate::SPSC::{Consumer, Producer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The stage returned `Fatal` (or its input failed an integrity check)
    Fatal,
    /// The stage stayed in PROCESSING past the deadline
    Liveness,
}

/// An externally observable stage fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFault {
    pub stage: String,
    pub kind: FaultKind,
    pub detail: String,
}

/// Flags stages stuck in `on_message`.
pub(crate) struct Watchdog {
    deadline: Duration,
    interval: Duration,
}

impl Watchdog {
    pub(crate) fn new(deadline: Duration, poll_interval: Duration) -> Self {
        // Check a few times per deadline, but not busier than the stage poll
        let interval = (deadline / 4).max(poll_interval).min(deadline);
        Self { deadline, interval }
    }

    fn run(self, statuses: Vec<Arc<StageStatus>>, faults: Arc<Mutex<Vec<StageFault>>>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Acquire) {
            thread::park_timeout(self.interval);
            for status in &statuses {
                let Some(elapsed) = status.processing_for() else {
                    continue;
                };
                if elapsed > self.deadline && status.flag_liveness_fault() {
                    tracing::error!(
                        stage = %status.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        deadline_ms = self.deadline.as_millis() as u64,
                        "liveness fault: stage stuck in PROCESSING"
                    );
                    faults.lock().push(StageFault {
                        stage: status.name().to_owned(),
                        kind: FaultKind::Liveness,
                        detail: format!("processing for {elapsed:?}, deadline {:?}", self.deadline),
                    });
                }
            }
        }
    }
}

/// Handle to a built pipeline.
///
/// Boundary endpoints (bridges and channels without a stage on one side) are
/// handed out once each through the `take_*` methods. Dropping the handle
/// shuts the pipeline down.
pub struct RunningPipeline {
    allocator: Arc<DataportAllocator>,
    channel_ids: HashMap<String, u32>,
    statuses: Vec<Arc<StageStatus>>,
    runners: Vec<(String, JoinHandle<StageExit>)>,
    ingress: HashMap<String, Producer>,
    egress: HashMap<String, Consumer>,
    bridges: HashMap<String, GuestBridge>,
    faults: Arc<Mutex<Vec<StageFault>>>,
    shutdown: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
    stopped: bool,
}

impl RunningPipeline {
    pub(crate) fn new(allocator: Arc<DataportAllocator>, channel_ids: HashMap<String, u32>) -> Self {
        Self {
            allocator,
            channel_ids,
            statuses: Vec::new(),
            runners: Vec::new(),
            ingress: HashMap::new(),
            egress: HashMap::new(),
            bridges: HashMap::new(),
            faults: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            watchdog: None,
            stopped: false,
        }
    }

    pub(crate) fn register_status(&mut self, status: Arc<StageStatus>) {
        self.statuses.push(status);
    }

    pub(crate) fn status(&self, index: usize) -> Arc<StageStatus> {
        Arc::clone(&self.statuses[index])
    }

    pub(crate) fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub(crate) fn register_runner(&mut self, name: String, handle: JoinHandle<StageExit>) {
        self.runners.push((name, handle));
    }

    pub(crate) fn register_bridge(&mut self, name: String, bridge: GuestBridge) {
        self.bridges.insert(name, bridge);
    }

    pub(crate) fn register_ingress(&mut self, channel: String, producer: Producer) {
        self.ingress.insert(channel, producer);
    }

    pub(crate) fn register_egress(&mut self, channel: String, consumer: Consumer) {
        self.egress.insert(channel, consumer);
    }

    pub(crate) fn start_watchdog(&mut self, watchdog: Watchdog) -> Result<()> {
        let statuses = self.statuses.clone();
        let faults = Arc::clone(&self.faults);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name("pipeline-watchdog".into())
            .spawn(move || watchdog.run(statuses, faults, shutdown))?;
        self.watchdog = Some(handle);
        Ok(())
    }

    /// Producer end of a channel no stage writes to. Once per channel.
    pub fn take_ingress(&mut self, channel: &str) -> Option<Producer> {
        self.ingress.remove(channel)
    }

    /// Consumer end of a channel no stage reads from. Once per channel.
    pub fn take_egress(&mut self, channel: &str) -> Option<Consumer> {
        self.egress.remove(channel)
    }

    /// A guest bridge declared in the topology. Once per bridge.
    pub fn take_bridge(&mut self, name: &str) -> Option<GuestBridge> {
        self.bridges.remove(name)
    }

    pub fn channel_id(&self, channel: &str) -> Option<u32> {
        self.channel_ids.get(channel).copied()
    }

    /// Writes rejected on a channel under drop-and-count.
    pub fn channel_dropped(&self, channel: &str) -> Result<u64> {
        let id = self
            .channel_id(channel)
            .ok_or_else(|| BridgeError::Config(format!("unknown channel '{channel}'")))?;
        self.allocator.dropped(id)
    }

    /// Snapshots of every stage, in topology order.
    pub fn stage_reports(&self) -> Vec<StageReport> {
        self.statuses.iter().map(|s| s.report()).collect()
    }

    pub fn stage_report(&self, name: &str) -> Option<StageReport> {
        self.statuses.iter().find(|s| s.name() == name).map(|s| s.report())
    }

    /// Fatal stage errors and liveness faults observed so far.
    pub fn faults(&self) -> Vec<StageFault> {
        let mut faults: Vec<StageFault> = self
            .statuses
            .iter()
            .filter(|s| s.state() == StageState::Faulted)
            .map(|s| {
                let report = s.report();
                StageFault {
                    stage: report.name,
                    kind: FaultKind::Fatal,
                    detail: report.last_error.unwrap_or_default(),
                }
            })
            .collect();
        faults.extend(self.faults.lock().iter().cloned());
        faults
    }

    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Broadcast teardown, wait for every stage and return their final reports.
    pub fn shutdown(mut self) -> Vec<StageReport> {
        self.stop();
        self.stage_reports()
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!(stages = self.statuses.len(), "pipeline shutting down");

        // Flag first so stages leave their loop, then close every channel so
        // nobody stays parked on an event word
        self.shutdown.store(true, Ordering::Release);
        self.allocator.close_all();

        if let Some(watchdog) = self.watchdog.take() {
            watchdog.thread().unpark();
            if watchdog.join().is_err() {
                tracing::error!("watchdog thread panicked");
            }
        }

        for (name, handle) in self.runners.drain(..) {
            match handle.join() {
                Ok(exit) => tracing::debug!(stage = %name, state = %exit.state, "stage joined"),
                Err(_) => tracing::error!(stage = %name, "stage thread panicked"),
            }
        }

        self.ingress.clear();
        self.egress.clear();
        self.bridges.clear();
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
