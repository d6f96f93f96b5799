// Drives one stage on a dedicated thread:
//
//   IDLE ──input──► PROCESSING ──Forward──► EMITTING ──► IDLE
//                        │
//                        ├──Drop──► DROPPING ──► IDLE
//                        ╰──Fatal─► FAULTED
//   any ──teardown / end-of-stream──► SHUTDOWN

use super::status::{StageState, StageStatus};
use super::{Action, AnyStage, Stage};
use crate::error::BridgeError;
use crate::SPSC::{Consumer, Message, Producer};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What a runner thread hands back when it leaves its loop.
pub struct StageExit {
    pub state: StageState,
    // A faulted stage keeps its output endpoint here so the downstream
    // channel stays open until the pipeline is torn down.
    held_output: Option<Producer>,
}

impl StageExit {
    pub fn holds_output(&self) -> bool {
        self.held_output.is_some()
    }
}

pub struct StageRunner {
    stage: AnyStage,
    input: Consumer,
    output: Producer,
    status: Arc<StageStatus>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl StageRunner {
    pub fn new(
        stage: AnyStage,
        input: Consumer,
        output: Producer,
        status: Arc<StageStatus>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            stage,
            input,
            output,
            status,
            shutdown,
            poll_interval,
        }
    }

    pub fn status(&self) -> &Arc<StageStatus> {
        &self.status
    }

    /// Start the stage on its own named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<StageExit>> {
        let thread_name = format!("stage-{}", self.status.name());
        thread::Builder::new().name(thread_name).spawn(move || self.run())
    }

    /// Run the loop on the calling thread until teardown, end-of-stream or a fault.
    pub fn run(mut self) -> StageExit {
        let name = self.status.name().to_owned();
        tracing::info!(
            stage = %name,
            input = self.input.channel_id(),
            output = self.output.channel_id(),
            "stage started"
        );
        self.stage.on_start();

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break self.finish(StageState::Shutdown);
            }

            let message = match self.input.try_read_with_timeout(self.poll_interval) {
                Ok(message) => message,
                Err(BridgeError::Timeout(_)) => continue,
                Err(BridgeError::ChannelClosed { .. }) => {
                    tracing::debug!(stage = %name, "input closed, end of stream");
                    break self.finish(StageState::Shutdown);
                }
                Err(e) => break self.fault(e.to_string()),
            };

            self.status.begin_processing();
            let action = catch_unwind(AssertUnwindSafe(|| self.stage.on_message(&message)))
                .unwrap_or_else(|panic| Action::Fatal(panic_message(panic.as_ref())));
            self.status.end_processing();

            match action {
                Action::Forward(out) => {
                    self.status.transition(StageState::Emitting);
                    self.emit(&name, out);
                    self.status.transition(StageState::Idle);
                }
                Action::Drop(reason) => {
                    self.status.transition(StageState::Dropping);
                    self.status.record_drop();
                    tracing::debug!(
                        stage = %name,
                        protocol = %message.protocol_tag(),
                        len = message.len(),
                        %reason,
                        "message dropped"
                    );
                    self.status.record_error(reason);
                    self.status.transition(StageState::Idle);
                }
                Action::Fatal(error) => break self.fault(error),
            }
        }
    }

    fn emit(&self, name: &str, message: Message) {
        match self.output.write(&message) {
            Ok(()) => self.status.record_forward(),
            Err(e) => {
                // Per-message: count it and keep consuming
                self.status.record_drop();
                if matches!(e, BridgeError::ChannelClosed { .. }) && !self.shutdown.load(Ordering::Acquire) {
                    tracing::warn!(stage = %name, channel = self.output.channel_id(), "output closed by downstream");
                } else {
                    tracing::debug!(stage = %name, code = e.code(), error = %e, "forward failed");
                }
                self.status.record_error(e.to_string());
            }
        }
    }

    fn finish(mut self, state: StageState) -> StageExit {
        self.status.transition(state);
        self.stage.on_shutdown();
        tracing::info!(stage = %self.status.name(), report = ?self.status.report(), "stage stopped");
        // Dropping the output closes it, which downstream reads as end-of-stream
        StageExit {
            state: self.status.state(),
            held_output: None,
        }
    }

    fn fault(mut self, error: String) -> StageExit {
        let fatal = BridgeError::FatalStage {
            stage: self.status.name().to_owned(),
            message: error.clone(),
        };
        tracing::error!(stage = %self.status.name(), code = fatal.code(), error = %error, "stage faulted");
        self.status.record_error(error);
        self.status.transition(StageState::Faulted);
        self.stage.on_shutdown();

        // Upstream writes now fail fast; downstream stays open
        self.input.close();
        StageExit {
            state: StageState::Faulted,
            held_output: Some(self.output),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic in on_message".to_owned()
    }
}
