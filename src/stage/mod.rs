//! Stage abstraction.
//!
//! Two-layer design, same as the pipeline nodes it is modelled on:
//! - **`Stage` trait** for user-supplied stages registered with the composer.
//! - **`BuiltinStage` enum** for the closed set of built-in stages; the runner
//!   dispatches these by `match` rather than through a vtable.
//!
//! `AnyStage` wraps either so a runner handles both uniformly.

pub mod echo;
pub mod frontend;
pub mod normalize;
pub mod policy;
pub mod protocol;
pub mod runner;
pub mod status;

use crate::SPSC::Message;

pub use echo::EchoStage;
pub use frontend::ExtFrontendStage;
pub use normalize::ParserNormStage;
pub use policy::{AddressRange, PolicyEmitStage, PolicyRule, PolicyTable, Verdict};
pub use runner::StageRunner;
pub use status::{StageReport, StageState, StageStatus};

/// Outcome of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write this message to the output channel
    Forward(Message),
    /// Discard the input; the reason is logged and counted
    Drop(String),
    /// An internal invariant broke; the stage halts
    Fatal(String),
}

impl Action {
    pub fn drop(reason: impl Into<String>) -> Self {
        Action::Drop(reason.into())
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Action::Forward(_))
    }
}

/// A processing unit between one input and one output channel.
///
/// Implementations see messages only; the runner owns the channel endpoints,
/// so a stage cannot reach any channel other than the two it was wired to.
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// Called once on the stage thread before the first message.
    fn on_start(&mut self) {}

    /// Bounded transformation or validation of one message.
    fn on_message(&mut self, message: &Message) -> Action;

    /// Called once when the stage leaves its run loop for any reason.
    fn on_shutdown(&mut self) {}
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    Echo(EchoStage),
    ExtFrontend(ExtFrontendStage),
    ParserNorm(ParserNormStage),
    PolicyEmit(PolicyEmitStage),
}

impl Stage for BuiltinStage {
    fn name(&self) -> &str {
        match self {
            BuiltinStage::Echo(s) => s.name(),
            BuiltinStage::ExtFrontend(s) => s.name(),
            BuiltinStage::ParserNorm(s) => s.name(),
            BuiltinStage::PolicyEmit(s) => s.name(),
        }
    }

    fn on_start(&mut self) {
        match self {
            BuiltinStage::Echo(s) => s.on_start(),
            BuiltinStage::ExtFrontend(s) => s.on_start(),
            BuiltinStage::ParserNorm(s) => s.on_start(),
            BuiltinStage::PolicyEmit(s) => s.on_start(),
        }
    }

    fn on_message(&mut self, message: &Message) -> Action {
        match self {
            BuiltinStage::Echo(s) => s.on_message(message),
            BuiltinStage::ExtFrontend(s) => s.on_message(message),
            BuiltinStage::ParserNorm(s) => s.on_message(message),
            BuiltinStage::PolicyEmit(s) => s.on_message(message),
        }
    }

    fn on_shutdown(&mut self) {
        match self {
            BuiltinStage::Echo(s) => s.on_shutdown(),
            BuiltinStage::ExtFrontend(s) => s.on_shutdown(),
            BuiltinStage::ParserNorm(s) => s.on_shutdown(),
            BuiltinStage::PolicyEmit(s) => s.on_shutdown(),
        }
    }
}

/// Either a built-in stage or a registered custom one.
pub enum AnyStage {
    Builtin(BuiltinStage),
    Custom(Box<dyn Stage>),
}

impl Stage for AnyStage {
    fn name(&self) -> &str {
        match self {
            AnyStage::Builtin(s) => s.name(),
            AnyStage::Custom(s) => s.name(),
        }
    }

    fn on_start(&mut self) {
        match self {
            AnyStage::Builtin(s) => s.on_start(),
            AnyStage::Custom(s) => s.on_start(),
        }
    }

    fn on_message(&mut self, message: &Message) -> Action {
        match self {
            AnyStage::Builtin(s) => s.on_message(message),
            AnyStage::Custom(s) => s.on_message(message),
        }
    }

    fn on_shutdown(&mut self) {
        match self {
            AnyStage::Builtin(s) => s.on_shutdown(),
            AnyStage::Custom(s) => s.on_shutdown(),
        }
    }
}

impl From<BuiltinStage> for AnyStage {
    fn from(stage: BuiltinStage) -> Self {
        AnyStage::Builtin(stage)
    }
}

impl From<Box<dyn Stage>> for AnyStage {
    fn from(stage: Box<dyn Stage>) -> Self {
        AnyStage::Custom(stage)
    }
}
