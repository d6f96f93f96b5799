//! Static composition of stages and channels.

pub mod composer;
pub mod running;
pub mod topology;

pub use composer::PipelineComposer;
pub use running::{FaultKind, RunningPipeline, StageFault};
pub use topology::{
    Attachment, BridgeSpec, ChannelPlan, ChannelSpec, StageKind, StageSpec, TopologyError, TopologyPlan, TopologySpec,
};
