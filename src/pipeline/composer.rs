use super::running::{RunningPipeline, Watchdog};
use super::topology::{StageKind, StageSpec, TopologyError, TopologySpec};
use crate::bridge::GuestBridge;
use crate::config::RuntimeSettings;
use crate::error::Result;
use crate::stage::{
    AnyStage, BuiltinStage, EchoStage, ExtFrontendStage, ParserNormStage, PolicyEmitStage, Stage, StageRunner,
    StageStatus,
};
use crate::Core::DataportAllocator;
use crate::SPSC::ChannelParams;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a running pipeline from a static topology.
///
/// All wiring happens in `build`: one dataport region is laid out for every
/// channel, each stage receives exactly the two endpoints its `StageSpec` names,
/// and nothing can be rewired afterwards.
pub struct PipelineComposer {
    settings: RuntimeSettings,
    custom: HashMap<String, Box<dyn Stage>>,
}

impl PipelineComposer {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            custom: HashMap::new(),
        }
    }

    /// Register the implementation of a `kind = "custom"` stage.
    pub fn with_stage(mut self, name: impl Into<String>, stage: Box<dyn Stage>) -> Self {
        self.custom.insert(name.into(), stage);
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    fn instantiate(&mut self, spec: &StageSpec) -> std::result::Result<AnyStage, TopologyError> {
        let builtin = match spec.kind {
            StageKind::Echo => BuiltinStage::Echo(EchoStage::new(&spec.name)),
            StageKind::ExtFrontend => BuiltinStage::ExtFrontend(ExtFrontendStage::new(&spec.name, spec.accept.clone())),
            StageKind::ParserNorm => BuiltinStage::ParserNorm(ParserNormStage::new(&spec.name)),
            StageKind::PolicyEmit => {
                let table = spec
                    .policy
                    .clone()
                    .ok_or_else(|| TopologyError::MissingPolicy(spec.name.clone()))?;
                BuiltinStage::PolicyEmit(PolicyEmitStage::new(&spec.name, table))
            }
            StageKind::Custom => {
                let stage = self
                    .custom
                    .remove(&spec.name)
                    .ok_or_else(|| TopologyError::UnregisteredStage(spec.name.clone()))?;
                return Ok(AnyStage::Custom(stage));
            }
        };
        Ok(AnyStage::Builtin(builtin))
    }

    /// Validate the topology, lay out its channels and start every stage.
    ///
    /// # Returns
    /// * `Ok(RunningPipeline)` with all stage threads started
    /// * `Err(Topology)` for any wiring error, including cycles
    /// * `Err(Config)` / `Err(Io)` if settings are invalid or the region cannot be mapped
    pub fn build(mut self, spec: &TopologySpec) -> Result<RunningPipeline> {
        self.settings.validate()?;
        let plan = spec.validate().map_err(|e| {
            tracing::error!(error = %e, "topology rejected");
            e
        })?;

        // Instantiate before touching shared memory so a missing custom stage
        // fails the build with nothing allocated
        let mut stages = Vec::with_capacity(spec.stages.len());
        for stage_spec in &spec.stages {
            stages.push(Some(self.instantiate(stage_spec).map_err(|e| {
                tracing::error!(error = %e, "topology rejected");
                e
            })?));
        }
        for name in self.custom.keys() {
            tracing::warn!(stage = %name, "registered stage not present in topology");
        }

        let params: Vec<ChannelParams> = spec.channels.iter().map(|c| c.params()).collect();
        let size = DataportAllocator::required_size(&params);
        let allocator = Arc::new(DataportAllocator::new(size, &self.settings.region)?);

        let mut channel_ids = HashMap::with_capacity(spec.channels.len());
        let mut ids = Vec::with_capacity(spec.channels.len());
        for (channel, params) in spec.channels.iter().zip(&params) {
            let id = allocator.create_channel(params)?;
            channel_ids.insert(channel.name.clone(), id);
            ids.push(id);
        }

        // From here on the handle owns everything started, so an error tears
        // down the stages already running
        let mut pipeline = RunningPipeline::new(Arc::clone(&allocator), channel_ids);

        for stage_spec in &spec.stages {
            pipeline.register_status(Arc::new(StageStatus::new(&stage_spec.name)));
        }

        for &i in &plan.stage_order {
            let stage_spec = &spec.stages[i];
            let stage = stages[i].take().ok_or_else(|| TopologyError::UnregisteredStage(stage_spec.name.clone()))?;
            let (input_index, output_index) = plan.stage_channels[i];
            let input = allocator.claim_consumer(ids[input_index])?;
            let output = allocator.claim_producer(ids[output_index])?;

            let runner = StageRunner::new(
                stage,
                input,
                output,
                pipeline.status(i),
                pipeline.shutdown_flag(),
                self.settings.poll_interval(),
            );
            let handle = runner.spawn()?;
            pipeline.register_runner(stage_spec.name.clone(), handle);
        }

        for (i, bridge_spec) in spec.bridges.iter().enumerate() {
            let (ingress_index, egress_index) = plan.bridge_channels[i];
            let bridge = GuestBridge::new(
                &bridge_spec.name,
                allocator.claim_producer(ids[ingress_index])?,
                allocator.claim_consumer(ids[egress_index])?,
                self.settings.max_payload_size,
            );
            pipeline.register_bridge(bridge_spec.name.clone(), bridge);
        }

        for index in plan.open_ingress() {
            let producer = allocator.claim_producer(ids[index])?;
            pipeline.register_ingress(spec.channels[index].name.clone(), producer);
        }
        for index in plan.open_egress() {
            let consumer = allocator.claim_consumer(ids[index])?;
            pipeline.register_egress(spec.channels[index].name.clone(), consumer);
        }

        if let Some(deadline) = self.settings.processing_deadline() {
            pipeline.start_watchdog(Watchdog::new(deadline, self.settings.poll_interval()))?;
        }

        tracing::info!(
            stages = spec.stages.len(),
            channels = spec.channels.len(),
            bridges = spec.bridges.len(),
            region_bytes = size,
            "pipeline started"
        );
        Ok(pipeline)
    }
}
