//! Static pipeline description and its build-time validation.

use crate::error::BridgeError;
use crate::stage::PolicyTable;
use crate::SPSC::Buffer::layout::MAX_CHANNELS;
use crate::SPSC::{ChannelParams, OverflowPolicy, ProtocolTag, ReadPolicy, DEFAULT_DEPTH, DEFAULT_PAYLOAD_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology declares no stages")]
    NoStages,

    #[error("topology declares {declared} channels, a region holds at most {max}")]
    TooManyChannels { declared: usize, max: usize },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error("{owner} references undeclared channel '{channel}'")]
    UndeclaredChannel { owner: String, channel: String },

    #[error("channel '{channel}' has more than one producer ('{first}', '{second}')")]
    MultipleProducers { channel: String, first: String, second: String },

    #[error("channel '{channel}' has more than one consumer ('{first}', '{second}')")]
    MultipleConsumers { channel: String, first: String, second: String },

    #[error("stage '{0}' reads and writes the same channel")]
    SelfLoop(String),

    #[error("cycle through stages {0:?}")]
    Cycle(Vec<String>),

    #[error("channel '{0}' is not attached to any stage")]
    Unattached(String),

    #[error("bridge '{bridge}': channel '{channel}' {reason}")]
    BridgeChannel { bridge: String, channel: String, reason: &'static str },

    #[error("policy stage '{0}' has no policy table")]
    MissingPolicy(String),

    #[error("custom stage '{0}' has no registered implementation")]
    UnregisteredStage(String),
}

impl From<TopologyError> for BridgeError {
    fn from(e: TopologyError) -> Self {
        BridgeError::Topology(e.to_string())
    }
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_payload_capacity() -> usize {
    DEFAULT_PAYLOAD_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default)]
    pub read_policy: ReadPolicy,
}

impl ChannelSpec {
    /// Single-slot, drop-and-count, polling channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depth: DEFAULT_DEPTH,
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            overflow: OverflowPolicy::default(),
            read_policy: ReadPolicy::default(),
        }
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn payload_capacity(mut self, capacity: usize) -> Self {
        self.payload_capacity = capacity;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    pub fn params(&self) -> ChannelParams {
        ChannelParams {
            depth: self.depth,
            payload_capacity: self.payload_capacity,
            overflow: self.overflow,
            read_policy: self.read_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Echo,
    ExtFrontend,
    ParserNorm,
    PolicyEmit,
    /// Implementation registered with `PipelineComposer::with_stage`
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub input: String,
    pub output: String,
    /// `ext_frontend` only; empty admits every protocol
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<ProtocolTag>,
    /// `policy_emit` only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyTable>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: StageKind, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            input: input.into(),
            output: output.into(),
            accept: Vec::new(),
            policy: None,
        }
    }

    pub fn accept(mut self, tags: impl IntoIterator<Item = ProtocolTag>) -> Self {
        self.accept = tags.into_iter().collect();
        self
    }

    pub fn policy(mut self, table: PolicyTable) -> Self {
        self.policy = Some(table);
        self
    }
}

/// A guest attachment point: the bridge writes `ingress` and reads `egress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSpec {
    pub name: String,
    pub ingress: String,
    pub egress: String,
}

impl BridgeSpec {
    pub fn new(name: impl Into<String>, ingress: impl Into<String>, egress: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ingress: ingress.into(),
            egress: egress.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpec {
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelSpec>,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageSpec>,
    #[serde(default, rename = "bridge")]
    pub bridges: Vec<BridgeSpec>,
}

/// Who holds one end of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Stage(usize),
    Bridge(usize),
}

/// Endpoints of one channel; `None` ends are handed to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelPlan {
    pub producer: Option<Attachment>,
    pub consumer: Option<Attachment>,
}

/// A validated topology. Channel indices follow `TopologySpec::channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub channels: Vec<ChannelPlan>,
    /// `(input, output)` channel index per stage
    pub stage_channels: Vec<(usize, usize)>,
    /// `(ingress, egress)` channel index per bridge
    pub bridge_channels: Vec<(usize, usize)>,
    /// Stage indices in dataflow order
    pub stage_order: Vec<usize>,
}

impl TopologyPlan {
    /// Channels whose producer end is not held by a stage or bridge.
    pub fn open_ingress(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels.iter().enumerate().filter(|(_, c)| c.producer.is_none()).map(|(i, _)| i)
    }

    /// Channels whose consumer end is not held by a stage or bridge.
    pub fn open_egress(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels.iter().enumerate().filter(|(_, c)| c.consumer.is_none()).map(|(i, _)| i)
    }
}

impl TopologySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_bridge(mut self, bridge: BridgeSpec) -> Self {
        self.bridges.push(bridge);
        self
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    fn attach_name(&self, attachment: Attachment) -> String {
        match attachment {
            Attachment::Stage(i) => format!("stage '{}'", self.stages[i].name),
            Attachment::Bridge(i) => format!("bridge '{}'", self.bridges[i].name),
        }
    }

    /// Check the whole topology and compute its wiring.
    pub fn validate(&self) -> Result<TopologyPlan, TopologyError> {
        if self.stages.is_empty() {
            return Err(TopologyError::NoStages);
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(TopologyError::TooManyChannels {
                declared: self.channels.len(),
                max: MAX_CHANNELS,
            });
        }
        check_unique("channel", self.channels.iter().map(|c| c.name.as_str()))?;
        check_unique("stage", self.stages.iter().map(|s| s.name.as_str()))?;
        check_unique("bridge", self.bridges.iter().map(|b| b.name.as_str()))?;

        for channel in &self.channels {
            channel.params().validate().map_err(|reason| TopologyError::InvalidChannel {
                channel: channel.name.clone(),
                reason,
            })?;
        }

        let index: HashMap<&str, usize> = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();
        let lookup = |owner: String, channel: &str| {
            index.get(channel).copied().ok_or_else(|| TopologyError::UndeclaredChannel {
                owner,
                channel: channel.to_owned(),
            })
        };

        let mut plan = vec![ChannelPlan::default(); self.channels.len()];
        let mut stage_channels = Vec::with_capacity(self.stages.len());
        let mut bridge_channels = Vec::with_capacity(self.bridges.len());

        for (i, stage) in self.stages.iter().enumerate() {
            if stage.input == stage.output {
                return Err(TopologyError::SelfLoop(stage.name.clone()));
            }
            if stage.kind == StageKind::PolicyEmit && stage.policy.is_none() {
                return Err(TopologyError::MissingPolicy(stage.name.clone()));
            }
            let input = lookup(format!("stage '{}'", stage.name), &stage.input)?;
            let output = lookup(format!("stage '{}'", stage.name), &stage.output)?;
            self.set_consumer(&mut plan, input, Attachment::Stage(i))?;
            self.set_producer(&mut plan, output, Attachment::Stage(i))?;
            stage_channels.push((input, output));
        }

        for (i, bridge) in self.bridges.iter().enumerate() {
            let ingress = lookup(format!("bridge '{}'", bridge.name), &bridge.ingress)?;
            let egress = lookup(format!("bridge '{}'", bridge.name), &bridge.egress)?;
            if !matches!(plan[ingress].consumer, Some(Attachment::Stage(_))) {
                return Err(TopologyError::BridgeChannel {
                    bridge: bridge.name.clone(),
                    channel: bridge.ingress.clone(),
                    reason: "is not read by any stage",
                });
            }
            if !matches!(plan[egress].producer, Some(Attachment::Stage(_))) {
                return Err(TopologyError::BridgeChannel {
                    bridge: bridge.name.clone(),
                    channel: bridge.egress.clone(),
                    reason: "is not written by any stage",
                });
            }
            self.set_producer(&mut plan, ingress, Attachment::Bridge(i))?;
            self.set_consumer(&mut plan, egress, Attachment::Bridge(i))?;
            bridge_channels.push((ingress, egress));
        }

        for (channel, ends) in self.channels.iter().zip(&plan) {
            if ends.producer.is_none() && ends.consumer.is_none() {
                return Err(TopologyError::Unattached(channel.name.clone()));
            }
        }

        let stage_order = self.stage_order(&plan)?;
        Ok(TopologyPlan {
            channels: plan,
            stage_channels,
            bridge_channels,
            stage_order,
        })
    }

    fn set_producer(&self, plan: &mut [ChannelPlan], channel: usize, who: Attachment) -> Result<(), TopologyError> {
        if let Some(existing) = plan[channel].producer {
            return Err(TopologyError::MultipleProducers {
                channel: self.channels[channel].name.clone(),
                first: self.attach_name(existing),
                second: self.attach_name(who),
            });
        }
        plan[channel].producer = Some(who);
        Ok(())
    }

    fn set_consumer(&self, plan: &mut [ChannelPlan], channel: usize, who: Attachment) -> Result<(), TopologyError> {
        if let Some(existing) = plan[channel].consumer {
            return Err(TopologyError::MultipleConsumers {
                channel: self.channels[channel].name.clone(),
                first: self.attach_name(existing),
                second: self.attach_name(who),
            });
        }
        plan[channel].consumer = Some(who);
        Ok(())
    }

    /// Topological order of stages (Kahn's algorithm). Stages left with a
    /// nonzero in-degree sit on a cycle.
    fn stage_order(&self, plan: &[ChannelPlan]) -> Result<Vec<usize>, TopologyError> {
        let n = self.stages.len();
        let mut in_degree = vec![0usize; n];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];

        for ends in plan {
            if let (Some(Attachment::Stage(from)), Some(Attachment::Stage(to))) = (ends.producer, ends.consumer) {
                adjacency[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(stage) = queue.pop_front() {
            order.push(stage);
            for &next in &adjacency[stage] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != n {
            let cyclic = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.stages[i].name.clone())
                .collect();
            return Err(TopologyError::Cycle(cyclic));
        }
        Ok(order)
    }
}

fn check_unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<(), TopologyError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(TopologyError::DuplicateName {
                kind,
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}
