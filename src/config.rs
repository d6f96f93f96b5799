//! Pipeline configuration.
//!
//! A configuration file holds the runtime settings and the static topology:
//!
//! ```toml
//! [runtime]
//! poll_interval_ms = 10
//! processing_deadline_ms = 250
//! max_payload_size = 4096
//!
//! [[topology.channel]]
//! name = "guest_in"
//! depth = 4
//! overflow = "block"
//!
//! [[topology.stage]]
//! name = "echo"
//! kind = "echo"
//! input = "guest_in"
//! output = "guest_out"
//!
//! [[topology.bridge]]
//! name = "guest"
//! ingress = "guest_in"
//! egress = "guest_out"
//! ```
//!
//! The topology is read once at startup; nothing here is consulted again
//! after the composer has built the pipeline.

use crate::error::{BridgeError, Result};
use crate::pipeline::topology::{BridgeSpec, ChannelSpec, StageKind, StageSpec, TopologySpec};
use crate::stage::PolicyTable;
use crate::Core::RegionBacking;
use crate::SPSC::{OverflowPolicy, ProtocolTag, ReadPolicy, DEFAULT_PAYLOAD_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default stage poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default liveness deadline for one `on_message` call in milliseconds
pub const DEFAULT_PROCESSING_DEADLINE_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Upper bound on how long a stage waits on its input before re-checking
    /// the shutdown flag
    pub poll_interval_ms: u64,
    /// A stage in PROCESSING longer than this is a liveness fault; `None`
    /// disables the watchdog
    pub processing_deadline_ms: Option<u64>,
    /// Largest payload a guest frame may declare
    pub max_payload_size: usize,
    /// Backing of the region holding all channels
    pub region: RegionBacking,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            processing_deadline_ms: Some(DEFAULT_PROCESSING_DEADLINE_MS),
            max_payload_size: DEFAULT_PAYLOAD_CAPACITY,
            region: RegionBacking::Anonymous,
        }
    }
}

impl RuntimeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn processing_deadline(&self) -> Option<Duration> {
        self.processing_deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(BridgeError::Config("max_payload_size must be nonzero".into()));
        }
        if self.processing_deadline_ms == Some(0) {
            return Err(BridgeError::Config("processing_deadline_ms must be nonzero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub topology: TopologySpec,
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), stages = config.topology.stages.len(), "pipeline configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.runtime.validate()?;
        config.topology.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// A guest bridge looped back through one echo stage.
    pub fn echo_loopback() -> Self {
        let topology = TopologySpec::new()
            .with_channel(ChannelSpec::new("guest_in").depth(4).read_policy(ReadPolicy::Block))
            .with_channel(
                ChannelSpec::new("guest_out")
                    .depth(4)
                    .overflow(OverflowPolicy::Block)
                    .read_policy(ReadPolicy::Block),
            )
            .with_stage(StageSpec::new("echo", StageKind::Echo, "guest_in", "guest_out"))
            .with_bridge(BridgeSpec::new("guest", "guest_in", "guest_out"));
        Self {
            runtime: RuntimeSettings::default(),
            topology,
        }
    }

    /// The ICS gateway chain:
    /// `nic → ExtFrontend → ParserNorm → PolicyEmit → internal nic`.
    pub fn ics_gateway(policy: PolicyTable) -> Self {
        let hop = |name: &str| {
            ChannelSpec::new(name)
                .depth(8)
                .payload_capacity(512)
                .overflow(OverflowPolicy::Block)
                .read_policy(ReadPolicy::Block)
        };
        let topology = TopologySpec::new()
            .with_channel(hop("nic_rx"))
            .with_channel(hop("frontend_out"))
            .with_channel(hop("parsed"))
            .with_channel(hop("nic_tx"))
            .with_stage(
                StageSpec::new("ext_frontend", StageKind::ExtFrontend, "nic_rx", "frontend_out")
                    .accept([ProtocolTag::ModbusTcp, ProtocolTag::Dnp3]),
            )
            .with_stage(StageSpec::new("parser_norm", StageKind::ParserNorm, "frontend_out", "parsed"))
            .with_stage(StageSpec::new("policy_emit", StageKind::PolicyEmit, "parsed", "nic_tx").policy(policy))
            .with_bridge(BridgeSpec::new("network", "nic_rx", "nic_tx"));
        Self {
            runtime: RuntimeSettings {
                max_payload_size: 512,
                ..RuntimeSettings::default()
            },
            topology,
        }
    }
}
