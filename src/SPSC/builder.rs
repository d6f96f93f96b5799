use super::policy::{ChannelParams, OverflowPolicy, ReadPolicy};
use super::{Consumer, Producer};
use crate::error::Result;
use crate::Core::alloc::DataportAllocator;
use crate::Core::RegionBacking;

/// Builds a standalone channel in a region of its own.
///
/// Pipelines lay out all their channels in one region through the composer;
/// this builder is for a single hop (tests, a lone guest link).
#[derive(Debug, Clone, Default)]
pub struct ChannelBuilder {
    params: ChannelParams,
    backing: RegionBacking,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.params.depth = depth;
        self
    }

    pub fn with_payload_capacity(mut self, capacity: usize) -> Self {
        self.params.payload_capacity = capacity;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.params.overflow = policy;
        self
    }

    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.params.read_policy = policy;
        self
    }

    pub fn with_params(mut self, params: ChannelParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_backing(mut self, backing: RegionBacking) -> Self {
        self.backing = backing;
        self
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Allocate the region, create the channel and claim both endpoints.
    pub fn build(self) -> Result<(Producer, Consumer)> {
        let size = DataportAllocator::required_size(std::slice::from_ref(&self.params));
        let allocator = DataportAllocator::new(size, &self.backing)?;
        let channel_id = allocator.create_channel(&self.params)?;
        let producer = allocator.claim_producer(channel_id)?;
        let consumer = allocator.claim_consumer(channel_id)?;
        Ok((producer, consumer))
    }
}
