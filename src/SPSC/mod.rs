mod builder;
mod consumer;
mod policy;
mod producer;

pub use builder::ChannelBuilder;
pub use consumer::Consumer;
pub use policy::{
    ChannelParams, OverflowPolicy, ReadPolicy, DEFAULT_DEPTH, DEFAULT_PAYLOAD_CAPACITY, MAX_DEPTH,
    MAX_PAYLOAD_CAPACITY,
};
pub use producer::Producer;
pub use Structs::{Message, ProtocolTag};

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{SlotHeader, SpscRing, SLOT_ALIGN}; // re-export for stable path
}

pub mod Structs {
    pub mod Message_Structs;
    pub use Message_Structs::{Message, ProtocolTag}; // re-export for stable path
}
