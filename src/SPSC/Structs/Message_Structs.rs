// The unit moved through a channel, and the closed set of payload protocols.

use crate::Core::clock::monotonic_ns;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies how a message payload is interpreted.
///
/// New protocols are added as new variants (and a matching parser stage),
/// never by widening a shared dispatcher.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolTag {
    EchoTest = 0x01,
    ModbusTcp = 0x02,
    Dnp3 = 0x03,
}

impl ProtocolTag {
    pub const ALL: [ProtocolTag; 3] = [ProtocolTag::EchoTest, ProtocolTag::ModbusTcp, ProtocolTag::Dnp3];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Wire byte used in guest frames.
    pub fn as_u8(self) -> u8 {
        self as u16 as u8
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x01 => Some(ProtocolTag::EchoTest),
            0x02 => Some(ProtocolTag::ModbusTcp),
            0x03 => Some(ProtocolTag::Dnp3),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolTag::EchoTest => "ECHO_TEST",
            ProtocolTag::ModbusTcp => "MODBUS_TCP",
            ProtocolTag::Dnp3 => "DNP3",
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ProtocolTag {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        ProtocolTag::from_u16(raw as u16).ok_or(raw)
    }
}

/// A message as seen by producers and consumers.
///
/// Fields are private: once built, a message is never mutated, and stages
/// that transform data construct a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    protocol_tag: ProtocolTag,
    timestamp: u64,
    payload: Vec<u8>,
}

impl Message {
    /// New message stamped with the current monotonic time.
    pub fn new(protocol_tag: ProtocolTag, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_timestamp(protocol_tag, monotonic_ns(), payload)
    }

    pub fn with_timestamp(protocol_tag: ProtocolTag, timestamp: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol_tag,
            timestamp,
            payload: payload.into(),
        }
    }

    /// Same tag and payload, new capture time.
    pub fn restamped(self, timestamp: u64) -> Self {
        Self { timestamp, ..self }
    }

    pub fn protocol_tag(&self) -> ProtocolTag {
        self.protocol_tag
    }

    /// Monotonic capture time in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
