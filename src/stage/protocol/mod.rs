//! Protocol codecs behind `ParserNorm` and `PolicyEmit`.
//!
//! One module per `ProtocolTag`; a new protocol gets a new module and a new
//! arm in `inspect`, nothing else changes.

pub mod dnp3;
pub mod modbus;

use crate::SPSC::{Message, ProtocolTag};
pub use dnp3::{Dnp3Error, LinkFrame};
pub use modbus::{ModbusError, ModbusRequest};

/// Fields of a message that policy rules can match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySubject {
    pub protocol: ProtocolTag,
    /// Modbus function code, or DNP3 application function code
    pub function_code: Option<u8>,
    /// Modbus unit id, or DNP3 destination address
    pub unit: Option<u16>,
    /// Every `(start, quantity)` block of data addresses the message touches
    pub spans: Vec<(u16, u16)>,
}

impl PolicySubject {
    fn bare(protocol: ProtocolTag) -> Self {
        Self {
            protocol,
            function_code: None,
            unit: None,
            spans: Vec::new(),
        }
    }
}

/// Extract the policy-relevant fields. A payload that does not parse yields
/// only its protocol, which no field-matching rule will admit.
pub fn inspect(message: &Message) -> PolicySubject {
    let protocol = message.protocol_tag();
    match protocol {
        ProtocolTag::EchoTest => PolicySubject::bare(protocol),
        ProtocolTag::ModbusTcp => match ModbusRequest::parse(message.payload()) {
            Ok(request) => PolicySubject {
                protocol,
                function_code: Some(request.function_code),
                unit: Some(request.unit_id as u16),
                spans: request.spans(),
            },
            Err(_) => PolicySubject::bare(protocol),
        },
        ProtocolTag::Dnp3 => match LinkFrame::parse(message.payload()) {
            Ok(frame) => PolicySubject {
                protocol,
                function_code: frame.function_code(),
                unit: Some(frame.destination),
                spans: Vec::new(),
            },
            Err(_) => PolicySubject::bare(protocol),
        },
    }
}
