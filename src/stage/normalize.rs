use super::protocol::{LinkFrame, ModbusRequest};
use super::{Action, Stage};
use crate::SPSC::{Message, ProtocolTag};

/// Parses each payload by its protocol tag and forwards the canonical
/// re-encoding. Anything that does not parse is dropped with the parser's
/// reason; nothing malformed reaches the policy stage.
#[derive(Debug, Clone)]
pub struct ParserNormStage {
    name: String,
}

impl ParserNormStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Canonical bytes for a payload, or the reason it was rejected.
    pub fn normalize(tag: ProtocolTag, payload: &[u8]) -> Result<Vec<u8>, String> {
        match tag {
            ProtocolTag::EchoTest => Ok(payload.to_vec()),
            ProtocolTag::ModbusTcp => ModbusRequest::parse(payload)
                .map(|request| request.encode())
                .map_err(|e| e.to_string()),
            ProtocolTag::Dnp3 => LinkFrame::parse(payload)
                .map(|frame| frame.encode())
                .map_err(|e| e.to_string()),
        }
    }
}

impl Stage for ParserNormStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, message: &Message) -> Action {
        match Self::normalize(message.protocol_tag(), message.payload()) {
            Ok(canonical) => Action::Forward(Message::with_timestamp(
                message.protocol_tag(),
                message.timestamp(),
                canonical,
            )),
            Err(reason) => Action::Drop(reason),
        }
    }
}
