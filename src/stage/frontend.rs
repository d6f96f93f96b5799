use super::{Action, Stage};
use crate::SPSC::{Message, ProtocolTag};

/// First stage behind the network bridge: admits only the protocols this
/// deployment speaks and nothing empty.
#[derive(Debug, Clone)]
pub struct ExtFrontendStage {
    name: String,
    accept: Vec<ProtocolTag>,
}

impl ExtFrontendStage {
    /// An empty accept list admits every known protocol.
    pub fn new(name: impl Into<String>, accept: Vec<ProtocolTag>) -> Self {
        let accept = if accept.is_empty() {
            ProtocolTag::ALL.to_vec()
        } else {
            accept
        };
        Self {
            name: name.into(),
            accept,
        }
    }

    pub fn accepts(&self, tag: ProtocolTag) -> bool {
        self.accept.contains(&tag)
    }
}

impl Stage for ExtFrontendStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, message: &Message) -> Action {
        if !self.accepts(message.protocol_tag()) {
            return Action::Drop(format!("protocol {} not accepted", message.protocol_tag()));
        }
        if message.is_empty() {
            return Action::drop("empty payload");
        }
        Action::Forward(message.clone())
    }
}
