use super::{Action, Stage};
use crate::SPSC::Message;

/// Forwards every message unchanged. The loopback stage of the echo topology.
#[derive(Debug, Clone)]
pub struct EchoStage {
    name: String,
}

impl EchoStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Stage for EchoStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, message: &Message) -> Action {
        Action::Forward(message.clone())
    }
}
