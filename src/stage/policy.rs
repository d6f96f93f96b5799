//! Static allow/deny policy and the stage that enforces it.
//!
//! Rules are evaluated top to bottom; the first rule whose every present
//! field matches decides. No match falls through to the table's default,
//! which is `Deny` unless configured otherwise.

use super::protocol::{inspect, PolicySubject};
use super::{Action, Stage};
use crate::SPSC::{Message, ProtocolTag};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    #[default]
    Deny,
}

/// Inclusive range of data addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub end: u16,
}

impl AddressRange {
    /// True when every address of `[address, address + quantity)` is inside.
    pub fn covers(&self, address: u16, quantity: u16) -> bool {
        let last = address as u32 + quantity.max(1) as u32 - 1;
        address >= self.start && last <= self.end as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule label, logged as the drop reason on deny
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolTag>,
    /// Empty matches any function code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_codes: Vec<u8>,
    /// Modbus unit ids or DNP3 destinations; empty matches any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<AddressRange>,
    pub verdict: Verdict,
}

impl PolicyRule {
    pub fn allow(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            protocol: None,
            function_codes: Vec::new(),
            units: Vec::new(),
            addresses: None,
            verdict: Verdict::Allow,
        }
    }

    pub fn deny(label: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            ..Self::allow(label)
        }
    }

    pub fn protocol(mut self, protocol: ProtocolTag) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn function_codes(mut self, codes: impl IntoIterator<Item = u8>) -> Self {
        self.function_codes = codes.into_iter().collect();
        self
    }

    pub fn units(mut self, units: impl IntoIterator<Item = u16>) -> Self {
        self.units = units.into_iter().collect();
        self
    }

    pub fn addresses(mut self, start: u16, end: u16) -> Self {
        self.addresses = Some(AddressRange { start, end });
        self
    }

    pub fn matches(&self, subject: &PolicySubject) -> bool {
        if self.protocol.is_some_and(|p| p != subject.protocol) {
            return false;
        }
        if !self.function_codes.is_empty()
            && !subject.function_code.is_some_and(|fc| self.function_codes.contains(&fc))
        {
            return false;
        }
        if !self.units.is_empty() && !subject.unit.is_some_and(|u| self.units.contains(&u)) {
            return false;
        }
        if let Some(range) = &self.addresses {
            // Every block the request touches must lie inside the range
            if subject.spans.is_empty()
                || !subject.spans.iter().all(|&(start, quantity)| range.covers(start, quantity))
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub default_verdict: Verdict,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl PolicyTable {
    /// A deny-all table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_default(mut self, verdict: Verdict) -> Self {
        self.default_verdict = verdict;
        self
    }

    /// First matching rule's verdict and label, or the default with no label.
    pub fn evaluate(&self, subject: &PolicySubject) -> (Verdict, Option<&str>) {
        self.rules
            .iter()
            .find(|rule| rule.matches(subject))
            .map(|rule| (rule.verdict, Some(rule.label.as_str())))
            .unwrap_or((self.default_verdict, None))
    }

    /// SHA-256 over a canonical byte encoding of the table.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([self.default_verdict as u8]);
        hasher.update((self.rules.len() as u32).to_be_bytes());
        for rule in &self.rules {
            hasher.update((rule.label.len() as u32).to_be_bytes());
            hasher.update(rule.label.as_bytes());
            hasher.update(rule.protocol.map_or(0, |p| p.as_u16()).to_be_bytes());
            hasher.update((rule.function_codes.len() as u32).to_be_bytes());
            hasher.update(&rule.function_codes);
            hasher.update((rule.units.len() as u32).to_be_bytes());
            for unit in &rule.units {
                hasher.update(unit.to_be_bytes());
            }
            match rule.addresses {
                Some(range) => {
                    hasher.update([1]);
                    hasher.update(range.start.to_be_bytes());
                    hasher.update(range.end.to_be_bytes());
                }
                None => hasher.update([0]),
            }
            hasher.update([rule.verdict as u8]);
        }
        hasher.finalize().into()
    }

    pub fn digest_hex(&self) -> String {
        self.digest().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Enforces a `PolicyTable`. `on_message` reads nothing but the message and
/// the table, so identical input always yields an identical action.
#[derive(Debug, Clone)]
pub struct PolicyEmitStage {
    name: String,
    table: PolicyTable,
}

impl PolicyEmitStage {
    pub fn new(name: impl Into<String>, table: PolicyTable) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }
}

impl Stage for PolicyEmitStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) {
        tracing::info!(
            stage = %self.name,
            rules = self.table.rules.len(),
            default = ?self.table.default_verdict,
            digest = %self.table.digest_hex(),
            "policy table loaded"
        );
    }

    fn on_message(&mut self, message: &Message) -> Action {
        let subject = inspect(message);
        match self.table.evaluate(&subject) {
            (Verdict::Allow, _) => Action::Forward(message.clone()),
            (Verdict::Deny, Some(label)) => Action::Drop(format!("denied by rule '{label}'")),
            (Verdict::Deny, None) => Action::drop("denied by default policy"),
        }
    }
}
