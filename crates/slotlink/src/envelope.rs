//! Typed envelopes crossing the channel.
//!
//! Wire shape:
//!
//! ```text
//! { "type": "SELECT_ITEM",   "data": { "id", "name", "wagerOptions", "balanceAtHandoff", "handoff"? } }
//! { "type": "BALANCE_DELTA", "data": { "delta", "resultingBalance"?, "handoff"? } }
//! ```
//!
//! Decoding is a tagged-union parse followed by structural validation;
//! anything that fails either step is a [`SlotError::MalformedEnvelope`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::{Result, SlotError};

/// Identifies one balance handoff from the catalog to the player.
///
/// The catalog mints a fresh token per selection and the player echoes it on
/// every delta it reports for that selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandoffToken(Uuid);

impl HandoffToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for HandoffToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandoffToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Item metadata plus the balance the catalog hands over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSelection {
    pub id: i64,
    pub name: String,
    pub wager_options: Vec<Amount>,
    pub balance_at_handoff: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffToken>,
}

/// Result of one settled round, reported by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDelta {
    pub delta: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffToken>,
}

impl BalanceDelta {
    /// A bare delta with no absolute balance and no handoff tag.
    pub fn relative(delta: Amount) -> Self {
        Self {
            delta,
            resulting_balance: None,
            handoff: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    SelectItem(ItemSelection),
    BalanceDelta(BalanceDelta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    SelectItem,
    BalanceDelta,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 2] = [EnvelopeKind::SelectItem, EnvelopeKind::BalanceDelta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectItem => "SELECT_ITEM",
            Self::BalanceDelta => "BALANCE_DELTA",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::SelectItem(_) => EnvelopeKind::SelectItem,
            Self::BalanceDelta(_) => EnvelopeKind::BalanceDelta,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SlotError::malformed(e.to_string()))
    }

    /// Parses and structurally validates an inbound body.
    pub fn decode(raw: &str) -> Result<Envelope> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| SlotError::malformed(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Checks the invariants serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SelectItem(selection) => {
                if selection.wager_options.is_empty() {
                    return Err(SlotError::malformed("selection carries no wager options"));
                }
                if let Some(bad) = selection.wager_options.iter().find(|a| !a.is_positive()) {
                    return Err(SlotError::malformed(format!(
                        "wager option {bad} is not positive"
                    )));
                }
                if selection.balance_at_handoff.is_negative() {
                    return Err(SlotError::malformed(format!(
                        "negative handoff balance {}",
                        selection.balance_at_handoff
                    )));
                }
            }
            Self::BalanceDelta(delta) => {
                if let Some(balance) = delta.resulting_balance {
                    if balance.is_negative() {
                        return Err(SlotError::malformed(format!(
                            "negative resulting balance {balance}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
