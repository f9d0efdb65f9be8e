//! Error taxonomy shared by the channel and both sessions.
//!
//! No error here is fatal to a session. Each one leaves the session that
//! raised it in a valid, continuable state; [`SlotError::scope`] says who
//! should hear about it.

use thiserror::Error;

use crate::amount::Amount;
use crate::envelope::HandoffToken;

pub type Result<T, E = SlotError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// Non-positive wager, or one the loaded item does not offer.
    #[error("invalid wager: {reason}")]
    InvalidWager { reason: String },

    /// A wager or selection exceeds the local balance mirror.
    #[error("insufficient balance: {required} required, {available} available")]
    InsufficientBalance { required: Amount, available: Amount },

    /// A spin or wager change arrived while a spin is in flight.
    #[error("session busy: a spin is already in progress")]
    SessionBusy,

    /// A peer-sent delta would take the catalog balance below zero.
    #[error("insufficient funds: applying {delta} to {balance} would go negative")]
    InsufficientFunds { balance: Amount, delta: Amount },

    /// Inbound frame from an origin other than the configured peer.
    #[error("unauthenticated peer: expected origin {expected:?}, got {actual:?}")]
    PeerUnauthenticated { expected: String, actual: String },

    #[error("catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    /// Inbound frame that failed to decode or failed structural validation.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("unknown item {id}")]
    UnknownItem { id: i64 },

    /// Reselection refused until the player reports back.
    #[error("handoff outstanding: waiting for the player to report a balance")]
    HandoffOutstanding,

    /// A delta tagged with a handoff that a newer selection superseded.
    #[error("stale handoff {token}: a newer selection superseded it")]
    StaleHandoff { token: HandoffToken },
}

/// Who a [`SlotError`] concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Caused by local user input; re-prompt the user.
    Local,
    /// The peer broke the protocol; the offending update is discarded.
    Protocol,
    /// Dropped without telling the user; internal logs only.
    Silent,
    /// A collaborator outside the core failed.
    External,
}

impl SlotError {
    pub fn invalid_wager(reason: impl Into<String>) -> Self {
        Self::InvalidWager {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::InvalidWager { .. }
            | Self::InsufficientBalance { .. }
            | Self::SessionBusy
            | Self::UnknownItem { .. }
            | Self::HandoffOutstanding => ErrorScope::Local,
            Self::InsufficientFunds { .. }
            | Self::MalformedEnvelope { .. }
            | Self::StaleHandoff { .. } => ErrorScope::Protocol,
            Self::PeerUnauthenticated { .. } => ErrorScope::Silent,
            Self::CatalogUnavailable { .. } => ErrorScope::External,
        }
    }

    /// Whether the condition is shown to session subscribers at all.
    pub fn is_surfaced(&self) -> bool {
        self.scope() != ErrorScope::Silent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_peers_are_never_surfaced() {
        let err = SlotError::PeerUnauthenticated {
            expected: "https://casino.test".into(),
            actual: "https://evil.test".into(),
        };
        assert_eq!(err.scope(), ErrorScope::Silent);
        assert!(!err.is_surfaced());
    }

    #[test]
    fn rejected_deltas_are_protocol_errors() {
        let err = SlotError::InsufficientFunds {
            balance: Amount::from_units(3),
            delta: Amount::from_units(-5),
        };
        assert_eq!(err.scope(), ErrorScope::Protocol);
        assert!(err.is_surfaced());
        assert_eq!(
            err.to_string(),
            "insufficient funds: applying -5.00 to 3.00 would go negative"
        );
    }
}
