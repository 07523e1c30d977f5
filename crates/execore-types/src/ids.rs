//! Identifiers used throughout the execution core.
//!
//! Every ID that appears in consensus state is **deterministic**: it is
//! derived from SHA-256 over replay-stable inputs, never from wall-clock
//! time or process-local randomness. Two nodes replaying the same command
//! stream must mint the exact same IDs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn sha_uuid(domain: &[u8], parts: &[&[u8]]) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for p in parts {
        hasher.update(p);
    }
    let hash = hasher.finalize();
    let bytes: [u8; 16] = hash[..16].try_into().expect("SHA-256 produces 32 bytes");
    Uuid::from_bytes(bytes)
}

// ---------------------------------------------------------------------------
// MarketId
// ---------------------------------------------------------------------------

/// Unique identifier for a market. Derived from the market configuration
/// bytes and a governance sequence number so every node computes the same
/// ID for the same market proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketId(pub Uuid);

impl MarketId {
    #[must_use]
    pub fn from_config_bytes(config: &[u8], seq: u64) -> Self {
        Self(sha_uuid(
            b"execore:market_id:v1:",
            &[config, &seq.to_le_bytes()],
        ))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mkt:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PartyId
// ---------------------------------------------------------------------------

/// Unique identifier for a party (trader / liquidity provider).
///
/// Parties arrive from outside the core as opaque account keys, so this is
/// a string newtype rather than a UUID. The reserved `network` party is the
/// counterparty of distressed close-out trades and can never submit orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PartyId(pub String);

impl PartyId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved network party used to net off distressed positions.
    #[must_use]
    pub fn network() -> Self {
        Self("network".to_string())
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        self.0 == "network"
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Unique order identifier, minted by the per-command [`deterministic`]
/// constructor from the command seed and a sequence counter.
///
/// [`deterministic`]: OrderId::deterministic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Deterministic `OrderId` from a command seed and sequence number.
    ///
    /// Every node generates the **exact same** ID for the same command —
    /// critical for cross-node replay determinism.
    #[must_use]
    pub fn deterministic(seed: &[u8; 32], sequence: u64) -> Self {
        Self(sha_uuid(
            b"execore:order_id:v1:",
            &[seed, &sequence.to_le_bytes()],
        ))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TradeId
// ---------------------------------------------------------------------------

/// Unique trade identifier, derived from the aggressive order and the fill
/// index within its confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl TradeId {
    #[must_use]
    pub fn deterministic(aggressor: OrderId, fill_index: u64) -> Self {
        Self(sha_uuid(
            b"execore:trade_id:v1:",
            &[aggressor.0.as_bytes(), &fill_index.to_le_bytes()],
        ))
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
