use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Battle identifier. One per battle lifecycle, stable across hibernation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BattleId(pub Uuid);

/// Gladiator identifier. Roster-stable for the duration of a battle and used
/// as the deterministic iteration key for every resolution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

/// Bet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BetId(pub Uuid);

/// Sponsorship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SponsorshipId(pub Uuid);

/// Spectator stream session identifier. Never persisted; subscribers
/// re-establish sessions on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub Uuid);

/// Memory-layer identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReflectionId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

macro_rules! id_impls {
    ($($ty:ident),+) => {
        $(
            impl $ty {
                /// Create a fresh random identifier.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// Create an identifier from a specific value (for when you
                /// need explicit control, e.g. deterministic tests).
                pub fn from_raw(raw: Uuid) -> Self {
                    Self(raw)
                }

                /// Create an identifier from a u128 (test convenience).
                pub fn from_u128(raw: u128) -> Self {
                    Self(Uuid::from_u128(raw))
                }
            }

            impl Default for $ty {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

id_impls!(
    BattleId,
    AgentId,
    BetId,
    SponsorshipId,
    SubscriberId,
    ObservationId,
    ReflectionId,
    PlanId
);
