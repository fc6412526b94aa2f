//! Sponsorships: spectators buying epoch-scoped boosts for a gladiator.
//!
//! Tiers map deterministically to an effect triple. At most one sponsorship
//! is honoured per agent per epoch — first accepted by `placed_at` — and
//! later ones that epoch are recorded but never applied.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, BattleId, SponsorshipId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SponsorTier {
    T1,
    T2,
    T3,
    T4,
    T5,
}

/// The effect triple a tier buys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorEffect {
    pub hp_boost: i32,
    /// Additive on the beneficiary's ATTACK modifier for the epoch.
    pub attack_boost: f64,
    /// Waives the epoch's defend cost.
    pub free_defend: bool,
}

impl SponsorTier {
    pub fn effect(self) -> SponsorEffect {
        match self {
            SponsorTier::T1 => SponsorEffect {
                hp_boost: 25,
                attack_boost: 0.0,
                free_defend: false,
            },
            SponsorTier::T2 => SponsorEffect {
                hp_boost: 50,
                attack_boost: 0.05,
                free_defend: false,
            },
            SponsorTier::T3 => SponsorEffect {
                hp_boost: 100,
                attack_boost: 0.10,
                free_defend: false,
            },
            SponsorTier::T4 => SponsorEffect {
                hp_boost: 150,
                attack_boost: 0.15,
                free_defend: true,
            },
            SponsorTier::T5 => SponsorEffect {
                hp_boost: 250,
                attack_boost: 0.25,
                free_defend: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sponsorship {
    pub id: SponsorshipId,
    pub battle_id: BattleId,
    pub agent_id: AgentId,
    pub sponsor: String,
    pub amount: f64,
    pub tier: SponsorTier,
    /// Epoch the effect lands on.
    pub epoch: Option<u32>,
    /// Whether this entry is the one honoured for its (agent, epoch) slot.
    pub accepted: bool,
    pub message: Option<String>,
    pub placed_at: u64,
}

/// A sponsorship honoured for the coming epoch, ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSponsorship {
    pub agent_id: AgentId,
    pub sponsor: String,
    pub effect: SponsorEffect,
}

/// Append-only sponsorship book for one battle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SponsorshipBook {
    entries: Vec<Sponsorship>,
}

impl SponsorshipBook {
    pub fn entries(&self) -> &[Sponsorship] {
        &self.entries
    }

    /// Record a sponsorship aimed at `epoch`. Acceptance is decided here:
    /// the slot for (agent, epoch) goes to the earliest `placed_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        battle_id: BattleId,
        agent_id: AgentId,
        sponsor: impl Into<String>,
        amount: f64,
        tier: SponsorTier,
        epoch: u32,
        message: Option<String>,
        placed_at: u64,
    ) -> SponsorshipId {
        let slot_taken = self
            .entries
            .iter()
            .any(|s| s.agent_id == agent_id && s.epoch == Some(epoch) && s.accepted);
        let entry = Sponsorship {
            id: SponsorshipId::new(),
            battle_id,
            agent_id,
            sponsor: sponsor.into(),
            amount,
            tier,
            epoch: Some(epoch),
            accepted: !slot_taken,
            message,
            placed_at,
        };
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    /// Accepted effects for one epoch, in placement order.
    pub fn effects_for_epoch(&self, epoch: u32) -> Vec<EpochSponsorship> {
        let mut accepted: Vec<&Sponsorship> = self
            .entries
            .iter()
            .filter(|s| s.accepted && s.epoch == Some(epoch))
            .collect();
        accepted.sort_by_key(|s| s.placed_at);
        accepted
            .into_iter()
            .map(|s| EpochSponsorship {
                agent_id: s.agent_id,
                sponsor: s.sponsor.clone(),
                effect: s.tier.effect(),
            })
            .collect()
    }
}
