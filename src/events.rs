//! Typed battle events.
//!
//! Two layers:
//! - `SubEvent`: the rich, append-only record the resolution pipeline emits
//!   and the store persists per epoch (moves, bleed and siphon included).
//! - `BattleEvent`: the spectator wire envelope, a strict subset derived
//!   from the sub-events. Serialized as `{ "type": ..., "data": ... }`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentClass};
use crate::decision::{Prediction, Stance};
use crate::hex::Axial;
use crate::ids::AgentId;
use crate::market::{Asset, MarketSnapshot};
use crate::rules::combat::CombatOutcome;
use crate::skills::SkillKind;

/// How a gladiator died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeathCause {
    Prediction,
    Combat,
    Bleed,
    /// The fatal crossing happened during bleed but combat damage also
    /// landed this epoch; no single killer is guessed.
    Multi,
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochStartData {
    pub epoch_number: u32,
    pub market_data: MarketSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackView {
    pub target: String,
    pub stake: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub prediction: Prediction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<AttackView>,
    pub defend: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveData {
    pub agent_id: AgentId,
    pub from: Axial,
    pub to: Axial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorBoostData {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub sponsor: String,
    pub hp_before: i32,
    pub hp_after: i32,
    /// HP actually restored after the max-HP cap.
    pub boost: i32,
    pub attack_boost: f64,
    pub free_defend: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillActivationData {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub skill: SkillKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionOutcome {
    pub agent_id: AgentId,
    pub asset: Asset,
    pub direction: crate::decision::Direction,
    pub actual_change: f64,
    pub correct: bool,
    pub hp_change: i32,
    pub hp_after: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatResultData {
    pub attacker_id: AgentId,
    pub target_id: AgentId,
    pub stance: Stance,
    pub outcome: CombatOutcome,
    pub stake: i32,
    pub hp_change_attacker: i32,
    pub hp_change_target: i32,
    pub damage: i32,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefendCostData {
    pub agent_id: AgentId,
    pub cost: i32,
    pub hp_after: i32,
    pub waived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiphonData {
    pub agent_id: AgentId,
    pub target_id: AgentId,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleedData {
    pub agent_id: AgentId,
    pub amount: i32,
    pub hp_after: i32,
    pub waived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeathData {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub agent_class: AgentClass,
    pub epoch_number: u32,
    pub cause: DeathCause,
    pub final_words: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateView {
    pub id: AgentId,
    pub name: String,
    pub class: AgentClass,
    pub hp: i32,
    pub is_alive: bool,
}

impl AgentStateView {
    pub fn of(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
            class: agent.class,
            hp: agent.hp,
            is_alive: agent.alive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochEndData {
    pub agent_states: Vec<AgentStateView>,
    pub battle_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleEndData {
    pub winner_id: AgentId,
    pub winner_name: String,
    pub total_epochs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsData {
    pub odds: BTreeMap<AgentId, f64>,
}

// ============================================================================
// Sub-events (persisted epoch record)
// ============================================================================

/// One entry in an epoch's ordered, append-only sub-event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubEvent {
    Action(ActionData),
    Move(MoveData),
    SponsorBoost(SponsorBoostData),
    SkillActivation(SkillActivationData),
    PredictionResult(PredictionOutcome),
    CombatResult(CombatResultData),
    DefendCost(DefendCostData),
    Siphon(SiphonData),
    Bleed(BleedData),
    Death(DeathData),
}

/// A sealed epoch: number, market sample and everything that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub epoch: u32,
    pub market: MarketSnapshot,
    pub sub_events: Vec<SubEvent>,
}

// ============================================================================
// Wire events
// ============================================================================

/// The spectator stream envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BattleEvent {
    EpochStart(EpochStartData),
    AgentAction(ActionData),
    SponsorBoost(SponsorBoostData),
    SkillActivation(SkillActivationData),
    PredictionResult(PredictionOutcome),
    CombatResult(CombatResultData),
    DefendCost(DefendCostData),
    AgentDeath(DeathData),
    EpochEnd(EpochEndData),
    BattleEnd(BattleEndData),
    OddsUpdate(OddsData),
}

impl BattleEvent {
    /// Position of this event type inside an epoch's emission order.
    fn rank(&self) -> u8 {
        match self {
            BattleEvent::EpochStart(_) => 0,
            BattleEvent::AgentAction(_) => 1,
            BattleEvent::SponsorBoost(_) => 2,
            BattleEvent::SkillActivation(_) => 3,
            BattleEvent::PredictionResult(_) => 4,
            BattleEvent::CombatResult(_) => 5,
            BattleEvent::DefendCost(_) => 6,
            BattleEvent::AgentDeath(_) => 7,
            BattleEvent::EpochEnd(_) => 8,
            BattleEvent::BattleEnd(_) => 9,
            BattleEvent::OddsUpdate(_) => 10,
        }
    }
}

/// Derive the wire sequence for one sealed epoch. Moves, siphons and bleeds
/// stay record-only; everything else maps one-to-one, framed by
/// `epoch_start` / `epoch_end` and a trailing `battle_end` when the battle
/// just completed.
pub fn wire_events(
    record: &EpochRecord,
    roster: &[Agent],
    complete: bool,
    winner: Option<&Agent>,
) -> Vec<BattleEvent> {
    let mut out = Vec::with_capacity(record.sub_events.len() + 3);
    out.push(BattleEvent::EpochStart(EpochStartData {
        epoch_number: record.epoch,
        market_data: record.market,
    }));
    for sub in &record.sub_events {
        match sub {
            SubEvent::Action(data) => out.push(BattleEvent::AgentAction(data.clone())),
            SubEvent::SponsorBoost(data) => out.push(BattleEvent::SponsorBoost(data.clone())),
            SubEvent::SkillActivation(data) => {
                out.push(BattleEvent::SkillActivation(data.clone()))
            }
            SubEvent::PredictionResult(data) => {
                out.push(BattleEvent::PredictionResult(data.clone()))
            }
            SubEvent::CombatResult(data) => out.push(BattleEvent::CombatResult(data.clone())),
            SubEvent::DefendCost(data) => out.push(BattleEvent::DefendCost(data.clone())),
            SubEvent::Death(data) => out.push(BattleEvent::AgentDeath(data.clone())),
            SubEvent::Move(_) | SubEvent::Siphon(_) | SubEvent::Bleed(_) => {}
        }
    }
    out.push(BattleEvent::EpochEnd(EpochEndData {
        agent_states: roster.iter().map(AgentStateView::of).collect(),
        battle_complete: complete,
    }));
    if complete && let Some(winner) = winner {
        out.push(BattleEvent::BattleEnd(BattleEndData {
            winner_id: winner.id,
            winner_name: winner.name.clone(),
            total_epochs: record.epoch,
        }));
    }
    out
}

/// Check a full battle stream against the per-epoch emission grammar.
///
/// `odds_update` is asynchronous and may appear anywhere; `battle_end` must
/// follow a completing `epoch_end` and terminate the stream.
pub fn stream_satisfies_grammar(events: &[BattleEvent]) -> bool {
    let mut in_epoch = false;
    let mut last_rank = 0u8;
    let mut ended = false;
    let mut may_end_battle = false;

    for event in events {
        if matches!(event, BattleEvent::OddsUpdate(_)) {
            continue;
        }
        if ended {
            return false;
        }
        match event {
            BattleEvent::EpochStart(_) => {
                if in_epoch {
                    return false;
                }
                in_epoch = true;
                last_rank = 0;
            }
            BattleEvent::EpochEnd(data) => {
                if !in_epoch {
                    return false;
                }
                in_epoch = false;
                may_end_battle = data.battle_complete;
            }
            BattleEvent::BattleEnd(_) => {
                if in_epoch || !may_end_battle {
                    return false;
                }
                ended = true;
            }
            other => {
                if !in_epoch || other.rank() < last_rank {
                    return false;
                }
                last_rank = other.rank();
            }
        }
    }
    !in_epoch
}
