//! The decision contract between the coordinator and agent strategies.
//!
//! This module provides:
//! - `Decision`, the validated structure every strategy must produce
//! - `RawDecision`, the forgiving shape model output is first parsed into
//! - `DecisionRequest`, the full per-epoch context handed to a strategy
//! - The phase-aware fallback decision used when a strategy fails
//! - Builders for the spatial / skill / alliance context strings

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentSnapshot};
use crate::hex::{Axial, HexGrid, PhaseSchedule};
use crate::market::{Asset, MarketSnapshot};
use crate::skills;

/// Prediction stake bounds, percent of current HP.
pub const MIN_STAKE_PERCENT: u32 = 5;
pub const MAX_STAKE_PERCENT: u32 = 50;

/// Combat stance for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stance {
    Attack,
    Sabotage,
    Defend,
    #[default]
    None,
}

impl Stance {
    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Attack => "ATTACK",
            Stance::Sabotage => "SABOTAGE",
            Stance::Defend => "DEFEND",
            Stance::None => "NONE",
        }
    }

    pub fn parse_loose(raw: &str) -> Option<Stance> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ATTACK" => Some(Stance::Attack),
            "SABOTAGE" => Some(Stance::Sabotage),
            "DEFEND" => Some(Stance::Defend),
            "NONE" | "" => Some(Stance::None),
            _ => None,
        }
    }

    /// ATTACK and SABOTAGE require a target and a stake.
    pub fn is_aggressive(self) -> bool {
        matches!(self, Stance::Attack | Stance::Sabotage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn parse_loose(raw: &str) -> Option<Direction> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UP" | "LONG" | "BULL" => Some(Direction::Up),
            "DOWN" | "SHORT" | "BEAR" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// The mandatory market prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub asset: Asset,
    pub direction: Direction,
    /// Percent of current HP staked, within `[5, 50]`.
    #[serde(rename = "stake")]
    pub stake_percent: u32,
}

impl Prediction {
    pub fn minimum() -> Self {
        Self {
            asset: Asset::Eth,
            direction: Direction::Up,
            stake_percent: MIN_STAKE_PERCENT,
        }
    }
}

/// A fully-typed decision. Everything downstream of the secretary consumes
/// this shape; §4.2's optional fields are `Option`s here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub prediction: Prediction,
    #[serde(default)]
    pub combat_stance: Stance,
    /// Target display name for ATTACK / SABOTAGE.
    #[serde(default)]
    pub combat_target: Option<String>,
    /// Absolute HP stake for ATTACK / SABOTAGE.
    #[serde(default)]
    pub combat_stake: Option<i32>,
    #[serde(rename = "move", default)]
    pub movement: Option<Axial>,
    #[serde(default)]
    pub use_skill: bool,
    #[serde(default)]
    pub skill_target: Option<String>,
    #[serde(default)]
    pub propose_alliance: Option<String>,
    #[serde(default)]
    pub break_alliance: bool,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// The phase-aware fallback: minimum stake, no aggression, and no
    /// explicit move — the secretary's injection pass supplies the
    /// centre-ward step when one exists.
    pub fn fallback() -> Self {
        Self {
            prediction: Prediction::minimum(),
            combat_stance: Stance::None,
            combat_target: None,
            combat_stake: None,
            movement: None,
            use_skill: false,
            skill_target: None,
            propose_alliance: None,
            break_alliance: false,
            reasoning: "Holding steady this epoch.".to_string(),
        }
    }

    /// Append a guardrail note to the reasoning for observability.
    pub fn note_guardrails(&mut self, notes: &[String]) {
        if notes.is_empty() {
            return;
        }
        self.reasoning
            .push_str(&format!(" [Guardrails: {}]", notes.join("; ")));
    }
}

// ============================================================================
// Raw model output
// ============================================================================

/// Loose move coordinate: floats are accepted at parse time so that the
/// integer requirement can be enforced (and reported) by the secretary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawCoord {
    pub q: f64,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPrediction {
    pub asset: Option<String>,
    pub direction: Option<String>,
    pub stake: Option<f64>,
}

/// What the model actually said. Every field is optional and stringly;
/// the secretary's coercion layer turns this into a `Decision`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawDecision {
    pub prediction: RawPrediction,
    pub combat_stance: Option<String>,
    pub combat_target: Option<String>,
    pub combat_stake: Option<f64>,
    #[serde(rename = "move")]
    pub movement: Option<RawCoord>,
    pub use_skill: Option<bool>,
    pub skill_target: Option<String>,
    pub propose_alliance: Option<String>,
    pub break_alliance: Option<bool>,
    pub reasoning: Option<String>,
}

/// Strip markdown code fences and parse model text as a `RawDecision`.
pub fn parse_raw(text: &str) -> Result<RawDecision, serde_json::Error> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
}

// ============================================================================
// Decision request
// ============================================================================

/// Everything a strategy is allowed to know for one decide call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub agent: AgentSnapshot,
    pub others: Vec<AgentSnapshot>,
    pub market: MarketSnapshot,
    /// At most five carried-over lessons, newest last.
    pub recent_lessons: Vec<String>,
    pub spatial_context: String,
    pub skill_context: String,
    pub alliance_context: String,
}

impl DecisionRequest {
    /// Live opponents, adjacency decided by grid positions.
    pub fn adjacent_opponents(&self) -> Vec<&AgentSnapshot> {
        let Some(me) = self.agent.position else {
            return Vec::new();
        };
        self.others
            .iter()
            .filter(|o| o.alive)
            .filter(|o| o.position.is_some_and(|p| me.is_adjacent(p)))
            .collect()
    }

    pub fn live_opponents(&self) -> Vec<&AgentSnapshot> {
        self.others.iter().filter(|o| o.alive).collect()
    }
}

// ============================================================================
// Context strings
// ============================================================================

/// Render the spatial block for one agent. This is the only spatial
/// information a strategy ever receives.
pub fn spatial_context(
    grid: &HexGrid,
    schedule: &PhaseSchedule,
    epoch: u32,
    viewer: &Agent,
    roster: &[Agent],
) -> String {
    let phase = schedule.phase_for(epoch);
    let Some(pos) = viewer.position else {
        return format!("You are not on the arena. Phase: {}.", phase.as_str());
    };

    let mut out = String::new();
    out.push_str(&format!(
        "Position: {} (level {}, {} from centre)\n",
        pos,
        pos.ring(),
        pos.ring()
    ));
    out.push_str(&format!("Phase: {}", phase.as_str()));
    match schedule.epochs_remaining(epoch) {
        Some(n) => out.push_str(&format!(" ({} epochs until it tightens)\n", n)),
        None => out.push('\n'),
    }
    if grid.is_storm(pos, phase) {
        out.push_str("WARNING: you are standing in the storm.\n");
    }

    out.push_str("Empty adjacent hexes:");
    let empty = grid.empty_adjacent(pos);
    if empty.is_empty() {
        out.push_str(" none\n");
    } else {
        out.push('\n');
        for hex in empty {
            let tag = if grid.is_storm(hex, phase) { " [STORM]" } else { "" };
            out.push_str(&format!("  {} (level {}){}\n", hex, hex.ring(), tag));
        }
    }

    out.push_str("Gladiators within 2 tiles:");
    let mut nearby: Vec<&Agent> = roster
        .iter()
        .filter(|a| a.id != viewer.id && a.alive)
        .filter(|a| a.position.is_some_and(|p| pos.distance(p) <= 2))
        .collect();
    nearby.sort_by_key(|a| (pos.distance(a.position.unwrap()), a.id));
    if nearby.is_empty() {
        out.push_str(" none\n");
    } else {
        out.push('\n');
        for other in nearby {
            let dist = pos.distance(other.position.unwrap());
            let tag = if dist == 1 { " ADJACENT" } else { "" };
            out.push_str(&format!(
                "  {} ({}, {} HP, distance {}){}\n",
                other.name, other.class, other.hp, dist, tag
            ));
        }
    }

    let items = grid.items_within(pos, 2);
    if !items.is_empty() {
        out.push_str("Items within 2 tiles:\n");
        for (hex, item) in items {
            out.push_str(&format!("  {} at {}\n", item, hex));
        }
    }

    out
}

/// Render the skill block: what the skill does and whether it is ready.
pub fn skill_context(viewer: &Agent) -> String {
    let def = skills::definition(viewer.class);
    if viewer.skill_ready() {
        format!("Skill {} READY: {}", def.kind, def.description)
    } else {
        format!(
            "Skill {} on cooldown ({} epochs left).",
            def.kind, viewer.skill_cooldown
        )
    }
}

/// Render the alliance block.
pub fn alliance_context(viewer: &Agent) -> String {
    match &viewer.ally {
        Some(ally) => format!(
            "Allied with {} for {} more epochs. Attacking them is betrayal: double damage, pact ends.",
            ally.name, ally.remaining_epochs
        ),
        None => "No active alliance.".to_string(),
    }
}
