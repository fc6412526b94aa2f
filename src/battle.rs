//! Battle state.
//!
//! `BattleState` is the single mutable record a coordinator owns: lifecycle
//! status, epoch clock position, roster, arena and the previous market
//! sample. It is fully serializable so an idle battle can hibernate to the
//! store and rehydrate before its next tick.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentClass, draw_names};
use crate::betting::BettingPhase;
use crate::hex::{HexGrid, PhaseSchedule};
use crate::ids::{AgentId, BattleId};
use crate::market::MarketSnapshot;

/// Loot scattered at battle start.
const LOOT_NAMES: [&str; 4] = ["medkit", "ration", "lucky coin", "smoke vial"];

/// Lifecycle status. Only forward transitions are legal, except
/// `CANCELLED`, reachable from any pre-`ACTIVE` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleStatus {
    Pending,
    Lobby,
    Countdown,
    BettingOpen,
    Active,
    Completed,
    Cancelled,
    Settled,
}

impl BattleStatus {
    fn order(self) -> u8 {
        match self {
            BattleStatus::Pending => 0,
            BattleStatus::Lobby => 1,
            BattleStatus::Countdown => 2,
            BattleStatus::BettingOpen => 3,
            BattleStatus::Active => 4,
            BattleStatus::Completed => 5,
            BattleStatus::Settled => 6,
            BattleStatus::Cancelled => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BattleStatus::Settled | BattleStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BattleStateError {
    InvalidTransition {
        from: BattleStatus,
        to: BattleStatus,
    },
    /// Cancellation requested at or after `ACTIVE`.
    CancelTooLate { status: BattleStatus },
}

impl std::fmt::Display for BattleStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BattleStateError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition {:?} -> {:?}", from, to)
            }
            BattleStateError::CancelTooLate { status } => {
                write!(f, "cannot cancel a battle in status {:?}", status)
            }
        }
    }
}

impl std::error::Error for BattleStateError {}

/// Static battle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BattleConfig {
    pub max_epochs: u32,
    pub schedule: PhaseSchedule,
    /// Loot items scattered at start.
    pub item_count: usize,
    /// Epochs a fresh alliance lasts.
    pub alliance_epochs: u32,
    /// Seed for the per-battle RNG (roster names, placement, gambler rolls).
    pub seed: u64,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            max_epochs: 20,
            schedule: PhaseSchedule::default(),
            item_count: 6,
            alliance_epochs: 3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleState {
    pub id: BattleId,
    pub status: BattleStatus,
    pub betting_phase: BettingPhase,
    /// Last completed epoch; 0 before the first tick.
    pub epoch: u32,
    pub config: BattleConfig,
    pub roster: Vec<Agent>,
    pub winner: Option<AgentId>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub grid: HexGrid,
    /// Previous epoch's market sample; `None` before the first epoch.
    pub prev_market: Option<MarketSnapshot>,
}

impl BattleState {
    /// Build a fresh battle: named roster, seeded placement and loot.
    pub fn new<R: Rng>(classes: &[AgentClass], config: BattleConfig, rng: &mut R) -> Self {
        let names = draw_names(rng, classes);
        let mut grid = HexGrid::new();
        let mut roster: Vec<Agent> = classes
            .iter()
            .zip(names)
            .map(|(class, name)| {
                let mut agent = Agent::new(*class, name);
                // Seeded ids keep the whole battle replayable: every phase
                // iterates in id order.
                agent.id = AgentId::from_u128(rng.random());
                agent
            })
            .collect();

        let mut spots = grid.coords();
        spots.shuffle(rng);
        for (agent, spot) in roster.iter_mut().zip(spots) {
            agent.position = Some(spot);
            grid.place(agent.id, spot).expect("fresh grid tile is free");
        }
        grid.scatter_items(rng, &LOOT_NAMES, config.item_count);

        Self {
            id: BattleId::new(),
            status: BattleStatus::Pending,
            betting_phase: BettingPhase::Open,
            epoch: 0,
            config,
            roster,
            winner: None,
            started_at: None,
            ended_at: None,
            grid,
            prev_market: None,
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.roster.iter().find(|a| a.id == id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.roster.iter_mut().find(|a| a.id == id)
    }

    /// Case-insensitive lookup by display name.
    pub fn agent_by_name(&self, name: &str) -> Option<&Agent> {
        self.roster
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Roster ids in ascending order — the pipeline's deterministic
    /// iteration order.
    pub fn sorted_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.roster.iter().map(|a| a.id).collect();
        ids.sort();
        ids
    }

    pub fn alive_count(&self) -> usize {
        self.roster.iter().filter(|a| a.alive).count()
    }

    pub fn alive_agents(&self) -> Vec<&Agent> {
        self.roster.iter().filter(|a| a.alive).collect()
    }

    /// Advance the lifecycle. Forward-only, one state at a time or skipping
    /// intermediate pre-active states, never backwards.
    pub fn advance_status(&mut self, to: BattleStatus) -> Result<(), BattleStateError> {
        let legal = !self.status.is_terminal()
            && !matches!(to, BattleStatus::Cancelled)
            && to.order() > self.status.order()
            && to.order() <= BattleStatus::Settled.order();
        if !legal {
            return Err(BattleStateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Cancel a battle that has not yet gone active.
    pub fn cancel(&mut self) -> Result<(), BattleStateError> {
        if self.status.order() >= BattleStatus::Active.order() {
            return Err(BattleStateError::CancelTooLate {
                status: self.status,
            });
        }
        self.status = BattleStatus::Cancelled;
        Ok(())
    }

    /// The timeout winner: highest-HP live agent, ties to the lowest id.
    pub fn highest_hp_alive(&self) -> Option<AgentId> {
        self.roster
            .iter()
            .filter(|a| a.alive)
            .max_by(|a, b| a.hp.cmp(&b.hp).then(b.id.cmp(&a.id)))
            .map(|a| a.id)
    }
}
