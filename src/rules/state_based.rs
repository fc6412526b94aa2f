//! State-based checks: deaths and battle completion.
//!
//! The pipeline mutates HP eagerly; these checks run after the damage
//! phases and commit the alive/dead and winner transitions.

use std::collections::BTreeMap;

use crate::battle::BattleState;
use crate::events::{DeathCause, DeathData, SubEvent};
use crate::ids::AgentId;
use crate::memory::MemoryNote;

/// Which phase pushed an agent's HP to zero first this epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPhase {
    Prediction,
    Combat,
    Bleed,
}

#[derive(Debug, Clone, Copy, Default)]
struct LedgerEntry {
    hp_at_start: i32,
    fatal: Option<FatalPhase>,
    combat_damage: bool,
    last_attacker: Option<AgentId>,
}

/// Per-epoch damage bookkeeping used for killer attribution.
#[derive(Debug, Clone, Default)]
pub struct DamageLedger {
    entries: BTreeMap<AgentId, LedgerEntry>,
}

impl DamageLedger {
    pub fn open(state: &BattleState) -> Self {
        let entries = state
            .roster
            .iter()
            .map(|a| {
                (
                    a.id,
                    LedgerEntry {
                        hp_at_start: a.hp,
                        ..LedgerEntry::default()
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Record damage landed on `victim`. `attacker` is set for combat-phase
    /// damage (clashes and siphons); `hp_after` is the victim's HP once the
    /// mutation committed.
    pub fn record_damage(
        &mut self,
        victim: AgentId,
        phase: FatalPhase,
        attacker: Option<AgentId>,
        amount: i32,
        hp_after: i32,
    ) {
        let entry = self.entries.entry(victim).or_default();
        if amount <= 0 {
            return;
        }
        if phase == FatalPhase::Combat {
            entry.combat_damage = true;
            if attacker.is_some() {
                entry.last_attacker = attacker;
            }
        }
        if hp_after <= 0 && entry.fatal.is_none() {
            entry.fatal = Some(phase);
        }
    }

    pub fn hp_at_start(&self, agent: AgentId) -> i32 {
        self.entries.get(&agent).map(|e| e.hp_at_start).unwrap_or(0)
    }

    fn cause(&self, agent: AgentId) -> (DeathCause, Option<AgentId>) {
        let entry = self.entries.get(&agent).copied().unwrap_or_default();
        match entry.fatal {
            Some(FatalPhase::Prediction) => (DeathCause::Prediction, None),
            Some(FatalPhase::Combat) => (DeathCause::Combat, entry.last_attacker),
            // A bleed crossing with combat damage earlier the same epoch is
            // ambiguous; no single killer is guessed.
            Some(FatalPhase::Bleed) if entry.combat_damage => (DeathCause::Multi, None),
            _ => (DeathCause::Bleed, None),
        }
    }
}

/// Transition every zero-HP agent to dead, attribute kills, vacate tiles.
pub fn death_check(
    state: &mut BattleState,
    epoch: u32,
    ledger: &DamageLedger,
) -> (Vec<SubEvent>, Vec<MemoryNote>) {
    let mut events = Vec::new();
    let mut notes = Vec::new();

    for id in state.sorted_ids() {
        let agent = state.agent(id).expect("roster id");
        if !agent.alive || agent.hp > 0 {
            continue;
        }
        let (cause, killer) = ledger.cause(id);
        let killer_name = killer
            .and_then(|k| state.agent(k))
            .map(|k| k.name.clone());

        let agent = state.agent_mut(id).unwrap();
        agent.alive = false;
        let data = DeathData {
            agent_id: id,
            agent_name: agent.name.clone(),
            agent_class: agent.class,
            epoch_number: epoch,
            cause,
            final_words: agent.final_words(),
            killed_by: killer_name.clone(),
        };
        if let Some(pos) = agent.position.take() {
            state.grid.vacate(pos);
        }

        if let Some(killer_id) = killer {
            if let Some(killer_agent) = state.agent_mut(killer_id) {
                killer_agent.kills += 1;
                notes.push(MemoryNote::new(
                    killer_id,
                    format!("Finished off {}.", data.agent_name),
                    8,
                    &["combat", "kill"],
                ));
            }
        }
        notes.push(MemoryNote::new(
            id,
            format!("Died to {:?} at epoch {}.", cause, epoch),
            10,
            &["death"],
        ));
        log::info!(
            "agent {} died at epoch {} (cause {:?}, killer {:?})",
            data.agent_name,
            epoch,
            cause,
            killer_name
        );
        events.push(SubEvent::Death(data));
    }

    (events, notes)
}

/// Decide whether the battle just completed, and set the winner.
///
/// - one agent left (of several): last one standing wins
/// - epoch cap reached: highest-HP live agent wins, ties to the lowest id
/// - nobody left (mutual destruction, or a solo exhibition bleeding out):
///   treated as a timeout ranked by HP at the start of the fatal epoch,
///   ties to the lowest id
///
/// A one-gladiator roster never wins by being alone; it runs until death
/// or the epoch cap.
pub fn win_check(state: &mut BattleState, ledger: &DamageLedger) -> Option<AgentId> {
    let alive = state.alive_count();
    let winner = if alive == 1 && state.roster.len() > 1 {
        state.alive_agents().first().map(|a| a.id)
    } else if alive == 0 {
        state
            .roster
            .iter()
            .max_by(|a, b| {
                ledger
                    .hp_at_start(a.id)
                    .cmp(&ledger.hp_at_start(b.id))
                    .then(b.id.cmp(&a.id))
            })
            .map(|a| a.id)
    } else if state.epoch >= state.config.max_epochs {
        state.highest_hp_alive()
    } else {
        None
    };

    if let Some(id) = winner {
        state.winner = Some(id);
    }
    winner
}
