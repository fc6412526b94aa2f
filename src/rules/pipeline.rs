//! The per-epoch resolution pipeline.
//!
//! Runs exactly once per epoch over the secretary-validated decision map.
//! Phase order is fixed; HP mutations commit eagerly so later phases see
//! post-mutation state; dead agents are skipped by every later phase.
//!
//! 1. epoch advance        9. defend cost
//! 2. thoughts + actions  10. siphon
//! 3. movement            11. bleed
//! 4. sponsor boosts      12. death check
//! 5. skill activation    13. survival tick
//! 6. predictions         14. win check
//! 7. target resolution   15. cooldown / alliance tick
//! 8. combat triangle

use std::collections::BTreeMap;

use rand::Rng;

use crate::agent::Agent;
use crate::battle::BattleState;
use crate::decision::{Decision, MAX_STAKE_PERCENT, MIN_STAKE_PERCENT, Stance};
use crate::events::{
    ActionData, AttackView, BleedData, CombatResultData, DefendCostData, EpochRecord, MoveData,
    PredictionOutcome, SiphonData, SkillActivationData, SponsorBoostData, SubEvent,
};
use crate::ids::AgentId;
use crate::market::MarketSnapshot;
use crate::memory::MemoryNote;
use crate::rules::combat::{Clash, resolve_clash};
use crate::rules::state_based::{DamageLedger, FatalPhase, death_check, win_check};
use crate::skills::{DEFAULT_SKILL_COOLDOWN, SkillKind};
use crate::sponsorship::{EpochSponsorship, SponsorEffect};

/// Changes smaller than this count as a flat market.
const FLAT_EPSILON: f64 = 1e-9;

/// Per-agent progression through one epoch, used to assert the phase
/// machine never runs backwards. `DEAD` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EpochStage {
    Validated,
    Moved,
    Boosted,
    SkillPrimed,
    Predicted,
    Combated,
    Bled,
    Alive,
    Dead,
}

#[derive(Debug, Default)]
struct StageTracker {
    stages: BTreeMap<AgentId, EpochStage>,
}

impl StageTracker {
    fn advance(&mut self, id: AgentId, to: EpochStage) {
        let entry = self.stages.entry(id).or_insert(EpochStage::Validated);
        debug_assert!(*entry <= to, "epoch stage moved backwards: {:?} -> {:?}", entry, to);
        if *entry != EpochStage::Dead {
            *entry = to;
        }
    }
}

/// Everything the coordinator feeds into one tick.
#[derive(Debug, Clone)]
pub struct EpochInputs {
    pub market: MarketSnapshot,
    pub decisions: BTreeMap<AgentId, Decision>,
    pub sponsorships: Vec<EpochSponsorship>,
}

/// Per-agent statistics accumulated this epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    pub prediction_correct: u32,
    pub prediction_total: u32,
    pub damage_dealt: i64,
    pub damage_taken: i64,
}

/// What one epoch produced.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub record: EpochRecord,
    pub complete: bool,
    pub winner: Option<AgentId>,
    pub stats: BTreeMap<AgentId, EpochStats>,
    pub notes: Vec<MemoryNote>,
}

fn active_skill(agent: &Agent) -> Option<SkillKind> {
    agent
        .skill_active
        .then(|| SkillKind::for_class(agent.class))
}

fn has_active(agent: Option<&Agent>, skill: SkillKind) -> bool {
    agent.is_some_and(|a| active_skill(a) == Some(skill))
}

/// Run the full resolution pipeline for one epoch.
pub fn run_epoch<R: Rng>(state: &mut BattleState, inputs: &EpochInputs, rng: &mut R) -> EpochReport {
    state.epoch += 1;
    let epoch = state.epoch;
    let phase = state.config.schedule.phase_for(epoch);
    let prev_market = state.prev_market;
    let ids = state.sorted_ids();

    let mut ledger = DamageLedger::open(state);
    let mut tracker = StageTracker::default();
    let mut sub_events: Vec<SubEvent> = Vec::new();
    let mut notes: Vec<MemoryNote> = Vec::new();
    let mut stats: BTreeMap<AgentId, EpochStats> =
        ids.iter().map(|id| (*id, EpochStats::default())).collect();

    let decision = |id: &AgentId| inputs.decisions.get(id);

    // ---- 2. thought recording + declared actions -------------------------
    for id in &ids {
        let Some(dec) = decision(id) else { continue };
        let agent = state.agent_mut(*id).expect("roster id");
        if !agent.alive {
            tracker.advance(*id, EpochStage::Dead);
            continue;
        }
        agent.record_thought(&dec.reasoning);
        let attack = dec.combat_stance.is_aggressive().then(|| AttackView {
            target: dec.combat_target.clone().unwrap_or_default(),
            stake: dec.combat_stake.unwrap_or(0),
        });
        sub_events.push(SubEvent::Action(ActionData {
            agent_id: *id,
            agent_name: agent.name.clone(),
            prediction: dec.prediction,
            attack,
            defend: dec.combat_stance == Stance::Defend,
            reasoning: dec.reasoning.clone(),
        }));
    }

    // ---- alliances: breaks first, then mutual proposals ------------------
    for id in &ids {
        let Some(dec) = decision(id) else { continue };
        if !dec.break_alliance {
            continue;
        }
        let Some(partner) = state.agent(*id).and_then(|a| a.ally.as_ref().map(|al| al.id)) else {
            continue;
        };
        state.agent_mut(*id).unwrap().clear_ally();
        if let Some(other) = state.agent_mut(partner) {
            other.clear_ally();
        }
        notes.push(MemoryNote::new(*id, "Walked away from the pact.", 6, &["alliance"]));
        notes.push(MemoryNote::new(partner, "Pact dissolved by the other side.", 6, &["alliance"]));
    }

    let mut proposals: BTreeMap<AgentId, AgentId> = BTreeMap::new();
    for id in &ids {
        let Some(target_name) = decision(id).and_then(|d| d.propose_alliance.as_deref()) else {
            continue;
        };
        let proposer = state.agent(*id).expect("roster id");
        if !proposer.alive || proposer.ally.is_some() {
            continue;
        }
        if let Some(target) = state.agent_by_name(target_name)
            && target.alive
            && target.id != *id
            && target.ally.is_none()
        {
            proposals.insert(*id, target.id);
        }
    }
    for (proposer, target) in proposals.clone() {
        // A pact forms only on a mutual proposal within the same epoch.
        if proposals.get(&target) == Some(&proposer) && proposer < target {
            let epochs = state.config.alliance_epochs;
            let proposer_name = state.agent(proposer).unwrap().name.clone();
            let target_name = state.agent(target).unwrap().name.clone();
            state
                .agent_mut(proposer)
                .unwrap()
                .set_ally(target, target_name.clone(), epochs);
            state
                .agent_mut(target)
                .unwrap()
                .set_ally(proposer, proposer_name.clone(), epochs);
            notes.push(MemoryNote::new(
                proposer,
                format!("Struck a pact with {}.", target_name),
                7,
                &["alliance"],
            ));
            notes.push(MemoryNote::new(
                target,
                format!("Struck a pact with {}.", proposer_name),
                7,
                &["alliance"],
            ));
        }
    }

    // ---- 3. movement -----------------------------------------------------
    for id in &ids {
        let Some(to) = decision(id).and_then(|d| d.movement) else {
            continue;
        };
        let Some(agent) = state.agent(*id) else { continue };
        if !agent.alive {
            continue;
        }
        let Some(from) = agent.position else { continue };
        match state.grid.apply_move(*id, from, to) {
            Ok(()) => {
                state.agent_mut(*id).unwrap().position = Some(to);
                sub_events.push(SubEvent::Move(MoveData {
                    agent_id: *id,
                    from,
                    to,
                }));
                for item in state.grid.take_items(to) {
                    let agent = state.agent_mut(*id).unwrap();
                    agent.record_thought(&format!("Scooped up a {}.", item));
                    notes.push(MemoryNote::new(
                        *id,
                        format!("Picked up a {} at {}.", item, to),
                        3,
                        &["loot"],
                    ));
                }
                tracker.advance(*id, EpochStage::Moved);
            }
            Err(err) => {
                // First mover into a contested tile wins; no penalty here.
                log::debug!("move rejected for {}: {}", id, err);
            }
        }
    }

    // ---- 4. sponsor boosts ----------------------------------------------
    let mut perks: BTreeMap<AgentId, SponsorEffect> = BTreeMap::new();
    for sponsorship in &inputs.sponsorships {
        let Some(agent) = state.agent_mut(sponsorship.agent_id) else {
            continue;
        };
        if !agent.alive {
            continue;
        }
        let hp_before = agent.hp;
        let boost = agent.heal(sponsorship.effect.hp_boost);
        let data = SponsorBoostData {
            agent_id: sponsorship.agent_id,
            agent_name: agent.name.clone(),
            sponsor: sponsorship.sponsor.clone(),
            hp_before,
            hp_after: agent.hp,
            boost,
            attack_boost: sponsorship.effect.attack_boost,
            free_defend: sponsorship.effect.free_defend,
        };
        perks.entry(sponsorship.agent_id).or_insert(sponsorship.effect);
        notes.push(MemoryNote::new(
            sponsorship.agent_id,
            format!("{} sent a boost (+{} HP).", data.sponsor, boost),
            5,
            &["sponsor"],
        ));
        sub_events.push(SubEvent::SponsorBoost(data));
        tracker.advance(sponsorship.agent_id, EpochStage::Boosted);
    }

    // ---- 5. skill activation (SIPHON defers to after combat) -------------
    let mut siphons: Vec<(AgentId, AgentId)> = Vec::new();
    for id in &ids {
        let Some(dec) = decision(id) else { continue };
        if !dec.use_skill {
            continue;
        }
        let agent = state.agent(*id).expect("roster id");
        if !agent.alive || !agent.skill_ready() {
            continue;
        }
        let kind = SkillKind::for_class(agent.class);
        let mut target_name = None;
        if kind == SkillKind::Siphon {
            let named = dec
                .skill_target
                .as_deref()
                .and_then(|name| state.agent_by_name(name))
                .filter(|t| t.alive && t.id != *id)
                .map(|t| (t.id, t.name.clone()));
            let fallback = state
                .roster
                .iter()
                .filter(|t| t.alive && t.id != *id)
                .max_by(|a, b| a.hp.cmp(&b.hp).then(b.id.cmp(&a.id)))
                .map(|t| (t.id, t.name.clone()));
            if let Some((target_id, name)) = named.or(fallback) {
                siphons.push((*id, target_id));
                target_name = Some(name);
            }
        }
        let agent = state.agent_mut(*id).unwrap();
        agent.skill_active = true;
        agent.skill_cooldown = DEFAULT_SKILL_COOLDOWN;
        sub_events.push(SubEvent::SkillActivation(SkillActivationData {
            agent_id: *id,
            agent_name: agent.name.clone(),
            skill: kind,
            target: target_name,
        }));
        notes.push(MemoryNote::new(*id, format!("Fired {}.", kind), 6, &["skill"]));
        tracker.advance(*id, EpochStage::SkillPrimed);
    }

    // ---- 6. prediction resolution ---------------------------------------
    for id in &ids {
        let Some(dec) = decision(id) else { continue };
        let agent = state.agent(*id).expect("roster id");
        if !agent.alive || agent.hp == 0 {
            continue;
        }
        let pct = dec
            .prediction
            .stake_percent
            .clamp(MIN_STAKE_PERCENT, MAX_STAKE_PERCENT);
        let stake = (agent.hp as i64 * pct as i64 / 100) as i32;
        let change = prev_market
            .map(|prev| inputs.market.change_from(&prev, dec.prediction.asset))
            .unwrap_or(0.0);
        let flat = change.abs() < FLAT_EPSILON;
        let mut correct = !flat
            && ((change > 0.0) == (dec.prediction.direction == crate::decision::Direction::Up));
        let mut delta: i32 = if flat {
            0
        } else if correct {
            stake
        } else {
            -stake
        };

        // Skill overrides, in order.
        if has_active(state.agent(*id), SkillKind::InsiderInfo) {
            delta = stake;
            correct = true;
        }
        if has_active(state.agent(*id), SkillKind::AllIn) {
            delta = delta.saturating_mul(2);
        }
        if has_active(state.agent(*id), SkillKind::Fortify) {
            delta = delta.max(0);
        }

        let agent = state.agent_mut(*id).unwrap();
        let hp_change = if delta >= 0 {
            agent.heal(delta)
        } else {
            let lost = agent.apply_damage(-delta);
            -lost
        };
        let hp_after = agent.hp;
        if hp_change < 0 {
            ledger.record_damage(*id, FatalPhase::Prediction, None, -hp_change, hp_after);
        }

        let entry = stats.get_mut(id).unwrap();
        entry.prediction_total += 1;
        if correct {
            entry.prediction_correct += 1;
        }

        sub_events.push(SubEvent::PredictionResult(PredictionOutcome {
            agent_id: *id,
            asset: dec.prediction.asset,
            direction: dec.prediction.direction,
            actual_change: change,
            correct,
            hp_change,
            hp_after,
        }));
        if !flat {
            notes.push(MemoryNote::new(
                *id,
                format!(
                    "{} call on {} ({:+.2}%) for {} HP.",
                    if correct { "Right" } else { "Wrong" },
                    dec.prediction.asset,
                    change,
                    hp_change
                ),
                if correct { 4 } else { 5 },
                &["prediction"],
            ));
        }
        tracker.advance(*id, EpochStage::Predicted);
    }

    // ---- 7 + 8. combat target resolution and the triangle ----------------
    if phase.combat_enabled() {
        let mut clashes: Vec<(AgentId, AgentId)> = Vec::new();
        for id in &ids {
            let Some(dec) = decision(id) else { continue };
            if !dec.combat_stance.is_aggressive() {
                continue;
            }
            let attacker = state.agent(*id).expect("roster id");
            if !attacker.alive {
                continue;
            }
            let Some(target) = dec
                .combat_target
                .as_deref()
                .and_then(|name| state.agent_by_name(name))
            else {
                continue;
            };
            let adjacent = match (attacker.position, target.position) {
                (Some(a), Some(b)) => a.is_adjacent(b),
                _ => false,
            };
            if target.id == *id || !target.alive || !adjacent {
                continue;
            }
            clashes.push((*id, target.id));
        }

        // A saboteur about to be overpowered loses their own clash, no
        // matter which side the iteration order reaches first.
        let preempted: Vec<AgentId> = clashes
            .iter()
            .filter(|(attacker_id, target_id)| {
                let attacker_stance = decision(attacker_id)
                    .map(|d| d.combat_stance)
                    .unwrap_or_default();
                let target_stance = decision(target_id)
                    .map(|d| d.combat_stance)
                    .unwrap_or_default();
                attacker_stance == Stance::Attack && target_stance == Stance::Sabotage
            })
            .map(|(_, target_id)| *target_id)
            .collect();

        for (attacker_id, target_id) in clashes {
            if preempted.contains(&attacker_id) {
                continue;
            }
            let (Some(attacker), Some(target)) =
                (state.agent(attacker_id), state.agent(target_id))
            else {
                continue;
            };
            if attacker.hp == 0 || target.hp == 0 {
                continue;
            }
            let dec = decision(&attacker_id).expect("clash implies decision");
            let stake = dec.combat_stake.unwrap_or(0).min(attacker.hp);
            if stake <= 0 {
                continue;
            }
            let target_stance = decision(&target_id).map(|d| d.combat_stance).unwrap_or_default();
            let betrayal = attacker.is_allied_with(target_id);
            let clash = Clash {
                aggressor_class: attacker.class,
                stance: dec.combat_stance,
                stake,
                target_class: target.class,
                target_stance,
                aggressor_berserk: active_skill(attacker) == Some(SkillKind::Berserk),
                target_berserk: active_skill(target) == Some(SkillKind::Berserk),
                aggressor_fortify: active_skill(attacker) == Some(SkillKind::Fortify),
                target_fortify: active_skill(target) == Some(SkillKind::Fortify),
                attack_boost: perks.get(&attacker_id).map(|p| p.attack_boost).unwrap_or(0.0),
                betrayal,
            };
            let result = resolve_clash(&clash, rng);

            let target_agent = state.agent_mut(target_id).unwrap();
            let dealt = target_agent.apply_damage(result.damage_to_target);
            let target_hp = target_agent.hp;
            ledger.record_damage(target_id, FatalPhase::Combat, Some(attacker_id), dealt, target_hp);

            let attacker_agent = state.agent_mut(attacker_id).unwrap();
            let attacker_change = if result.delta_aggressor >= 0 {
                attacker_agent.heal(result.delta_aggressor)
            } else {
                let taken = attacker_agent.apply_damage(-result.delta_aggressor);
                -taken
            };
            let attacker_hp = attacker_agent.hp;
            if attacker_change < 0 {
                ledger.record_damage(
                    attacker_id,
                    FatalPhase::Combat,
                    Some(target_id),
                    -attacker_change,
                    attacker_hp,
                );
            }

            if betrayal {
                state.agent_mut(attacker_id).unwrap().clear_ally();
                state.agent_mut(target_id).unwrap().clear_ally();
                let attacker_name = state.agent(attacker_id).unwrap().name.clone();
                notes.push(MemoryNote::new(
                    attacker_id,
                    "Turned on an ally mid-pact.",
                    9,
                    &["alliance", "betrayal"],
                ));
                notes.push(MemoryNote::new(
                    target_id,
                    format!("Betrayed by {}.", attacker_name),
                    9,
                    &["alliance", "betrayal"],
                ));
            }

            let attacker_stats = stats.get_mut(&attacker_id).unwrap();
            attacker_stats.damage_dealt += dealt as i64;
            if attacker_change < 0 {
                attacker_stats.damage_taken += (-attacker_change) as i64;
            }
            stats.get_mut(&target_id).unwrap().damage_taken += dealt as i64;

            sub_events.push(SubEvent::CombatResult(CombatResultData {
                attacker_id,
                target_id,
                stance: dec.combat_stance,
                outcome: result.outcome,
                stake: result.stake,
                hp_change_attacker: attacker_change,
                hp_change_target: -dealt,
                damage: result.damage_to_target,
                blocked: result.blocked,
            }));
            let target_name = state.agent(target_id).unwrap().name.clone();
            notes.push(MemoryNote::new(
                attacker_id,
                format!("{:?} on {} dealt {}.", result.outcome, target_name, dealt),
                6,
                &["combat"],
            ));
            notes.push(MemoryNote::new(
                target_id,
                format!("Took {} in a clash.", dealt),
                6,
                &["combat"],
            ));
            tracker.advance(attacker_id, EpochStage::Combated);
            tracker.advance(target_id, EpochStage::Combated);
        }
    }

    // ---- 9. defend cost --------------------------------------------------
    for id in &ids {
        let Some(dec) = decision(id) else { continue };
        if dec.combat_stance != Stance::Defend {
            continue;
        }
        let agent = state.agent(*id).expect("roster id");
        if !agent.alive || agent.hp == 0 {
            continue;
        }
        let waived = perks.get(id).is_some_and(|p| p.free_defend);
        // Costed on epoch-start HP so a mauled defender is not charged twice
        // for the same damage.
        let cost = ledger.hp_at_start(*id) * 3 / 100;
        let agent = state.agent_mut(*id).unwrap();
        let mut hp_after = agent.hp;
        if !waived {
            let paid = agent.apply_damage(cost);
            hp_after = agent.hp;
            ledger.record_damage(*id, FatalPhase::Bleed, None, paid, hp_after);
        }
        sub_events.push(SubEvent::DefendCost(DefendCostData {
            agent_id: *id,
            cost,
            hp_after,
            waived,
        }));
    }

    // ---- 10. siphon ------------------------------------------------------
    for (activator_id, target_id) in siphons {
        let (Some(activator), Some(target)) = (state.agent(activator_id), state.agent(target_id))
        else {
            continue;
        };
        if activator.hp == 0 || !target.alive || target.hp == 0 {
            continue;
        }
        let amount = (target.hp / 10).max(1);
        let target_agent = state.agent_mut(target_id).unwrap();
        let drained = target_agent.apply_damage(amount);
        let target_hp = target_agent.hp;
        ledger.record_damage(target_id, FatalPhase::Combat, Some(activator_id), drained, target_hp);
        state.agent_mut(activator_id).unwrap().heal(drained);
        stats.get_mut(&activator_id).unwrap().damage_dealt += drained as i64;
        stats.get_mut(&target_id).unwrap().damage_taken += drained as i64;
        sub_events.push(SubEvent::Siphon(SiphonData {
            agent_id: activator_id,
            target_id,
            amount: drained,
        }));
        let target_name = state.agent(target_id).unwrap().name.clone();
        notes.push(MemoryNote::new(
            activator_id,
            format!("Drained {} HP out of {}.", drained, target_name),
            6,
            &["skill", "combat"],
        ));
    }

    // ---- 11. bleed -------------------------------------------------------
    for id in &ids {
        let agent = state.agent(*id).expect("roster id");
        if !agent.alive || agent.hp == 0 {
            continue;
        }
        if active_skill(agent) == Some(SkillKind::Fortify) {
            sub_events.push(SubEvent::Bleed(BleedData {
                agent_id: *id,
                amount: 0,
                hp_after: agent.hp,
                waived: true,
            }));
            continue;
        }
        let amount = (agent.hp / 50).max(1);
        let agent = state.agent_mut(*id).unwrap();
        let lost = agent.apply_damage(amount);
        let hp_after = agent.hp;
        ledger.record_damage(*id, FatalPhase::Bleed, None, lost, hp_after);
        sub_events.push(SubEvent::Bleed(BleedData {
            agent_id: *id,
            amount: lost,
            hp_after,
            waived: false,
        }));
        tracker.advance(*id, EpochStage::Bled);
    }

    // ---- 12. death check -------------------------------------------------
    let (death_events, death_notes) = death_check(state, epoch, &ledger);
    for event in &death_events {
        if let SubEvent::Death(data) = event {
            tracker.advance(data.agent_id, EpochStage::Dead);
        }
    }
    sub_events.extend(death_events);
    notes.extend(death_notes);

    // ---- 13. survival tick ----------------------------------------------
    for agent in &mut state.roster {
        if agent.alive {
            agent.epochs_survived += 1;
        }
    }

    // ---- 14. win check ---------------------------------------------------
    let winner = win_check(state, &ledger);
    let complete = winner.is_some();

    // ---- 15. cooldown and alliance tick ----------------------------------
    for agent in &mut state.roster {
        agent.skill_cooldown = agent.skill_cooldown.saturating_sub(1);
        agent.skill_active = false;
        if let Some(ally) = &mut agent.ally {
            ally.remaining_epochs = ally.remaining_epochs.saturating_sub(1);
            if ally.remaining_epochs == 0 {
                agent.ally = None;
            }
        }
    }
    for id in &ids {
        if state.agent(*id).is_some_and(|a| a.alive) {
            tracker.advance(*id, EpochStage::Alive);
        }
    }

    state.prev_market = Some(inputs.market);

    EpochReport {
        record: EpochRecord {
            epoch,
            market: inputs.market,
            sub_events,
        },
        complete,
        winner,
        stats,
        notes,
    }
}
