//! The decision secretary: two-layer sanitisation of strategy output.
//!
//! Layer 1 is programmatic and never fails: enum coercion, fuzzy target
//! repair, stake caps, cooldown gating, move validation, alliance rules and
//! fallback-move injection. Layer 2 is an optional low-temperature model
//! pass over anything still structurally broken, with a "safe hybrid"
//! decision as the last resort.
//!
//! Every correction is reported as a structured issue for logging and
//! metrics; the repaired decision always parses against the schema.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::decision::{
    Decision, Direction, MAX_STAKE_PERCENT, MIN_STAKE_PERCENT, Prediction, RawDecision, Stance,
    parse_raw,
};
use crate::hex::{ArenaPhase, Axial, HexGrid};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::market::Asset;

/// Maximum edit distance for a fuzzy target match.
const FUZZY_DISTANCE: usize = 3;

/// Combat stake default when the model forgot one: 10% of current HP.
const DEFAULT_STAKE_FRACTION: f64 = 0.10;
/// Cap when the requested stake exceeds current HP: 30% of current HP.
const OVERSIZED_STAKE_FRACTION: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueAction {
    Kept,
    Corrected,
    Removed,
    Defaulted,
}

/// One repair the secretary performed (or declined to perform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub action: IssueAction,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(
        severity: IssueSeverity,
        action: IssueAction,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            action,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Everything layer 1 needs to know about the arena.
#[derive(Debug, Clone, Copy)]
pub struct SecretaryContext<'a> {
    pub agent: &'a Agent,
    pub roster: &'a [Agent],
    pub grid: &'a HexGrid,
    pub phase: ArenaPhase,
}

impl<'a> SecretaryContext<'a> {
    fn live_adjacent_others(&self) -> Vec<&'a Agent> {
        let Some(pos) = self.agent.position else {
            return Vec::new();
        };
        self.roster
            .iter()
            .filter(|a| a.id != self.agent.id && a.alive)
            .filter(|a| a.position.is_some_and(|p| pos.is_adjacent(p)))
            .collect()
    }

    fn live_others(&self) -> Vec<&'a Agent> {
        self.roster
            .iter()
            .filter(|a| a.id != self.agent.id && a.alive)
            .collect()
    }
}

/// Classic Levenshtein distance over uppercase bytes.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<u8> = a.to_ascii_uppercase().into_bytes();
    let b: Vec<u8> = b.to_ascii_uppercase().into_bytes();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Fuzzy-resolve a target name among candidates: substring either way,
/// class-name mention, then bounded edit distance.
fn fuzzy_match<'a>(raw: &str, candidates: &[&'a Agent]) -> Option<&'a Agent> {
    let needle = raw.trim().to_ascii_uppercase();
    if needle.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|a| {
            let name = a.name.to_ascii_uppercase();
            name.contains(&needle) || needle.contains(&name)
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|a| needle.contains(a.class.as_str()))
        })
        .or_else(|| {
            candidates
                .iter()
                .filter(|a| levenshtein(&needle, &a.name) <= FUZZY_DISTANCE)
                .min_by_key(|a| levenshtein(&needle, &a.name))
        })
        .copied()
}

/// The secretary itself. `always_inject_move` forces a centre-ward step for
/// every decision without one (used for fallback decisions and drills).
pub struct Secretary {
    pub always_inject_move: bool,
    corrector: Option<Arc<dyn LlmClient>>,
}

impl Default for Secretary {
    fn default() -> Self {
        Self::new()
    }
}

impl Secretary {
    pub fn new() -> Self {
        Self {
            always_inject_move: false,
            corrector: None,
        }
    }

    /// Enable the layer-2 model correction pass.
    pub fn with_corrector(mut self, corrector: Arc<dyn LlmClient>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_always_inject(mut self, flag: bool) -> Self {
        self.always_inject_move = flag;
        self
    }

    // ------------------------------------------------------------------
    // Coercion: raw model output -> typed decision
    // ------------------------------------------------------------------

    /// Coerce a loose model decision into the typed schema. Never fails;
    /// unusable fields collapse to defaults with an issue recorded.
    pub fn coerce(raw: &RawDecision) -> (Decision, Vec<ValidationIssue>) {
        let mut issues = Vec::new();

        let asset = match raw.prediction.asset.as_deref() {
            Some(text) => match Asset::parse_loose(text) {
                Some(asset) => {
                    if text != asset.as_str() {
                        issues.push(ValidationIssue::new(
                            IssueSeverity::Info,
                            IssueAction::Corrected,
                            "prediction.asset",
                            format!("normalised {:?} to {}", text, asset),
                        ));
                    }
                    asset
                }
                None => {
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Warning,
                        IssueAction::Defaulted,
                        "prediction.asset",
                        format!("unknown asset {:?}", text),
                    ));
                    Asset::Eth
                }
            },
            None => {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Warning,
                    IssueAction::Defaulted,
                    "prediction.asset",
                    "missing asset",
                ));
                Asset::Eth
            }
        };

        let direction = raw
            .prediction
            .direction
            .as_deref()
            .and_then(Direction::parse_loose)
            .unwrap_or_else(|| {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Warning,
                    IssueAction::Defaulted,
                    "prediction.direction",
                    "missing or unknown direction",
                ));
                Direction::Up
            });

        let stake_raw = raw.prediction.stake.unwrap_or(MIN_STAKE_PERCENT as f64);
        let stake_percent = (stake_raw.round() as i64)
            .clamp(MIN_STAKE_PERCENT as i64, MAX_STAKE_PERCENT as i64) as u32;
        if stake_raw < MIN_STAKE_PERCENT as f64 || stake_raw > MAX_STAKE_PERCENT as f64 {
            issues.push(ValidationIssue::new(
                IssueSeverity::Info,
                IssueAction::Corrected,
                "prediction.stake",
                format!("stake {} clamped to {}", stake_raw, stake_percent),
            ));
        }

        let combat_stance = match raw.combat_stance.as_deref() {
            None => Stance::None,
            Some(text) => Stance::parse_loose(text).unwrap_or_else(|| {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Warning,
                    IssueAction::Defaulted,
                    "combatStance",
                    format!("unknown stance {:?}", text),
                ));
                Stance::None
            }),
        };

        let movement = raw.movement.and_then(|m| {
            if m.q.fract() == 0.0 && m.r.fract() == 0.0 {
                Some(Axial::new(m.q as i32, m.r as i32))
            } else {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Warning,
                    IssueAction::Removed,
                    "move",
                    "non-integer move coordinate",
                ));
                None
            }
        });

        let decision = Decision {
            prediction: Prediction {
                asset,
                direction,
                stake_percent,
            },
            combat_stance,
            combat_target: raw.combat_target.clone().filter(|t| !t.trim().is_empty()),
            combat_stake: raw.combat_stake.map(|s| s.floor() as i32),
            movement,
            use_skill: raw.use_skill.unwrap_or(false),
            skill_target: raw.skill_target.clone(),
            propose_alliance: raw.propose_alliance.clone(),
            break_alliance: raw.break_alliance.unwrap_or(false),
            reasoning: raw.reasoning.clone().unwrap_or_default(),
        };
        (decision, issues)
    }

    // ------------------------------------------------------------------
    // Layer 1
    // ------------------------------------------------------------------

    fn layer_one(
        &self,
        mut decision: Decision,
        ctx: &SecretaryContext<'_>,
    ) -> (Decision, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let agent = ctx.agent;

        // 1. Stake bounds (coercion already clamps model input; decisions
        //    built in code can still be out of range).
        let clamped = decision
            .prediction
            .stake_percent
            .clamp(MIN_STAKE_PERCENT, MAX_STAKE_PERCENT);
        if clamped != decision.prediction.stake_percent {
            issues.push(ValidationIssue::new(
                IssueSeverity::Info,
                IssueAction::Corrected,
                "prediction.stake",
                format!("stake clamped to {}", clamped),
            ));
            decision.prediction.stake_percent = clamped;
        }

        // 2. Combat target resolution with fuzzy repair.
        if decision.combat_stance.is_aggressive() {
            let candidates = ctx.live_adjacent_others();
            let resolved = decision
                .combat_target
                .as_deref()
                .and_then(|name| fuzzy_match(name, &candidates));
            match resolved {
                Some(target) => {
                    if decision.combat_target.as_deref() != Some(target.name.as_str()) {
                        issues.push(ValidationIssue::new(
                            IssueSeverity::Warning,
                            IssueAction::Corrected,
                            "combatTarget",
                            format!(
                                "matched {:?} to {}",
                                decision.combat_target.as_deref().unwrap_or(""),
                                target.name
                            ),
                        ));
                        decision.combat_target = Some(target.name.clone());
                    }
                }
                None => {
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Warning,
                        IssueAction::Removed,
                        "combatStance",
                        "no valid adjacent target, standing down",
                    ));
                    decision.combat_stance = Stance::None;
                    decision.combat_target = None;
                    decision.combat_stake = None;
                }
            }
        } else if decision.combat_target.is_some() || decision.combat_stake.is_some() {
            decision.combat_target = None;
            decision.combat_stake = None;
        }

        // 3. Combat stake sizing.
        if decision.combat_stance.is_aggressive() {
            match decision.combat_stake {
                None => {
                    let stake = ((agent.hp as f64) * DEFAULT_STAKE_FRACTION).floor() as i32;
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Info,
                        IssueAction::Defaulted,
                        "combatStake",
                        format!("defaulted to {} (10% of HP)", stake),
                    ));
                    decision.combat_stake = Some(stake.max(1));
                }
                Some(stake) if stake > agent.hp => {
                    let capped = ((agent.hp as f64) * OVERSIZED_STAKE_FRACTION).floor() as i32;
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Warning,
                        IssueAction::Corrected,
                        "combatStake",
                        format!("stake {} exceeds HP, capped to {}", stake, capped),
                    ));
                    decision.combat_stake = Some(capped.max(1));
                }
                Some(stake) if stake <= 0 => {
                    let stake_new = ((agent.hp as f64) * DEFAULT_STAKE_FRACTION).floor() as i32;
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Warning,
                        IssueAction::Corrected,
                        "combatStake",
                        format!("non-positive stake {} reset", stake),
                    ));
                    decision.combat_stake = Some(stake_new.max(1));
                }
                _ => {}
            }
        }

        // 4. Skill gating.
        if decision.use_skill && !agent.skill_ready() {
            issues.push(ValidationIssue::new(
                IssueSeverity::Info,
                IssueAction::Removed,
                "useSkill",
                format!("skill on cooldown for {} epochs", agent.skill_cooldown),
            ));
            decision.use_skill = false;
            decision.skill_target = None;
        }
        if decision.use_skill
            && crate::skills::SkillKind::for_class(agent.class).needs_target()
        {
            let valid = decision
                .skill_target
                .as_deref()
                .and_then(|name| fuzzy_match(name, &ctx.live_others()));
            let pick = valid.or_else(|| {
                ctx.live_others()
                    .into_iter()
                    .max_by(|a, b| a.hp.cmp(&b.hp).then(b.id.cmp(&a.id)))
            });
            match pick {
                Some(target) => {
                    if decision.skill_target.as_deref() != Some(target.name.as_str()) {
                        issues.push(ValidationIssue::new(
                            IssueSeverity::Info,
                            IssueAction::Corrected,
                            "skillTarget",
                            format!("siphon target set to {}", target.name),
                        ));
                        decision.skill_target = Some(target.name.clone());
                    }
                }
                None => {
                    issues.push(ValidationIssue::new(
                        IssueSeverity::Info,
                        IssueAction::Removed,
                        "useSkill",
                        "nobody left to siphon",
                    ));
                    decision.use_skill = false;
                    decision.skill_target = None;
                }
            }
        }

        // 5. Movement validation.
        if let (Some(to), Some(from)) = (decision.movement, agent.position) {
            if let Err(err) = ctx.grid.validate_move(from, to) {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Info,
                    IssueAction::Removed,
                    "move",
                    format!("move {} rejected: {}", to, err),
                ));
                decision.movement = None;
            }
        } else if decision.movement.is_some() {
            decision.movement = None;
        }

        // 6. Alliance hygiene.
        if decision.propose_alliance.is_some() && decision.break_alliance {
            issues.push(ValidationIssue::new(
                IssueSeverity::Info,
                IssueAction::Removed,
                "proposeAlliance",
                "proposal and break in the same decision, keeping the break",
            ));
            decision.propose_alliance = None;
        }
        if let Some(name) = decision.propose_alliance.clone() {
            let target = ctx
                .roster
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(name.trim()));
            let invalid = match target {
                None => true,
                Some(t) => t.id == agent.id || !t.alive,
            };
            if invalid || agent.ally.is_some() {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Info,
                    IssueAction::Removed,
                    "proposeAlliance",
                    "proposal to self, the dead, or while already allied",
                ));
                decision.propose_alliance = None;
            }
        }
        if decision.break_alliance && agent.ally.is_none() {
            decision.break_alliance = false;
        }

        // 7. Fallback move injection. A storm-dweller whose chosen move
        //    stays in the storm is redirected; one already heading for
        //    safety keeps their own move.
        let on_storm = agent
            .position
            .is_some_and(|p| ctx.grid.is_storm(p, ctx.phase));
        let storm_bound = on_storm
            && decision
                .movement
                .is_some_and(|to| ctx.grid.is_storm(to, ctx.phase));
        let missing = decision.movement.is_none() && (on_storm || self.always_inject_move);
        if (missing || storm_bound) && let Some(pos) = agent.position {
            if let Some(target) = ctx.grid.fallback_target(pos, ctx.phase) {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Info,
                    IssueAction::Defaulted,
                    "move",
                    format!("injected centre-ward move to {}", target),
                ));
                decision.movement = Some(target);
            }
            // Fully boxed in: leave the move unset.
        }

        (decision, issues)
    }

    // ------------------------------------------------------------------
    // Structural validation and layer 2
    // ------------------------------------------------------------------

    /// Residual schema violations after repair. Empty means valid.
    pub fn structural_errors(decision: &Decision, ctx: &SecretaryContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        let stake = decision.prediction.stake_percent;
        if !(MIN_STAKE_PERCENT..=MAX_STAKE_PERCENT).contains(&stake) {
            errors.push(format!("prediction stake {} outside [5, 50]", stake));
        }
        if decision.combat_stance.is_aggressive() {
            if decision.combat_target.is_none() {
                errors.push("aggressive stance without a target".to_string());
            }
            match decision.combat_stake {
                Some(s) if s > 0 => {}
                _ => errors.push("aggressive stance without a positive stake".to_string()),
            }
        }
        if let (Some(to), Some(from)) = (decision.movement, ctx.agent.position)
            && ctx.grid.validate_move(from, to).is_err()
        {
            errors.push(format!("invalid move to {}", to));
        }
        if decision.use_skill && !ctx.agent.skill_ready() {
            errors.push("skill requested while on cooldown".to_string());
        }
        errors
    }

    /// Keep every individually-valid field, fill the rest with
    /// minimum-stake defaults.
    fn safe_hybrid(decision: &Decision, ctx: &SecretaryContext<'_>) -> Decision {
        let mut hybrid = Decision::fallback();
        hybrid.prediction = Prediction {
            asset: decision.prediction.asset,
            direction: decision.prediction.direction,
            stake_percent: decision
                .prediction
                .stake_percent
                .clamp(MIN_STAKE_PERCENT, MAX_STAKE_PERCENT),
        };
        if let (Some(to), Some(from)) = (decision.movement, ctx.agent.position)
            && ctx.grid.validate_move(from, to).is_ok()
        {
            hybrid.movement = Some(to);
        }
        if decision.combat_stance == Stance::Defend {
            hybrid.combat_stance = Stance::Defend;
        }
        hybrid.reasoning = decision.reasoning.clone();
        hybrid
    }

    /// Run the full two-layer pipeline on a typed decision.
    pub async fn validate(
        &self,
        decision: Decision,
        ctx: &SecretaryContext<'_>,
    ) -> (Decision, Vec<ValidationIssue>) {
        let (mut repaired, mut issues) = self.layer_one(decision, ctx);

        let residual = Self::structural_errors(&repaired, ctx);
        if !residual.is_empty() {
            if let Some(corrector) = &self.corrector {
                match self.model_repair(&repaired, &residual, ctx, corrector.as_ref()).await {
                    Some(fixed) => {
                        issues.push(ValidationIssue::new(
                            IssueSeverity::Warning,
                            IssueAction::Corrected,
                            "decision",
                            "model correction pass accepted",
                        ));
                        repaired = fixed;
                    }
                    None => {
                        issues.push(ValidationIssue::new(
                            IssueSeverity::Error,
                            IssueAction::Defaulted,
                            "decision",
                            "model correction failed, safe hybrid substituted",
                        ));
                        repaired = Self::safe_hybrid(&repaired, ctx);
                    }
                }
            } else {
                issues.push(ValidationIssue::new(
                    IssueSeverity::Error,
                    IssueAction::Defaulted,
                    "decision",
                    format!("unrepairable: {}", residual.join("; ")),
                ));
                repaired = Self::safe_hybrid(&repaired, ctx);
            }
        }

        let notes: Vec<String> = issues
            .iter()
            .filter(|i| i.action != IssueAction::Kept)
            .map(|i| i.message.clone())
            .collect();
        repaired.note_guardrails(&notes);
        (repaired, issues)
    }

    /// Validate raw model output end to end: coercion, then both layers.
    pub async fn validate_raw(
        &self,
        raw: &RawDecision,
        ctx: &SecretaryContext<'_>,
    ) -> (Decision, Vec<ValidationIssue>) {
        let (decision, mut issues) = Self::coerce(raw);
        let (repaired, more) = self.validate(decision, ctx).await;
        issues.extend(more);
        (repaired, issues)
    }

    async fn model_repair(
        &self,
        decision: &Decision,
        errors: &[String],
        ctx: &SecretaryContext<'_>,
        corrector: &dyn LlmClient,
    ) -> Option<Decision> {
        let prompt = format!(
            "The following arena decision is structurally invalid:\n{}\n\nErrors:\n{}\n\n\
             Return ONLY the corrected decision as JSON with the same schema.",
            serde_json::to_string_pretty(decision).ok()?,
            errors
                .iter()
                .map(|e| format!("- {}", e))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let reply = corrector
            .chat(&[ChatMessage::user(prompt)], ChatOptions::corrective())
            .await
            .ok()?;
        let raw = parse_raw(&reply.content).ok()?;
        let (coerced, _) = Self::coerce(&raw);
        let (fixed, _) = self.layer_one(coerced, ctx);
        Self::structural_errors(&fixed, ctx).is_empty().then_some(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentClass;
    use crate::ids::AgentId;

    fn arena() -> (HexGrid, Vec<Agent>) {
        let mut grid = HexGrid::new();
        let mut me = Agent::new(AgentClass::Warrior, "KRUSHNAR");
        let mut dead = Agent::new(AgentClass::Parasite, "DEADGUY");
        let mut live = Agent::new(AgentClass::Trader, "DEDFNG");
        me.position = Some(Axial::new(0, 0));
        dead.position = None;
        dead.alive = false;
        dead.hp = 0;
        live.position = Some(Axial::new(1, 0));
        grid.place(me.id, Axial::new(0, 0)).unwrap();
        grid.place(live.id, Axial::new(1, 0)).unwrap();
        (grid, vec![me, dead, live])
    }

    fn ctx<'a>(grid: &'a HexGrid, roster: &'a [Agent], phase: ArenaPhase) -> SecretaryContext<'a> {
        SecretaryContext {
            agent: &roster[0],
            roster,
            grid,
            phase,
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("DEDGUY", "DEDFNG"), 3);
        assert_eq!(levenshtein("DEDGUY", "DEADGUY"), 1);
        assert_eq!(levenshtein("same", "SAME"), 0);
    }

    #[tokio::test]
    async fn test_full_repair_worked_example() {
        // Garbled output: lowercase asset, oversized stake, typoed target
        // that is closer to a dead agent than to the live adjacent one.
        let raw: RawDecision = serde_json::from_str(
            r#"{"prediction":{"asset":"eth","direction":"up","stake":80},
                "combatStance":"ATTACK","combatTarget":"DEDGUY"}"#,
        )
        .unwrap();

        let (grid, roster) = arena();
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);
        let (decision, issues) = secretary.validate_raw(&raw, &ctx).await;

        assert_eq!(decision.prediction.asset, Asset::Eth);
        assert_eq!(decision.prediction.direction, Direction::Up);
        assert_eq!(decision.prediction.stake_percent, 50);
        // The dead DEADGUY is never a candidate; fuzzy lands on DEDFNG.
        assert_eq!(decision.combat_target.as_deref(), Some("DEDFNG"));
        assert_eq!(decision.combat_stance, Stance::Attack);
        // 10% of 1000 HP.
        assert_eq!(decision.combat_stake, Some(100));
        assert!(decision.reasoning.contains("[Guardrails:"));
        assert!(issues.iter().any(|i| i.action == IssueAction::Corrected));
        assert!(Secretary::structural_errors(&decision, &ctx).is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_target_downgrades_stance() {
        let (grid, roster) = arena();
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.combat_stance = Stance::Sabotage;
        decision.combat_target = Some("ZZZZZZZZZ".to_string());
        decision.combat_stake = Some(50);

        let (repaired, issues) = secretary.validate(decision, &ctx).await;
        assert_eq!(repaired.combat_stance, Stance::None);
        assert!(repaired.combat_target.is_none());
        assert!(repaired.combat_stake.is_none());
        assert!(issues.iter().any(|i| i.action == IssueAction::Removed));
    }

    #[tokio::test]
    async fn test_self_target_is_rejected() {
        let (grid, roster) = arena();
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.combat_stance = Stance::Attack;
        decision.combat_target = Some("KRUSHNAR".to_string());

        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert_eq!(repaired.combat_stance, Stance::None);
    }

    #[tokio::test]
    async fn test_oversized_combat_stake_capped() {
        let (grid, mut roster) = arena();
        roster[0].hp = 200;
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.combat_stance = Stance::Attack;
        decision.combat_target = Some("DEDFNG".to_string());
        decision.combat_stake = Some(999);

        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert_eq!(repaired.combat_stake, Some(60));
    }

    #[tokio::test]
    async fn test_cooldown_drops_skill() {
        let (grid, mut roster) = arena();
        roster[0].skill_cooldown = 2;
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.use_skill = true;
        let (repaired, issues) = secretary.validate(decision, &ctx).await;
        assert!(!repaired.use_skill);
        assert!(issues.iter().any(|i| i.field == "useSkill"));
    }

    #[tokio::test]
    async fn test_siphon_autopicks_highest_hp() {
        let (grid, mut roster) = arena();
        roster[0] = Agent::new(AgentClass::Parasite, "SAPMAW");
        roster[0].position = Some(Axial::new(0, 0));
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.use_skill = true;
        decision.skill_target = Some("NOBODY".to_string());
        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert!(repaired.use_skill);
        assert_eq!(repaired.skill_target.as_deref(), Some("DEDFNG"));
    }

    #[tokio::test]
    async fn test_invalid_move_discarded_and_storm_injection() {
        let (grid, mut roster) = arena();
        let secretary = Secretary::new();

        // Non-adjacent move gets discarded.
        let ctx_ok = ctx(&grid, &roster, ArenaPhase::Hunt);
        let mut decision = Decision::fallback();
        decision.movement = Some(Axial::new(3, 0));
        let (repaired, _) = secretary.validate(decision, &ctx_ok).await;
        assert!(repaired.movement.is_none());

        // Standing in the storm with no move: centre-ward injection.
        roster[0].position = Some(Axial::new(3, 0));
        let mut grid2 = HexGrid::new();
        grid2.place(roster[0].id, Axial::new(3, 0)).unwrap();
        grid2.place(roster[2].id, Axial::new(1, 0)).unwrap();
        let ctx_storm = SecretaryContext {
            agent: &roster[0],
            roster: &roster,
            grid: &grid2,
            phase: ArenaPhase::Blood,
        };
        let (repaired, issues) = secretary.validate(Decision::fallback(), &ctx_storm).await;
        let to = repaired.movement.expect("injected move");
        assert!(to.ring() < 3);
        assert!(issues.iter().any(|i| i.field == "move"));
    }

    #[tokio::test]
    async fn test_always_inject_flag() {
        let (grid, roster) = arena();
        let mut secretary = Secretary::new();
        secretary.always_inject_move = true;
        let ctx = ctx(&grid, &roster, ArenaPhase::Loot);
        let (repaired, _) = secretary.validate(Decision::fallback(), &ctx).await;
        assert!(repaired.movement.is_some());
    }

    #[tokio::test]
    async fn test_alliance_proposal_plus_break_keeps_break() {
        let (grid, mut roster) = arena();
        let ally_id = roster[2].id;
        let ally_name = roster[2].name.clone();
        roster[0].set_ally(ally_id, ally_name, 2);
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.propose_alliance = Some("DEDFNG".to_string());
        decision.break_alliance = true;
        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert!(repaired.propose_alliance.is_none());
        assert!(repaired.break_alliance);
    }

    #[tokio::test]
    async fn test_alliance_proposal_to_dead_dropped() {
        let (grid, roster) = arena();
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);

        let mut decision = Decision::fallback();
        decision.propose_alliance = Some("DEADGUY".to_string());
        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert!(repaired.propose_alliance.is_none());
    }

    #[tokio::test]
    async fn test_break_without_ally_cleared() {
        let (grid, roster) = arena();
        let secretary = Secretary::new();
        let ctx = ctx(&grid, &roster, ArenaPhase::Hunt);
        let mut decision = Decision::fallback();
        decision.break_alliance = true;
        let (repaired, _) = secretary.validate(decision, &ctx).await;
        assert!(!repaired.break_alliance);
    }

    #[test]
    fn test_coerce_unknown_everything() {
        let raw: RawDecision = serde_json::from_str(
            r#"{"prediction":{"asset":"DOGE","direction":"sideways","stake":-5},
                "combatStance":"FLEE","move":{"q":1.5,"r":0.0}}"#,
        )
        .unwrap();
        let (decision, issues) = Secretary::coerce(&raw);
        assert_eq!(decision.prediction.asset, Asset::Eth);
        assert_eq!(decision.prediction.direction, Direction::Up);
        assert_eq!(decision.prediction.stake_percent, MIN_STAKE_PERCENT);
        assert_eq!(decision.combat_stance, Stance::None);
        assert!(decision.movement.is_none());
        assert!(issues.len() >= 4);
    }
}
