//! Agent strategies.
//!
//! Five classes implement the same `Strategy` contract; none share an
//! inheritance chain. Each holds its class personality (the model's system
//! prompt) and an authoritative guardrail layer the model cannot drift
//! past: forbidden stances are rewritten, stakes are clamped, and a
//! `[Guardrails: ...]` suffix lands on the reasoning for observability.
//!
//! With no model client attached a strategy falls back to its own
//! heuristic, which implements the documented class policy directly. That
//! is also the offline "simulation mode".

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{AgentClass, AgentSnapshot};
use crate::decision::{Decision, DecisionRequest, Direction, Prediction};
use crate::hex::Axial;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError};
use crate::market::Asset;
use crate::secretary::Secretary;
use crate::skills::{self, SkillDefinition};

mod gambler;
mod parasite;
mod scripted;
mod survivor;
mod trader;
mod warrior;

pub use gambler::GamblerStrategy;
pub use parasite::ParasiteStrategy;
pub use scripted::ScriptedStrategy;
pub use survivor::SurvivorStrategy;
pub use trader::TraderStrategy;
pub use warrior::WarriorStrategy;

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyError {
    Llm(LlmError),
    Parse(String),
}

impl std::fmt::Display for StrategyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyError::Llm(err) => write!(f, "model call failed: {}", err),
            StrategyError::Parse(msg) => write!(f, "unparseable model output: {}", msg),
        }
    }
}

impl std::error::Error for StrategyError {}

/// The capability every class implements. Strategies are pure over the
/// request plus their own model provider; the coordinator never observes
/// strategy-internal state.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn class(&self) -> AgentClass;

    /// The class's public personality: its system prompt.
    fn personality(&self) -> &'static str;

    fn skill(&self) -> SkillDefinition {
        skills::definition(self.class())
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, StrategyError>;
}

/// Build the strategy for a class. `client` of `None` forces heuristic
/// (simulation) mode; `seed` drives every probabilistic class choice.
pub fn strategy_for_class(
    class: AgentClass,
    client: Option<Arc<dyn LlmClient>>,
    seed: u64,
) -> Box<dyn Strategy> {
    match class {
        AgentClass::Warrior => Box::new(WarriorStrategy::new(client)),
        AgentClass::Trader => Box::new(TraderStrategy::new(client, seed)),
        AgentClass::Survivor => Box::new(SurvivorStrategy::new(client, seed)),
        AgentClass::Parasite => Box::new(ParasiteStrategy::new(client)),
        AgentClass::Gambler => Box::new(GamblerStrategy::new(client, seed)),
    }
}

// ============================================================================
// Shared plumbing
// ============================================================================

/// Render the decision request as the model's user prompt.
pub(crate) fn render_request(request: &DecisionRequest) -> String {
    let me = &request.agent;
    let mut out = format!(
        "You are {} ({}), {}/{} HP, {} kills.\n\n=== ARENA ===\n{}\n=== SKILL ===\n{}\n=== ALLIANCE ===\n{}\n",
        me.name,
        me.class,
        me.hp,
        me.max_hp,
        me.kills,
        request.spatial_context,
        request.skill_context,
        request.alliance_context,
    );
    out.push_str("\n=== MARKET (% change last epoch) ===\n");
    for asset in Asset::ALL {
        out.push_str(&format!(
            "{}: {:.2} ({:+.2}%)\n",
            asset,
            request.market.prices.get(asset),
            request.market.changes.get(asset),
        ));
    }
    if !request.recent_lessons.is_empty() {
        out.push_str("\n=== LESSONS ===\n");
        for lesson in &request.recent_lessons {
            out.push_str(&format!("- {}\n", lesson));
        }
    }
    out.push_str(
        "\nRespond with ONLY a JSON object: {\"prediction\":{\"asset\":\"ETH|BTC|SOL|MON\",\
         \"direction\":\"UP|DOWN\",\"stake\":5-50},\"combatStance\":\"ATTACK|SABOTAGE|DEFEND|NONE\",\
         \"combatTarget\":\"name\",\"combatStake\":number,\"move\":{\"q\":0,\"r\":0},\
         \"useSkill\":bool,\"skillTarget\":\"name\",\"proposeAlliance\":\"name\",\
         \"breakAlliance\":bool,\"reasoning\":\"one sentence\"}",
    );
    out
}

/// Ask the model for a decision and coerce it into the typed schema.
pub(crate) async fn model_decision(
    client: &dyn LlmClient,
    personality: &'static str,
    request: &DecisionRequest,
) -> Result<Decision, StrategyError> {
    let messages = [
        ChatMessage::system(personality),
        ChatMessage::user(render_request(request)),
    ];
    let reply = client
        .chat(&messages, ChatOptions::default())
        .await
        .map_err(StrategyError::Llm)?;
    let raw = crate::decision::parse_raw(&reply.content)
        .map_err(|err| StrategyError::Parse(err.to_string()))?;
    Ok(Secretary::coerce(&raw).0)
}

/// Clamp the prediction stake into a class band, recording a note.
pub(crate) fn clamp_stake(decision: &mut Decision, lo: u32, hi: u32, notes: &mut Vec<String>) {
    let stake = decision.prediction.stake_percent;
    let clamped = stake.clamp(lo, hi);
    if clamped != stake {
        notes.push(format!("stake {} clamped to class band {}-{}", stake, lo, hi));
        decision.prediction.stake_percent = clamped;
    }
}

/// Follow the strongest mover: the asset with the largest absolute change,
/// direction matching its momentum.
pub(crate) fn momentum_prediction(request: &DecisionRequest, stake: u32) -> Prediction {
    let asset = Asset::ALL
        .into_iter()
        .max_by(|a, b| {
            request
                .market
                .changes
                .get(*a)
                .abs()
                .partial_cmp(&request.market.changes.get(*b).abs())
                .unwrap()
        })
        .unwrap_or(Asset::Eth);
    let direction = if request.market.changes.get(asset) < 0.0 {
        Direction::Down
    } else {
        Direction::Up
    };
    Prediction {
        asset,
        direction,
        stake_percent: stake,
    }
}

/// The adjacent live opponent with the least HP.
pub(crate) fn lowest_hp_adjacent<'a>(request: &'a DecisionRequest) -> Option<&'a AgentSnapshot> {
    request
        .adjacent_opponents()
        .into_iter()
        .min_by(|a, b| a.hp.cmp(&b.hp).then(a.id.cmp(&b.id)))
}

/// One step from `from` that closes the distance to `goal`, avoiding tiles
/// other agents are standing on. Grid-level validity is the secretary's job.
pub(crate) fn step_toward(
    request: &DecisionRequest,
    from: Axial,
    goal: Axial,
) -> Option<Axial> {
    let occupied: Vec<Axial> = request
        .others
        .iter()
        .filter(|o| o.alive)
        .filter_map(|o| o.position)
        .collect();
    from.neighbors()
        .into_iter()
        .filter(|n| n.ring() <= crate::hex::ARENA_RADIUS && !occupied.contains(n))
        .min_by_key(|n| (n.distance(goal), n.ring(), n.q, n.r))
        .filter(|n| n.distance(goal) < from.distance(goal))
}

/// One step that increases distance from every adjacent opponent.
pub(crate) fn step_away(request: &DecisionRequest, from: Axial) -> Option<Axial> {
    let threats: Vec<Axial> = request
        .adjacent_opponents()
        .iter()
        .filter_map(|o| o.position)
        .collect();
    if threats.is_empty() {
        return None;
    }
    let occupied: Vec<Axial> = request
        .others
        .iter()
        .filter(|o| o.alive)
        .filter_map(|o| o.position)
        .collect();
    from.neighbors()
        .into_iter()
        .filter(|n| n.ring() <= crate::hex::ARENA_RADIUS && !occupied.contains(n))
        .max_by_key(|n| {
            let total: i32 = threats.iter().map(|t| n.distance(*t)).sum();
            (total, -n.ring(), n.q, n.r)
        })
}


#[cfg(test)]
mod tests {
    use super::testutil::request_with;
    use super::*;

    #[test]
    fn test_momentum_prediction_follows_biggest_mover() {
        let request = request_with(AgentClass::Trader, 1000, vec![]);
        let prediction = momentum_prediction(&request, 20);
        assert_eq!(prediction.asset, Asset::Btc);
        assert_eq!(prediction.direction, Direction::Down);
    }

    #[test]
    fn test_lowest_hp_adjacent_ignores_distant() {
        let request = request_with(
            AgentClass::Warrior,
            1000,
            vec![
                (AgentClass::Trader, 200, Axial::new(1, 0)),
                (AgentClass::Parasite, 50, Axial::new(2, 0)),
                (AgentClass::Survivor, 600, Axial::new(0, 1)),
            ],
        );
        let target = lowest_hp_adjacent(&request).unwrap();
        assert_eq!(target.hp, 200);
    }

    #[test]
    fn test_step_toward_closes_distance() {
        let request = request_with(AgentClass::Warrior, 1000, vec![]);
        let step = step_toward(&request, Axial::new(2, 0), Axial::ORIGIN).unwrap();
        assert_eq!(step.distance(Axial::ORIGIN), 1);
    }

    #[test]
    fn test_step_away_increases_distance() {
        let request = request_with(
            AgentClass::Survivor,
            1000,
            vec![(AgentClass::Warrior, 900, Axial::new(1, 0))],
        );
        let step = step_away(&request, Axial::new(0, 0)).unwrap();
        assert!(step.distance(Axial::new(1, 0)) > 1);
    }

    #[test]
    fn test_clamp_stake_notes() {
        let mut decision = Decision::fallback();
        decision.prediction.stake_percent = 45;
        let mut notes = Vec::new();
        clamp_stake(&mut decision, 15, 25, &mut notes);
        assert_eq!(decision.prediction.stake_percent, 25);
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_model_decision_path() {
        use crate::llm::ScriptedClient;

        let client = ScriptedClient::new(
            "test",
            vec![r#"{"prediction":{"asset":"sol","direction":"up","stake":30},"combatStance":"NONE","reasoning":"ride the wave"}"#.to_string()],
        );
        let request = request_with(AgentClass::Warrior, 1000, vec![]);
        let decision = model_decision(&client, "prompt", &request).await.unwrap();
        assert_eq!(decision.prediction.asset, Asset::Sol);
        assert_eq!(decision.prediction.stake_percent, 30);
        assert_eq!(decision.reasoning, "ride the wave");
    }

    #[tokio::test]
    async fn test_model_decision_parse_error() {
        use crate::llm::ScriptedClient;

        let client = ScriptedClient::new("test", vec!["not json at all".to_string()]);
        let request = request_with(AgentClass::Warrior, 1000, vec![]);
        let err = model_decision(&client, "prompt", &request).await.unwrap_err();
        assert!(matches!(err, StrategyError::Parse(_)));
    }
}
