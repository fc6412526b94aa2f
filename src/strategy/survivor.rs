//! The survivor: outlast everyone, never start a fight.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest, Stance};
use crate::llm::LlmClient;

use super::{Strategy, StrategyError, model_decision, momentum_prediction, step_away, step_toward};

const PERSONALITY: &str = "You are a SURVIVOR gladiator: the last one breathing wins. Tiny \
stakes (5-10%), zero aggression, defend relentlessly, and drift toward the safe centre as the \
storm closes. FORTIFY makes you untouchable for one epoch, bleed included.";

const LOW_HP_FRACTION: f64 = 0.30;
const DEFEND_P: f64 = 0.90;
const DEFEND_P_THREATENED: f64 = 0.95;

pub struct SurvivorStrategy {
    client: Option<Arc<dyn LlmClient>>,
    rng: Mutex<StdRng>,
}

impl SurvivorStrategy {
    pub fn new(client: Option<Arc<dyn LlmClient>>, seed: u64) -> Self {
        Self {
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn class_stake(request: &DecisionRequest) -> u32 {
        if request.agent.hp_fraction() <= LOW_HP_FRACTION {
            5
        } else {
            7
        }
    }

    fn heuristic(&self, request: &DecisionRequest) -> Decision {
        let mut decision = Decision::fallback();
        decision.prediction = momentum_prediction(request, Self::class_stake(request));

        let threatened = !request.adjacent_opponents().is_empty();
        let anyone_alive = !request.live_opponents().is_empty();
        let p = if threatened { DEFEND_P_THREATENED } else { DEFEND_P };
        if anyone_alive && self.rng.lock().unwrap().random_bool(p) {
            decision.combat_stance = Stance::Defend;
        }
        decision.use_skill = request.agent.skill_cooldown == 0
            && (threatened || request.agent.hp_fraction() < 0.5);

        if let Some(from) = request.agent.position {
            decision.movement = step_away(request, from)
                .or_else(|| step_toward(request, from, crate::hex::Axial::ORIGIN));
        }
        decision.reasoning = "Keep breathing, keep drifting centreward.".to_string();
        decision
    }

    /// All aggression is stripped; stakes stay in 5-10 (5 when low);
    /// defend stands down when nobody is left to fear.
    fn guardrails(&self, mut decision: Decision, request: &DecisionRequest) -> Decision {
        let mut notes = Vec::new();

        if decision.combat_stance.is_aggressive() {
            notes.push("aggression stripped, survivors do not swing".to_string());
            decision.combat_stance = Stance::None;
            decision.combat_target = None;
            decision.combat_stake = None;
        }

        let cap = if request.agent.hp_fraction() <= LOW_HP_FRACTION {
            5
        } else {
            10
        };
        let stake = decision.prediction.stake_percent;
        let clamped = stake.clamp(5, cap);
        if clamped != stake {
            notes.push(format!("stake {} clamped to {}", stake, clamped));
            decision.prediction.stake_percent = clamped;
        }

        if decision.combat_stance == Stance::Defend && request.live_opponents().is_empty() {
            notes.push("no aggressors left, standing down".to_string());
            decision.combat_stance = Stance::None;
        }
        decision.note_guardrails(&notes);
        decision
    }
}

#[async_trait]
impl Strategy for SurvivorStrategy {
    fn class(&self) -> AgentClass {
        AgentClass::Survivor
    }

    fn personality(&self) -> &'static str {
        PERSONALITY
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, StrategyError> {
        let base = match &self.client {
            Some(client) => model_decision(client.as_ref(), PERSONALITY, request).await?,
            None => self.heuristic(request),
        };
        Ok(self.guardrails(base, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::Axial;
    use crate::llm::ScriptedClient;
    use crate::strategy::testutil::request_with;

    #[tokio::test]
    async fn test_aggression_always_stripped() {
        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"SOL","direction":"UP","stake":30},"combatStance":"ATTACK","combatTarget":"FOE0","combatStake":200,"reasoning":"rage"}"#.to_string()],
        ));
        let strategy = SurvivorStrategy::new(Some(client), 1);
        let request = request_with(
            AgentClass::Survivor,
            1000,
            vec![(AgentClass::Warrior, 900, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::None);
        assert!(decision.combat_target.is_none());
        assert!((5..=10).contains(&decision.prediction.stake_percent));
    }

    #[tokio::test]
    async fn test_low_hp_forces_minimum_stake() {
        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"SOL","direction":"UP","stake":10},"combatStance":"NONE","reasoning":"steady"}"#.to_string()],
        ));
        let strategy = SurvivorStrategy::new(Some(client), 1);
        let request = request_with(AgentClass::Survivor, 250, vec![(AgentClass::Warrior, 900, Axial::new(2, 0))]);
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.prediction.stake_percent, 5);
    }

    #[tokio::test]
    async fn test_defend_stands_down_with_no_opponents() {
        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"SOL","direction":"UP","stake":8},"combatStance":"DEFEND","reasoning":"walls up"}"#.to_string()],
        ));
        let strategy = SurvivorStrategy::new(Some(client), 1);
        let request = request_with(AgentClass::Survivor, 1000, vec![]);
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::None);
    }

    #[tokio::test]
    async fn test_heuristic_defends_nearly_always_when_threatened() {
        let request = request_with(
            AgentClass::Survivor,
            1000,
            vec![(AgentClass::Warrior, 900, Axial::new(1, 0))],
        );
        let mut defends = 0;
        for seed in 0..100 {
            let strategy = SurvivorStrategy::new(None, seed);
            if strategy.decide(&request).await.unwrap().combat_stance == Stance::Defend {
                defends += 1;
            }
        }
        assert!(defends >= 85, "defends = {}", defends);
    }

    #[tokio::test]
    async fn test_heuristic_retreats_from_threats() {
        let strategy = SurvivorStrategy::new(None, 4);
        let request = request_with(
            AgentClass::Survivor,
            1000,
            vec![(AgentClass::Warrior, 900, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        if let Some(step) = decision.movement {
            assert!(step.distance(Axial::new(1, 0)) > 1);
        }
    }
}
