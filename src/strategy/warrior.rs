//! The warrior: hunts the weakest adjacent opponent and stakes big.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest, Stance};
use crate::llm::LlmClient;

use super::{
    Strategy, StrategyError, clamp_stake, lowest_hp_adjacent, model_decision, momentum_prediction,
    step_toward,
};

const PERSONALITY: &str = "You are a WARRIOR gladiator: a frontline brawler who lives for the \
kill. Hunt the weakest adjacent opponent, stake 30-50% on your market calls, and never hide \
behind DEFEND unless you are nearly dead. BERSERK doubles your attack damage for one epoch at \
the price of taking half again as much.";

/// Warriors hide only below this HP fraction.
const DESPERATION: f64 = 0.20;

pub struct WarriorStrategy {
    client: Option<Arc<dyn LlmClient>>,
}

impl WarriorStrategy {
    pub fn new(client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { client }
    }

    fn heuristic(&self, request: &DecisionRequest) -> Decision {
        let mut decision = Decision::fallback();
        decision.prediction = momentum_prediction(request, 40);

        if request.agent.hp_fraction() < DESPERATION {
            decision.combat_stance = Stance::Defend;
            decision.reasoning = "Bloodied. Guarding until an opening shows.".to_string();
        } else if let Some(prey) = lowest_hp_adjacent(request) {
            decision.combat_stance = Stance::Attack;
            decision.combat_target = Some(prey.name.clone());
            decision.combat_stake = Some((request.agent.hp / 5).max(1));
            decision.use_skill = request.agent.skill_cooldown == 0;
            decision.reasoning = format!("{} is weakest in reach. Taking the head.", prey.name);
        } else if let (Some(from), Some(goal)) = (
            request.agent.position,
            request
                .live_opponents()
                .iter()
                .filter_map(|o| o.position)
                .min_by_key(|p| request.agent.position.map(|f| f.distance(*p)).unwrap_or(i32::MAX)),
        ) {
            decision.movement = step_toward(request, from, goal);
            decision.reasoning = "Closing the gap to the nearest fight.".to_string();
        }
        decision
    }

    /// The class guardrails: stake band 30-50, no cowering above 20% HP.
    fn guardrails(&self, mut decision: Decision, request: &DecisionRequest) -> Decision {
        let mut notes = Vec::new();
        clamp_stake(&mut decision, 30, 50, &mut notes);

        let desperate = request.agent.hp_fraction() < DESPERATION;
        if decision.combat_stance == Stance::Defend && !desperate {
            match lowest_hp_adjacent(request) {
                Some(prey) => {
                    notes.push(format!("defend overruled, hunting {}", prey.name));
                    decision.combat_stance = Stance::Attack;
                    decision.combat_target = Some(prey.name.clone());
                    decision.combat_stake = None;
                }
                None => {
                    notes.push("defend overruled, nothing in reach".to_string());
                    decision.combat_stance = Stance::None;
                }
            }
        }
        if decision.combat_stance == Stance::None
            && !desperate
            && let Some(prey) = lowest_hp_adjacent(request)
        {
            notes.push(format!("passivity overruled, hunting {}", prey.name));
            decision.combat_stance = Stance::Attack;
            decision.combat_target = Some(prey.name.clone());
        }
        if decision.combat_stance == Stance::Attack && decision.combat_target.is_none() {
            decision.combat_target = lowest_hp_adjacent(request).map(|p| p.name.clone());
        }
        decision.note_guardrails(&notes);
        decision
    }
}

#[async_trait]
impl Strategy for WarriorStrategy {
    fn class(&self) -> AgentClass {
        AgentClass::Warrior
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
    use crate::strategy::testutil::request_with;

    #[tokio::test]
    async fn test_heuristic_hunts_weakest_adjacent() {
        let strategy = WarriorStrategy::new(None);
        let request = request_with(
            AgentClass::Warrior,
            1000,
            vec![
                (AgentClass::Trader, 700, Axial::new(1, 0)),
                (AgentClass::Parasite, 150, Axial::new(0, 1)),
            ],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::Attack);
        assert_eq!(decision.combat_target.as_deref(), Some("FOE1"));
        assert!(decision.use_skill);
        assert!(decision.prediction.stake_percent >= 30);
    }

    #[tokio::test]
    async fn test_guardrails_overrule_cowardice() {
        use crate::llm::ScriptedClient;

        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"ETH","direction":"UP","stake":10},"combatStance":"DEFEND","reasoning":"hiding"}"#.to_string()],
        ));
        let strategy = WarriorStrategy::new(Some(client));
        let request = request_with(
            AgentClass::Warrior,
            900,
            vec![(AgentClass::Trader, 300, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::Attack);
        assert_eq!(decision.prediction.stake_percent, 30);
        assert!(decision.reasoning.contains("[Guardrails:"));
    }

    #[tokio::test]
    async fn test_defend_allowed_when_desperate() {
        let strategy = WarriorStrategy::new(None);
        let request = request_with(
            AgentClass::Warrior,
            150,
            vec![(AgentClass::Trader, 800, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::Defend);
    }

    #[tokio::test]
    async fn test_moves_toward_distant_prey() {
        let strategy = WarriorStrategy::new(None);
        let request = request_with(
            AgentClass::Warrior,
            1000,
            vec![(AgentClass::Survivor, 500, Axial::new(3, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        let step = decision.movement.expect("closes distance");
        assert!(step.distance(Axial::new(3, 0)) < 3);
    }
}
