//! The parasite: feeds on the dying and siphons the strong.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest, Stance};
use crate::llm::LlmClient;

use super::{Strategy, StrategyError, clamp_stake, model_decision, momentum_prediction, step_toward};

const PERSONALITY: &str = "You are a PARASITE gladiator: patient, opportunistic, never in a \
fair fight. Stake 5-15%, sabotage only gladiators already on death's door, and SIPHON the \
healthiest fighter's HP when the skill is off cooldown.";

/// Sabotage only targets below this fraction of max HP.
const PREY_FRACTION: f64 = 0.15;

pub struct ParasiteStrategy {
    client: Option<Arc<dyn LlmClient>>,
}

impl ParasiteStrategy {
    pub fn new(client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { client }
    }

    fn heuristic(&self, request: &DecisionRequest) -> Decision {
        let mut decision = Decision::fallback();
        decision.prediction = momentum_prediction(request, 10);

        let dying = request
            .adjacent_opponents()
            .into_iter()
            .find(|o| (o.hp as f64) < PREY_FRACTION * o.max_hp as f64)
            .map(|o| o.name.clone());
        if let Some(prey) = dying {
            decision.combat_stance = Stance::Sabotage;
            decision.combat_stake = Some((request.agent.hp / 10).max(1));
            decision.reasoning = format!("{} is nearly gone. Helping them along.", prey);
            decision.combat_target = Some(prey);
        } else if let Some(from) = request.agent.position {
            // Drift toward the weakest live opponent and wait.
            let goal = request
                .live_opponents()
                .into_iter()
                .min_by_key(|o| o.hp)
                .and_then(|o| o.position);
            if let Some(goal) = goal {
                decision.movement = step_toward(request, from, goal);
            }
            decision.reasoning = "Shadowing the weakest. Patience.".to_string();
        }
        if request.agent.skill_cooldown == 0 {
            decision.use_skill = true;
            decision.skill_target = request
                .live_opponents()
                .into_iter()
                .max_by_key(|o| o.hp)
                .map(|o| o.name.clone());
        }
        decision
    }

    /// Stake band 5-15; ATTACK becomes SABOTAGE; sabotage is dropped
    /// against anything still healthy.
    fn guardrails(&self, mut decision: Decision, request: &DecisionRequest) -> Decision {
        let mut notes = Vec::new();
        clamp_stake(&mut decision, 5, 15, &mut notes);

        if decision.combat_stance == Stance::Attack {
            notes.push("attack converted to sabotage".to_string());
            decision.combat_stance = Stance::Sabotage;
        }
        if decision.combat_stance == Stance::Sabotage {
            let healthy_target = decision
                .combat_target
                .as_deref()
                .and_then(|name| {
                    request
                        .others
                        .iter()
                        .find(|o| o.name.eq_ignore_ascii_case(name.trim()))
                })
                .map(|o| (o.hp as f64) >= PREY_FRACTION * o.max_hp as f64)
                .unwrap_or(false);
            if healthy_target {
                notes.push("target too healthy to bleed, standing down".to_string());
                decision.combat_stance = Stance::None;
                decision.combat_target = None;
                decision.combat_stake = None;
            }
        }
        decision.note_guardrails(&notes);
        decision
    }
}

#[async_trait]
impl Strategy for ParasiteStrategy {
    fn class(&self) -> AgentClass {
        AgentClass::Parasite
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
    async fn test_sabotage_against_healthy_target_dropped() {
        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"MON","direction":"UP","stake":12},"combatStance":"SABOTAGE","combatTarget":"FOE0","combatStake":50,"reasoning":"bleed them"}"#.to_string()],
        ));
        let strategy = ParasiteStrategy::new(Some(client));
        let request = request_with(
            AgentClass::Parasite,
            1000,
            vec![(AgentClass::Warrior, 800, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::None);
        assert!(decision.reasoning.contains("[Guardrails:"));
    }

    #[tokio::test]
    async fn test_sabotage_against_dying_target_kept() {
        let strategy = ParasiteStrategy::new(None);
        let request = request_with(
            AgentClass::Parasite,
            1000,
            vec![(AgentClass::Warrior, 120, Axial::new(1, 0))],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.combat_stance, Stance::Sabotage);
        assert_eq!(decision.combat_target.as_deref(), Some("FOE0"));
    }

    #[tokio::test]
    async fn test_siphon_targets_highest_hp() {
        let strategy = ParasiteStrategy::new(None);
        let request = request_with(
            AgentClass::Parasite,
            1000,
            vec![
                (AgentClass::Warrior, 400, Axial::new(2, 0)),
                (AgentClass::Survivor, 950, Axial::new(0, 2)),
            ],
        );
        let decision = strategy.decide(&request).await.unwrap();
        assert!(decision.use_skill);
        assert_eq!(decision.skill_target.as_deref(), Some("FOE1"));
    }

    #[tokio::test]
    async fn test_stake_band() {
        let client = Arc::new(ScriptedClient::new(
            "m",
            vec![r#"{"prediction":{"asset":"MON","direction":"DOWN","stake":45},"combatStance":"NONE","reasoning":"greed"}"#.to_string()],
        ));
        let strategy = ParasiteStrategy::new(Some(client));
        let request = request_with(AgentClass::Parasite, 1000, vec![]);
        let decision = strategy.decide(&request).await.unwrap();
        assert_eq!(decision.prediction.stake_percent, 15);
    }
}
