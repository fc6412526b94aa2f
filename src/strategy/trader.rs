//! The trader: market-first, combat-averse, sabotage over brawling.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest, Stance};
use crate::llm::LlmClient;

use super::{Strategy, StrategyError, clamp_stake, model_decision, momentum_prediction};

const PERSONALITY: &str = "You are a TRADER gladiator: the market is your weapon. Stake 15-25% \
on well-reasoned calls, never throw a punch (sabotage quietly if you must), and defend when \
exposed. INSIDER_INFO makes one prediction a guaranteed win.";

/// Defend probabilities at full and low HP.
const DEFEND_P_HEALTHY: f64 = 0.3;
const DEFEND_P_HURT: f64 = 0.6;
const HURT_FRACTION: f64 = 0.4;

pub struct TraderStrategy {
    client: Option<Arc<dyn LlmClient>>,
    rng: Mutex<StdRng>,
}

impl TraderStrategy {
    pub fn new(client: Option<Arc<dyn LlmClient>>, seed: u64) -> Self {
        Self {
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn heuristic(&self, request: &DecisionRequest) -> Decision {
        let mut decision = Decision::fallback();
        decision.prediction = momentum_prediction(request, 20);
        decision.use_skill =
            request.agent.skill_cooldown == 0 && decision.prediction.stake_percent >= 20;

        let p = if request.agent.hp_fraction() < HURT_FRACTION {
            DEFEND_P_HURT
        } else {
            DEFEND_P_HEALTHY
        };
        if self.rng.lock().unwrap().random_bool(p) && !request.live_opponents().is_empty() {
            decision.combat_stance = Stance::Defend;
        }
        decision.reasoning = format!(
            "Momentum favours {}; position sized, exposure managed.",
            decision.prediction.asset
        );
        decision
    }

    /// Stake band 15-25; ATTACK is stripped to SABOTAGE (or nothing).
    fn guardrails(&self, mut decision: Decision, request: &DecisionRequest) -> Decision {
        let mut notes = Vec::new();
        clamp_stake(&mut decision, 15, 25, &mut notes);

        if decision.combat_stance == Stance::Attack {
            if decision.combat_target.is_some() && !request.adjacent_opponents().is_empty() {
                notes.push("attack converted to sabotage".to_string());
                decision.combat_stance = Stance::Sabotage;
            } else {
                notes.push("attack stripped".to_string());
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
impl Strategy for TraderStrategy {
    fn class(&self) -> AgentClass {
        AgentClass::Trader
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
