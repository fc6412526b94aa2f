//! The gambler: every choice is a roll of the dice.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest, Direction, Prediction, Stance};
use crate::hex::ARENA_RADIUS;
use crate::llm::LlmClient;
use crate::market::Asset;

use super::{Strategy, StrategyError, model_decision};

const PERSONALITY: &str = "You are a GAMBLER gladiator: chaos is your edge. Pick any asset, \
any direction, any stake; swing, sneak, or stand still on a whim. ALL_IN doubles whatever \
your prediction wins or loses. Fortune favours the reckless.";

pub struct GamblerStrategy {
    client: Option<Arc<dyn LlmClient>>,
    rng: Mutex<StdRng>,
}

impl GamblerStrategy {
    pub fn new(client: Option<Arc<dyn LlmClient>>, seed: u64) -> Self {
        Self {
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniform draws across every legal option.
    fn heuristic(&self, request: &DecisionRequest) -> Decision {
        let mut rng = self.rng.lock().unwrap();
        let mut decision = Decision::fallback();

        decision.prediction = Prediction {
            asset: Asset::ALL[rng.random_range(0..4)],
            direction: if rng.random_bool(0.5) {
                Direction::Up
            } else {
                Direction::Down
            },
            stake_percent: rng.random_range(5..=50),
        };

        let adjacent = request.adjacent_opponents();
        let stance_roll = rng.random_range(0..4);
        decision.combat_stance = match stance_roll {
            0 if !adjacent.is_empty() => Stance::Attack,
            1 if !adjacent.is_empty() => Stance::Sabotage,
            2 => Stance::Defend,
            _ => Stance::None,
        };
        if decision.combat_stance.is_aggressive() {
            let target = adjacent[rng.random_range(0..adjacent.len())];
            decision.combat_target = Some(target.name.clone());
            decision.combat_stake = Some(rng.random_range(1..=(request.agent.hp / 4).max(1)));
        }

        if let Some(from) = request.agent.position
            && rng.random_bool(0.5)
        {
            let occupied: Vec<_> = request
                .others
                .iter()
                .filter(|o| o.alive)
                .filter_map(|o| o.position)
                .collect();
            let options: Vec<_> = from
                .neighbors()
                .into_iter()
                .filter(|n| n.ring() <= ARENA_RADIUS && !occupied.contains(n))
                .collect();
            if !options.is_empty() {
                decision.movement = Some(options[rng.random_range(0..options.len())]);
            }
        }

        decision.use_skill = request.agent.skill_cooldown == 0 && rng.random_bool(0.3);
        decision.reasoning = "The dice say so.".to_string();
        decision
    }
}

#[async_trait]
impl Strategy for GamblerStrategy {
    fn class(&self) -> AgentClass {
        AgentClass::Gambler
    }

    fn personality(&self) -> &'static str {
        PERSONALITY
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, StrategyError> {
        // No guardrail rewrites: chance is the class identity. The class
        // damage bonus is rolled at combat resolution, not here.
        match &self.client {
            Some(client) => model_decision(client.as_ref(), PERSONALITY, request).await,
            None => Ok(self.heuristic(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::Axial;
    use crate::strategy::testutil::request_with;

    #[tokio::test]
    async fn test_heuristic_is_deterministic_under_seed() {
        let request = request_with(
            AgentClass::Gambler,
            1000,
            vec![(AgentClass::Warrior, 500, Axial::new(1, 0))],
        );
        let one = GamblerStrategy::new(None, 42).decide(&request).await.unwrap();
        let two = GamblerStrategy::new(None, 42).decide(&request).await.unwrap();
        assert_eq!(one, two);
    }

    #[tokio::test]
    async fn test_heuristic_only_picks_legal_options() {
        let request = request_with(
            AgentClass::Gambler,
            800,
            vec![(AgentClass::Warrior, 500, Axial::new(1, 0))],
        );
        for seed in 0..100 {
            let strategy = GamblerStrategy::new(None, seed);
            let decision = strategy.decide(&request).await.unwrap();
            assert!((5..=50).contains(&decision.prediction.stake_percent));
            if decision.combat_stance.is_aggressive() {
                assert_eq!(decision.combat_target.as_deref(), Some("FOE0"));
                let stake = decision.combat_stake.unwrap();
                assert!(stake >= 1 && stake <= 200);
            }
            if let Some(step) = decision.movement {
                assert!(step.ring() <= ARENA_RADIUS);
                assert_ne!(Some(step), request.others[0].position);
            }
        }
    }

    #[tokio::test]
    async fn test_no_aggression_without_adjacency() {
        let request = request_with(AgentClass::Gambler, 800, vec![]);
        for seed in 0..50 {
            let strategy = GamblerStrategy::new(None, seed);
            let decision = strategy.decide(&request).await.unwrap();
            assert!(!decision.combat_stance.is_aggressive());
        }
    }
}
