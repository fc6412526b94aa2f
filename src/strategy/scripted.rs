//! A strategy that replays queued decisions. Test harness plumbing, also
//! handy for demo battles with fixed choreography.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::AgentClass;
use crate::decision::{Decision, DecisionRequest};

use super::{Strategy, StrategyError};

pub struct ScriptedStrategy {
    class: AgentClass,
    queue: Mutex<VecDeque<Decision>>,
    /// What to do once the script runs out.
    exhausted: Exhausted,
}

enum Exhausted {
    Fallback,
    Fail,
}

impl ScriptedStrategy {
    /// Replays `decisions`, then answers with the fallback decision.
    pub fn new(class: AgentClass, decisions: Vec<Decision>) -> Self {
        Self {
            class,
            queue: Mutex::new(decisions.into()),
            exhausted: Exhausted::Fallback,
        }
    }

    /// Replays `decisions`, then errors — exercises the coordinator's
    /// fallback substitution path.
    pub fn failing_after(class: AgentClass, decisions: Vec<Decision>) -> Self {
        Self {
            class,
            queue: Mutex::new(decisions.into()),
            exhausted: Exhausted::Fail,
        }
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn class(&self) -> AgentClass {
        self.class
    }

    fn personality(&self) -> &'static str {
        "Scripted."
    }

    async fn decide(&self, _request: &DecisionRequest) -> Result<Decision, StrategyError> {
        match self.queue.lock().unwrap().pop_front() {
            Some(decision) => Ok(decision),
            None => match self.exhausted {
                Exhausted::Fallback => Ok(Decision::fallback()),
                Exhausted::Fail => Err(StrategyError::Parse("script exhausted".to_string())),
            },
        }
    }
}
