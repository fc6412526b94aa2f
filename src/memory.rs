//! Three-layer generative memory.
//!
//! - Observations: raw per-epoch happenings with importance and tags
//! - Reflections: insights synthesised from at least three tagged observations
//! - Plans: actionable strategies derived from at least one reflection
//!
//! The coordinator holds a read-through reference; the durable copy lives
//! behind the store with last-writer-wins semantics per record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, BattleId, ObservationId, PlanId, ReflectionId};

/// Minimum observations behind one reflection.
pub const REFLECTION_MIN_SOURCES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub agent_id: AgentId,
    pub battle_id: BattleId,
    pub epoch: u32,
    pub description: String,
    /// Clamped into `[1, 10]` on insert.
    pub importance: u8,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: ReflectionId,
    pub agent_id: AgentId,
    pub insight: String,
    /// 1 = tactical .. 3 = strategic.
    pub abstraction: u8,
    pub source_observations: Vec<ObservationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Applied,
    Superseded,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub agent_id: AgentId,
    pub strategy: String,
    pub status: PlanStatus,
    pub source_reflections: Vec<ReflectionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryError {
    /// A reflection referenced an observation id that does not exist.
    UnknownObservation(ObservationId),
    /// A plan referenced a reflection id that does not exist.
    UnknownReflection(ReflectionId),
    /// Fewer sources than the layer requires.
    TooFewSources { got: usize, need: usize },
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::UnknownObservation(id) => write!(f, "unknown observation {}", id),
            MemoryError::UnknownReflection(id) => write!(f, "unknown reflection {}", id),
            MemoryError::TooFewSources { got, need } => {
                write!(f, "need at least {} sources, got {}", need, got)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// A pipeline-produced observation waiting to be recorded: the resolution
/// rules know what happened, the coordinator knows where memory lives.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNote {
    pub agent_id: AgentId,
    pub description: String,
    pub importance: u8,
    pub tags: Vec<String>,
}

impl MemoryNote {
    pub fn new(
        agent_id: AgentId,
        description: impl Into<String>,
        importance: u8,
        tags: &[&str],
    ) -> Self {
        Self {
            agent_id,
            description: description.into(),
            importance,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// One agent's memory across battles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryBank {
    observations: Vec<Observation>,
    reflections: Vec<Reflection>,
    plans: Vec<Plan>,
}

impl MemoryBank {
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Record an observation. Importance is clamped into `[1, 10]`.
    pub fn observe(
        &mut self,
        agent_id: AgentId,
        battle_id: BattleId,
        epoch: u32,
        description: impl Into<String>,
        importance: u8,
        tags: Vec<String>,
    ) -> ObservationId {
        let obs = Observation {
            id: ObservationId::new(),
            agent_id,
            battle_id,
            epoch,
            description: description.into(),
            importance: importance.clamp(1, 10),
            tags,
        };
        let id = obs.id;
        self.observations.push(obs);
        id
    }

    /// Synthesise a reflection from the most recent observations sharing
    /// `tag`. Returns `None` when fewer than three qualify.
    pub fn reflect_on_tag(&mut self, agent_id: AgentId, tag: &str, abstraction: u8) -> Option<ReflectionId> {
        let sources: Vec<&Observation> = self
            .observations
            .iter()
            .rev()
            .filter(|o| o.tags.iter().any(|t| t == tag))
            .take(REFLECTION_MIN_SOURCES.max(5))
            .collect();
        if sources.len() < REFLECTION_MIN_SOURCES {
            return None;
        }
        let insight = format!(
            "Across {} recent {} events: {}",
            sources.len(),
            tag,
            sources
                .iter()
                .rev()
                .map(|o| o.description.as_str())
                .collect::<Vec<_>>()
                .join(" / ")
        );
        let reflection = Reflection {
            id: ReflectionId::new(),
            agent_id,
            insight,
            abstraction: abstraction.clamp(1, 3),
            source_observations: sources.iter().map(|o| o.id).collect(),
        };
        let id = reflection.id;
        self.reflections.push(reflection);
        Some(id)
    }

    /// Record a reflection built elsewhere, validating its sources.
    pub fn add_reflection(
        &mut self,
        agent_id: AgentId,
        insight: impl Into<String>,
        abstraction: u8,
        sources: Vec<ObservationId>,
    ) -> Result<ReflectionId, MemoryError> {
        if sources.len() < REFLECTION_MIN_SOURCES {
            return Err(MemoryError::TooFewSources {
                got: sources.len(),
                need: REFLECTION_MIN_SOURCES,
            });
        }
        for id in &sources {
            if !self.observations.iter().any(|o| o.id == *id) {
                return Err(MemoryError::UnknownObservation(*id));
            }
        }
        let reflection = Reflection {
            id: ReflectionId::new(),
            agent_id,
            insight: insight.into(),
            abstraction: abstraction.clamp(1, 3),
            source_observations: sources,
        };
        let id = reflection.id;
        self.reflections.push(reflection);
        Ok(id)
    }

    /// Derive a plan from one or more reflections. Any previously active
    /// plan is superseded.
    pub fn derive_plan(
        &mut self,
        agent_id: AgentId,
        strategy: impl Into<String>,
        sources: Vec<ReflectionId>,
    ) -> Result<PlanId, MemoryError> {
        if sources.is_empty() {
            return Err(MemoryError::TooFewSources { got: 0, need: 1 });
        }
        for id in &sources {
            if !self.reflections.iter().any(|r| r.id == *id) {
                return Err(MemoryError::UnknownReflection(*id));
            }
        }
        for plan in &mut self.plans {
            if plan.status == PlanStatus::Active {
                plan.status = PlanStatus::Superseded;
            }
        }
        let plan = Plan {
            id: PlanId::new(),
            agent_id,
            strategy: strategy.into(),
            status: PlanStatus::Active,
            source_reflections: sources,
        };
        let id = plan.id;
        self.plans.push(plan);
        Ok(id)
    }

    pub fn mark_plan(&mut self, id: PlanId, status: PlanStatus) {
        if let Some(plan) = self.plans.iter_mut().find(|p| p.id == id) {
            plan.status = status;
        }
    }

    /// Most recently derived plan still active.
    pub fn active_plan(&self) -> Option<&Plan> {
        self.plans.iter().rev().find(|p| p.status == PlanStatus::Active)
    }

    /// Top-`k` observations by importance whose tags intersect the
    /// situation, newest first among equals.
    pub fn retrieve(&self, situation_tags: &[&str], k: usize) -> Vec<&Observation> {
        let mut hits: Vec<(usize, &Observation)> = self
            .observations
            .iter()
            .enumerate()
            .filter(|(_, o)| o.tags.iter().any(|t| situation_tags.contains(&t.as_str())))
            .collect();
        hits.sort_by(|(ia, a), (ib, b)| b.importance.cmp(&a.importance).then(ib.cmp(ia)));
        hits.into_iter().take(k).map(|(_, o)| o).collect()
    }

    /// Condensed lesson strings for the next battle's decision requests:
    /// newest reflections first, capped.
    pub fn lessons(&self, cap: usize) -> Vec<String> {
        self.reflections
            .iter()
            .rev()
            .take(cap)
            .map(|r| r.insight.clone())
            .collect()
    }
}

/// Convenience: per-agent banks keyed by id.
pub type MemoryMap = BTreeMap<AgentId, MemoryBank>;
