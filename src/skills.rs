//! Class skills.
//!
//! Every class carries exactly one unique skill with a shared default
//! cooldown. Activation is requested in the decision, gated by the secretary
//! (cooldown check), and applied by the resolution pipeline.

use serde::{Deserialize, Serialize};

use crate::agent::AgentClass;

/// Epochs between activations.
pub const DEFAULT_SKILL_COOLDOWN: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillKind {
    /// Double ATTACK damage this epoch; damage taken is multiplied by 1.5.
    Berserk,
    /// The epoch's prediction auto-wins.
    InsiderInfo,
    /// Total damage immunity for the epoch, bleed included.
    Fortify,
    /// Steal 10% of a target's current HP, applied after combat.
    Siphon,
    /// Double the prediction stake's signed HP delta.
    AllIn,
}

impl SkillKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SkillKind::Berserk => "BERSERK",
            SkillKind::InsiderInfo => "INSIDER_INFO",
            SkillKind::Fortify => "FORTIFY",
            SkillKind::Siphon => "SIPHON",
            SkillKind::AllIn => "ALL_IN",
        }
    }

    pub fn for_class(class: AgentClass) -> SkillKind {
        match class {
            AgentClass::Warrior => SkillKind::Berserk,
            AgentClass::Trader => SkillKind::InsiderInfo,
            AgentClass::Survivor => SkillKind::Fortify,
            AgentClass::Parasite => SkillKind::Siphon,
            AgentClass::Gambler => SkillKind::AllIn,
        }
    }

    /// Whether activation needs another live agent as a target.
    pub fn needs_target(self) -> bool {
        matches!(self, SkillKind::Siphon)
    }
}

impl std::fmt::Display for SkillKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static skill description surfaced to strategies and the skill context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillDefinition {
    pub kind: SkillKind,
    pub cooldown: u32,
    pub description: &'static str,
}

pub fn definition(class: AgentClass) -> SkillDefinition {
    let kind = SkillKind::for_class(class);
    let description = match kind {
        SkillKind::Berserk => "Double your ATTACK damage this epoch, but take 50% more damage.",
        SkillKind::InsiderInfo => "Your market prediction automatically wins this epoch.",
        SkillKind::Fortify => "Take zero damage this epoch, bleed included.",
        SkillKind::Siphon => "Steal 10% of a chosen gladiator's current HP after combat.",
        SkillKind::AllIn => "Double whatever your prediction wins or loses this epoch.",
    };
    SkillDefinition {
        kind,
        cooldown: DEFAULT_SKILL_COOLDOWN,
        description,
    }
}
