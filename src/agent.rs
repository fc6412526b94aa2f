//! Gladiator state.
//!
//! Agents are owned by the battle coordinator for the duration of a battle
//! and hold no references to each other; all cross-agent relationships
//! (targets, allies) are expressed through `AgentId`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::hex::Axial;
use crate::ids::AgentId;

/// Every gladiator starts at (and is capped to) this HP.
pub const MAX_HP: i32 = 1000;

/// Rolling thought buffer: at most this many entries...
pub const THOUGHT_BUFFER: usize = 5;
/// ...each at most this many characters, ellipsis-truncated.
pub const THOUGHT_CHARS: usize = 120;

/// The five gladiator classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentClass {
    Warrior,
    Trader,
    Survivor,
    Parasite,
    Gambler,
}

impl AgentClass {
    pub const ALL: [AgentClass; 5] = [
        AgentClass::Warrior,
        AgentClass::Trader,
        AgentClass::Survivor,
        AgentClass::Parasite,
        AgentClass::Gambler,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentClass::Warrior => "WARRIOR",
            AgentClass::Trader => "TRADER",
            AgentClass::Survivor => "SURVIVOR",
            AgentClass::Parasite => "PARASITE",
            AgentClass::Gambler => "GAMBLER",
        }
    }

    pub fn parse_loose(raw: &str) -> Option<AgentClass> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WARRIOR" => Some(AgentClass::Warrior),
            "TRADER" => Some(AgentClass::Trader),
            "SURVIVOR" => Some(AgentClass::Survivor),
            "PARASITE" => Some(AgentClass::Parasite),
            "GAMBLER" => Some(AgentClass::Gambler),
            _ => None,
        }
    }

    /// Class-specific name pool. Names are drawn without replacement within
    /// a roster, so pools stay comfortably larger than any roster.
    pub fn name_pool(self) -> &'static [&'static str] {
        match self {
            AgentClass::Warrior => &[
                "KRUSHNAR", "VARGOTH", "STEELJAW", "REDMAUL", "OXBANE", "GRIMHEW", "IRONVEX",
            ],
            AgentClass::Trader => &[
                "SPREADLORD", "TICKERVANE", "ARBITRON", "DELTAFOX", "LEDGERIN", "BASISCUT",
                "QUOTELING",
            ],
            AgentClass::Survivor => &[
                "HUSKWELL", "BURROWS", "PALEWARD", "THISTLE", "COLDROOT", "WRENHIDE", "MOSSBANK",
            ],
            AgentClass::Parasite => &[
                "LEECHLING", "TICKSPUR", "HOLLOWYRM", "SAPMAW", "VEINRAT", "CLINGUS", "MIRRHOST",
            ],
            AgentClass::Gambler => &[
                "DICEFALL", "LUCKMAW", "SEVENSOUT", "ROULETTA", "WILDCARD", "LONGSHOT", "COINVEX",
            ],
        }
    }
}

impl std::fmt::Display for AgentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Draw a unique display name per class entry, seeded.
pub fn draw_names<R: Rng>(rng: &mut R, classes: &[AgentClass]) -> Vec<String> {
    let mut taken: Vec<String> = Vec::new();
    for class in classes {
        let pool = class.name_pool();
        let mut pick = pool[rng.random_range(0..pool.len())].to_string();
        while taken.contains(&pick) {
            pick = pool[rng.random_range(0..pool.len())].to_string();
        }
        taken.push(pick);
    }
    taken
}

/// An active non-aggression pact, mirrored on both members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ally {
    pub id: AgentId,
    pub name: String,
    /// Epochs until the pact expires naturally. Always > 0 while set.
    pub remaining_epochs: u32,
}

/// A gladiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub class: AgentClass,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
    pub kills: u32,
    pub epochs_survived: u32,
    /// Carry-over insights from earlier battles, newest last.
    pub lessons: Vec<String>,
    /// Rolling reasoning buffer, newest last, bounded.
    pub thoughts: Vec<String>,
    pub position: Option<Axial>,
    pub skill_cooldown: u32,
    /// Set during the epoch the skill fires, cleared at cooldown tick.
    pub skill_active: bool,
    pub ally: Option<Ally>,
}

impl Agent {
    pub fn new(class: AgentClass, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            class,
            hp: MAX_HP,
            max_hp: MAX_HP,
            alive: true,
            kills: 0,
            epochs_survived: 0,
            lessons: Vec::new(),
            thoughts: Vec::new(),
            position: None,
            skill_cooldown: 0,
            skill_active: false,
            ally: None,
        }
    }

    /// Append to the rolling thought buffer with ellipsis truncation.
    pub fn record_thought(&mut self, thought: &str) {
        let trimmed = thought.trim();
        if trimmed.is_empty() {
            return;
        }
        let entry = if trimmed.chars().count() > THOUGHT_CHARS {
            let mut cut: String = trimmed.chars().take(THOUGHT_CHARS - 1).collect();
            cut.push('…');
            cut
        } else {
            trimmed.to_string()
        };
        self.thoughts.push(entry);
        while self.thoughts.len() > THOUGHT_BUFFER {
            self.thoughts.remove(0);
        }
    }

    /// Last recorded thought, used as dying words.
    pub fn final_words(&self) -> String {
        self.thoughts
            .last()
            .cloned()
            .unwrap_or_else(|| format!("{} falls silent.", self.name))
    }

    /// Reduce HP, flooring at zero. Returns the HP actually removed.
    /// Death is decided by the pipeline's death check, not here.
    pub fn apply_damage(&mut self, amount: i32) -> i32 {
        let dealt = amount.max(0).min(self.hp);
        self.hp -= dealt;
        dealt
    }

    /// Raise HP, capped at `max_hp`. Returns the HP actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let healed = amount.max(0).min(self.max_hp - self.hp);
        self.hp += healed;
        healed
    }

    pub fn hp_fraction(&self) -> f64 {
        self.hp as f64 / self.max_hp as f64
    }

    pub fn skill_ready(&self) -> bool {
        self.skill_cooldown == 0
    }

    pub fn is_allied_with(&self, other: AgentId) -> bool {
        self.ally.as_ref().is_some_and(|a| a.id == other)
    }

    pub fn set_ally(&mut self, id: AgentId, name: impl Into<String>, epochs: u32) {
        self.ally = Some(Ally {
            id,
            name: name.into(),
            remaining_epochs: epochs,
        });
    }

    pub fn clear_ally(&mut self) {
        self.ally = None;
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            class: self.class,
            hp: self.hp,
            max_hp: self.max_hp,
            alive: self.alive,
            kills: self.kills,
            position: self.position,
            skill_cooldown: self.skill_cooldown,
            ally: self.ally.clone(),
        }
    }
}

/// Immutable agent view handed to strategies. Strategies never see `Agent`
/// itself, so they cannot mutate battle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub class: AgentClass,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
    pub kills: u32,
    pub position: Option<Axial>,
    pub skill_cooldown: u32,
    pub ally: Option<Ally>,
}

impl AgentSnapshot {
    pub fn hp_fraction(&self) -> f64 {
        self.hp as f64 / self.max_hp as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_invariants() {
        let agent = Agent::new(AgentClass::Warrior, "KRUSHNAR");
        assert_eq!(agent.hp, MAX_HP);
        assert!(agent.alive);
        assert_eq!(agent.skill_cooldown, 0);
        assert!(agent.ally.is_none());
    }

    #[test]
    fn test_damage_floors_at_zero_and_heal_caps() {
        let mut agent = Agent::new(AgentClass::Survivor, "BURROWS");
        assert_eq!(agent.apply_damage(1500), MAX_HP);
        assert_eq!(agent.hp, 0);
        assert_eq!(agent.heal(99999), MAX_HP);
        assert_eq!(agent.hp, MAX_HP);
        assert_eq!(agent.heal(5), 0);
    }

    #[test]
    fn test_thought_buffer_bounds() {
        let mut agent = Agent::new(AgentClass::Trader, "DELTAFOX");
        for i in 0..8 {
            agent.record_thought(&format!("thought {}", i));
        }
        assert_eq!(agent.thoughts.len(), THOUGHT_BUFFER);
        assert_eq!(agent.thoughts[0], "thought 3");

        let long = "x".repeat(400);
        agent.record_thought(&long);
        let last = agent.thoughts.last().unwrap();
        assert_eq!(last.chars().count(), THOUGHT_CHARS);
        assert!(last.ends_with('…'));
    }

    #[test]
    fn test_final_words_defaults_when_silent() {
        let agent = Agent::new(AgentClass::Parasite, "SAPMAW");
        assert!(agent.final_words().contains("SAPMAW"));
    }

    #[test]
    fn test_draw_names_unique() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut rng = StdRng::seed_from_u64(11);
        let classes = AgentClass::ALL;
        let names = draw_names(&mut rng, &classes);
        assert_eq!(names.len(), 5);
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 5);
    }

    #[test]
    fn test_ally_bookkeeping() {
        let mut agent = Agent::new(AgentClass::Gambler, "DICEFALL");
        let other = AgentId::from_u128(9);
        agent.set_ally(other, "LUCKMAW", 3);
        assert!(agent.is_allied_with(other));
        assert!(!agent.is_allied_with(AgentId::from_u128(10)));
        agent.clear_ally();
        assert!(agent.ally.is_none());
    }
}
