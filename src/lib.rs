pub mod agent;
pub mod battle;
pub mod betting;
pub mod coordinator;
pub mod decision;
pub mod events;
pub mod hex;
pub mod ids;
pub mod llm;
pub mod market;
pub mod memory;
pub mod rating;
pub mod rules;
pub mod secretary;
pub mod skills;
pub mod sponsorship;
pub mod store;
pub mod strategy;
pub mod stream;

pub use agent::{Agent, AgentClass, AgentSnapshot, MAX_HP};
pub use battle::{BattleConfig, BattleState, BattleStateError, BattleStatus};
pub use betting::{Bet, BettingError, BettingPhase, BettingPool, Settlement};
pub use coordinator::{BattleCoordinator, BattleSpeed, CoordinatorConfig, CoordinatorError};
pub use decision::{
    Decision, DecisionRequest, Direction, Prediction, RawDecision, Stance, parse_raw,
};
pub use events::{
    AgentStateView, BattleEvent, DeathCause, EpochRecord, SubEvent, stream_satisfies_grammar,
    wire_events,
};
pub use hex::{ARENA_RADIUS, ArenaPhase, Axial, HexGrid, MoveError, PhaseSchedule, Tile};
pub use ids::{
    AgentId, BattleId, BetId, ObservationId, PlanId, ReflectionId, SponsorshipId, SubscriberId,
};
pub use llm::{
    ChatMessage, ChatOptions, ChatReply, LlmClient, LlmError, ProviderPool, ScriptedClient,
    SimulatedClient,
};
pub use market::{Asset, AssetMap, MarketOracle, MarketSnapshot, OracleError, ScriptedOracle, SimulatedOracle};
pub use memory::{MemoryBank, MemoryNote, Observation, Plan, PlanStatus, Reflection};
pub use rating::{AgentBattleStats, AgentRating, Gaussian, RatingCategory, bootstrap_ci, update_ratings};
pub use rules::combat::{Clash, ClashResult, CombatOutcome, resolve_clash};
pub use rules::pipeline::{EpochInputs, EpochReport, EpochStats, run_epoch};
pub use rules::state_based::{DamageLedger, FatalPhase, death_check, win_check};
pub use secretary::{
    IssueAction, IssueSeverity, Secretary, SecretaryContext, ValidationIssue,
};
pub use skills::{DEFAULT_SKILL_COOLDOWN, SkillDefinition, SkillKind};
pub use sponsorship::{EpochSponsorship, SponsorEffect, SponsorTier, Sponsorship, SponsorshipBook};
pub use store::{BattleStore, FlakyStore, InMemoryStore, StorageError};
pub use strategy::{
    GamblerStrategy, ParasiteStrategy, ScriptedStrategy, Strategy, StrategyError,
    SurvivorStrategy, TraderStrategy, WarriorStrategy, strategy_for_class,
};
pub use stream::EventStream;
