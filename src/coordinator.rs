//! The battle coordinator.
//!
//! One coordinator owns one battle: the lifecycle state machine, the epoch
//! clock, the decision fan-out to strategies, persistence and the event
//! broadcast. All mutation is serialised on the coordinator's lock; a
//! failed persistence write rolls the whole epoch back to its pre-tick
//! snapshot and the tick is retried on the next scheduled slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use crate::agent::Agent;
use crate::battle::{BattleState, BattleStateError, BattleStatus};
use crate::betting::{BettingError, BettingPhase, BettingPool, Settlement};
use crate::decision::{
    Decision, DecisionRequest, alliance_context, skill_context, spatial_context,
};
use crate::events::{BattleEvent, OddsData, SubEvent, wire_events};
use crate::ids::{AgentId, BattleId, BetId, SponsorshipId, SubscriberId};
use crate::market::{AssetMap, MarketOracle, MarketSnapshot};
use crate::memory::MemoryMap;
use crate::rating::{AgentBattleStats, AgentRating, update_ratings};
use crate::rules::pipeline::{EpochInputs, run_epoch};
use crate::secretary::{IssueSeverity, Secretary, SecretaryContext};
use crate::sponsorship::{SponsorTier, SponsorshipBook};
use crate::store::{BattleStore, StorageError};
use crate::strategy::Strategy;
use crate::stream::EventStream;

/// Inter-epoch delay selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BattleSpeed {
    #[default]
    Instant,
    Fast,
    Slow,
}

impl BattleSpeed {
    pub fn delay(self) -> Duration {
        match self {
            BattleSpeed::Instant => Duration::ZERO,
            BattleSpeed::Fast => Duration::from_millis(500),
            BattleSpeed::Slow => Duration::from_millis(2000),
        }
    }
}

impl std::str::FromStr for BattleSpeed {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(BattleSpeed::Instant),
            "fast" => Ok(BattleSpeed::Fast),
            "slow" => Ok(BattleSpeed::Slow),
            other => Err(format!("unknown battle speed {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub speed: BattleSpeed,
    /// Per-strategy decide budget; overruns get the fallback decision.
    pub decision_timeout: Duration,
    /// Consecutive storage failures tolerated before the battle hangs.
    pub storage_retries: u32,
    /// Force a centre-ward move into every decision without one.
    pub always_inject_move: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            speed: BattleSpeed::Instant,
            decision_timeout: Duration::from_secs(30),
            storage_retries: 3,
            always_inject_move: false,
        }
    }
}

#[derive(Debug)]
pub enum CoordinatorError {
    Storage(StorageError),
    State(BattleStateError),
    Betting(BettingError),
    /// Storage retry budget exhausted; the battle was cancelled.
    BattleHung,
    StrategyCountMismatch { roster: usize, strategies: usize },
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::Storage(err) => write!(f, "{}", err),
            CoordinatorError::State(err) => write!(f, "{}", err),
            CoordinatorError::Betting(err) => write!(f, "{}", err),
            CoordinatorError::BattleHung => write!(f, "battle hung on storage failures"),
            CoordinatorError::StrategyCountMismatch { roster, strategies } => write!(
                f,
                "{} strategies supplied for a roster of {}",
                strategies, roster
            ),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<StorageError> for CoordinatorError {
    fn from(err: StorageError) -> Self {
        CoordinatorError::Storage(err)
    }
}

impl From<BattleStateError> for CoordinatorError {
    fn from(err: BattleStateError) -> Self {
        CoordinatorError::State(err)
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct Inner {
    state: BattleState,
    strategies: BTreeMap<AgentId, Arc<dyn Strategy>>,
    oracle: Box<dyn MarketOracle>,
    secretary: Secretary,
    pool: BettingPool,
    sponsors: SponsorshipBook,
    memories: MemoryMap,
    ratings: HashMap<AgentId, AgentRating>,
    records: HashMap<AgentId, (u32, u32)>,
    rng: StdRng,
    /// Cumulative per-agent battle statistics.
    stats: BTreeMap<AgentId, AgentBattleStats>,
    /// Agents in the order they died, earliest first.
    death_order: Vec<AgentId>,
    consecutive_storage_failures: u32,
}

pub struct BattleCoordinator {
    inner: Mutex<Inner>,
    stream: EventStream,
    store: Arc<dyn BattleStore>,
    config: CoordinatorConfig,
}

enum TickOutcome {
    Complete,
    Continue,
    StorageFailed,
}

impl BattleCoordinator {
    /// Stand up a coordinator for a fresh battle. The battle lands in
    /// `BETTING_OPEN`: bets and sponsorships are accepted until `run`.
    pub async fn start_battle(
        mut state: BattleState,
        strategies: Vec<Arc<dyn Strategy>>,
        oracle: Box<dyn MarketOracle>,
        store: Arc<dyn BattleStore>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        if strategies.len() != state.roster.len() {
            return Err(CoordinatorError::StrategyCountMismatch {
                roster: state.roster.len(),
                strategies: strategies.len(),
            });
        }

        let carried = store.jackpot().await?;
        let ratings = store.load_ratings().await?;
        let records = store.load_records().await?;
        let mut memories = MemoryMap::new();
        for agent in &mut state.roster {
            let bank = store.load_memory(agent.id).await?;
            agent.lessons = bank.lessons(5);
            memories.insert(agent.id, bank);
        }

        state.advance_status(BattleStatus::Lobby)?;
        state.advance_status(BattleStatus::Countdown)?;
        state.advance_status(BattleStatus::BettingOpen)?;
        store.save_battle(&state).await?;
        log::info!(
            "battle {} open for betting ({} gladiators, max {} epochs)",
            state.id,
            state.roster.len(),
            state.config.max_epochs
        );

        let strategy_map = state
            .roster
            .iter()
            .map(|a| a.id)
            .zip(strategies)
            .collect();
        let stats = state
            .roster
            .iter()
            .map(|a| (a.id, AgentBattleStats::default()))
            .collect();
        let rng = StdRng::seed_from_u64(state.config.seed);
        let pool = BettingPool::new(state.id, carried);

        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                strategies: strategy_map,
                oracle,
                secretary: Secretary::new().with_always_inject(config.always_inject_move),
                pool,
                sponsors: SponsorshipBook::default(),
                memories,
                ratings,
                records,
                rng,
                stats,
                death_order: Vec::new(),
                consecutive_storage_failures: 0,
            }),
            stream: EventStream::new(),
            store,
            config,
        })
    }

    /// Rehydrate a hibernated battle from the store. Subscribers are not
    /// restored; they reconnect on their own.
    pub async fn resume(
        battle_id: BattleId,
        strategies: Vec<Arc<dyn Strategy>>,
        oracle: Box<dyn MarketOracle>,
        store: Arc<dyn BattleStore>,
        config: CoordinatorConfig,
    ) -> Result<Option<Self>, CoordinatorError> {
        let Some(state) = store.load_battle(battle_id).await? else {
            return Ok(None);
        };
        if strategies.len() != state.roster.len() {
            return Err(CoordinatorError::StrategyCountMismatch {
                roster: state.roster.len(),
                strategies: strategies.len(),
            });
        }
        let pool = match store.load_pool(battle_id).await? {
            Some(pool) => pool,
            None => {
                let mut pool = BettingPool::new(state.id, store.jackpot().await?);
                if state.status == BattleStatus::Active {
                    pool.lock();
                }
                pool
            }
        };
        let ratings = store.load_ratings().await?;
        let records = store.load_records().await?;
        let mut memories = MemoryMap::new();
        for agent in &state.roster {
            memories.insert(agent.id, store.load_memory(agent.id).await?);
        }
        let strategy_map = state.roster.iter().map(|a| a.id).zip(strategies).collect();
        let stats = state
            .roster
            .iter()
            .map(|a| (a.id, AgentBattleStats::default()))
            .collect();
        let rng = StdRng::seed_from_u64(state.config.seed ^ state.epoch as u64);
        log::info!("battle {} rehydrated at epoch {}", state.id, state.epoch);

        Ok(Some(Self {
            inner: Mutex::new(Inner {
                state,
                strategies: strategy_map,
                oracle,
                secretary: Secretary::new().with_always_inject(config.always_inject_move),
                pool,
                sponsors: SponsorshipBook::default(),
                memories,
                ratings,
                records,
                rng,
                stats,
                death_order: Vec::new(),
                consecutive_storage_failures: 0,
            }),
            stream: EventStream::new(),
            store,
            config,
        }))
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub async fn state(&self) -> BattleState {
        self.inner.lock().await.state.clone()
    }

    pub async fn place_bet(
        &self,
        bettor: impl Into<String>,
        agent_id: AgentId,
        amount: f64,
    ) -> Result<BetId, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        let id = inner
            .pool
            .place_bet(bettor, agent_id, amount, unix_millis())
            .map_err(CoordinatorError::Betting)?;
        let pool = inner.pool.clone();
        drop(inner);
        if let Err(err) = self.store.save_pool(&pool).await {
            log::warn!("bet persisted in memory only: {}", err);
        }
        Ok(id)
    }

    /// Sponsor a gladiator; the effect lands on the next epoch.
    pub async fn sponsor(
        &self,
        agent_id: AgentId,
        sponsor: impl Into<String>,
        amount: f64,
        tier: SponsorTier,
        message: Option<String>,
    ) -> Result<SponsorshipId, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        if inner.state.status.is_terminal() || inner.state.status == BattleStatus::Completed {
            return Err(CoordinatorError::Betting(BettingError::InvalidPhase {
                phase: BettingPhase::Settled,
            }));
        }
        let battle_id = inner.state.id;
        let epoch = inner.state.epoch + 1;
        Ok(inner
            .sponsors
            .add(battle_id, agent_id, sponsor, amount, tier, epoch, message, unix_millis()))
    }

    pub async fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<BattleEvent>) {
        let inner = self.inner.lock().await;
        let complete = inner.state.winner.is_some();
        self.stream.subscribe(&inner.state.roster, complete)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.stream.unsubscribe(id);
    }

    /// Cancel before the battle goes active; every pending bet refunds.
    pub async fn cancel(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        inner.state.cancel()?;
        inner.pool.refund_all();
        let state = inner.state.clone();
        let pool = inner.pool.clone();
        drop(inner);
        self.store.save_battle(&state).await?;
        self.store.save_pool(&pool).await?;
        self.stream.close_all();
        log::info!("battle {} cancelled, {} bets refunded", state.id, pool.bets().len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // The epoch clock
    // ------------------------------------------------------------------

    /// Drive the battle to completion and settle it. Returns the final
    /// state.
    pub async fn run(&self) -> Result<BattleState, CoordinatorError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.advance_status(BattleStatus::Active)?;
            inner.state.betting_phase = BettingPhase::Locked;
            inner.state.started_at = Some(unix_millis());
            inner.pool.lock();
            let state = inner.state.clone();
            drop(inner);
            self.store.save_battle(&state).await?;
            log::info!("battle {} active", state.id);
        }

        loop {
            match self.tick().await? {
                TickOutcome::Complete => break,
                TickOutcome::Continue | TickOutcome::StorageFailed => {
                    let delay = self.config.speed.delay();
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }

        self.finalize().await
    }

    /// One epoch tick: fan out decisions, validate, resolve, persist,
    /// broadcast. Storage failure rolls the epoch back.
    async fn tick(&self) -> Result<TickOutcome, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if inner.state.status != BattleStatus::Active {
            return Ok(TickOutcome::Complete);
        }

        // Pre-tick snapshot for rollback.
        let state_snapshot = inner.state.clone();
        let rng_snapshot = inner.rng.clone();

        // Market sample; a dead oracle yields a flat epoch, never an abort.
        let market = match inner.oracle.fetch_prices().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("oracle unavailable, resolving epoch flat: {}", err);
                let prev = inner.state.prev_market.unwrap_or_default();
                MarketSnapshot {
                    prices: prev.prices,
                    changes: AssetMap::default(),
                    timestamp: prev.timestamp + 300,
                }
            }
        };

        // Build requests and fan out to strategies in parallel, joining on
        // all of them before resolution starts.
        let epoch = inner.state.epoch + 1;
        let phase = inner.state.config.schedule.phase_for(epoch);
        let mut calls = Vec::new();
        for id in inner.state.sorted_ids() {
            let agent = inner.state.agent(id).expect("roster id");
            if !agent.alive {
                continue;
            }
            let request = build_request(&inner.state, agent, epoch, market, inner.memories.get(&id));
            let strategy = inner.strategies.get(&id).expect("strategy per agent").clone();
            let budget = self.config.decision_timeout;
            calls.push(async move {
                let decision = match timeout(budget, strategy.decide(&request)).await {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(err)) => {
                        log::warn!("strategy for {} failed ({}), using fallback", id, err);
                        Decision::fallback()
                    }
                    Err(_) => {
                        log::warn!("strategy for {} timed out, using fallback", id);
                        Decision::fallback()
                    }
                };
                (id, decision)
            });
        }
        let raw_decisions: BTreeMap<AgentId, Decision> =
            futures::future::join_all(calls).await.into_iter().collect();

        // Secretary pass, in sorted order.
        let mut decisions = BTreeMap::new();
        for (id, decision) in raw_decisions {
            let agent = inner.state.agent(id).expect("roster id");
            let ctx = SecretaryContext {
                agent,
                roster: &inner.state.roster,
                grid: &inner.state.grid,
                phase,
            };
            let (repaired, issues) = inner.secretary.validate(decision, &ctx).await;
            for issue in &issues {
                if issue.severity == IssueSeverity::Error {
                    log::warn!("secretary {} on {}: {}", agent.name, issue.field, issue.message);
                }
            }
            decisions.insert(id, repaired);
        }

        let inputs = EpochInputs {
            market,
            decisions,
            sponsorships: inner.sponsors.effects_for_epoch(epoch),
        };
        let report = run_epoch(&mut inner.state, &inputs, &mut inner.rng);

        // Persist the sealed epoch and the post-epoch state. Failure rolls
        // everything back; the tick reruns at the next slot.
        let persisted = match self.store.append_epoch(inner.state.id, &report.record).await {
            Ok(()) => self.store.save_battle(&inner.state).await,
            Err(err) => Err(err),
        };
        if let Err(err) = persisted {
            inner.state = state_snapshot;
            inner.rng = rng_snapshot;
            inner.consecutive_storage_failures += 1;
            log::error!(
                "epoch {} rolled back (storage failure {}/{}): {}",
                epoch,
                inner.consecutive_storage_failures,
                self.config.storage_retries,
                err
            );
            if inner.consecutive_storage_failures > self.config.storage_retries {
                inner.state.status = BattleStatus::Cancelled;
                inner.pool.refund_all();
                self.stream.close_all();
                return Err(CoordinatorError::BattleHung);
            }
            return Ok(TickOutcome::StorageFailed);
        }
        inner.consecutive_storage_failures = 0;

        // Memory observations (best effort, last-writer-wins).
        let battle_id = inner.state.id;
        for note in &report.notes {
            let bank = inner.memories.entry(note.agent_id).or_default();
            bank.observe(
                note.agent_id,
                battle_id,
                epoch,
                note.description.clone(),
                note.importance,
                note.tags.clone(),
            );
        }

        // Battle-stat accumulation and death ordering.
        for (id, delta) in &report.stats {
            let total = inner.stats.entry(*id).or_default();
            total.prediction_correct += delta.prediction_correct;
            total.prediction_total += delta.prediction_total;
            total.damage_dealt += delta.damage_dealt;
            total.damage_taken += delta.damage_taken;
        }
        for event in &report.record.sub_events {
            if let SubEvent::Death(death) = event {
                inner.death_order.push(death.agent_id);
            }
        }

        // Broadcast the canonical sequence, then the async odds update.
        let winner_agent = report.winner.and_then(|id| inner.state.agent(id));
        let events = wire_events(
            &report.record,
            &inner.state.roster,
            report.complete,
            winner_agent,
        );
        self.stream.broadcast(&events);
        let records = &inner.records;
        let odds = inner.pool.live_odds(&inner.state.roster, |id| match records.get(&id) {
            Some((wins, battles)) if *battles > 0 => Some(*wins as f64 / *battles as f64),
            _ => None,
        });
        if !odds.is_empty() {
            self.stream
                .broadcast(&[BattleEvent::OddsUpdate(OddsData { odds })]);
        }

        if report.complete {
            Ok(TickOutcome::Complete)
        } else {
            Ok(TickOutcome::Continue)
        }
    }

    /// Post-battle settlement: pool payout, jackpot carry, ratings,
    /// reflections and lessons, then `COMPLETED -> SETTLED`.
    async fn finalize(&self) -> Result<BattleState, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        inner.state.advance_status(BattleStatus::Completed)?;
        inner.state.ended_at = Some(unix_millis());

        let winner = inner.state.winner.expect("completed battle has a winner");
        let settlement: Settlement = inner.pool.settle(winner).clone();
        self.store.set_jackpot(settlement.next_jackpot).await?;
        self.store.save_pool(&inner.pool).await?;
        let participants = inner.state.sorted_ids();
        self.store.record_result(winner, &participants).await?;

        // Placements: winner first, then the later a death the better.
        let mut placement = 1u32;
        if let Some(stats) = inner.stats.get_mut(&winner) {
            stats.placement = placement;
        }
        for id in inner.death_order.iter().rev() {
            if *id == winner {
                continue;
            }
            placement += 1;
            if let Some(stats) = inner.stats.get_mut(id) {
                stats.placement = placement;
            }
        }
        // Survivors that neither died nor won (epoch-cap ends) rank above
        // the dead, in HP order. Worst inserted first: each insertion at
        // slot 2 pushes earlier ones down.
        let mut unplaced: Vec<AgentId> = inner
            .stats
            .iter()
            .filter(|(id, s)| s.placement == 0 && **id != winner)
            .map(|(id, _)| *id)
            .collect();
        unplaced.sort_by_key(|id| {
            let hp = inner.state.agent(*id).map(|a| a.hp).unwrap_or(0);
            (hp, std::cmp::Reverse(*id))
        });
        for id in unplaced {
            for stats in inner.stats.values_mut() {
                if stats.placement >= 2 {
                    stats.placement += 1;
                }
            }
            inner.stats.get_mut(&id).unwrap().placement = 2;
        }
        for (id, stats) in inner.stats.iter_mut() {
            stats.kills = inner.state.agent(*id).map(|a| a.kills).unwrap_or(0);
        }

        let deltas = update_ratings(&mut inner.ratings, &inner.stats);
        self.store.save_ratings(&inner.ratings).await?;
        let history: Vec<(AgentId, f64)> = deltas.iter().map(|(id, d)| (*id, *d)).collect();
        self.store
            .append_rating_history(inner.state.id, &history)
            .await?;
        log::info!(
            "battle {} settled: winner {}, composite deltas {:?}",
            inner.state.id,
            winner,
            deltas
        );

        // Reflections and carried lessons.
        for id in participants {
            let bank = inner.memories.entry(id).or_default();
            for tag in ["combat", "prediction", "alliance"] {
                if let Some(reflection) = bank.reflect_on_tag(id, tag, 2) {
                    let _ = bank.derive_plan(id, format!("Lean on the {} lesson.", tag), vec![reflection]);
                }
            }
            let lessons = bank.lessons(5);
            let bank_clone = bank.clone();
            if let Some(agent) = inner.state.agent_mut(id) {
                agent.lessons = lessons;
            }
            if let Err(err) = self.store.save_memory(id, &bank_clone).await {
                log::warn!("memory write lost for {}: {}", id, err);
            }
        }

        inner.state.advance_status(BattleStatus::Settled)?;
        self.store.save_battle(&inner.state).await?;
        self.stream.close_all();
        log::info!("battle {} complete", inner.state.id);
        Ok(inner.state.clone())
    }

    pub async fn settlement(&self) -> Option<Settlement> {
        self.inner.lock().await.pool.settlement().cloned()
    }
}

/// Build the decision request for one agent.
fn build_request(
    state: &BattleState,
    agent: &Agent,
    epoch: u32,
    market: MarketSnapshot,
    bank: Option<&crate::memory::MemoryBank>,
) -> DecisionRequest {
    let others = state
        .roster
        .iter()
        .filter(|o| o.id != agent.id)
        .map(|o| o.snapshot())
        .collect();
    DecisionRequest {
        agent: agent.snapshot(),
        others,
        market,
        recent_lessons: recall(agent, bank),
        spatial_context: spatial_context(
            &state.grid,
            &state.config.schedule,
            epoch,
            agent,
            &state.roster,
        ),
        skill_context: skill_context(agent),
        alliance_context: alliance_context(agent),
    }
}

/// What an agent remembers going into a decision: carried lessons, the
/// highest-importance relevant observations, and the active plan. At most
/// five entries.
fn recall(agent: &Agent, bank: Option<&crate::memory::MemoryBank>) -> Vec<String> {
    let mut lessons: Vec<String> = agent.lessons.iter().rev().take(3).rev().cloned().collect();
    if let Some(bank) = bank {
        for observation in bank.retrieve(&["combat", "prediction", "alliance", "betrayal"], 2) {
            lessons.push(observation.description.clone());
        }
        if let Some(plan) = bank.active_plan() {
            lessons.push(format!("Plan: {}", plan.strategy));
        }
    }
    lessons.truncate(5);
    lessons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentClass;
    use crate::battle::BattleConfig;
    use crate::market::SimulatedOracle;
    use crate::store::{FlakyStore, InMemoryStore};
    use crate::strategy::ScriptedStrategy;

    fn fresh_state(max_epochs: u32) -> BattleState {
        let mut rng = StdRng::seed_from_u64(7);
        let config = BattleConfig {
            max_epochs,
            seed: 7,
            ..BattleConfig::default()
        };
        BattleState::new(&[AgentClass::Warrior, AgentClass::Survivor], config, &mut rng)
    }

    fn passive_strategies(state: &BattleState) -> Vec<Arc<dyn Strategy>> {
        state
            .roster
            .iter()
            .map(|a| Arc::new(ScriptedStrategy::new(a.class, vec![])) as Arc<dyn Strategy>)
            .collect()
    }

    async fn coordinator_with(
        store: Arc<dyn BattleStore>,
        max_epochs: u32,
    ) -> BattleCoordinator {
        let state = fresh_state(max_epochs);
        let strategies = passive_strategies(&state);
        BattleCoordinator::start_battle(
            state,
            strategies,
            Box::new(SimulatedOracle::flat(7)),
            store,
            CoordinatorConfig {
                decision_timeout: Duration::from_secs(5),
                ..CoordinatorConfig::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_betting_window_then_cancel_refunds() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator_with(store, 10).await;
        let state = coordinator.state().await;
        assert_eq!(state.status, BattleStatus::BettingOpen);

        let agent = state.roster[0].id;
        coordinator.place_bet("alice", agent, 50.0).await.unwrap();
        coordinator.cancel().await.unwrap();

        let state = coordinator.state().await;
        assert_eq!(state.status, BattleStatus::Cancelled);
        let err = coordinator.place_bet("bob", agent, 10.0).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Betting(_)));
        let inner = coordinator.inner.lock().await;
        assert!(inner.pool.bets().iter().all(|b| b.settled && b.payout == b.amount));
    }

    #[tokio::test]
    async fn test_full_run_settles_battle() {
        let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
        let coordinator = coordinator_with(store.clone(), 3).await;
        let battle_id = coordinator.state().await.id;
        let agent = coordinator.state().await.roster[0].id;
        coordinator.place_bet("alice", agent, 100.0).await.unwrap();

        let final_state = coordinator.run().await.unwrap();
        assert_eq!(final_state.status, BattleStatus::Settled);
        assert_eq!(final_state.epoch, 3);
        let winner = final_state.winner.expect("timeout winner");
        assert_eq!(winner, final_state.highest_hp_alive().unwrap());
        assert!(coordinator.settlement().await.is_some());

        // The sealed epochs and final state are durable.
        let epochs = store.load_epochs(battle_id).await.unwrap();
        assert_eq!(epochs.len(), 3);
        let persisted = store.load_battle(battle_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, BattleStatus::Settled);
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_then_recovers() {
        let store: Arc<dyn BattleStore> =
            Arc::new(FlakyStore::new(InMemoryStore::new(), 1));
        let coordinator = coordinator_with(store.clone(), 2).await;
        let final_state = coordinator.run().await.unwrap();
        // One injected failure, then the retried tick lands; the battle
        // still reaches every epoch exactly once.
        assert_eq!(final_state.status, BattleStatus::Settled);
        let epochs = store.load_epochs(final_state.id).await.unwrap();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].epoch, 1);
        assert_eq!(epochs[1].epoch, 2);
    }

    #[tokio::test]
    async fn test_storage_exhaustion_hangs_battle() {
        let store: Arc<dyn BattleStore> =
            Arc::new(FlakyStore::new(InMemoryStore::new(), 50));
        let state = fresh_state(5);
        let strategies = passive_strategies(&state);
        let coordinator = BattleCoordinator::start_battle(
            state,
            strategies,
            Box::new(SimulatedOracle::flat(7)),
            store,
            CoordinatorConfig {
                storage_retries: 2,
                decision_timeout: Duration::from_secs(5),
                ..CoordinatorConfig::default()
            },
        )
        .await
        .unwrap();

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::BattleHung));
        assert_eq!(coordinator.state().await.status, BattleStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_hibernation_resume_round_trip() {
        let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
        let coordinator = coordinator_with(store.clone(), 10).await;
        let before = coordinator.state().await;
        drop(coordinator);

        let strategies = passive_strategies(&before);
        let resumed = BattleCoordinator::resume(
            before.id,
            strategies,
            Box::new(SimulatedOracle::flat(7)),
            store,
            CoordinatorConfig::default(),
        )
        .await
        .unwrap()
        .expect("battle exists");
        assert_eq!(resumed.state().await, before);

        let missing = BattleCoordinator::resume(
            BattleId::new(),
            vec![],
            Box::new(SimulatedOracle::flat(7)),
            Arc::new(InMemoryStore::new()),
            CoordinatorConfig::default(),
        )
        .await
        .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_decision_timeout_substitutes_fallback() {
        struct StallingStrategy;

        #[async_trait::async_trait]
        impl Strategy for StallingStrategy {
            fn class(&self) -> AgentClass {
                AgentClass::Warrior
            }
            fn personality(&self) -> &'static str {
                "slow"
            }
            async fn decide(
                &self,
                _request: &DecisionRequest,
            ) -> Result<Decision, crate::strategy::StrategyError> {
                sleep(Duration::from_secs(60)).await;
                Ok(Decision::fallback())
            }
        }

        let state = fresh_state(1);
        let mut strategies = passive_strategies(&state);
        strategies[0] = Arc::new(StallingStrategy);
        let coordinator = BattleCoordinator::start_battle(
            state,
            strategies,
            Box::new(SimulatedOracle::flat(7)),
            Arc::new(InMemoryStore::new()),
            CoordinatorConfig {
                decision_timeout: Duration::from_millis(50),
                ..CoordinatorConfig::default()
            },
        )
        .await
        .unwrap();

        // The stalled agent is never skipped; the epoch completes on time
        // with its fallback decision.
        let final_state = coordinator.run().await.unwrap();
        assert_eq!(final_state.epoch, 1);
        assert_eq!(final_state.status, BattleStatus::Settled);
    }
}
