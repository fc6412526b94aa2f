//! Durable persistence boundary.
//!
//! The coordinator speaks to storage through `BattleStore`; the crate ships
//! an in-memory implementation (tests, CLI runs) and the trait is the seam
//! a real event-sourcing store plugs into. Writes are last-writer-wins per
//! record. The jackpot is a singleton row carrying the 3% cut forward
//! between battles.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::battle::BattleState;
use crate::betting::BettingPool;
use crate::events::EpochRecord;
use crate::ids::{AgentId, BattleId};
use crate::memory::MemoryBank;
use crate::rating::AgentRating;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store rejected or lost the write.
    Unavailable(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// One table per entity, UUID keys. A conceptual mirror of the persisted
/// layout; implementations may shard however they like.
#[async_trait]
pub trait BattleStore: Send + Sync {
    async fn save_battle(&self, state: &BattleState) -> Result<(), StorageError>;

    async fn load_battle(&self, id: BattleId) -> Result<Option<BattleState>, StorageError>;

    /// Epoch records are append-only once sealed.
    async fn append_epoch(&self, id: BattleId, record: &EpochRecord) -> Result<(), StorageError>;

    async fn load_epochs(&self, id: BattleId) -> Result<Vec<EpochRecord>, StorageError>;

    async fn save_pool(&self, pool: &BettingPool) -> Result<(), StorageError>;

    async fn load_pool(&self, id: BattleId) -> Result<Option<BettingPool>, StorageError>;

    /// Record a finished battle for win-rate lookups.
    async fn record_result(
        &self,
        winner: AgentId,
        participants: &[AgentId],
    ) -> Result<(), StorageError>;

    /// Per-agent `(wins, battles)` counts.
    async fn load_records(&self) -> Result<HashMap<AgentId, (u32, u32)>, StorageError>;

    async fn save_ratings(
        &self,
        ratings: &HashMap<AgentId, AgentRating>,
    ) -> Result<(), StorageError>;

    async fn load_ratings(&self) -> Result<HashMap<AgentId, AgentRating>, StorageError>;

    /// Append one battle's composite-rating deltas (history rows feeding
    /// the leaderboard's bootstrap confidence intervals).
    async fn append_rating_history(
        &self,
        battle: BattleId,
        deltas: &[(AgentId, f64)],
    ) -> Result<(), StorageError>;

    /// Per-battle composite deltas for one agent, oldest first.
    async fn rating_history(&self, agent: AgentId) -> Result<Vec<f64>, StorageError>;

    async fn save_memory(&self, agent: AgentId, bank: &MemoryBank) -> Result<(), StorageError>;

    async fn load_memory(&self, agent: AgentId) -> Result<MemoryBank, StorageError>;

    /// The carry-forward jackpot singleton.
    async fn jackpot(&self) -> Result<f64, StorageError>;

    async fn set_jackpot(&self, amount: f64) -> Result<(), StorageError>;
}

#[derive(Default)]
struct Tables {
    battles: HashMap<BattleId, BattleState>,
    epochs: HashMap<BattleId, Vec<EpochRecord>>,
    pools: HashMap<BattleId, BettingPool>,
    ratings: HashMap<AgentId, AgentRating>,
    memories: HashMap<AgentId, MemoryBank>,
    records: HashMap<AgentId, (u32, u32)>,
    rating_history: Vec<(BattleId, AgentId, f64)>,
    jackpot: f64,
}

/// In-memory store for tests and offline runs.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BattleStore for InMemoryStore {
    async fn save_battle(&self, state: &BattleState) -> Result<(), StorageError> {
        self.tables.lock().await.battles.insert(state.id, state.clone());
        Ok(())
    }

    async fn load_battle(&self, id: BattleId) -> Result<Option<BattleState>, StorageError> {
        Ok(self.tables.lock().await.battles.get(&id).cloned())
    }

    async fn append_epoch(&self, id: BattleId, record: &EpochRecord) -> Result<(), StorageError> {
        self.tables
            .lock()
            .await
            .epochs
            .entry(id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_epochs(&self, id: BattleId) -> Result<Vec<EpochRecord>, StorageError> {
        Ok(self.tables.lock().await.epochs.get(&id).cloned().unwrap_or_default())
    }

    async fn save_pool(&self, pool: &BettingPool) -> Result<(), StorageError> {
        self.tables.lock().await.pools.insert(pool.battle_id, pool.clone());
        Ok(())
    }

    async fn load_pool(&self, id: BattleId) -> Result<Option<BettingPool>, StorageError> {
        Ok(self.tables.lock().await.pools.get(&id).cloned())
    }

    async fn record_result(
        &self,
        winner: AgentId,
        participants: &[AgentId],
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        for id in participants {
            let entry = tables.records.entry(*id).or_insert((0, 0));
            entry.1 += 1;
            if *id == winner {
                entry.0 += 1;
            }
        }
        Ok(())
    }

    async fn load_records(&self) -> Result<HashMap<AgentId, (u32, u32)>, StorageError> {
        Ok(self.tables.lock().await.records.clone())
    }

    async fn save_ratings(
        &self,
        ratings: &HashMap<AgentId, AgentRating>,
    ) -> Result<(), StorageError> {
        self.tables.lock().await.ratings = ratings.clone();
        Ok(())
    }

    async fn load_ratings(&self) -> Result<HashMap<AgentId, AgentRating>, StorageError> {
        Ok(self.tables.lock().await.ratings.clone())
    }

    async fn append_rating_history(
        &self,
        battle: BattleId,
        deltas: &[(AgentId, f64)],
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        for (agent, delta) in deltas {
            tables.rating_history.push((battle, *agent, *delta));
        }
        Ok(())
    }

    async fn rating_history(&self, agent: AgentId) -> Result<Vec<f64>, StorageError> {
        Ok(self
            .tables
            .lock()
            .await
            .rating_history
            .iter()
            .filter(|(_, id, _)| *id == agent)
            .map(|(_, _, delta)| *delta)
            .collect())
    }

    async fn save_memory(&self, agent: AgentId, bank: &MemoryBank) -> Result<(), StorageError> {
        self.tables.lock().await.memories.insert(agent, bank.clone());
        Ok(())
    }

    async fn load_memory(&self, agent: AgentId) -> Result<MemoryBank, StorageError> {
        Ok(self
            .tables
            .lock()
            .await
            .memories
            .get(&agent)
            .cloned()
            .unwrap_or_default())
    }

    async fn jackpot(&self) -> Result<f64, StorageError> {
        Ok(self.tables.lock().await.jackpot)
    }

    async fn set_jackpot(&self, amount: f64) -> Result<(), StorageError> {
        self.tables.lock().await.jackpot = amount;
        Ok(())
    }
}

/// Store wrapper that fails the first `failures` epoch-seal writes.
/// Exercises the rollback-and-retry path without a real flaky backend.
pub struct FlakyStore<S> {
    inner: S,
    failures: Mutex<u32>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S, failures: u32) -> Self {
        Self {
            inner,
            failures: Mutex::new(failures),
        }
    }

    async fn maybe_fail(&self) -> Result<(), StorageError> {
        let mut left = self.failures.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: BattleStore> BattleStore for FlakyStore<S> {
    async fn save_battle(&self, state: &BattleState) -> Result<(), StorageError> {
        self.inner.save_battle(state).await
    }

    async fn load_battle(&self, id: BattleId) -> Result<Option<BattleState>, StorageError> {
        self.inner.load_battle(id).await
    }

    async fn append_epoch(&self, id: BattleId, record: &EpochRecord) -> Result<(), StorageError> {
        self.maybe_fail().await?;
        self.inner.append_epoch(id, record).await
    }

    async fn load_epochs(&self, id: BattleId) -> Result<Vec<EpochRecord>, StorageError> {
        self.inner.load_epochs(id).await
    }

    async fn save_pool(&self, pool: &BettingPool) -> Result<(), StorageError> {
        self.inner.save_pool(pool).await
    }

    async fn load_pool(&self, id: BattleId) -> Result<Option<BettingPool>, StorageError> {
        self.inner.load_pool(id).await
    }

    async fn record_result(
        &self,
        winner: AgentId,
        participants: &[AgentId],
    ) -> Result<(), StorageError> {
        self.inner.record_result(winner, participants).await
    }

    async fn load_records(&self) -> Result<HashMap<AgentId, (u32, u32)>, StorageError> {
        self.inner.load_records().await
    }

    async fn save_ratings(
        &self,
        ratings: &HashMap<AgentId, AgentRating>,
    ) -> Result<(), StorageError> {
        self.inner.save_ratings(ratings).await
    }

    async fn load_ratings(&self) -> Result<HashMap<AgentId, AgentRating>, StorageError> {
        self.inner.load_ratings().await
    }

    async fn append_rating_history(
        &self,
        battle: BattleId,
        deltas: &[(AgentId, f64)],
    ) -> Result<(), StorageError> {
        self.inner.append_rating_history(battle, deltas).await
    }

    async fn rating_history(&self, agent: AgentId) -> Result<Vec<f64>, StorageError> {
        self.inner.rating_history(agent).await
    }

    async fn save_memory(&self, agent: AgentId, bank: &MemoryBank) -> Result<(), StorageError> {
        self.inner.save_memory(agent, bank).await
    }

    async fn load_memory(&self, agent: AgentId) -> Result<MemoryBank, StorageError> {
        self.inner.load_memory(agent).await
    }

    async fn jackpot(&self) -> Result<f64, StorageError> {
        self.inner.jackpot().await
    }

    async fn set_jackpot(&self, amount: f64) -> Result<(), StorageError> {
        self.inner.set_jackpot(amount).await
    }
}
