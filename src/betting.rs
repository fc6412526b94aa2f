//! Spectator betting pool.
//!
//! Bets are append-only, accepted only while the battle's betting phase is
//! open, and settled pari-mutuel with a carry-forward jackpot. Settlement is
//! idempotent: re-settling returns the recorded result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::ids::{AgentId, BattleId, BetId};

/// Pool cut fractions.
const WINNERS_CUT: f64 = 0.85;
const TREASURY_CUT: f64 = 0.05;
const BURN_CUT: f64 = 0.05;
const JACKPOT_CUT: f64 = 0.03;
const TOP_BETTOR_CUT: f64 = 0.02;

/// Odds probability clamp.
const MIN_PROBABILITY: f64 = 0.02;
const MAX_PROBABILITY: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BettingPhase {
    Open,
    Locked,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub battle_id: BattleId,
    pub bettor: String,
    pub agent_id: AgentId,
    pub amount: f64,
    pub placed_at: u64,
    pub settled: bool,
    /// Zero until settled; fixed forever afterwards.
    pub payout: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BettingError {
    /// Phase-gated operation attempted outside `OPEN`.
    InvalidPhase { phase: BettingPhase },
    /// Stake below the 1-token minimum, or not finite.
    InvalidAmount { amount: f64 },
}

impl std::fmt::Display for BettingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BettingError::InvalidPhase { phase } => {
                write!(f, "bets are not accepted in phase {:?}", phase)
            }
            BettingError::InvalidAmount { amount } => write!(f, "invalid bet amount {}", amount),
        }
    }
}

impl std::error::Error for BettingError {}

/// Result of a completed settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub total_pool: f64,
    pub carried_jackpot_in: f64,
    pub winners_pool: f64,
    pub treasury: f64,
    pub burn: f64,
    /// Carry-forward for the next battle.
    pub next_jackpot: f64,
    /// Winning bettor with the largest total stake, and their bonus.
    pub top_bettor: Option<(String, f64)>,
    /// Per-bet payouts, bonus included.
    pub payouts: Vec<(BetId, f64)>,
}

/// Floor to two decimals (payouts never round up).
fn floor_cents(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

/// One battle's betting book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingPool {
    pub battle_id: BattleId,
    pub phase: BettingPhase,
    /// Jackpot carried in from the previous battle's settlement.
    pub carried_jackpot: f64,
    bets: Vec<Bet>,
    settlement: Option<Settlement>,
}

impl BettingPool {
    pub fn new(battle_id: BattleId, carried_jackpot: f64) -> Self {
        Self {
            battle_id,
            phase: BettingPhase::Open,
            carried_jackpot,
            bets: Vec::new(),
            settlement: None,
        }
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn total_pool(&self) -> f64 {
        self.bets.iter().map(|b| b.amount).sum()
    }

    /// Total staked on one agent.
    pub fn staked_on(&self, agent: AgentId) -> f64 {
        self.bets
            .iter()
            .filter(|b| b.agent_id == agent)
            .map(|b| b.amount)
            .sum()
    }

    /// Accept a bet while the phase is open.
    pub fn place_bet(
        &mut self,
        bettor: impl Into<String>,
        agent_id: AgentId,
        amount: f64,
        now: u64,
    ) -> Result<BetId, BettingError> {
        if self.phase != BettingPhase::Open {
            return Err(BettingError::InvalidPhase { phase: self.phase });
        }
        if !amount.is_finite() || amount < 1.0 {
            return Err(BettingError::InvalidAmount { amount });
        }
        let bet = Bet {
            id: BetId::new(),
            battle_id: self.battle_id,
            bettor: bettor.into(),
            agent_id,
            amount,
            placed_at: now,
            settled: false,
            payout: 0.0,
        };
        let id = bet.id;
        self.bets.push(bet);
        Ok(id)
    }

    /// Stop accepting bets (battle going active).
    pub fn lock(&mut self) {
        if self.phase == BettingPhase::Open {
            self.phase = BettingPhase::Locked;
        }
    }

    /// Live decimal odds per alive agent.
    ///
    /// `probability = normalise(0.4·hpShare + 0.3·(1 − poolShare) + 0.3·winRate)`
    /// clamped to `[0.02, 0.95]`; odds are `1 / probability` at two decimals.
    /// `win_rate` returns `None` for a never-battled agent (imputed 0.5).
    pub fn live_odds<F>(&self, roster: &[Agent], win_rate: F) -> BTreeMap<AgentId, f64>
    where
        F: Fn(AgentId) -> Option<f64>,
    {
        let alive: Vec<&Agent> = roster.iter().filter(|a| a.alive).collect();
        if alive.is_empty() {
            return BTreeMap::new();
        }
        let total_hp: f64 = alive.iter().map(|a| a.hp as f64).sum();
        let total_pool = self.total_pool();

        let mut raw: BTreeMap<AgentId, f64> = BTreeMap::new();
        for agent in &alive {
            let hp_share = if total_hp > 0.0 {
                agent.hp as f64 / total_hp
            } else {
                1.0 / alive.len() as f64
            };
            let pool_share = if total_pool > 0.0 {
                self.staked_on(agent.id) / total_pool
            } else {
                0.0
            };
            let rate = win_rate(agent.id).unwrap_or(0.5);
            raw.insert(agent.id, 0.4 * hp_share + 0.3 * (1.0 - pool_share) + 0.3 * rate);
        }

        let sum: f64 = raw.values().sum();
        raw.into_iter()
            .map(|(id, score)| {
                let probability = (score / sum).clamp(MIN_PROBABILITY, MAX_PROBABILITY);
                (id, (100.0 / probability).round() / 100.0)
            })
            .collect()
    }

    /// Refund every bet (battle cancelled before going active).
    pub fn refund_all(&mut self) {
        for bet in &mut self.bets {
            if !bet.settled {
                bet.settled = true;
                bet.payout = bet.amount;
            }
        }
        self.phase = BettingPhase::Settled;
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    /// Settle the pool for a winner. Idempotent: a second call returns the
    /// already-recorded result.
    pub fn settle(&mut self, winner: AgentId) -> &Settlement {
        if self.settlement.is_some() {
            log::info!("battle {} already settled, returning recorded result", self.battle_id);
            return self.settlement.as_ref().unwrap();
        }

        let total_pool = self.total_pool();
        let carried = self.carried_jackpot;
        let winners_pool = WINNERS_CUT * total_pool + carried;
        let treasury = TREASURY_CUT * total_pool;
        let burn = BURN_CUT * total_pool;
        let mut next_jackpot = JACKPOT_CUT * total_pool;
        let top_cut = TOP_BETTOR_CUT * total_pool;

        let winning: Vec<usize> = (0..self.bets.len())
            .filter(|i| self.bets[*i].agent_id == winner)
            .collect();
        let total_winning: f64 = winning.iter().map(|i| self.bets[*i].amount).sum();

        let mut payouts = Vec::new();
        let mut top_bettor = None;

        if total_winning > 0.0 {
            // Aggregate winning stake per bettor for the top-bettor bonus;
            // ties break on the earliest placed bet.
            let mut by_bettor: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
            for &i in &winning {
                let bet = &self.bets[i];
                let entry = by_bettor
                    .entry(bet.bettor.as_str())
                    .or_insert((0.0, bet.placed_at));
                entry.0 += bet.amount;
                entry.1 = entry.1.min(bet.placed_at);
            }
            let best = by_bettor
                .iter()
                .max_by(|(_, (amt_a, at_a)), (_, (amt_b, at_b))| {
                    amt_a
                        .partial_cmp(amt_b)
                        .unwrap()
                        .then(at_b.cmp(at_a))
                })
                .map(|(name, _)| name.to_string());

            for &i in &winning {
                let share = self.bets[i].amount / total_winning;
                let mut payout = floor_cents(winners_pool * share);
                if Some(self.bets[i].bettor.clone()) == best {
                    // Bonus attaches to the top bettor's first winning bet.
                    let first = winning
                        .iter()
                        .filter(|&&j| self.bets[j].bettor == self.bets[i].bettor)
                        .min_by_key(|&&j| self.bets[j].placed_at)
                        .copied();
                    if first == Some(i) {
                        payout += floor_cents(top_cut);
                    }
                }
                payouts.push((self.bets[i].id, payout));
            }
            top_bettor = best.map(|name| (name, floor_cents(top_cut)));
        } else {
            // Nobody backed the winner: winners and top-bettor cuts roll
            // into the next battle's jackpot.
            next_jackpot += winners_pool + top_cut;
        }

        for bet in &mut self.bets {
            bet.settled = true;
            bet.payout = payouts
                .iter()
                .find(|(id, _)| *id == bet.id)
                .map(|(_, p)| *p)
                .unwrap_or(0.0);
        }
        self.phase = BettingPhase::Settled;

        self.settlement = Some(Settlement {
            total_pool,
            carried_jackpot_in: carried,
            winners_pool,
            treasury,
            burn,
            next_jackpot,
            top_bettor,
            payouts,
        });
        self.settlement.as_ref().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentClass;

    fn pool() -> BettingPool {
        BettingPool::new(BattleId::from_u128(1), 0.0)
    }

    #[test]
    fn test_bet_gate_phase_and_amount() {
        let mut pool = pool();
        let agent = AgentId::from_u128(1);
        assert!(pool.place_bet("alice", agent, 10.0, 1).is_ok());
        assert_eq!(
            pool.place_bet("alice", agent, 0.5, 2),
            Err(BettingError::InvalidAmount { amount: 0.5 })
        );
        pool.lock();
        assert_eq!(
            pool.place_bet("alice", agent, 10.0, 3),
            Err(BettingError::InvalidPhase {
                phase: BettingPhase::Locked
            })
        );
    }

    #[test]
    fn test_settlement_worked_example() {
        // totalPool 10000, carried 500; Alice 500 + Bob 300 on the winner,
        // 1200 losing. winnersPool 9000, Alice 5625 + 200 bonus, Bob 3375.
        let winner = AgentId::from_u128(1);
        let loser = AgentId::from_u128(2);
        let mut pool = BettingPool::new(BattleId::from_u128(1), 500.0);
        let alice = pool.place_bet("alice", winner, 500.0, 10).unwrap();
        let bob = pool.place_bet("bob", winner, 300.0, 11).unwrap();
        pool.place_bet("carol", loser, 1200.0, 12).unwrap();
        pool.place_bet("dave", loser, 8000.0, 13).unwrap();
        pool.lock();

        let settlement = pool.settle(winner).clone();
        assert_eq!(settlement.total_pool, 10000.0);
        assert_eq!(settlement.winners_pool, 9000.0);
        assert_eq!(settlement.treasury, 500.0);
        assert_eq!(settlement.burn, 500.0);
        assert_eq!(settlement.next_jackpot, 300.0);
        assert_eq!(
            settlement.top_bettor,
            Some(("alice".to_string(), 200.0))
        );

        let payout_of = |id: BetId| {
            pool.bets()
                .iter()
                .find(|b| b.id == id)
                .map(|b| b.payout)
                .unwrap()
        };
        assert_eq!(payout_of(alice), 5825.0);
        assert_eq!(payout_of(bob), 3375.0);
        assert!(pool.bets().iter().all(|b| b.settled));
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let winner = AgentId::from_u128(1);
        let mut pool = pool();
        pool.place_bet("alice", winner, 100.0, 1).unwrap();
        pool.lock();
        let first = pool.settle(winner).clone();
        let second = pool.settle(winner).clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_winner_bets_roll_into_jackpot() {
        let winner = AgentId::from_u128(1);
        let loser = AgentId::from_u128(2);
        let mut pool = BettingPool::new(BattleId::from_u128(1), 50.0);
        pool.place_bet("carol", loser, 1000.0, 1).unwrap();
        pool.lock();

        let settlement = pool.settle(winner);
        assert!(settlement.payouts.is_empty());
        assert!(settlement.top_bettor.is_none());
        // 0.03·1000 + (0.85·1000 + 50) + 0.02·1000
        assert!((settlement.next_jackpot - 950.0).abs() < 1e-9);
    }

    #[test]
    fn test_conservation_within_rounding() {
        let winner = AgentId::from_u128(1);
        let loser = AgentId::from_u128(2);
        let mut pool = BettingPool::new(BattleId::from_u128(1), 137.0);
        pool.place_bet("a", winner, 333.33, 1).unwrap();
        pool.place_bet("b", winner, 666.67, 2).unwrap();
        pool.place_bet("c", winner, 17.0, 3).unwrap();
        pool.place_bet("d", loser, 982.5, 4).unwrap();
        pool.lock();

        let settlement = pool.settle(winner).clone();
        let paid: f64 = settlement.payouts.iter().map(|(_, p)| p).sum();
        let accounted = paid
            + settlement.treasury
            + settlement.burn
            + settlement.next_jackpot;
        let input = settlement.total_pool + settlement.carried_jackpot_in;
        // Payouts floor to cents, so the books may run short by up to a cent
        // per winning bet (plus the bonus) but never long.
        assert!(accounted <= input + 1e-9, "paid out more than came in");
        assert!(input - accounted <= 0.05, "input {} accounted {}", input, accounted);
    }

    #[test]
    fn test_refund_on_cancellation() {
        let agent = AgentId::from_u128(1);
        let mut pool = pool();
        pool.place_bet("alice", agent, 25.0, 1).unwrap();
        pool.place_bet("bob", agent, 75.0, 2).unwrap();
        pool.refund_all();
        assert!(pool.bets().iter().all(|b| b.settled && b.payout == b.amount));
        assert_eq!(pool.phase, BettingPhase::Settled);
    }

    #[test]
    fn test_top_bettor_tie_breaks_on_first_come() {
        let winner = AgentId::from_u128(1);
        let mut pool = pool();
        pool.place_bet("late", winner, 100.0, 20).unwrap();
        pool.place_bet("early", winner, 100.0, 5).unwrap();
        pool.lock();
        let settlement = pool.settle(winner);
        assert_eq!(settlement.top_bettor.as_ref().unwrap().0, "early");
    }

    #[test]
    fn test_live_odds_clamped_and_rounded() {
        let mut pool = pool();
        let mut roster = vec![
            Agent::new(AgentClass::Warrior, "KRUSHNAR"),
            Agent::new(AgentClass::Trader, "DELTAFOX"),
        ];
        roster[1].hp = 10;
        pool.place_bet("alice", roster[0].id, 900.0, 1).unwrap();
        pool.place_bet("bob", roster[1].id, 100.0, 2).unwrap();

        let odds = pool.live_odds(&roster, |_| None);
        assert_eq!(odds.len(), 2);
        for value in odds.values() {
            assert!(*value >= 1.05 && *value <= 50.0, "odds {}", value);
            assert_eq!((*value * 100.0).round() / 100.0, *value);
        }
    }

    #[test]
    fn test_dead_agents_get_no_odds() {
        let pool = pool();
        let mut roster = vec![Agent::new(AgentClass::Warrior, "KRUSHNAR")];
        roster[0].alive = false;
        assert!(pool.live_odds(&roster, |_| Some(0.4)).is_empty());
    }
}
