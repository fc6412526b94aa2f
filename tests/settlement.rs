//! Pool settlement through the coordinator: pari-mutuel payouts, the
//! carry-forward jackpot singleton, and phase gating.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use hexpit::coordinator::{BattleCoordinator, CoordinatorConfig};
use hexpit::market::SimulatedOracle;
use hexpit::store::{BattleStore, InMemoryStore};
use hexpit::strategy::{ScriptedStrategy, Strategy};
use hexpit::{AgentClass, AgentId, BattleConfig, BattleState, CoordinatorError};

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        decision_timeout: Duration::from_secs(5),
        ..CoordinatorConfig::default()
    }
}

/// Two-agent, one-epoch battle where the higher-HP agent is the known
/// timeout winner.
async fn rigged_battle(
    store: Arc<dyn BattleStore>,
    seed: u64,
) -> (BattleCoordinator, AgentId, AgentId) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = BattleState::new(
        &[AgentClass::Trader, AgentClass::Survivor],
        BattleConfig {
            max_epochs: 1,
            seed,
            ..BattleConfig::default()
        },
        &mut rng,
    );
    let ids = state.sorted_ids();
    state.agent_mut(ids[0]).unwrap().hp = 419;
    state.agent_mut(ids[1]).unwrap().hp = 420;
    let strategies: Vec<Arc<dyn Strategy>> = state
        .roster
        .iter()
        .map(|a| Arc::new(ScriptedStrategy::new(a.class, vec![])) as Arc<dyn Strategy>)
        .collect();
    let coordinator = BattleCoordinator::start_battle(
        state,
        strategies,
        Box::new(SimulatedOracle::flat(seed)),
        store,
        config(),
    )
    .await
    .unwrap();
    (coordinator, ids[1], ids[0])
}

#[tokio::test]
async fn pari_mutuel_settlement_with_carried_jackpot() {
    let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
    store.set_jackpot(500.0).await.unwrap();

    let (coordinator, winner, loser) = rigged_battle(store.clone(), 21).await;
    coordinator.place_bet("alice", winner, 500.0).await.unwrap();
    coordinator.place_bet("bob", winner, 300.0).await.unwrap();
    coordinator.place_bet("carol", loser, 1200.0).await.unwrap();
    coordinator.place_bet("dave", loser, 8000.0).await.unwrap();

    let final_state = coordinator.run().await.unwrap();
    assert_eq!(final_state.winner, Some(winner));

    let settlement = coordinator.settlement().await.expect("settled");
    assert_eq!(settlement.total_pool, 10000.0);
    assert_eq!(settlement.carried_jackpot_in, 500.0);
    assert_eq!(settlement.winners_pool, 9000.0);
    assert_eq!(settlement.treasury, 500.0);
    assert_eq!(settlement.burn, 500.0);
    assert_eq!(settlement.next_jackpot, 300.0);
    assert_eq!(settlement.top_bettor, Some(("alice".to_string(), 200.0)));

    // Alice: 500/800 x 9000 + 200 bonus; Bob: 300/800 x 9000.
    let payouts: Vec<f64> = settlement.payouts.iter().map(|(_, p)| *p).collect();
    assert!(payouts.contains(&5825.0));
    assert!(payouts.contains(&3375.0));

    // The jackpot singleton now carries 3% forward.
    assert_eq!(store.jackpot().await.unwrap(), 300.0);
}

#[tokio::test]
async fn unbacked_winner_rolls_pool_into_jackpot() {
    let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
    let (coordinator, _winner, loser) = rigged_battle(store.clone(), 22).await;
    coordinator.place_bet("carol", loser, 1000.0).await.unwrap();

    coordinator.run().await.unwrap();
    let settlement = coordinator.settlement().await.unwrap();
    assert!(settlement.payouts.is_empty());
    // 0.03 x 1000 + (0.85 x 1000 + 0) + 0.02 x 1000
    assert!((settlement.next_jackpot - 900.0).abs() < 1e-9);

    // The next battle opens with the grown jackpot carried in.
    let (next, _, _) = rigged_battle(store.clone(), 23).await;
    let carried = next.settlement().await.is_none();
    assert!(carried);
    next.run().await.unwrap();
    let second = next.settlement().await.unwrap();
    assert!((second.carried_jackpot_in - 900.0).abs() < 1e-9);
}

#[tokio::test]
async fn bets_rejected_once_battle_is_live() {
    let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
    let (coordinator, winner, _loser) = rigged_battle(store, 24).await;
    coordinator.run().await.unwrap();

    let err = coordinator.place_bet("late", winner, 10.0).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Betting(_)));

    let err = coordinator
        .sponsor(winner, "late", 5.0, hexpit::SponsorTier::T1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Betting(_)));
}

#[tokio::test]
async fn settlement_is_idempotent_per_battle() {
    let store: Arc<dyn BattleStore> = Arc::new(InMemoryStore::new());
    let (coordinator, winner, _) = rigged_battle(store.clone(), 25).await;
    coordinator.place_bet("alice", winner, 100.0).await.unwrap();
    coordinator.run().await.unwrap();

    let first = coordinator.settlement().await.unwrap();
    // Jackpot written once; the recorded settlement is stable.
    let jackpot = store.jackpot().await.unwrap();
    let second = coordinator.settlement().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.jackpot().await.unwrap(), jackpot);
}
