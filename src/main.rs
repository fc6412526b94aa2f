//! hexpit - a five-gladiator hex-arena battle, run end to end.
//!
//! ## Usage
//!
//! ```
//! hexpit run-battle
//! ```
//!
//! Environment:
//! - `GROQ_API_KEY` / `GOOGLE_API_KEY` / `OPENROUTER_API_KEY`: enable the
//!   matching model providers (none set: pure simulation mode)
//! - `BATTLE_SPEED`: `instant` | `fast` | `slow` (inter-epoch delay)
//! - `BATTLE_SEED`: u64 seed for a reproducible simulated battle
//!
//! Exits 0 on a clean completion, 1 on fatal error.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use hexpit::coordinator::{BattleCoordinator, BattleSpeed, CoordinatorConfig};
use hexpit::llm::{LlmClient, ProviderPool, SimulatedClient};
use hexpit::market::SimulatedOracle;
use hexpit::store::InMemoryStore;
use hexpit::strategy::strategy_for_class;
use hexpit::{AgentClass, BattleConfig, BattleState, Strategy};

/// Daily call quota granted to each configured provider.
const PROVIDER_DAILY_QUOTA: u32 = 10_000;

fn provider_pool(seed: u64) -> Option<Arc<dyn LlmClient>> {
    // Provider keys select pool membership. The bundled transport is the
    // simulated client; a real HTTP client implements `LlmClient` and
    // slots in here.
    let mut pool = ProviderPool::new();
    let mut configured = Vec::new();
    for (env_key, name) in [
        ("GROQ_API_KEY", "groq"),
        ("GOOGLE_API_KEY", "gemini"),
        ("OPENROUTER_API_KEY", "openrouter"),
    ] {
        if env::var(env_key).is_ok_and(|v| !v.is_empty()) {
            pool = pool.push(Box::new(SimulatedClient::new(name, seed)), PROVIDER_DAILY_QUOTA);
            configured.push(name);
        }
    }
    if configured.is_empty() {
        log::info!("no provider keys set, running in simulation mode");
        None
    } else {
        log::info!("providers configured: {}", configured.join(", "));
        Some(Arc::new(pool))
    }
}

async fn run_battle() -> Result<(), Box<dyn std::error::Error>> {
    let seed = env::var("BATTLE_SEED")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or_else(|| rand::rng().random());
    let speed: BattleSpeed = env::var("BATTLE_SPEED")
        .ok()
        .map(|v| v.parse())
        .transpose()
        .map_err(std::io::Error::other)?
        .unwrap_or_default();
    log::info!("seed {} speed {:?}", seed, speed);

    let mut rng = StdRng::seed_from_u64(seed);
    let state = BattleState::new(
        &AgentClass::ALL,
        BattleConfig {
            seed,
            ..BattleConfig::default()
        },
        &mut rng,
    );

    let client = provider_pool(seed);
    let strategies: Vec<Arc<dyn Strategy>> = state
        .roster
        .iter()
        .enumerate()
        .map(|(i, agent)| {
            Arc::from(strategy_for_class(
                agent.class,
                client.clone(),
                seed.wrapping_add(i as u64),
            ))
        })
        .collect();

    let coordinator = BattleCoordinator::start_battle(
        state,
        strategies,
        Box::new(SimulatedOracle::new(seed)),
        Arc::new(InMemoryStore::new()),
        CoordinatorConfig {
            speed,
            ..CoordinatorConfig::default()
        },
    )
    .await?;

    // Print the spectator stream as JSON lines while the battle runs.
    let (_subscriber, mut events) = coordinator.subscribe().await;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => log::warn!("unserialisable event: {}", err),
            }
        }
    });

    let final_state = coordinator.run().await?;
    let _ = printer.await;

    let winner = final_state
        .winner
        .and_then(|id| final_state.agent(id))
        .map(|a| format!("{} ({})", a.name, a.class))
        .unwrap_or_else(|| "nobody".to_string());
    log::info!(
        "battle {} finished after {} epochs, winner: {}",
        final_state.id,
        final_state.epoch,
        winner
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let command = env::args().nth(1);
    match command.as_deref() {
        Some("run-battle") | None => match run_battle().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                log::error!("battle failed: {}", err);
                ExitCode::FAILURE
            }
        },
        Some(other) => {
            eprintln!("unknown command {:?} (expected: run-battle)", other);
            ExitCode::FAILURE
        }
    }
}
