//! Market price oracle.
//!
//! The resolution pipeline settles each gladiator's prediction against the
//! percentage move of one of four assets between epochs. In production the
//! prices come from an external oracle; for tests and offline runs a seeded
//! random-walk simulation stands in.

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Tracked assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Eth,
    Btc,
    Sol,
    Mon,
}

impl Asset {
    pub const ALL: [Asset; 4] = [Asset::Eth, Asset::Btc, Asset::Sol, Asset::Mon];

    pub fn as_str(self) -> &'static str {
        match self {
            Asset::Eth => "ETH",
            Asset::Btc => "BTC",
            Asset::Sol => "SOL",
            Asset::Mon => "MON",
        }
    }

    /// Forgiving parse used on model output ("eth", "Eth", "ETH").
    pub fn parse_loose(raw: &str) -> Option<Asset> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ETH" => Some(Asset::Eth),
            "BTC" => Some(Asset::Btc),
            "SOL" => Some(Asset::Sol),
            "MON" => Some(Asset::Mon),
            _ => None,
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One number per asset, keyed by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetMap {
    #[serde(rename = "ETH")]
    pub eth: f64,
    #[serde(rename = "BTC")]
    pub btc: f64,
    #[serde(rename = "SOL")]
    pub sol: f64,
    #[serde(rename = "MON")]
    pub mon: f64,
}

impl AssetMap {
    pub fn get(&self, asset: Asset) -> f64 {
        match asset {
            Asset::Eth => self.eth,
            Asset::Btc => self.btc,
            Asset::Sol => self.sol,
            Asset::Mon => self.mon,
        }
    }

    pub fn set(&mut self, asset: Asset, value: f64) {
        match asset {
            Asset::Eth => self.eth = value,
            Asset::Btc => self.btc = value,
            Asset::Sol => self.sol = value,
            Asset::Mon => self.mon = value,
        }
    }

    pub fn uniform(value: f64) -> Self {
        Self {
            eth: value,
            btc: value,
            sol: value,
            mon: value,
        }
    }
}

/// A point-in-time market view: spot prices, percentage changes since the
/// previous sample, and the sample timestamp (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub prices: AssetMap,
    pub changes: AssetMap,
    pub timestamp: u64,
}

impl MarketSnapshot {
    /// Percentage change of `asset` from `prev` to `self`, or 0 when the
    /// previous price is unusable. Changes are `-100..+inf`.
    pub fn change_from(&self, prev: &MarketSnapshot, asset: Asset) -> f64 {
        let before = prev.prices.get(asset);
        if before <= 0.0 {
            return 0.0;
        }
        (self.prices.get(asset) / before - 1.0) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The upstream price feed could not be reached.
    Unavailable(String),
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Unavailable(msg) => write!(f, "market oracle unavailable: {}", msg),
        }
    }
}

impl std::error::Error for OracleError {}

/// Price source contract. The coordinator treats a failed fetch as a flat
/// epoch (all changes zero), never as a battle abort.
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn fetch_prices(&mut self) -> Result<MarketSnapshot, OracleError>;
}

// ============================================================================
// Simulated oracle
// ============================================================================

/// Per-step volatility: 4% for majors, 8% for MON.
fn volatility(asset: Asset) -> f64 {
    match asset {
        Asset::Mon => 0.08,
        _ => 0.04,
    }
}

/// Deterministic bounded random walk with a slight upward bias.
///
/// Given the same seed the walk is bit-identical, which the scenario suite
/// relies on.
#[derive(Debug, Clone)]
pub struct SimulatedOracle {
    rng: StdRng,
    prices: AssetMap,
    clock: u64,
    /// Interval stamped between samples, seconds.
    pub step_secs: u64,
    frozen: bool,
}

impl SimulatedOracle {
    const UPWARD_BIAS: f64 = 0.002;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            prices: AssetMap {
                eth: 3200.0,
                btc: 64000.0,
                sol: 145.0,
                mon: 2.5,
            },
            clock: 0,
            step_secs: 300,
            frozen: false,
        }
    }

    /// An oracle whose prices never move; every epoch resolves flat.
    pub fn flat(seed: u64) -> Self {
        let mut oracle = Self::new(seed);
        oracle.frozen = true;
        oracle
    }

    fn step(&mut self) -> MarketSnapshot {
        let mut changes = AssetMap::default();
        if !self.frozen {
            for asset in Asset::ALL {
                let vol = volatility(asset);
                let drift: f64 = self.rng.random_range(-vol..vol) + Self::UPWARD_BIAS;
                let price = (self.prices.get(asset) * (1.0 + drift)).max(f64::MIN_POSITIVE);
                changes.set(asset, drift * 100.0);
                self.prices.set(asset, price);
            }
        }
        self.clock += self.step_secs;
        MarketSnapshot {
            prices: self.prices,
            changes,
            timestamp: self.clock,
        }
    }
}

#[async_trait]
impl MarketOracle for SimulatedOracle {
    async fn fetch_prices(&mut self) -> Result<MarketSnapshot, OracleError> {
        Ok(self.step())
    }
}

/// Replays a fixed sequence of snapshots, then fails. Test harness oracle.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    snapshots: std::collections::VecDeque<MarketSnapshot>,
}

impl ScriptedOracle {
    pub fn new(snapshots: Vec<MarketSnapshot>) -> Self {
        Self {
            snapshots: snapshots.into(),
        }
    }
}

#[async_trait]
impl MarketOracle for ScriptedOracle {
    async fn fetch_prices(&mut self) -> Result<MarketSnapshot, OracleError> {
        self.snapshots
            .pop_front()
            .ok_or_else(|| OracleError::Unavailable("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_oracle_is_deterministic() {
        let mut a = SimulatedOracle::new(42);
        let mut b = SimulatedOracle::new(42);
        for _ in 0..10 {
            let sa = a.fetch_prices().await.unwrap();
            let sb = b.fetch_prices().await.unwrap();
            assert_eq!(sa, sb);
        }
    }

    #[tokio::test]
    async fn test_simulated_walk_stays_bounded_per_step() {
        let mut oracle = SimulatedOracle::new(7);
        for _ in 0..100 {
            let snap = oracle.fetch_prices().await.unwrap();
            for asset in Asset::ALL {
                let vol = volatility(asset) * 100.0;
                let change = snap.changes.get(asset);
                assert!(change > -vol - 1.0 && change < vol + 1.0, "{}", change);
                assert!(snap.prices.get(asset) > 0.0);
            }
        }
    }

    #[tokio::test]
    async fn test_flat_oracle_never_moves() {
        let mut oracle = SimulatedOracle::flat(1);
        let first = oracle.fetch_prices().await.unwrap();
        let second = oracle.fetch_prices().await.unwrap();
        assert_eq!(first.prices, second.prices);
        assert_eq!(second.changes, AssetMap::default());
        assert_eq!(second.change_from(&first, Asset::Eth), 0.0);
    }

    #[test]
    fn test_change_from() {
        let prev = MarketSnapshot {
            prices: AssetMap::uniform(100.0),
            ..MarketSnapshot::default()
        };
        let mut cur = prev;
        cur.prices.set(Asset::Btc, 110.0);
        cur.prices.set(Asset::Sol, 95.0);
        assert!((cur.change_from(&prev, Asset::Btc) - 10.0).abs() < 1e-9);
        assert!((cur.change_from(&prev, Asset::Sol) + 5.0).abs() < 1e-9);
        assert_eq!(cur.change_from(&prev, Asset::Eth), 0.0);
    }

    #[test]
    fn test_asset_parse_loose() {
        assert_eq!(Asset::parse_loose("eth"), Some(Asset::Eth));
        assert_eq!(Asset::parse_loose(" MON "), Some(Asset::Mon));
        assert_eq!(Asset::parse_loose("doge"), None);
    }

    #[test]
    fn test_asset_map_wire_names() {
        let json = serde_json::to_string(&AssetMap::uniform(1.0)).unwrap();
        assert!(json.contains("\"ETH\""));
        assert!(json.contains("\"MON\""));
    }
}
