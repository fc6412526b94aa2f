//! TrueSkill free-for-all ratings.
//!
//! Each gladiator carries independent Gaussians for prediction, combat and
//! survival plus a derived composite. After a battle every category runs a
//! free-for-all update equivalent to the pairwise decomposition of its
//! placement order, scaled by `1/(n-1)` to avoid over-correction.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

pub const INITIAL_MU: f64 = 25.0;
pub const INITIAL_SIGMA: f64 = 25.0 / 3.0;
pub const BETA: f64 = 25.0 / 6.0;
pub const TAU: f64 = 25.0 / 300.0;

/// Minimum battles before a bootstrap confidence interval is meaningful.
pub const BOOTSTRAP_MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mu: f64,
    pub sigma: f64,
}

impl Default for Gaussian {
    fn default() -> Self {
        Self {
            mu: INITIAL_MU,
            sigma: INITIAL_SIGMA,
        }
    }
}

impl Gaussian {
    /// Conservative leaderboard rating.
    pub fn display(&self) -> f64 {
        self.mu - 3.0 * self.sigma
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingCategory {
    Prediction,
    Combat,
    Survival,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentRating {
    pub prediction: Gaussian,
    pub combat: Gaussian,
    pub survival: Gaussian,
    pub composite: Gaussian,
    pub battles: u32,
}

impl AgentRating {
    /// Recompute the composite from the three base categories:
    /// `μ = 0.3·μ_pred + 0.3·μ_combat + 0.4·μ_survival`, variances weighted
    /// by the squared coefficients.
    pub fn recompute_composite(&mut self) {
        self.composite.mu =
            0.3 * self.prediction.mu + 0.3 * self.combat.mu + 0.4 * self.survival.mu;
        let variance = 0.09 * self.prediction.sigma.powi(2)
            + 0.09 * self.combat.sigma.powi(2)
            + 0.16 * self.survival.sigma.powi(2);
        self.composite.sigma = variance.sqrt();
    }
}

/// Per-agent battle statistics used to derive the category placements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBattleStats {
    /// Final placement, 1 = winner.
    pub placement: u32,
    pub prediction_correct: u32,
    pub prediction_total: u32,
    pub kills: u32,
    pub damage_dealt: i64,
    pub damage_taken: i64,
}

impl AgentBattleStats {
    pub fn accuracy(&self) -> f64 {
        if self.prediction_total == 0 {
            0.0
        } else {
            self.prediction_correct as f64 / self.prediction_total as f64
        }
    }

    pub fn combat_score(&self) -> f64 {
        self.kills as f64 * 100.0 + self.damage_dealt as f64 - 0.5 * self.damage_taken as f64
    }
}

// ============================================================================
// Normal distribution helpers
// ============================================================================

/// Abramowitz & Stegun 7.1.26 erf approximation (|error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Mean-shift factor for a win at surprise `t`.
fn v_win(t: f64) -> f64 {
    let denom = normal_cdf(t);
    if denom < 1e-10 { -t } else { normal_pdf(t) / denom }
}

/// Variance-shrink factor for a win at surprise `t`.
fn w_win(t: f64) -> f64 {
    let v = v_win(t);
    v * (v + t)
}

// ============================================================================
// Free-for-all update
// ============================================================================

/// Run the pairwise-decomposed FFA update over one category.
///
/// `order` holds the gaussians in placement order, winner first. Every
/// earlier entry is treated as beating every later entry; each pairwise
/// nudge is scaled by `1/(n-1)`.
pub fn ffa_update(order: &mut [Gaussian]) {
    let n = order.len();
    if n < 2 {
        return;
    }
    let scale = 1.0 / (n as f64 - 1.0);

    // Additive dynamics noise keeps ratings mobile across many battles.
    for g in order.iter_mut() {
        g.sigma = (g.sigma.powi(2) + TAU.powi(2)).sqrt();
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let (wi, lj) = (order[i], order[j]);
            let c = (2.0 * BETA.powi(2) + wi.sigma.powi(2) + lj.sigma.powi(2)).sqrt();
            let t = (wi.mu - lj.mu) / c;
            let v = v_win(t);
            let w = w_win(t).clamp(0.0, 1.0);

            order[i].mu += scale * (wi.sigma.powi(2) / c) * v;
            order[j].mu -= scale * (lj.sigma.powi(2) / c) * v;
            order[i].sigma =
                (wi.sigma.powi(2) * (1.0 - scale * (wi.sigma.powi(2) / c.powi(2)) * w))
                    .max(1e-4)
                    .sqrt();
            order[j].sigma =
                (lj.sigma.powi(2) * (1.0 - scale * (lj.sigma.powi(2) / c.powi(2)) * w))
                    .max(1e-4)
                    .sqrt();
        }
    }
}

/// Placement orders per category, derived from battle stats.
///
/// - survival: by final placement, winner first
/// - prediction: by accuracy ratio, best first
/// - combat: by `kills·100 + dealt − 0.5·taken`, best first
fn category_order(
    stats: &BTreeMap<AgentId, AgentBattleStats>,
    category: RatingCategory,
) -> Vec<AgentId> {
    let mut ids: Vec<AgentId> = stats.keys().copied().collect();
    match category {
        RatingCategory::Survival => ids.sort_by_key(|id| (stats[id].placement, *id)),
        RatingCategory::Prediction => ids.sort_by(|a, b| {
            stats[b]
                .accuracy()
                .partial_cmp(&stats[a].accuracy())
                .unwrap()
                .then(a.cmp(b))
        }),
        RatingCategory::Combat => ids.sort_by(|a, b| {
            stats[b]
                .combat_score()
                .partial_cmp(&stats[a].combat_score())
                .unwrap()
                .then(a.cmp(b))
        }),
        RatingCategory::Composite => unreachable!("composite is derived, never ordered"),
    }
    ids
}

/// Composite-rating Δμ per agent, for history rows and bootstrap samples.
pub type RatingDeltas = BTreeMap<AgentId, f64>;

/// Apply one battle's outcome to the rating table. Creates default ratings
/// for first-time fighters and recomputes every composite.
pub fn update_ratings(
    ratings: &mut HashMap<AgentId, AgentRating>,
    stats: &BTreeMap<AgentId, AgentBattleStats>,
) -> RatingDeltas {
    let before: BTreeMap<AgentId, f64> = stats
        .keys()
        .map(|id| {
            (
                *id,
                ratings.get(id).copied().unwrap_or_default().composite.mu,
            )
        })
        .collect();

    for category in [
        RatingCategory::Survival,
        RatingCategory::Prediction,
        RatingCategory::Combat,
    ] {
        let order = category_order(stats, category);
        let mut gaussians: Vec<Gaussian> = order
            .iter()
            .map(|id| {
                let rating = ratings.entry(*id).or_default();
                match category {
                    RatingCategory::Survival => rating.survival,
                    RatingCategory::Prediction => rating.prediction,
                    RatingCategory::Combat => rating.combat,
                    RatingCategory::Composite => unreachable!(),
                }
            })
            .collect();
        ffa_update(&mut gaussians);
        for (id, updated) in order.iter().zip(gaussians) {
            let rating = ratings.get_mut(id).unwrap();
            match category {
                RatingCategory::Survival => rating.survival = updated,
                RatingCategory::Prediction => rating.prediction = updated,
                RatingCategory::Combat => rating.combat = updated,
                RatingCategory::Composite => unreachable!(),
            }
        }
    }

    let mut deltas = BTreeMap::new();
    for id in stats.keys() {
        let rating = ratings.get_mut(id).unwrap();
        rating.battles += 1;
        rating.recompute_composite();
        deltas.insert(*id, rating.composite.mu - before[id]);
    }
    deltas
}

/// Bootstrap a 95% confidence interval over per-battle composite Δμ values
/// by resampling means. Requires at least three battles.
pub fn bootstrap_ci(deltas: &[f64], iterations: usize, seed: u64) -> Option<(f64, f64)> {
    if deltas.len() < BOOTSTRAP_MIN_SAMPLES {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut means: Vec<f64> = (0..iterations.max(100))
        .map(|_| {
            let sum: f64 = (0..deltas.len())
                .map(|_| deltas[rng.random_range(0..deltas.len())])
                .sum();
            sum / deltas.len() as f64
        })
        .collect();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let lo = means[(means.len() as f64 * 0.025) as usize];
    let hi = means[((means.len() as f64 * 0.975) as usize).min(means.len() - 1)];
    Some((lo, hi))
}
