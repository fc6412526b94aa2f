//! The combat triangle: ATTACK > SABOTAGE > DEFEND > ATTACK.
//!
//! `resolve_clash` is a pure function over a clash description; committing
//! the resulting HP deltas is the pipeline's job. All intermediate math runs
//! in `f64`; each committed delta is floored to an integer independently.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agent::AgentClass;
use crate::decision::Stance;

/// Resolved clash kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatOutcome {
    /// ATTACK beats SABOTAGE: full damage, stolen as HP.
    Overpower,
    /// ATTACK into DEFEND: residual damage, reflection on the attacker.
    Absorb,
    /// No counter-stance; ATTACK steals, SABOTAGE chips.
    Uncontested,
    /// SABOTAGE slips past DEFEND at reduced effect.
    Bypass,
    /// SABOTAGE meets SABOTAGE: both sides splash.
    Stalemate,
}

impl CombatOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CombatOutcome::Overpower => "overpower",
            CombatOutcome::Absorb => "absorb",
            CombatOutcome::Uncontested => "uncontested",
            CombatOutcome::Bypass => "bypass",
            CombatOutcome::Stalemate => "stalemate",
        }
    }
}

/// Everything the triangle needs to know about one clash.
#[derive(Debug, Clone, Copy)]
pub struct Clash {
    pub aggressor_class: AgentClass,
    /// `Attack` or `Sabotage`; callers never pass the other stances.
    pub stance: Stance,
    /// Already clamped to the aggressor's current HP.
    pub stake: i32,
    pub target_class: AgentClass,
    pub target_stance: Stance,
    pub aggressor_berserk: bool,
    pub target_berserk: bool,
    pub aggressor_fortify: bool,
    pub target_fortify: bool,
    /// Sponsor attack boost, additive on the ATTACK modifier.
    pub attack_boost: f64,
    /// Target is the aggressor's active ally.
    pub betrayal: bool,
}

/// The triangle's verdict. `damage_to_target` and `delta_aggressor` are the
/// computed integer deltas before the victim's remaining-HP clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClashResult {
    pub outcome: CombatOutcome,
    pub stake: i32,
    pub damage_to_target: i32,
    /// Positive: HP stolen. Negative: reflection / splash taken.
    pub delta_aggressor: i32,
    pub blocked: bool,
}

/// Class modifier on an aggressive stance. Gambler rolls fresh per clash.
fn aggressive_modifier<R: Rng>(class: AgentClass, stance: Stance, rng: &mut R) -> f64 {
    match (class, stance) {
        (AgentClass::Warrior, Stance::Attack) => 0.20,
        (AgentClass::Survivor, Stance::Attack) => -0.20,
        (AgentClass::Trader, Stance::Sabotage) => 0.10,
        (AgentClass::Parasite, Stance::Sabotage) => 0.10,
        (AgentClass::Gambler, _) => rng.random_range(0.0..0.15),
        _ => 0.0,
    }
}

/// Class modifier on DEFEND potency. Positive potency both absorbs more
/// residual damage and reflects harder.
fn defend_modifier<R: Rng>(class: AgentClass, rng: &mut R) -> f64 {
    match class {
        AgentClass::Warrior => -0.10,
        AgentClass::Survivor => 0.20,
        AgentClass::Gambler => rng.random_range(0.0..0.15),
        _ => 0.0,
    }
}

/// Resolve one clash. `rng` feeds only the gambler's per-event roll.
pub fn resolve_clash<R: Rng>(clash: &Clash, rng: &mut R) -> ClashResult {
    debug_assert!(clash.stance.is_aggressive());

    let stake = clash.stake.max(0);
    let s = stake as f64;
    let mut agg_mod = aggressive_modifier(clash.aggressor_class, clash.stance, rng);
    if clash.stance == Stance::Attack {
        agg_mod += clash.attack_boost;
        if clash.aggressor_berserk {
            agg_mod += 1.0;
        }
    }
    let agg = 1.0 + agg_mod;

    let (outcome, raw_damage, raw_aggressor, transfers) = match (clash.stance, clash.target_stance)
    {
        (Stance::Attack, Stance::Sabotage) => (CombatOutcome::Overpower, s * agg, 0.0, true),
        (Stance::Attack, Stance::Defend) => {
            let def = defend_modifier(clash.target_class, rng);
            (
                CombatOutcome::Absorb,
                s * 0.25 * (1.0 - def),
                -(s * 0.5 * (1.0 + def)),
                false,
            )
        }
        (Stance::Attack, _) => (CombatOutcome::Uncontested, s * agg, 0.0, true),
        (Stance::Sabotage, Stance::Defend) => (CombatOutcome::Bypass, s * 0.6 * agg, 0.0, false),
        (Stance::Sabotage, Stance::Sabotage) => {
            (CombatOutcome::Stalemate, s * 0.3 * agg, -(s * 0.15), false)
        }
        _ => (CombatOutcome::Uncontested, s * 0.6 * agg, 0.0, false),
    };

    // Damage-side multipliers, then the immunity clamp.
    let mut damage = raw_damage;
    if clash.target_berserk {
        damage *= 1.5;
    }
    if clash.betrayal {
        damage *= 2.0;
    }
    let mut blocked = outcome == CombatOutcome::Absorb;
    if clash.target_fortify {
        damage = 0.0;
        blocked = true;
    }
    let damage = damage.floor() as i32;

    // Aggressor side: transfers steal exactly what landed; reflections and
    // splash scale up for a berserker and vanish under fortify.
    let delta_aggressor = if transfers {
        damage
    } else {
        let mut taken = -raw_aggressor;
        if clash.aggressor_berserk {
            taken *= 1.5;
        }
        if clash.aggressor_fortify {
            taken = 0.0;
        }
        -(taken.floor() as i32)
    };

    ClashResult {
        outcome,
        stake,
        damage_to_target: damage,
        delta_aggressor,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    fn clash(
        aggressor: AgentClass,
        stance: Stance,
        stake: i32,
        target: AgentClass,
        target_stance: Stance,
    ) -> Clash {
        Clash {
            aggressor_class: aggressor,
            stance,
            stake,
            target_class: target,
            target_stance,
            aggressor_berserk: false,
            target_berserk: false,
            aggressor_fortify: false,
            target_fortify: false,
            attack_boost: 0.0,
            betrayal: false,
        }
    }

    #[test]
    fn test_overpower_steals_with_warrior_bonus() {
        let result = resolve_clash(
            &clash(
                AgentClass::Warrior,
                Stance::Attack,
                100,
                AgentClass::Parasite,
                Stance::Sabotage,
            ),
            &mut rng(),
        );
        assert_eq!(result.outcome, CombatOutcome::Overpower);
        assert_eq!(result.damage_to_target, 120);
        assert_eq!(result.delta_aggressor, 120);
        assert!(!result.blocked);
    }

    #[test]
    fn test_absorb_matches_worked_example() {
        // Warrior ATTACK 200 into Survivor DEFEND: residual 25% cut by the
        // survivor's potency, reflection 50% scaled up by it.
        let result = resolve_clash(
            &clash(
                AgentClass::Warrior,
                Stance::Attack,
                200,
                AgentClass::Survivor,
                Stance::Defend,
            ),
            &mut rng(),
        );
        assert_eq!(result.outcome, CombatOutcome::Absorb);
        assert_eq!(result.damage_to_target, 40);
        assert_eq!(result.delta_aggressor, -120);
        assert!(result.blocked);
    }

    #[test]
    fn test_uncontested_attack_transfers() {
        let result = resolve_clash(
            &clash(
                AgentClass::Trader,
                Stance::Attack,
                80,
                AgentClass::Parasite,
                Stance::None,
            ),
            &mut rng(),
        );
        assert_eq!(result.outcome, CombatOutcome::Uncontested);
        assert_eq!(result.damage_to_target, 80);
        assert_eq!(result.delta_aggressor, 80);
    }

    #[test]
    fn test_sabotage_bypass_and_uncontested() {
        let bypass = resolve_clash(
            &clash(
                AgentClass::Parasite,
                Stance::Sabotage,
                100,
                AgentClass::Survivor,
                Stance::Defend,
            ),
            &mut rng(),
        );
        assert_eq!(bypass.outcome, CombatOutcome::Bypass);
        // 0.6 × 100 × 1.10 parasite bonus
        assert_eq!(bypass.damage_to_target, 66);
        assert_eq!(bypass.delta_aggressor, 0);

        let open = resolve_clash(
            &clash(
                AgentClass::Survivor,
                Stance::Sabotage,
                100,
                AgentClass::Warrior,
                Stance::Attack,
            ),
            &mut rng(),
        );
        assert_eq!(open.outcome, CombatOutcome::Uncontested);
        assert_eq!(open.damage_to_target, 60);
    }

    #[test]
    fn test_stalemate_splashes_both() {
        let result = resolve_clash(
            &clash(
                AgentClass::Trader,
                Stance::Sabotage,
                100,
                AgentClass::Parasite,
                Stance::Sabotage,
            ),
            &mut rng(),
        );
        assert_eq!(result.outcome, CombatOutcome::Stalemate);
        // 0.3 × 100 × 1.10 trader bonus
        assert_eq!(result.damage_to_target, 33);
        assert_eq!(result.delta_aggressor, -15);
    }

    #[test]
    fn test_berserk_doubles_attack_and_amplifies_reflection() {
        let mut input = clash(
            AgentClass::Warrior,
            Stance::Attack,
            100,
            AgentClass::Trader,
            Stance::None,
        );
        input.aggressor_berserk = true;
        let result = resolve_clash(&input, &mut rng());
        // +20% class +100% berserk
        assert_eq!(result.damage_to_target, 220);

        let mut reflected = clash(
            AgentClass::Warrior,
            Stance::Attack,
            100,
            AgentClass::Trader,
            Stance::Defend,
        );
        reflected.aggressor_berserk = true;
        let result = resolve_clash(&reflected, &mut rng());
        // reflection 50 × 1.5 berserk intake
        assert_eq!(result.delta_aggressor, -75);
    }

    #[test]
    fn test_fortify_blocks_damage_and_reflection() {
        let mut input = clash(
            AgentClass::Warrior,
            Stance::Attack,
            300,
            AgentClass::Survivor,
            Stance::None,
        );
        input.target_fortify = true;
        let result = resolve_clash(&input, &mut rng());
        assert_eq!(result.damage_to_target, 0);
        assert!(result.blocked);

        let mut reflected = clash(
            AgentClass::Warrior,
            Stance::Attack,
            300,
            AgentClass::Survivor,
            Stance::Defend,
        );
        reflected.aggressor_fortify = true;
        let result = resolve_clash(&reflected, &mut rng());
        assert_eq!(result.delta_aggressor, 0);
    }

    #[test]
    fn test_betrayal_doubles_damage() {
        let mut input = clash(
            AgentClass::Parasite,
            Stance::Sabotage,
            100,
            AgentClass::Trader,
            Stance::None,
        );
        input.betrayal = true;
        let result = resolve_clash(&input, &mut rng());
        // 0.6 × 100 × 1.10 × 2
        assert_eq!(result.damage_to_target, 132);
    }

    #[test]
    fn test_sponsor_attack_boost_is_additive() {
        let mut input = clash(
            AgentClass::Warrior,
            Stance::Attack,
            100,
            AgentClass::Trader,
            Stance::None,
        );
        input.attack_boost = 0.10;
        let result = resolve_clash(&input, &mut rng());
        assert_eq!(result.damage_to_target, 130);
    }

    #[test]
    fn test_gambler_roll_stays_in_range() {
        let mut rng = rng();
        for _ in 0..50 {
            let result = resolve_clash(
                &clash(
                    AgentClass::Gambler,
                    Stance::Attack,
                    100,
                    AgentClass::Trader,
                    Stance::None,
                ),
                &mut rng,
            );
            assert!(result.damage_to_target >= 100 && result.damage_to_target < 115);
        }
    }
}
