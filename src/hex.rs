//! Hex arena for the gladiator pit.
//!
//! This module handles:
//! - Axial coordinates, adjacency and distance
//! - The radius-3 arena (37 tiles) with ring levels 0..3
//! - The storm schedule (arena phases shrink the safe zone over time)
//! - Movement validation and occupancy tracking
//! - Loot item placement

use std::collections::HashMap;

use rand::Rng;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Arena radius. A radius-3 hex contains 37 tiles.
pub const ARENA_RADIUS: i32 = 3;

/// The six axial direction offsets, in clockwise order starting east.
pub const HEX_DIRECTIONS: [(i32, i32); 6] = [(1, 0), (0, 1), (-1, 1), (-1, 0), (0, -1), (1, -1)];

/// Axial hex coordinate. The implicit cube coordinate is `s = -q - r`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Axial {
    pub q: i32,
    pub r: i32,
}

impl Axial {
    pub const ORIGIN: Axial = Axial { q: 0, r: 0 };

    pub fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The implicit third cube coordinate.
    pub fn s(self) -> i32 {
        -self.q - self.r
    }

    /// Hex distance: `max(|dq|, |dr|, |dq + dr|)`.
    pub fn distance(self, other: Axial) -> i32 {
        let dq = self.q - other.q;
        let dr = self.r - other.r;
        dq.abs().max(dr.abs()).max((dq + dr).abs())
    }

    /// Ring index from the arena centre (also the tile "level").
    pub fn ring(self) -> i32 {
        self.distance(Axial::ORIGIN)
    }

    /// The six neighbouring coordinates, in direction order.
    pub fn neighbors(self) -> [Axial; 6] {
        let mut out = [Axial::ORIGIN; 6];
        for (i, (dq, dr)) in HEX_DIRECTIONS.iter().enumerate() {
            out[i] = Axial::new(self.q + dq, self.r + dr);
        }
        out
    }

    pub fn is_adjacent(self, other: Axial) -> bool {
        self.distance(other) == 1
    }
}

impl std::fmt::Display for Axial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}

// ============================================================================
// Arena phases and the storm
// ============================================================================

/// Battle phase governing combat availability and the safe zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArenaPhase {
    /// Combat disabled, all 37 tiles safe.
    Loot,
    /// Combat enabled, levels 0..=2 safe (19 tiles).
    Hunt,
    /// Combat enabled, levels 0..=1 safe (7 tiles).
    Blood,
    /// Combat enabled, only the centre tile safe.
    FinalStand,
}

impl ArenaPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ArenaPhase::Loot => "LOOT",
            ArenaPhase::Hunt => "HUNT",
            ArenaPhase::Blood => "BLOOD",
            ArenaPhase::FinalStand => "FINAL_STAND",
        }
    }

    pub fn combat_enabled(self) -> bool {
        !matches!(self, ArenaPhase::Loot)
    }

    /// Highest tile level outside the storm during this phase.
    pub fn max_safe_level(self) -> i32 {
        match self {
            ArenaPhase::Loot => 3,
            ArenaPhase::Hunt => 2,
            ArenaPhase::Blood => 1,
            ArenaPhase::FinalStand => 0,
        }
    }
}

/// Monotone mapping from epoch index to arena phase.
///
/// The boundaries are configurable, but construction rejects any schedule
/// that is not strictly increasing (the storm never recedes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSchedule {
    /// First epoch of `HUNT`.
    pub hunt_at: u32,
    /// First epoch of `BLOOD`.
    pub blood_at: u32,
    /// First epoch of `FINAL_STAND`.
    pub final_stand_at: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    NotMonotone,
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::NotMonotone => write!(f, "phase boundaries must strictly increase"),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl PhaseSchedule {
    pub fn new(hunt_at: u32, blood_at: u32, final_stand_at: u32) -> Result<Self, ScheduleError> {
        if hunt_at < blood_at && blood_at < final_stand_at {
            Ok(Self {
                hunt_at,
                blood_at,
                final_stand_at,
            })
        } else {
            Err(ScheduleError::NotMonotone)
        }
    }

    pub fn phase_for(&self, epoch: u32) -> ArenaPhase {
        if epoch >= self.final_stand_at {
            ArenaPhase::FinalStand
        } else if epoch >= self.blood_at {
            ArenaPhase::Blood
        } else if epoch >= self.hunt_at {
            ArenaPhase::Hunt
        } else {
            ArenaPhase::Loot
        }
    }

    /// Epochs left before the next phase begins. `None` during `FINAL_STAND`.
    pub fn epochs_remaining(&self, epoch: u32) -> Option<u32> {
        match self.phase_for(epoch) {
            ArenaPhase::Loot => Some(self.hunt_at - epoch),
            ArenaPhase::Hunt => Some(self.blood_at - epoch),
            ArenaPhase::Blood => Some(self.final_stand_at - epoch),
            ArenaPhase::FinalStand => None,
        }
    }
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        Self {
            hunt_at: 4,
            blood_at: 11,
            final_stand_at: 18,
        }
    }
}

// ============================================================================
// Grid
// ============================================================================

/// A single arena tile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Ring index from centre, 0..=3.
    pub level: i32,
    /// Occupying agent, at most one.
    pub occupant: Option<AgentId>,
    /// Loot items on the tile.
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    OutOfBounds,
    NotAdjacent,
    Occupied,
    SameTile,
    NotPlaced,
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveError::OutOfBounds => write!(f, "target is outside the arena"),
            MoveError::NotAdjacent => write!(f, "target is not adjacent"),
            MoveError::Occupied => write!(f, "target tile is occupied"),
            MoveError::SameTile => write!(f, "target equals source"),
            MoveError::NotPlaced => write!(f, "agent has no position"),
        }
    }
}

impl std::error::Error for MoveError {}

/// The 37-tile arena with occupancy and loot.
///
/// Serialized as a coordinate/tile list: JSON object keys must be strings,
/// and hibernated battles round-trip through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GridRepr", into = "GridRepr")]
pub struct HexGrid {
    tiles: HashMap<Axial, Tile>,
}

#[derive(Serialize, Deserialize)]
struct GridRepr {
    tiles: Vec<(Axial, Tile)>,
}

impl From<HexGrid> for GridRepr {
    fn from(grid: HexGrid) -> Self {
        let mut tiles: Vec<(Axial, Tile)> = grid.tiles.into_iter().collect();
        tiles.sort_by_key(|(pos, _)| *pos);
        Self { tiles }
    }
}

impl From<GridRepr> for HexGrid {
    fn from(repr: GridRepr) -> Self {
        Self {
            tiles: repr.tiles.into_iter().collect(),
        }
    }
}

impl HexGrid {
    /// Build an empty radius-3 arena.
    pub fn new() -> Self {
        let mut tiles = HashMap::new();
        for q in -ARENA_RADIUS..=ARENA_RADIUS {
            for r in -ARENA_RADIUS..=ARENA_RADIUS {
                let pos = Axial::new(q, r);
                if pos.ring() <= ARENA_RADIUS {
                    tiles.insert(
                        pos,
                        Tile {
                            level: pos.ring(),
                            ..Tile::default()
                        },
                    );
                }
            }
        }
        Self { tiles }
    }

    pub fn contains(&self, pos: Axial) -> bool {
        self.tiles.contains_key(&pos)
    }

    pub fn tile(&self, pos: Axial) -> Option<&Tile> {
        self.tiles.get(&pos)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn occupant(&self, pos: Axial) -> Option<AgentId> {
        self.tiles.get(&pos).and_then(|t| t.occupant)
    }

    /// Whether `pos` sits inside the storm during `phase`.
    pub fn is_storm(&self, pos: Axial, phase: ArenaPhase) -> bool {
        pos.ring() > phase.max_safe_level()
    }

    /// Place an agent on an unoccupied tile.
    pub fn place(&mut self, agent: AgentId, pos: Axial) -> Result<(), MoveError> {
        let tile = self.tiles.get_mut(&pos).ok_or(MoveError::OutOfBounds)?;
        if tile.occupant.is_some() {
            return Err(MoveError::Occupied);
        }
        tile.occupant = Some(agent);
        Ok(())
    }

    /// Clear a tile's occupant, returning who stood there.
    pub fn vacate(&mut self, pos: Axial) -> Option<AgentId> {
        self.tiles.get_mut(&pos).and_then(|t| t.occupant.take())
    }

    /// Validate a single-step move without applying it.
    pub fn validate_move(&self, from: Axial, to: Axial) -> Result<(), MoveError> {
        if !self.contains(to) {
            return Err(MoveError::OutOfBounds);
        }
        if to == from {
            return Err(MoveError::SameTile);
        }
        if !from.is_adjacent(to) {
            return Err(MoveError::NotAdjacent);
        }
        if self.occupant(to).is_some() {
            return Err(MoveError::Occupied);
        }
        Ok(())
    }

    /// Atomically move an agent one tile. The first mover into a contested
    /// tile wins; later movers get `Occupied` with no penalty.
    pub fn apply_move(&mut self, agent: AgentId, from: Axial, to: Axial) -> Result<(), MoveError> {
        if self.occupant(from) != Some(agent) {
            return Err(MoveError::NotPlaced);
        }
        self.validate_move(from, to)?;
        self.vacate(from);
        // validate_move guarantees the target exists and is empty.
        self.tiles.get_mut(&to).unwrap().occupant = Some(agent);
        Ok(())
    }

    /// Adjacent in-grid tiles with no occupant.
    pub fn empty_adjacent(&self, pos: Axial) -> Vec<Axial> {
        pos.neighbors()
            .into_iter()
            .filter(|n| self.contains(*n) && self.occupant(*n).is_none())
            .collect()
    }

    /// The fallback-move target: the adjacent unoccupied non-storm tile
    /// closest to centre, or failing that any adjacent unoccupied tile.
    /// `None` when the agent is fully boxed in.
    pub fn fallback_target(&self, pos: Axial, phase: ArenaPhase) -> Option<Axial> {
        let empty = self.empty_adjacent(pos);
        empty
            .iter()
            .filter(|n| !self.is_storm(**n, phase))
            .min_by_key(|n| (n.ring(), n.q, n.r))
            .or_else(|| empty.iter().min_by_key(|n| (n.ring(), n.q, n.r)))
            .copied()
    }

    /// Scatter `count` loot items across unoccupied tiles, seeded.
    pub fn scatter_items<R: Rng>(&mut self, rng: &mut R, names: &[&str], count: usize) {
        if names.is_empty() {
            return;
        }
        let mut coords: Vec<Axial> = self.tiles.keys().copied().collect();
        coords.sort();
        for _ in 0..count {
            let candidates = coords
                .iter()
                .copied()
                .filter(|c| self.tiles[c].occupant.is_none());
            if let Some(pos) = candidates.choose(rng) {
                let item = names[rng.random_range(0..names.len())].to_string();
                self.tiles.get_mut(&pos).unwrap().items.push(item);
            }
        }
    }

    /// Remove and return every item on a tile (pick-up on entry).
    pub fn take_items(&mut self, pos: Axial) -> Vec<String> {
        self.tiles
            .get_mut(&pos)
            .map(|t| std::mem::take(&mut t.items))
            .unwrap_or_default()
    }

    /// Items within `range` tiles of `pos`, with their coordinates.
    pub fn items_within(&self, pos: Axial, range: i32) -> Vec<(Axial, &str)> {
        let mut found: Vec<(Axial, &str)> = self
            .tiles
            .iter()
            .filter(|(c, t)| pos.distance(**c) <= range && !t.items.is_empty())
            .flat_map(|(c, t)| t.items.iter().map(|i| (*c, i.as_str())))
            .collect();
        found.sort_by_key(|(c, _)| (pos.distance(*c), c.q, c.r));
        found
    }

    /// All in-grid coordinates, sorted (deterministic iteration).
    pub fn coords(&self) -> Vec<Axial> {
        let mut coords: Vec<Axial> = self.tiles.keys().copied().collect();
        coords.sort();
        coords
    }
}

impl Default for HexGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_has_37_tiles() {
        let grid = HexGrid::new();
        assert_eq!(grid.tile_count(), 37);
    }

    #[test]
    fn test_ring_counts_per_level() {
        let grid = HexGrid::new();
        let mut by_level = [0usize; 4];
        for pos in grid.coords() {
            by_level[grid.tile(pos).unwrap().level as usize] += 1;
        }
        assert_eq!(by_level, [1, 6, 12, 18]);
    }

    #[test]
    fn test_distance_is_symmetric_and_hexlike() {
        let a = Axial::new(2, -1);
        let b = Axial::new(-1, 2);
        assert_eq!(a.distance(b), b.distance(a));
        assert_eq!(a.distance(b), 3);
        assert_eq!(a.distance(a), 0);
    }

    #[test]
    fn test_neighbors_are_all_adjacent() {
        let pos = Axial::new(0, 0);
        for n in pos.neighbors() {
            assert_eq!(pos.distance(n), 1);
        }
    }

    #[test]
    fn test_storm_by_phase() {
        let grid = HexGrid::new();
        let edge = Axial::new(3, 0);
        let mid = Axial::new(2, 0);
        let centre = Axial::ORIGIN;
        assert!(!grid.is_storm(edge, ArenaPhase::Loot));
        assert!(grid.is_storm(edge, ArenaPhase::Hunt));
        assert!(grid.is_storm(mid, ArenaPhase::Blood));
        assert!(!grid.is_storm(centre, ArenaPhase::FinalStand));
    }

    #[test]
    fn test_safe_tile_counts_match_phase_table() {
        let grid = HexGrid::new();
        let safe = |phase: ArenaPhase| {
            grid.coords()
                .into_iter()
                .filter(|c| !grid.is_storm(*c, phase))
                .count()
        };
        assert_eq!(safe(ArenaPhase::Loot), 37);
        assert_eq!(safe(ArenaPhase::Hunt), 19);
        assert_eq!(safe(ArenaPhase::Blood), 7);
        assert_eq!(safe(ArenaPhase::FinalStand), 1);
    }

    #[test]
    fn test_move_validation() {
        let mut grid = HexGrid::new();
        let a = AgentId::from_u128(1);
        let b = AgentId::from_u128(2);
        grid.place(a, Axial::new(0, 0)).unwrap();
        grid.place(b, Axial::new(1, 0)).unwrap();

        assert_eq!(
            grid.validate_move(Axial::new(0, 0), Axial::new(1, 0)),
            Err(MoveError::Occupied)
        );
        assert_eq!(
            grid.validate_move(Axial::new(0, 0), Axial::new(0, 0)),
            Err(MoveError::SameTile)
        );
        assert_eq!(
            grid.validate_move(Axial::new(0, 0), Axial::new(2, 0)),
            Err(MoveError::NotAdjacent)
        );
        assert_eq!(
            grid.validate_move(Axial::new(3, 0), Axial::new(4, 0)),
            Err(MoveError::OutOfBounds)
        );
        assert!(grid.validate_move(Axial::new(0, 0), Axial::new(0, 1)).is_ok());
    }

    #[test]
    fn test_apply_move_first_wins() {
        let mut grid = HexGrid::new();
        let a = AgentId::from_u128(1);
        let b = AgentId::from_u128(2);
        grid.place(a, Axial::new(1, 0)).unwrap();
        grid.place(b, Axial::new(-1, 0)).unwrap();

        grid.apply_move(a, Axial::new(1, 0), Axial::ORIGIN).unwrap();
        assert_eq!(
            grid.apply_move(b, Axial::new(-1, 0), Axial::ORIGIN),
            Err(MoveError::Occupied)
        );
        assert_eq!(grid.occupant(Axial::ORIGIN), Some(a));
        assert_eq!(grid.occupant(Axial::new(-1, 0)), Some(b));
    }

    #[test]
    fn test_fallback_target_prefers_safe_centreward() {
        let mut grid = HexGrid::new();
        let a = AgentId::from_u128(1);
        grid.place(a, Axial::new(3, 0)).unwrap();
        let target = grid.fallback_target(Axial::new(3, 0), ArenaPhase::Blood).unwrap();
        // From the rim during BLOOD every adjacent tile is still storm;
        // the fallback degrades to the closest-to-centre adjacent tile.
        assert_eq!(target.ring(), 2);
    }

    #[test]
    fn test_phase_schedule_monotonicity() {
        assert!(PhaseSchedule::new(4, 11, 18).is_ok());
        assert_eq!(
            PhaseSchedule::new(5, 5, 18),
            Err(ScheduleError::NotMonotone)
        );
        let sched = PhaseSchedule::default();
        let mut last = ArenaPhase::Loot;
        for epoch in 1..40 {
            let phase = sched.phase_for(epoch);
            assert!(phase.max_safe_level() <= last.max_safe_level());
            last = phase;
        }
    }

    #[test]
    fn test_epochs_remaining() {
        let sched = PhaseSchedule::default();
        assert_eq!(sched.epochs_remaining(1), Some(3));
        assert_eq!(sched.epochs_remaining(4), Some(7));
        assert_eq!(sched.epochs_remaining(17), Some(1));
        assert_eq!(sched.epochs_remaining(18), None);
    }

    #[test]
    fn test_items_scatter_and_pickup() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut grid = HexGrid::new();
        let mut rng = StdRng::seed_from_u64(7);
        grid.scatter_items(&mut rng, &["medkit", "ration"], 5);
        let total: usize = grid.coords().iter().map(|c| grid.tile(*c).unwrap().items.len()).sum();
        assert_eq!(total, 5);

        let spot = grid
            .coords()
            .into_iter()
            .find(|c| !grid.tile(*c).unwrap().items.is_empty())
            .unwrap();
        let picked = grid.take_items(spot);
        assert!(!picked.is_empty());
        assert!(grid.tile(spot).unwrap().items.is_empty());
    }
}
