//! Battle resolution rules.
//!
//! - `combat`: the attack/sabotage/defend triangle and its modifiers
//! - `pipeline`: the ordered per-epoch resolution phases
//! - `state_based`: death and win checks applied after HP mutations

pub mod combat;
pub mod pipeline;
pub mod state_based;
