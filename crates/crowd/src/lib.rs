//! Crowd steering for AI agents on a [`strata_navmesh::NavMesh`].
//!
//! [`Crowd`] owns a bounded pool of agents. Each update it applies queued
//! move requests, follows path corridors, plans collision-free velocities
//! with reciprocal velocity obstacles and keeps every agent on the mesh.
//! [`Behavior`] picks each agent's goal; [`DifficultyController`] scales
//! agent speed and acceleration globally.
//!
//! # Invariants
//! - An agent always stands on a navmesh polygon; it is never placed off-mesh.
//! - Move requests take effect on the next update, never immediately.
//! - Agents that lose their path halt in place.
//! - Using a removed agent id panics.

mod behavior;
mod crowd;
mod difficulty;
mod grid;
mod orca;

use glam::Vec3;

pub use behavior::{Behavior, PathFollow, PositionLookup, Wander};
pub use crowd::{Agent, AgentId, AgentParams, AgentTuning, Crowd, CrowdConfig, MoveState};
pub use difficulty::{DifficultyController, DifficultyLevel};
pub use grid::{CellCoord, ProximityGrid};
pub use orca::{OrcaAgent, plan_velocity};

#[derive(Debug, thiserror::Error)]
pub enum CrowdError {
    #[error("invalid crowd config: {0}")]
    InvalidConfig(String),

    #[error("invalid agent params: {0}")]
    InvalidParams(String),

    #[error("crowd is full ({0} agents)")]
    Full(usize),

    #[error("no navmesh position within {radius} of {pos}")]
    NoValidPosition { pos: Vec3, radius: f32 },
}

pub fn crate_info() -> &'static str {
    "strata-crowd v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("crowd"));
    }
}
