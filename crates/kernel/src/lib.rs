//! Simulation kernel: binds the registry, navmesh, crowd, physics world and
//! difficulty controller into one explicitly owned context and runs them in
//! a fixed order every tick.
//!
//! # Invariants
//! - One tick is one full pass: crowd, transform sync, behaviors, move
//!   requests, physics, difficulty.
//! - Agent registration and removal happen only through the attach and
//!   detach hooks; despawning an entity detaches it first.
//! - Given the same seed and the same calls, two simulations produce the
//!   same [`Simulation::state_hash`].

mod agent;
mod config;
mod simulation;

pub use agent::{AgentComponent, AgentSpawn};
pub use config::SimConfig;
pub use simulation::{Simulation, TickReport};

use strata_common::EntityId;
use strata_crowd::CrowdError;
use strata_ecs::RegistryError;
use strata_navmesh::NavMeshError;
use strata_physics::PhysicsError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    NavMesh(#[from] NavMeshError),

    #[error(transparent)]
    Crowd(#[from] CrowdError),

    #[error(transparent)]
    Physics(#[from] PhysicsError),

    #[error("navmesh initialisation failed: {0}")]
    NavMeshInit(#[source] Box<SimError>),

    #[error("no terrain geometry to bake")]
    NoTerrain,

    #[error("no navmesh loaded")]
    NoNavMesh,

    #[error("entity {0} is not an agent")]
    NotAnAgent(EntityId),

    #[error("entity {0} is already an agent")]
    AlreadyAgent(EntityId),
}

pub fn crate_info() -> &'static str {
    "strata-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
