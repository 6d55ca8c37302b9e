//! Rigid body dynamics for registry entities.
//!
//! [`PhysicsWorld::step`] advances every [`RigidBody`] with semi-implicit
//! Euler integration, finds contacts between box, sphere and capsule
//! colliders and answers each colliding pair with one impulse computed from
//! the pair's averaged contact.
//!
//! # Invariants
//! - Static bodies never move and never gain velocity.
//! - Forces, torques and impulses last exactly one step.
//! - Contact normals point from the first body of a pair to the second.

mod body;
mod narrow;
mod shape;
mod world;

pub use body::RigidBody;
pub use narrow::{Contact, WorldShape, collide};
pub use shape::{Collider, Shape};
pub use world::{ContactEvent, PhysicsConfig, PhysicsWorld, StepStats};

use strata_ecs::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("rigid body has no mass")]
    ZeroMass,

    #[error("invalid collider: {0}")]
    InvalidShape(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub fn crate_info() -> &'static str {
    "strata-physics v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("physics"));
    }
}
