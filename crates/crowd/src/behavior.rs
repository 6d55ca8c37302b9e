//! Goal selection strategies. Each tick an agent's [`Behavior`] turns its
//! current position into the goal handed to [`Crowd::request_move`].
//!
//! [`Crowd::request_move`]: crate::Crowd::request_move

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_common::{EntityId, Transform};
use strata_ecs::{Component, Registry};

/// Read access to entity positions for behaviors that track other entities.
pub trait PositionLookup {
    fn position_of(&self, entity: EntityId) -> Option<Vec3>;
}

impl PositionLookup for Registry {
    fn position_of(&self, entity: EntityId) -> Option<Vec3> {
        self.get::<Transform>(entity).map(|t| t.position)
    }
}

impl PositionLookup for BTreeMap<EntityId, Vec3> {
    fn position_of(&self, entity: EntityId) -> Option<Vec3> {
        self.get(&entity).copied()
    }
}

impl PositionLookup for HashMap<EntityId, Vec3> {
    fn position_of(&self, entity: EntityId) -> Option<Vec3> {
        self.get(&entity).copied()
    }
}

/// Cycles through waypoints, advancing once within `acceptance_radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFollow {
    waypoints: Vec<Vec3>,
    acceptance_radius: f32,
    index: usize,
}

impl PathFollow {
    /// Starts at the waypoint nearest `current`.
    pub fn new(waypoints: Vec<Vec3>, acceptance_radius: f32, current: Vec3) -> Self {
        let index = waypoints
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.distance_squared(current).total_cmp(&b.1.distance_squared(current)))
            .map_or(0, |(i, _)| i);
        Self {
            waypoints,
            acceptance_radius,
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    fn update(&mut self, current: Vec3) -> Vec3 {
        let Some(&target) = self.waypoints.get(self.index) else {
            return current;
        };
        if current.distance(target) <= self.acceptance_radius {
            self.index = (self.index + 1) % self.waypoints.len();
        }
        self.waypoints[self.index]
    }
}

/// Random drift inside a circle on the XZ plane.
#[derive(Debug, Clone)]
pub struct Wander {
    center: Vec3,
    radius: f32,
    jitter: f32,
    last: Vec3,
    rng: StdRng,
}

impl Wander {
    pub fn new(center: Vec3, radius: f32, jitter: f32, seed: u64) -> Self {
        Self {
            center,
            radius: radius.abs(),
            jitter: jitter.abs(),
            last: center,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn last_point(&self) -> Vec3 {
        self.last
    }

    fn update(&mut self) -> Vec3 {
        let dx = self.rng.gen_range(-self.jitter..=self.jitter);
        let dz = self.rng.gen_range(-self.jitter..=self.jitter);
        let mut offset = Vec3::new(self.last.x + dx - self.center.x, 0.0, self.last.z + dz - self.center.z);
        let d = offset.length();
        if d > self.radius {
            // Reflect off the rim back toward the centre.
            let inside = (2.0 * self.radius - d).max(0.0);
            offset *= inside / d;
        }
        self.last = Vec3::new(self.center.x + offset.x, self.center.y, self.center.z + offset.z);
        self.last
    }
}

/// One agent's active goal selection strategy.
#[derive(Debug, Clone)]
pub enum Behavior {
    MoveTo {
        target: Vec3,
    },
    /// Follow `target` while it is closer than `max_distance`.
    Chase {
        target: EntityId,
        max_distance: f32,
    },
    /// Retreat `retreat_distance` away from `threat` while it is closer than
    /// `desired_distance`.
    Flee {
        threat: EntityId,
        desired_distance: f32,
        retreat_distance: f32,
    },
    PathFollow(PathFollow),
    Wander(Wander),
}

impl Component for Behavior {}

impl Behavior {
    pub fn update(&mut self, current: Vec3, positions: &impl PositionLookup) -> Vec3 {
        match self {
            Behavior::MoveTo { target } => *target,
            Behavior::Chase { target, max_distance } => match positions.position_of(*target) {
                Some(p) if current.distance(p) < *max_distance => p,
                _ => current,
            },
            Behavior::Flee {
                threat,
                desired_distance,
                retreat_distance,
            } => {
                let Some(p) = positions.position_of(*threat) else {
                    return current;
                };
                if current.distance(p) >= *desired_distance {
                    return current;
                }
                let away = Vec3::new(current.x - p.x, 0.0, current.z - p.z);
                let dir = if away.length_squared() > 1e-12 { away.normalize() } else { Vec3::X };
                current + dir * *retreat_distance
            }
            Behavior::PathFollow(path) => path.update(current),
            Behavior::Wander(wander) => wander.update(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Behavior::MoveTo { .. } => "move_to",
            Behavior::Chase { .. } => "chase",
            Behavior::Flee { .. } => "flee",
            Behavior::PathFollow(_) => "path_follow",
            Behavior::Wander(_) => "wander",
        }
    }
}
