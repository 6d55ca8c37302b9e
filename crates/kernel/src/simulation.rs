use std::collections::BTreeMap;
use std::path::Path;

use glam::{Affine3A, Vec3};
use strata_common::{DebugMesh, EntityId, StaticMesh, Tag, Transform, TriMesh};
use strata_crowd::{AgentId, Behavior, Crowd, DifficultyController, DifficultyLevel, PathFollow, Wander};
use strata_ecs::Registry;
use strata_navmesh::{GeometryInstance, NavMesh};
use strata_physics::{Collider, ContactEvent, PhysicsWorld, RigidBody};

use crate::SimError;
use crate::agent::{AgentComponent, AgentSpawn};
use crate::config::SimConfig;

/// What one [`Simulation::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub agents: usize,
    pub move_requests: usize,
    pub contact_pairs: usize,
    pub difficulty_changed: bool,
}

/// Owns the registry and every native resource of the simulation core.
///
/// Systems receive what they need as call arguments; nothing reaches for
/// global state. Each resource has exactly one owner and is dropped with the
/// simulation.
pub struct Simulation {
    config: SimConfig,
    registry: Registry,
    navmesh: Option<NavMesh>,
    crowd: Crowd,
    physics: PhysicsWorld,
    difficulty: DifficultyController,
    tick: u64,
    seed: u64,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let crowd = Crowd::new(config.crowd.clone())?;
        let physics = PhysicsWorld::new(config.physics);
        let difficulty = DifficultyController::new(config.difficulty);
        tracing::info!(seed = config.seed, max_agents = config.crowd.max_agents, "simulation created");
        Ok(Self {
            seed: config.seed,
            config,
            registry: Registry::new(),
            navmesh: None,
            crowd,
            physics,
            difficulty,
            tick: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn navmesh(&self) -> Option<&NavMesh> {
        self.navmesh.as_ref()
    }

    pub fn crowd(&self) -> &Crowd {
        &self.crowd
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn difficulty(&self) -> DifficultyLevel {
        self.difficulty.level()
    }

    pub fn spawn(&mut self, transform: Transform) -> EntityId {
        self.registry.spawn_at(transform)
    }

    /// Spawn static level geometry: a `terrain` tag, the mesh and a fixed
    /// body whose box collider spans the mesh bounds.
    pub fn spawn_terrain(&mut self, mesh: TriMesh, transform: Transform) -> Result<EntityId, SimError> {
        let bounds = mesh.aabb();
        let mut half = bounds.extents() * 0.5;
        half.y = half.y.max(0.25);
        let center = Vec3::new(bounds.center().x, bounds.max.y - half.y, bounds.center().z);
        let body = RigidBody::fixed(transform, vec![Collider::cuboid(half).with_offset(center)])?;

        let entity = self.registry.spawn_at(transform);
        self.registry.insert(entity, Tag::terrain())?;
        self.registry.insert(entity, StaticMesh::new(mesh))?;
        self.registry.insert(entity, body)?;
        Ok(entity)
    }

    pub fn spawn_body(&mut self, body: RigidBody) -> Result<EntityId, SimError> {
        let entity = self.registry.spawn_at(body.transform());
        self.registry.insert(entity, body)?;
        Ok(entity)
    }

    /// Terrain meshes in entity order, each placed by its body transform
    /// composed with the mesh-local transform.
    fn terrain_geometry(&self) -> Vec<(EntityId, Affine3A)> {
        self.registry
            .entities_with2::<StaticMesh, Tag>()
            .into_iter()
            .filter(|&e| self.registry.get::<Tag>(e).is_some_and(Tag::is_terrain))
            .filter_map(|e| {
                let body = self.registry.get::<RigidBody>(e).filter(|b| b.is_static())?;
                let mesh = self.registry.get::<StaticMesh>(e)?;
                Some((e, body.transform().compose(&mesh.local)))
            })
            .collect()
    }

    /// Bake a fresh navmesh from every static terrain entity.
    pub fn bake_navmesh(&mut self) -> Result<&NavMesh, SimError> {
        let placements = self.terrain_geometry();
        let meshes: Vec<(&TriMesh, Affine3A)> = placements
            .iter()
            .filter_map(|&(e, transform)| self.registry.get::<StaticMesh>(e).map(|m| (&m.mesh, transform)))
            .collect();
        if meshes.is_empty() {
            return Err(SimError::NoTerrain);
        }
        let instances: Vec<GeometryInstance<'_>> = meshes
            .iter()
            .map(|&(mesh, transform)| GeometryInstance { mesh, transform })
            .collect();
        let navmesh = NavMesh::bake_all(&instances, &self.config.bake)?;
        Ok(self.navmesh.insert(navmesh))
    }

    /// Load the navmesh from `cache`, or bake it when the cache is missing or
    /// unreadable. A successful bake is written back to `cache`.
    ///
    /// A failed bake leaves the simulation without a navmesh and is fatal to
    /// startup.
    pub fn init_navmesh(&mut self, cache: Option<&Path>) -> Result<(), SimError> {
        let _span = tracing::info_span!("init_navmesh").entered();
        if let Some(path) = cache {
            match NavMesh::load(path) {
                Ok(navmesh) => {
                    self.navmesh = Some(navmesh);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "navmesh cache unusable, baking");
                }
            }
        }

        if let Err(err) = self.bake_navmesh() {
            tracing::error!(error = %err, "navmesh bake failed");
            return Err(SimError::NavMeshInit(Box::new(err)));
        }

        if let (Some(path), Some(navmesh)) = (cache, self.navmesh.as_ref()) {
            if let Err(err) = navmesh.save(path) {
                tracing::warn!(path = %path.display(), error = %err, "could not write navmesh cache");
            }
        }
        Ok(())
    }

    /// Use an already built navmesh.
    pub fn set_navmesh(&mut self, navmesh: NavMesh) {
        self.navmesh = Some(navmesh);
    }

    /// Attach hook: registers `entity` with the crowd at its current
    /// position, snapped onto the navmesh, and writes the snapped position
    /// back to its transform.
    pub fn attach_agent(&mut self, entity: EntityId, spawn: AgentSpawn) -> Result<AgentId, SimError> {
        if !self.registry.is_alive(entity) {
            return Err(SimError::Registry(strata_ecs::RegistryError::EntityNotFound(entity)));
        }
        if self.registry.has::<AgentComponent>(entity) {
            return Err(SimError::AlreadyAgent(entity));
        }
        let navmesh = self.navmesh.as_ref().ok_or(SimError::NoNavMesh)?;
        let near = self
            .registry
            .get::<Transform>(entity)
            .map_or(Vec3::ZERO, |t| t.position);
        let params = spawn.params.unwrap_or(self.config.agent);

        let id = self.crowd.add_agent(navmesh, near, self.config.spawn_search_radius, params)?;
        self.difficulty.tune_agent(&mut self.crowd, id);
        let pos = self.crowd.agent_position(id);

        match self.registry.get_mut::<Transform>(entity) {
            Some(t) => t.position = pos,
            None => {
                self.registry.insert(entity, Transform::from_position(pos))?;
            }
        }
        self.registry.insert(entity, AgentComponent::new(id))?;
        if let Some(behavior) = spawn.behavior {
            self.registry.insert(entity, behavior)?;
        }
        tracing::debug!(%entity, agent = %id, "agent attached");
        Ok(id)
    }

    /// Detach hook: removes the entity's agent from the crowd along with its
    /// behavior. Returns `false` when the entity had no agent.
    pub fn detach_agent(&mut self, entity: EntityId) -> bool {
        let Some(component) = self.registry.remove::<AgentComponent>(entity) else {
            return false;
        };
        self.registry.remove::<Behavior>(entity);
        self.crowd.remove_agent(component.id());
        tracing::debug!(%entity, agent = %component.id(), "agent detached");
        true
    }

    /// Runs detach hooks before the entity is removed from the registry.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        self.detach_agent(entity);
        self.registry.despawn(entity)
    }

    pub fn agent_of(&self, entity: EntityId) -> Option<AgentId> {
        self.registry.get::<AgentComponent>(entity).map(AgentComponent::id)
    }

    fn set_behavior(&mut self, entity: EntityId, behavior: Behavior) -> Result<(), SimError> {
        if !self.registry.has::<AgentComponent>(entity) {
            return Err(SimError::NotAnAgent(entity));
        }
        tracing::debug!(%entity, behavior = behavior.kind(), "behavior set");
        self.registry.insert(entity, behavior)?;
        Ok(())
    }

    fn position_of(&self, entity: EntityId) -> Vec3 {
        self.registry
            .get::<Transform>(entity)
            .map_or(Vec3::ZERO, |t| t.position)
    }

    pub fn move_to(&mut self, entity: EntityId, target: Vec3) -> Result<(), SimError> {
        self.set_behavior(entity, Behavior::MoveTo { target })
    }

    pub fn chase(&mut self, entity: EntityId, target: EntityId, max_distance: f32) -> Result<(), SimError> {
        self.set_behavior(entity, Behavior::Chase { target, max_distance })
    }

    pub fn flee(
        &mut self,
        entity: EntityId,
        threat: EntityId,
        desired_distance: f32,
        retreat_distance: f32,
    ) -> Result<(), SimError> {
        self.set_behavior(
            entity,
            Behavior::Flee {
                threat,
                desired_distance,
                retreat_distance,
            },
        )
    }

    pub fn follow_path(&mut self, entity: EntityId, waypoints: Vec<Vec3>, acceptance_radius: f32) -> Result<(), SimError> {
        let current = self.position_of(entity);
        self.set_behavior(
            entity,
            Behavior::PathFollow(PathFollow::new(waypoints, acceptance_radius, current)),
        )
    }

    /// Wander with an RNG seeded from the simulation seed and the entity, so
    /// runs with the same seed repeat.
    pub fn wander(&mut self, entity: EntityId, center: Vec3, radius: f32, jitter: f32) -> Result<(), SimError> {
        let seed = splitmix64(self.config.seed ^ entity.index());
        self.set_behavior(entity, Behavior::Wander(Wander::new(center, radius, jitter, seed)))
    }

    /// Queue a difficulty change for the next tick boundary.
    pub fn set_difficulty(&mut self, level: DifficultyLevel) {
        self.difficulty.request(level);
    }

    /// Advance one tick: crowd, agent transform sync, behaviors, move
    /// requests, physics, then any pending difficulty change.
    pub fn update(&mut self, dt: f32) -> Result<TickReport, SimError> {
        let _span = tracing::info_span!("tick", tick = self.tick).entered();
        let mut report = TickReport::default();

        if let Some(navmesh) = &self.navmesh {
            self.crowd.update(dt, navmesh);
        }

        let agents: Vec<(EntityId, AgentId)> = self
            .registry
            .iter::<AgentComponent>()
            .map(|(e, c)| (e, c.id()))
            .collect();
        report.agents = agents.len();
        for &(entity, id) in &agents {
            let pos = self.crowd.agent_position(id);
            if let Some(t) = self.registry.get_mut::<Transform>(entity) {
                t.position = pos;
            }
        }

        // Snapshot so behaviors can look up other entities while being mutated.
        let positions: BTreeMap<EntityId, Vec3> = self
            .registry
            .iter::<Transform>()
            .map(|(e, t)| (e, t.position))
            .collect();
        let mut goals = Vec::new();
        for (entity, behavior) in self.registry.iter_mut::<Behavior>() {
            let Some(&current) = positions.get(&entity) else {
                continue;
            };
            goals.push((entity, behavior.update(current, &positions)));
        }

        let replan = self.config.replan_distance;
        for (entity, goal) in goals {
            let Some(component) = self.registry.get_mut::<AgentComponent>(entity) else {
                continue;
            };
            if component.last_goal().is_some_and(|g| g.distance(goal) < replan) {
                continue;
            }
            component.set_last_goal(Some(goal));
            self.crowd.request_move(component.id(), goal);
            report.move_requests += 1;
        }

        let stats = self.physics.step(&mut self.registry, dt)?;
        report.contact_pairs = stats.contact_pairs;

        report.difficulty_changed = self.difficulty.apply_pending(&mut self.crowd).is_some();

        self.tick += 1;
        self.seed = splitmix64(self.seed);
        report.tick = self.tick;
        Ok(report)
    }

    pub fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        self.physics.drain_contact_events()
    }

    /// FNV-1a over the tick, seed, every transform and every agent, in
    /// entity order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        let mix_f32s = |h: &mut u64, values: &[f32]| {
            for v in values {
                mix(h, &v.to_le_bytes());
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        mix(&mut h, &self.seed.to_le_bytes());
        for (id, t) in self.registry.iter::<Transform>() {
            mix(&mut h, id.0.as_bytes());
            mix_f32s(&mut h, &t.position.to_array());
            mix_f32s(&mut h, &t.rotation.to_array());
            mix_f32s(&mut h, &t.scale.to_array());
        }
        for id in self.crowd.active_agents() {
            mix(&mut h, &id.0.to_le_bytes());
            mix_f32s(&mut h, &self.crowd.agent_velocity(id).to_array());
        }
        h
    }

    pub fn navmesh_debug_mesh(&self) -> Option<DebugMesh> {
        self.navmesh.as_ref().map(NavMesh::debug_mesh)
    }

    pub fn physics_debug_mesh(&self) -> DebugMesh {
        self.physics.debug_mesh(&self.registry)
    }
}

/// Splitmix64 step; advances the seed once per tick.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_navmesh::QueryFilter;

    #[test]
    fn new_simulation_is_empty() {
        let sim = Simulation::new(SimConfig::default()).unwrap();
        assert_eq!(sim.tick(), 0);
        assert!(sim.navmesh().is_none());
        assert_eq!(sim.crowd().agent_count(), 0);
    }

    #[test]
    fn invalid_crowd_config_fails() {
        let mut config = SimConfig::default();
        config.crowd.max_agents = 0;
        assert!(matches!(Simulation::new(config), Err(SimError::Crowd(_))));
    }

    #[test]
    fn bake_without_terrain_fails() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        assert!(matches!(sim.bake_navmesh(), Err(SimError::NoTerrain)));
        assert!(matches!(sim.init_navmesh(None), Err(SimError::NavMeshInit(_))));
    }

    #[test]
    fn attach_requires_navmesh() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let e = sim.spawn(Transform::default());
        assert!(matches!(sim.attach_agent(e, AgentSpawn::default()), Err(SimError::NoNavMesh)));
    }

    #[test]
    fn scripting_on_plain_entity_fails() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let e = sim.spawn(Transform::default());
        assert!(matches!(sim.move_to(e, Vec3::ONE), Err(SimError::NotAnAgent(_))));
    }

    #[test]
    fn seed_advances_per_tick() {
        let mut a = Simulation::new(SimConfig::default()).unwrap();
        let mut b = Simulation::new(SimConfig::default()).unwrap();
        a.update(0.1).unwrap();
        b.update(0.1).unwrap();
        assert_eq!(a.seed(), b.seed());
        assert_ne!(a.seed(), 0);
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn terrain_collider_top_matches_mesh() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let e = sim
            .spawn_terrain(TriMesh::quad(0.0, 0.0, 10.0, 10.0, 0.0), Transform::default())
            .unwrap();
        let body = sim.registry().get::<RigidBody>(e).unwrap();
        let aabb = body.aabb().unwrap();
        assert!(body.is_static());
        assert!(aabb.max.y.abs() < 1e-6);
        assert!((aabb.max.x - 10.0).abs() < 1e-6);
    }

    #[test]
    fn scaled_terrain_collider_covers_walkable_surface() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let transform = Transform::default().with_scale(Vec3::new(2.0, 1.0, 2.0));
        let e = sim
            .spawn_terrain(TriMesh::quad(0.0, 0.0, 10.0, 10.0, 0.0), transform)
            .unwrap();
        let aabb = sim.registry().get::<RigidBody>(e).unwrap().aabb().unwrap();
        assert!((aabb.max.x - 20.0).abs() < 1e-5);
        assert!((aabb.max.z - 20.0).abs() < 1e-5);
        assert!(aabb.max.y.abs() < 1e-6);

        let navmesh = sim.bake_navmesh().unwrap();
        let far = navmesh.query_nearest_point(Vec3::new(18.0, 0.0, 18.0), 0.5, &QueryFilter::default());
        assert!(far.is_some());
    }
}
