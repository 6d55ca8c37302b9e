use glam::Vec3;
use serde::{Deserialize, Serialize};
use strata_common::{Aabb, DebugMesh, DebugTopology, EntityId, Transform};
use strata_ecs::Registry;

use crate::PhysicsError;
use crate::body::RigidBody;
use crate::narrow::{Contact, WorldShape, collide};

/// Skip threshold for degenerate normals and impulse denominators.
const DEGENERATE_EPSILON: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    pub gravity_enabled: bool,
    /// Fraction of the penetration removed per step.
    pub correction_percent: f32,
    /// Penetration tolerated without positional correction.
    pub correction_slop: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            gravity_enabled: true,
            correction_percent: 0.8,
            correction_slop: 0.01,
        }
    }
}

/// Contacts between one pair of bodies found in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEvent {
    pub a: EntityId,
    pub b: EntityId,
    pub contacts: Vec<Contact>,
    /// Averaged representative contact.
    pub point: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

impl ContactEvent {
    fn from_contacts(a: EntityId, b: EntityId, contacts: Vec<Contact>) -> Self {
        let n = contacts.len().max(1) as f32;
        let point = contacts.iter().map(|c| c.point).sum::<Vec3>() / n;
        let normal = contacts.iter().map(|c| c.normal).sum::<Vec3>() / n;
        let depth = contacts.iter().map(|c| c.depth).sum::<f32>() / n;
        Self {
            a,
            b,
            contacts,
            point,
            normal,
            depth,
        }
    }
}

/// Counters from the last step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub bodies: usize,
    pub candidate_pairs: usize,
    pub contact_pairs: usize,
    pub resolved: usize,
}

struct Proxy {
    entity: EntityId,
    aabb: Aabb,
    is_static: bool,
    shapes: Vec<WorldShape>,
}

/// Steps every [`RigidBody`] in a registry.
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    config: PhysicsConfig,
    events: Vec<ContactEvent>,
    stats: StepStats,
}

impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            stats: StepStats::default(),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn set_gravity(&mut self, gravity: Vec3, enabled: bool) {
        self.config.gravity = gravity;
        self.config.gravity_enabled = enabled;
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    /// Contact events from the most recent step.
    pub fn contact_events(&self) -> &[ContactEvent] {
        &self.events
    }

    pub fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.events)
    }

    /// Integrate, detect contacts, resolve them and write body poses back to
    /// each entity's [`Transform`].
    pub fn step(&mut self, registry: &mut Registry, dt: f32) -> Result<StepStats, PhysicsError> {
        let _span = tracing::info_span!("physics_step", dt).entered();
        self.events.clear();
        let mut stats = StepStats::default();

        let gravity = if self.config.gravity_enabled {
            self.config.gravity
        } else {
            Vec3::ZERO
        };
        for (_, body) in registry.iter_mut::<RigidBody>() {
            body.integrate(gravity, dt);
            stats.bodies += 1;
        }

        let proxies = collect_proxies(registry);
        let pairs = sweep_and_prune(&proxies);
        stats.candidate_pairs = pairs.len();

        for (i, j) in pairs {
            let (a, b) = (&proxies[i], &proxies[j]);
            let mut contacts = Vec::new();
            for sa in &a.shapes {
                for sb in &b.shapes {
                    if let Some(c) = collide(sa, sb) {
                        contacts.push(c);
                    }
                }
            }
            if !contacts.is_empty() {
                self.events.push(ContactEvent::from_contacts(a.entity, b.entity, contacts));
            }
        }
        stats.contact_pairs = self.events.len();

        for event in &self.events {
            if self.resolve(registry, event) {
                stats.resolved += 1;
            }
        }

        sync_transforms(registry)?;
        tracing::debug!(
            bodies = stats.bodies,
            pairs = stats.candidate_pairs,
            contacts = stats.contact_pairs,
            resolved = stats.resolved,
            "physics step"
        );
        self.stats = stats;
        Ok(stats)
    }

    /// Impulse response for one pair from its averaged contact. The impulse
    /// is queued on each non-static body and applied by the next
    /// integration; penetration is corrected immediately.
    fn resolve(&self, registry: &mut Registry, event: &ContactEvent) -> bool {
        let (Some(a), Some(b)) = (registry.get::<RigidBody>(event.a), registry.get::<RigidBody>(event.b)) else {
            return false;
        };
        if a.is_static() && b.is_static() {
            return false;
        }

        let len_sq = event.normal.length_squared();
        if len_sq < DEGENERATE_EPSILON {
            tracing::debug!(a = %event.a, b = %event.b, "degenerate contact normal, skipped");
            return false;
        }
        let n = event.normal / len_sq.sqrt();
        let p = event.point;

        let ra = p - a.world_center_of_mass();
        let rb = p - b.world_center_of_mass();
        let rel = b.velocity_at(p) - a.velocity_at(p);
        let approach = rel.dot(n);

        let inv_a = a.inv_mass();
        let inv_b = b.inv_mass();
        let ang_a = (a.world_inv_inertia() * ra.cross(n)).cross(ra);
        let ang_b = (b.world_inv_inertia() * rb.cross(n)).cross(rb);
        let denom = inv_a + inv_b + n.dot(ang_a + ang_b);

        let mut resolved = false;
        if approach < 0.0 {
            if denom < DEGENERATE_EPSILON {
                tracing::debug!(a = %event.a, b = %event.b, denom, "degenerate impulse denominator, skipped");
                return false;
            }
            let e = (a.restitution + b.restitution) * 0.5;
            let j = -(1.0 + e) * approach / denom;
            let impulse = n * j;
            if let Some(body) = registry.get_mut::<RigidBody>(event.a) {
                body.apply_impulse(-impulse, p);
            }
            if let Some(body) = registry.get_mut::<RigidBody>(event.b) {
                body.apply_impulse(impulse, p);
            }
            resolved = true;
        }

        let inv_sum = inv_a + inv_b;
        let correction = (event.depth - self.config.correction_slop).max(0.0) * self.config.correction_percent;
        if correction > 0.0 && inv_sum > DEGENERATE_EPSILON {
            let shift = n * (correction / inv_sum);
            if let Some(body) = registry.get_mut::<RigidBody>(event.a) {
                if !body.is_static() {
                    body.position -= shift * inv_a;
                }
            }
            if let Some(body) = registry.get_mut::<RigidBody>(event.b) {
                if !body.is_static() {
                    body.position += shift * inv_b;
                }
            }
        }
        resolved
    }

    /// Wire boxes around every body's bounds.
    pub fn debug_mesh(&self, registry: &Registry) -> DebugMesh {
        let mut mesh = DebugMesh::new(DebugTopology::Lines);
        for (_, body) in registry.iter::<RigidBody>() {
            let Some(aabb) = body.aabb() else {
                continue;
            };
            push_wire_box(&mut mesh, &aabb);
        }
        mesh
    }
}

fn collect_proxies(registry: &Registry) -> Vec<Proxy> {
    registry
        .iter::<RigidBody>()
        .filter_map(|(entity, body)| {
            let aabb = body.aabb()?;
            let shapes = body
                .colliders()
                .iter()
                .map(|c| {
                    let c = c.scaled(body.scale);
                    let (center, rotation) = c.world_pose(body.position, body.rotation);
                    WorldShape::new(&c.shape, center, rotation)
                })
                .collect();
            Some(Proxy {
                entity,
                aabb,
                is_static: body.is_static(),
                shapes,
            })
        })
        .collect()
}

/// Overlapping bound pairs, sorted along x. Static pairs are dropped.
fn sweep_and_prune(proxies: &[Proxy]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..proxies.len()).collect();
    order.sort_by(|&i, &j| {
        proxies[i]
            .aabb
            .min
            .x
            .total_cmp(&proxies[j].aabb.min.x)
            .then(proxies[i].entity.cmp(&proxies[j].entity))
    });

    let mut pairs = Vec::new();
    for (k, &i) in order.iter().enumerate() {
        for &j in &order[k + 1..] {
            if proxies[j].aabb.min.x > proxies[i].aabb.max.x {
                break;
            }
            if proxies[i].is_static && proxies[j].is_static {
                continue;
            }
            if proxies[i].aabb.overlaps(&proxies[j].aabb) {
                // Entity order inside a pair keeps event ids stable.
                if proxies[i].entity < proxies[j].entity {
                    pairs.push((i, j));
                } else {
                    pairs.push((j, i));
                }
            }
        }
    }
    pairs.sort_by(|a, b| (proxies[a.0].entity, proxies[a.1].entity).cmp(&(proxies[b.0].entity, proxies[b.1].entity)));
    pairs
}

fn sync_transforms(registry: &mut Registry) -> Result<(), PhysicsError> {
    let poses: Vec<(EntityId, Transform)> = registry
        .iter::<RigidBody>()
        .map(|(entity, body)| (entity, body.transform()))
        .collect();
    for (entity, pose) in poses {
        match registry.get_mut::<Transform>(entity) {
            Some(t) => *t = pose,
            None => {
                registry.insert(entity, pose)?;
            }
        }
    }
    Ok(())
}

fn push_wire_box(mesh: &mut DebugMesh, aabb: &Aabb) {
    let base = mesh.vertices.len() as u32;
    for i in 0..8 {
        let pick = |bit: u32, lo: f32, hi: f32| if i & bit == 0 { lo } else { hi };
        mesh.push_vertex(Vec3::new(
            pick(1, aabb.min.x, aabb.max.x),
            pick(2, aabb.min.y, aabb.max.y),
            pick(4, aabb.min.z, aabb.max.z),
        ));
    }
    const EDGES: [(u32, u32); 12] = [
        (0, 1),
        (2, 3),
        (4, 5),
        (6, 7),
        (0, 2),
        (1, 3),
        (4, 6),
        (5, 7),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];
    for (a, b) in EDGES {
        mesh.indices.extend([base + a, base + b]);
    }
}
