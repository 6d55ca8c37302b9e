//! Bounded pool of steering agents moving on a [`NavMesh`].

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use strata_navmesh::{NavMesh, PolyRef, QueryFilter};

use crate::CrowdError;
use crate::grid::ProximityGrid;
use crate::orca::{OrcaAgent, plan_velocity};

const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
const OVERLAP_ITERATIONS: usize = 4;
const ARRIVAL_DISTANCE: f32 = 0.05;

/// Opaque agent handle. Ids are never reused within one crowd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    pub radius: f32,
    pub height: f32,
    pub max_speed: f32,
    pub max_acceleration: f32,
    /// Neighbours farther than this are ignored for avoidance and separation.
    pub collision_query_range: f32,
    pub separation_weight: f32,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: 0.6,
            height: 2.0,
            max_speed: 3.5,
            max_acceleration: 8.0,
            collision_query_range: 0.6 * 12.0,
            separation_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdConfig {
    pub max_agents: usize,
    /// Largest radius any agent may have; sizes the proximity grid.
    pub max_agent_radius: f32,
    /// Look-ahead of the velocity planner in seconds.
    pub time_horizon: f32,
    pub max_neighbours: usize,
    /// Corners kept from the straight path per agent.
    pub max_corners: usize,
    /// Box half-extents used to snap targets onto the mesh.
    pub query_half_extents: Vec3,
    pub filter: QueryFilter,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            max_agents: 128,
            max_agent_radius: 0.6,
            time_horizon: 2.5,
            max_neighbours: 6,
            max_corners: 4,
            query_half_extents: Vec3::new(2.0, 4.0, 2.0),
            filter: QueryFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveState {
    None,
    Requesting,
    Valid,
    Failed,
}

/// Multipliers a difficulty level puts over an agent's base speed and
/// acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentTuning {
    pub speed: f32,
    pub acceleration: f32,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            speed: 1.0,
            acceleration: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub params: AgentParams,
    pub tuning: AgentTuning,
    pub active: bool,
    pub pos: Vec3,
    pub vel: Vec3,
    pub desired_vel: Vec3,
    /// Polygon the agent stands on.
    pub poly: PolyRef,
    /// Polygons from `poly` toward the target.
    pub corridor: Vec<PolyRef>,
    pub corners: Vec<Vec3>,
    pub target: Option<Vec3>,
    pub target_ref: PolyRef,
    pub move_state: MoveState,
    pub neighbours: Vec<AgentId>,
    /// Avoidance velocity chosen this tick, before the acceleration clamp.
    pub planned_vel: Vec3,
    next_pos: Vec3,
}

impl Agent {
    pub fn max_speed(&self) -> f32 {
        self.params.max_speed * self.tuning.speed
    }

    pub fn max_acceleration(&self) -> f32 {
        self.params.max_acceleration * self.tuning.acceleration
    }

    fn halt(&mut self) {
        self.vel = Vec3::ZERO;
        self.desired_vel = Vec3::ZERO;
        self.corners.clear();
        self.corridor.clear();
        self.corridor.push(self.poly);
    }
}

#[derive(Debug, Clone)]
pub struct Crowd {
    config: CrowdConfig,
    agents: BTreeMap<AgentId, Agent>,
    next_id: u32,
    pending: BTreeMap<AgentId, Vec3>,
    grid: ProximityGrid,
}

fn xz(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.z)
}

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

impl Crowd {
    pub fn new(config: CrowdConfig) -> Result<Self, CrowdError> {
        if config.max_agents == 0 {
            return Err(CrowdError::InvalidConfig("max_agents must be positive".into()));
        }
        if !(config.max_agent_radius > 0.0) {
            return Err(CrowdError::InvalidConfig("max_agent_radius must be positive".into()));
        }
        if !(config.time_horizon > 0.0) {
            return Err(CrowdError::InvalidConfig("time_horizon must be positive".into()));
        }
        let grid = ProximityGrid::new(config.max_agent_radius * 3.0);
        tracing::debug!(max_agents = config.max_agents, "crowd created");
        Ok(Self {
            config,
            agents: BTreeMap::new(),
            next_id: 0,
            pending: BTreeMap::new(),
            grid,
        })
    }

    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn max_agents(&self) -> usize {
        self.config.max_agents
    }

    /// Whether `id` names a live agent. The only agent call that accepts
    /// removed ids.
    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    fn check_params(&self, params: &AgentParams) -> Result<(), CrowdError> {
        if !(params.radius > 0.0) || params.radius > self.config.max_agent_radius {
            return Err(CrowdError::InvalidParams(format!(
                "radius {} outside (0, {}]",
                params.radius, self.config.max_agent_radius
            )));
        }
        if params.max_speed < 0.0 || params.max_acceleration < 0.0 {
            return Err(CrowdError::InvalidParams("speed and acceleration must not be negative".into()));
        }
        Ok(())
    }

    /// Place a new agent on the mesh point nearest `near`.
    ///
    /// Fails with [`CrowdError::NoValidPosition`] when no polygon lies within
    /// `search_radius`; no id is consumed then.
    pub fn add_agent(
        &mut self,
        navmesh: &NavMesh,
        near: Vec3,
        search_radius: f32,
        params: AgentParams,
    ) -> Result<AgentId, CrowdError> {
        self.check_params(&params)?;
        if self.agents.len() >= self.config.max_agents {
            return Err(CrowdError::Full(self.config.max_agents));
        }
        let (poly, pos) = navmesh
            .query_nearest_point(near, search_radius, &self.config.filter)
            .ok_or(CrowdError::NoValidPosition {
                pos: near,
                radius: search_radius,
            })?;

        let id = AgentId(self.next_id);
        self.next_id += 1;
        self.agents.insert(
            id,
            Agent {
                params,
                tuning: AgentTuning::default(),
                active: true,
                pos,
                vel: Vec3::ZERO,
                desired_vel: Vec3::ZERO,
                poly,
                corridor: vec![poly],
                corners: Vec::new(),
                target: None,
                target_ref: PolyRef::NULL,
                move_state: MoveState::None,
                neighbours: Vec::new(),
                planned_vel: Vec3::ZERO,
                next_pos: pos,
            },
        );
        tracing::debug!(%id, %poly, "agent added");
        Ok(id)
    }

    /// Remove an agent. Panics if `id` is not live.
    pub fn remove_agent(&mut self, id: AgentId) -> Agent {
        self.pending.remove(&id);
        match self.agents.remove(&id) {
            Some(agent) => {
                tracing::debug!(%id, "agent removed");
                agent
            }
            None => panic!("remove_agent: {id} was removed or never existed"),
        }
    }

    /// Agent state. Panics if `id` is not live.
    pub fn agent(&self, id: AgentId) -> &Agent {
        match self.agents.get(&id) {
            Some(agent) => agent,
            None => panic!("{id} was removed or never existed"),
        }
    }

    fn agent_mut(&mut self, id: AgentId) -> &mut Agent {
        match self.agents.get_mut(&id) {
            Some(agent) => agent,
            None => panic!("{id} was removed or never existed"),
        }
    }

    pub fn agent_position(&self, id: AgentId) -> Vec3 {
        self.agent(id).pos
    }

    pub fn agent_velocity(&self, id: AgentId) -> Vec3 {
        self.agent(id).vel
    }

    /// Live agent ids in ascending order.
    pub fn active_agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.iter().filter(|(_, a)| a.active).map(|(&id, _)| id)
    }

    pub fn set_agent_params(&mut self, id: AgentId, params: AgentParams) -> Result<(), CrowdError> {
        self.check_params(&params)?;
        self.agent_mut(id).params = params;
        Ok(())
    }

    pub fn set_agent_tuning(&mut self, id: AgentId, tuning: AgentTuning) {
        self.agent_mut(id).tuning = tuning;
    }

    /// Queue a move toward `goal`; it takes effect at the start of the next
    /// [`Crowd::update`]. A later request for the same agent replaces it.
    pub fn request_move(&mut self, id: AgentId, goal: Vec3) {
        let agent = self.agent_mut(id);
        agent.move_state = MoveState::Requesting;
        self.pending.insert(id, goal);
    }

    /// Advance every agent by `dt` seconds.
    pub fn update(&mut self, dt: f32, navmesh: &NavMesh) {
        let _span = tracing::info_span!("crowd_update", agents = self.agents.len()).entered();
        if dt <= 0.0 {
            return;
        }

        self.apply_move_requests(navmesh);
        self.check_corridors(navmesh);
        self.gather_neighbours();
        self.steer(navmesh);
        self.plan_velocities(dt);
        self.integrate(dt);
        self.resolve_overlaps();
        self.constrain_to_mesh(navmesh);
    }

    fn apply_move_requests(&mut self, navmesh: &NavMesh) {
        let requests = std::mem::take(&mut self.pending);
        let filter = self.config.filter;
        let extents = self.config.query_half_extents;
        for (id, goal) in requests {
            let Some(agent) = self.agents.get_mut(&id) else {
                continue;
            };
            let Some((goal_ref, goal_pos)) = navmesh.find_nearest_poly(goal, extents, &filter) else {
                tracing::warn!(%id, %goal, "move target is off the navmesh");
                agent.move_state = MoveState::Failed;
                agent.target = None;
                agent.halt();
                continue;
            };
            match navmesh.find_path(agent.poly, goal_ref, agent.pos, goal_pos, &filter) {
                Ok(path) if !path.polys.is_empty() => {
                    let last = path.polys[path.polys.len() - 1];
                    let target = if path.complete {
                        goal_pos
                    } else {
                        navmesh
                            .closest_point_on_poly(last, goal_pos)
                            .map_or(agent.pos, |(p, _)| p)
                    };
                    tracing::debug!(%id, polys = path.polys.len(), complete = path.complete, "path found");
                    agent.corridor = path.polys;
                    agent.target = Some(target);
                    agent.target_ref = last;
                    agent.move_state = MoveState::Valid;
                }
                Ok(_) | Err(_) => {
                    tracing::warn!(%id, %goal, "no path to move target");
                    agent.move_state = MoveState::Failed;
                    agent.target = None;
                    agent.halt();
                }
            }
        }
    }

    /// Halt agents whose corridor references polygons no longer on the mesh.
    /// An agent whose own polygon vanished keeps its position and only
    /// re-resolves the polygon it stands on.
    fn check_corridors(&mut self, navmesh: &NavMesh) {
        let filter = self.config.filter;
        let extents = self.config.query_half_extents;
        for (id, agent) in &mut self.agents {
            if !navmesh.is_valid_poly_ref(agent.poly) {
                match navmesh.find_nearest_poly(agent.pos, extents, &filter) {
                    Some((poly, _)) => {
                        tracing::warn!(%id, "agent polygon removed, halting");
                        agent.poly = poly;
                        if agent.move_state == MoveState::Valid {
                            agent.move_state = MoveState::Failed;
                            agent.target = None;
                        }
                        agent.halt();
                        continue;
                    }
                    None => {
                        tracing::warn!(%id, "agent lost the navmesh");
                        agent.active = false;
                        agent.halt();
                        continue;
                    }
                }
            }
            if agent.move_state == MoveState::Valid
                && agent.corridor.iter().any(|&r| !navmesh.is_valid_poly_ref(r))
            {
                tracing::warn!(%id, "corridor invalidated");
                agent.move_state = MoveState::Failed;
                agent.target = None;
                agent.halt();
            }
        }
    }

    fn gather_neighbours(&mut self) {
        self.grid.clear();
        for (&id, agent) in &self.agents {
            if agent.active {
                self.grid.insert(id, agent.pos, agent.params.radius);
            }
        }

        let positions: Vec<(AgentId, Vec3)> = self.agents.iter().map(|(&id, a)| (id, a.pos)).collect();
        let max_neighbours = self.config.max_neighbours;
        for (id, agent) in &mut self.agents {
            agent.neighbours.clear();
            if !agent.active {
                continue;
            }
            let range = agent.params.collision_query_range;
            let mut found: Vec<(f32, AgentId)> = self
                .grid
                .query(agent.pos, range)
                .into_iter()
                .filter(|other| other != id)
                .filter_map(|other| {
                    let i = positions.binary_search_by_key(&other, |(k, _)| *k).ok()?;
                    let d = flat(positions[i].1 - agent.pos).length_squared();
                    (d < range * range).then_some((d, other))
                })
                .collect();
            found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            found.truncate(max_neighbours);
            agent.neighbours = found.into_iter().map(|(_, n)| n).collect();
        }
    }

    /// Corners from the corridor, then desired velocity with arrival
    /// slowdown and separation.
    fn steer(&mut self, navmesh: &NavMesh) {
        let snapshot: BTreeMap<AgentId, (Vec3, f32)> = self
            .agents
            .iter()
            .map(|(&id, a)| (id, (a.pos, a.params.radius)))
            .collect();
        let max_points = self.config.max_corners + 1;

        for (id, agent) in &mut self.agents {
            agent.desired_vel = Vec3::ZERO;
            agent.corners.clear();
            if !agent.active || agent.move_state != MoveState::Valid {
                continue;
            }
            let Some(target) = agent.target else {
                continue;
            };

            match navmesh.find_straight_path(agent.pos, target, &agent.corridor, max_points) {
                Ok(points) => agent.corners = points.into_iter().skip(1).collect(),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "straight path failed");
                    agent.move_state = MoveState::Failed;
                    agent.target = None;
                    agent.halt();
                    continue;
                }
            }
            let Some(&next) = agent.corners.first() else {
                continue;
            };

            let to_target = flat(target - agent.pos).length();
            if to_target < ARRIVAL_DISTANCE {
                continue;
            }

            let max_speed = agent.max_speed();
            let ends_at_target = agent.corners.len() == 1;
            let slow_radius = agent.params.radius * 2.0;
            let scale = if ends_at_target && slow_radius > 0.0 {
                (to_target / slow_radius).min(1.0)
            } else {
                1.0
            };
            let mut dvel = flat(next - agent.pos).normalize_or_zero() * max_speed * scale;

            if agent.params.separation_weight > 0.0 {
                let sep_dist = agent.params.collision_query_range;
                let mut disp = Vec3::ZERO;
                let mut w = 0.0;
                for n in &agent.neighbours {
                    let Some(&(npos, _)) = snapshot.get(n) else {
                        continue;
                    };
                    let diff = flat(agent.pos - npos);
                    let d2 = diff.length_squared();
                    if d2 < 1e-5 || d2 > sep_dist * sep_dist {
                        continue;
                    }
                    let d = d2.sqrt();
                    let weight = agent.params.separation_weight * (1.0 - (d / sep_dist).powi(2));
                    disp += diff * (weight / d);
                    w += 1.0;
                }
                if w > 1e-4 {
                    dvel += disp / w;
                    let desired_speed = max_speed * scale;
                    if dvel.length_squared() > desired_speed * desired_speed {
                        dvel = dvel.normalize_or_zero() * desired_speed;
                    }
                }
            }
            agent.desired_vel = dvel;
        }
    }

    fn plan_velocities(&mut self, dt: f32) {
        let snapshot: BTreeMap<AgentId, OrcaAgent> = self
            .agents
            .iter()
            .map(|(&id, a)| {
                (
                    id,
                    OrcaAgent {
                        pos: xz(a.pos),
                        vel: xz(a.vel),
                        radius: a.params.radius,
                    },
                )
            })
            .collect();
        let horizon = self.config.time_horizon;

        for (id, agent) in &mut self.agents {
            agent.planned_vel = Vec3::ZERO;
            if !agent.active {
                continue;
            }
            let Some(me) = snapshot.get(id) else {
                continue;
            };
            let neighbours: Vec<OrcaAgent> = agent
                .neighbours
                .iter()
                .filter_map(|n| snapshot.get(n).copied())
                .collect();
            let v = plan_velocity(me, xz(agent.desired_vel), agent.max_speed(), &neighbours, horizon, dt);
            agent.planned_vel = Vec3::new(v.x, 0.0, v.y);
        }
    }

    fn integrate(&mut self, dt: f32) {
        for agent in self.agents.values_mut() {
            if !agent.active {
                agent.next_pos = agent.pos;
                continue;
            }
            let dv = (agent.planned_vel - agent.vel).clamp_length_max(agent.max_acceleration() * dt);
            agent.vel += dv;
            if agent.vel.length_squared() < 1e-8 {
                agent.vel = Vec3::ZERO;
            }
            agent.next_pos = agent.pos + agent.vel * dt;
        }
    }

    /// Push overlapping agents apart over a few relaxation passes.
    fn resolve_overlaps(&mut self) {
        for _ in 0..OVERLAP_ITERATIONS {
            let snapshot: BTreeMap<AgentId, (Vec3, f32)> = self
                .agents
                .iter()
                .map(|(&id, a)| (id, (a.next_pos, a.params.radius)))
                .collect();
            for (id, agent) in &mut self.agents {
                if !agent.active {
                    continue;
                }
                let mut disp = Vec3::ZERO;
                let mut w = 0.0;
                for n in &agent.neighbours {
                    let Some(&(npos, nradius)) = snapshot.get(n) else {
                        continue;
                    };
                    let mut diff = flat(agent.next_pos - npos);
                    let d2 = diff.length_squared();
                    let r = agent.params.radius + nradius;
                    if d2 > r * r {
                        continue;
                    }
                    let d = d2.sqrt();
                    let mut pen = r - d;
                    if d < 1e-4 {
                        // Coincident: split along a side vector chosen by id order.
                        let dv = agent.desired_vel;
                        diff = if id > n { Vec3::new(-dv.z, 0.0, dv.x) } else { Vec3::new(dv.z, 0.0, -dv.x) };
                        if diff.length_squared() < 1e-8 {
                            diff = if id > n { Vec3::X } else { Vec3::NEG_X };
                        }
                        pen = 0.01;
                        diff = diff.normalize_or_zero();
                    } else {
                        diff /= d;
                    }
                    disp += diff * (pen * 0.5 * COLLISION_RESOLVE_FACTOR);
                    w += 1.0;
                }
                if w > 1e-4 {
                    agent.next_pos += disp / w;
                }
            }
        }
    }

    /// Slide each agent from its last valid position to its new one along
    /// the mesh surface and trim the corridor to the polygons it crossed.
    fn constrain_to_mesh(&mut self, navmesh: &NavMesh) {
        let filter = self.config.filter;
        for (id, agent) in &mut self.agents {
            if !agent.active || agent.next_pos == agent.pos {
                continue;
            }
            match navmesh.move_along_surface(agent.poly, agent.pos, agent.next_pos, &filter) {
                Ok(moved) => {
                    agent.pos = moved.pos;
                    agent.poly = moved.poly;
                    merge_corridor_start(&mut agent.corridor, &moved.visited);
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "surface move failed");
                    agent.halt();
                }
            }
            agent.next_pos = agent.pos;
        }
    }
}

/// Replace the corridor start with the polygons crossed while moving.
/// `visited` runs from the old start polygon to the new one.
pub(crate) fn merge_corridor_start(corridor: &mut Vec<PolyRef>, visited: &[PolyRef]) {
    let Some(&current) = visited.last() else {
        return;
    };
    let mut shared = None;
    'outer: for (vi, v) in visited.iter().enumerate().rev() {
        for (ci, c) in corridor.iter().enumerate().rev() {
            if c == v {
                shared = Some((ci, vi));
                break 'outer;
            }
        }
    }
    let Some((ci, vi)) = shared else {
        corridor.clear();
        corridor.push(current);
        return;
    };
    let mut merged: Vec<PolyRef> = visited[vi..].iter().rev().copied().collect();
    merged.extend_from_slice(&corridor[ci + 1..]);
    *corridor = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef(i)).collect()
    }

    #[test]
    fn corridor_advances_along_visited() {
        let mut corridor = refs(&[1, 2, 3, 4]);
        merge_corridor_start(&mut corridor, &refs(&[1, 9, 2]));
        assert_eq!(corridor, refs(&[2, 3, 4]));
    }

    #[test]
    fn corridor_detour_keeps_way_back() {
        let mut corridor = refs(&[1, 2, 3]);
        merge_corridor_start(&mut corridor, &refs(&[1, 7]));
        assert_eq!(corridor, refs(&[7, 1, 2, 3]));
    }

    #[test]
    fn corridor_without_shared_poly_resets() {
        let mut corridor = refs(&[1, 2]);
        merge_corridor_start(&mut corridor, &refs(&[5, 6]));
        assert_eq!(corridor, refs(&[6]));
    }

    #[test]
    fn config_validation() {
        let bad = CrowdConfig {
            max_agents: 0,
            ..CrowdConfig::default()
        };
        assert!(matches!(Crowd::new(bad), Err(CrowdError::InvalidConfig(_))));
        let bad = CrowdConfig {
            max_agent_radius: 0.0,
            ..CrowdConfig::default()
        };
        assert!(matches!(Crowd::new(bad), Err(CrowdError::InvalidConfig(_))));
        assert!(Crowd::new(CrowdConfig::default()).is_ok());
    }

    #[test]
    #[should_panic(expected = "was removed or never existed")]
    fn unknown_id_panics() {
        let crowd = Crowd::new(CrowdConfig::default()).unwrap();
        crowd.agent_position(AgentId(3));
    }
}
