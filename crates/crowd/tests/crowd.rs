use glam::{Affine3A, Vec3};
use strata_common::TriMesh;
use strata_crowd::{
    AgentId, AgentParams, Crowd, CrowdConfig, CrowdError, DifficultyController, DifficultyLevel,
    MoveState,
};
use strata_navmesh::{BakeConfig, GeometryInstance, NavMesh};

const DT: f32 = 0.1;

fn arena(size: f32) -> NavMesh {
    let mesh = TriMesh::quad(0.0, 0.0, size, size, 0.0);
    let instances = [GeometryInstance {
        mesh: &mesh,
        transform: Affine3A::IDENTITY,
    }];
    NavMesh::bake_all(&instances, &BakeConfig::default()).unwrap()
}

fn flat_distance(a: Vec3, b: Vec3) -> f32 {
    Vec3::new(a.x - b.x, 0.0, a.z - b.z).length()
}

#[test]
fn agent_reaches_goal_across_tiles() {
    let navmesh = arena(30.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(3.0, 0.0, 3.0), 2.0, AgentParams::default())
        .unwrap();

    let goal = Vec3::new(26.0, 0.0, 24.0);
    crowd.request_move(id, goal);
    assert_eq!(crowd.agent(id).move_state, MoveState::Requesting);

    for _ in 0..200 {
        crowd.update(DT, &navmesh);
    }
    assert_eq!(crowd.agent(id).move_state, MoveState::Valid);
    assert!(flat_distance(crowd.agent_position(id), goal) < 0.5);
    assert!(crowd.agent_velocity(id).length() < 0.5);
}

#[test]
fn removed_tile_halts_agent_in_place() {
    let mut navmesh = arena(30.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(13.8, 0.0, 3.0), 2.0, AgentParams::default())
        .unwrap();
    crowd.request_move(id, Vec3::new(2.0, 0.0, 3.0));
    crowd.update(DT, &navmesh);
    assert_eq!(crowd.agent(id).move_state, MoveState::Valid);
    assert!(crowd.agent_velocity(id).length() > 0.0);

    // Pull the tile out from under the agent; the neighbour is within reach.
    let tile = navmesh.tile_ref_at(0, 0).unwrap();
    navmesh.remove_tile(tile).unwrap();
    let before = crowd.agent_position(id);
    crowd.update(DT, &navmesh);

    let agent = crowd.agent(id);
    assert_eq!(agent.move_state, MoveState::Failed);
    assert_eq!(crowd.agent_position(id), before);
    assert_eq!(crowd.agent_velocity(id), Vec3::ZERO);
    assert!(navmesh.is_valid_poly_ref(agent.poly));
}

#[test]
fn request_takes_effect_on_next_update() {
    let navmesh = arena(10.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(2.0, 0.0, 2.0), 2.0, AgentParams::default())
        .unwrap();
    let start = crowd.agent_position(id);
    crowd.request_move(id, Vec3::new(8.0, 0.0, 8.0));
    assert_eq!(crowd.agent_position(id), start);
    crowd.update(DT, &navmesh);
    assert_ne!(crowd.agent_position(id), start);
}

#[test]
fn speed_never_exceeds_max() {
    let navmesh = arena(30.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let params = AgentParams {
        max_speed: 2.0,
        ..AgentParams::default()
    };
    let id = crowd.add_agent(&navmesh, Vec3::new(3.0, 0.0, 3.0), 2.0, params).unwrap();
    crowd.request_move(id, Vec3::new(27.0, 0.0, 27.0));
    for _ in 0..30 {
        crowd.update(DT, &navmesh);
        assert!(crowd.agent_velocity(id).length() <= 2.0 + 1e-3);
    }
}

#[test]
fn spawn_off_mesh_fails_without_consuming_id() {
    let navmesh = arena(10.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let err = crowd
        .add_agent(&navmesh, Vec3::new(50.0, 0.0, 50.0), 1.0, AgentParams::default())
        .unwrap_err();
    assert!(matches!(err, CrowdError::NoValidPosition { .. }));
    assert_eq!(crowd.agent_count(), 0);

    let id = crowd
        .add_agent(&navmesh, Vec3::new(5.0, 0.0, 5.0), 1.0, AgentParams::default())
        .unwrap();
    assert_eq!(id, AgentId(0));
}

#[test]
fn capacity_is_enforced() {
    let navmesh = arena(10.0);
    let config = CrowdConfig {
        max_agents: 2,
        ..CrowdConfig::default()
    };
    let mut crowd = Crowd::new(config).unwrap();
    let near = Vec3::new(5.0, 0.0, 5.0);
    crowd.add_agent(&navmesh, near, 1.0, AgentParams::default()).unwrap();
    crowd.add_agent(&navmesh, near + Vec3::X, 1.0, AgentParams::default()).unwrap();
    assert!(matches!(
        crowd.add_agent(&navmesh, near, 1.0, AgentParams::default()),
        Err(CrowdError::Full(2))
    ));
}

#[test]
#[should_panic(expected = "was removed or never existed")]
fn removed_id_panics() {
    let navmesh = arena(10.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(5.0, 0.0, 5.0), 1.0, AgentParams::default())
        .unwrap();
    crowd.remove_agent(id);
    crowd.request_move(id, Vec3::ZERO);
}

#[test]
fn unreachable_goal_fails_and_halts() {
    let navmesh = arena(10.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(5.0, 0.0, 5.0), 1.0, AgentParams::default())
        .unwrap();
    let before = crowd.agent_position(id);
    crowd.request_move(id, Vec3::new(100.0, 0.0, 100.0));
    crowd.update(DT, &navmesh);
    assert_eq!(crowd.agent(id).move_state, MoveState::Failed);
    assert_eq!(crowd.agent_velocity(id), Vec3::ZERO);
    assert_eq!(crowd.agent_position(id), before);
}

#[test]
fn head_on_agents_do_not_overlap() {
    let navmesh = arena(30.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let a = crowd
        .add_agent(&navmesh, Vec3::new(5.0, 0.0, 15.0), 1.0, AgentParams::default())
        .unwrap();
    let b = crowd
        .add_agent(&navmesh, Vec3::new(25.0, 0.0, 15.0), 1.0, AgentParams::default())
        .unwrap();
    crowd.request_move(a, Vec3::new(25.0, 0.0, 15.0));
    crowd.request_move(b, Vec3::new(5.0, 0.0, 15.0));

    let mut min_gap = f32::MAX;
    for _ in 0..150 {
        crowd.update(DT, &navmesh);
        let gap = flat_distance(crowd.agent_position(a), crowd.agent_position(b));
        min_gap = min_gap.min(gap);
    }
    // Two radii of 0.6; a little interpenetration is resolved iteratively.
    assert!(min_gap > 0.8, "agents overlapped: {min_gap}");
    assert!(crowd.agent_position(a).x > 15.0);
    assert!(crowd.agent_position(b).x < 15.0);
}

#[test]
fn difficulty_scales_speed_on_apply() {
    let navmesh = arena(10.0);
    let mut crowd = Crowd::new(CrowdConfig::default()).unwrap();
    let id = crowd
        .add_agent(&navmesh, Vec3::new(5.0, 0.0, 5.0), 1.0, AgentParams::default())
        .unwrap();
    let base = crowd.agent(id).max_speed();

    let mut difficulty = DifficultyController::default();
    difficulty.request(DifficultyLevel::Hard);
    assert_eq!(crowd.agent(id).max_speed(), base);
    assert_eq!(difficulty.apply_pending(&mut crowd), Some(DifficultyLevel::Hard));
    assert!(crowd.agent(id).max_speed() > base);
    assert_eq!(crowd.agent(id).params.max_speed, AgentParams::default().max_speed);
    assert_eq!(difficulty.apply_pending(&mut crowd), None);
}
