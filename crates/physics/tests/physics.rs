use glam::{Quat, Vec3};
use strata_common::{DebugTopology, Transform};
use strata_ecs::Registry;
use strata_physics::{Collider, PhysicsConfig, PhysicsWorld, RigidBody};

fn no_gravity() -> PhysicsWorld {
    PhysicsWorld::new(PhysicsConfig {
        gravity_enabled: false,
        ..PhysicsConfig::default()
    })
}

fn ball(registry: &mut Registry, x: f32, vx: f32) -> strata_common::EntityId {
    let body = RigidBody::dynamic(Transform::from_position(Vec3::new(x, 0.0, 0.0)), vec![Collider::sphere(0.5)])
        .unwrap()
        .with_restitution(1.0)
        .with_velocity(Vec3::new(vx, 0.0, 0.0));
    let e = registry.spawn();
    registry.insert(e, body).unwrap();
    e
}

#[test]
fn elastic_head_on_swaps_velocities() {
    let mut registry = Registry::new();
    let a = ball(&mut registry, 0.0, 1.0);
    let b = ball(&mut registry, 0.95, -1.0);
    let mut world = no_gravity();

    let stats = world.step(&mut registry, 0.01).unwrap();
    assert_eq!(stats.contact_pairs, 1);
    assert_eq!(stats.resolved, 1);
    let events = world.drain_contact_events();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].a, events[0].b), (a, b));
    assert!((events[0].normal - Vec3::X).length() < 1e-5);

    // The impulse lands at the start of the next step.
    world.step(&mut registry, 0.01).unwrap();
    let va = registry.get::<RigidBody>(a).unwrap().linear_velocity();
    let vb = registry.get::<RigidBody>(b).unwrap().linear_velocity();
    assert!((va.x + 1.0).abs() < 1e-4, "a: {va}");
    assert!((vb.x - 1.0).abs() < 1e-4, "b: {vb}");
    assert!((va.x + vb.x).abs() < 1e-4, "momentum not conserved");
}

#[test]
fn inelastic_collision_conserves_momentum() {
    let mut registry = Registry::new();
    let a = registry.spawn();
    let b = registry.spawn();
    let heavy = RigidBody::dynamic(Transform::default(), vec![Collider::sphere(0.5).with_mass(3.0)])
        .unwrap()
        .with_restitution(0.0)
        .with_velocity(Vec3::X * 2.0);
    let light = RigidBody::dynamic(Transform::from_position(Vec3::new(0.98, 0.0, 0.0)), vec![Collider::sphere(0.5)])
        .unwrap()
        .with_restitution(0.0);
    registry.insert(a, heavy).unwrap();
    registry.insert(b, light).unwrap();

    let mut world = no_gravity();
    world.step(&mut registry, 0.01).unwrap();
    world.step(&mut registry, 0.01).unwrap();

    let va = registry.get::<RigidBody>(a).unwrap().linear_velocity().x;
    let vb = registry.get::<RigidBody>(b).unwrap().linear_velocity().x;
    assert!((3.0 * va + vb - 6.0).abs() < 1e-3);
    assert!((va - vb).abs() < 1e-3, "bodies should move together: {va} {vb}");
}

#[test]
fn static_body_never_moves() {
    let mut registry = Registry::new();
    let floor = registry.spawn();
    let start = Transform::from_position(Vec3::new(0.0, -0.5, 0.0));
    registry
        .insert(
            floor,
            RigidBody::fixed(start, vec![Collider::cuboid(Vec3::new(5.0, 0.5, 5.0))]).unwrap(),
        )
        .unwrap();
    let falling = registry.spawn();
    registry
        .insert(
            falling,
            RigidBody::dynamic(Transform::from_position(Vec3::new(0.0, 2.0, 0.0)), vec![Collider::sphere(0.5)]).unwrap(),
        )
        .unwrap();

    let mut world = PhysicsWorld::default();
    for _ in 0..200 {
        registry.get_mut::<RigidBody>(floor).unwrap().apply_force(Vec3::Y * 1000.0);
        world.step(&mut registry, 1.0 / 60.0).unwrap();
        let body = registry.get::<RigidBody>(floor).unwrap();
        assert_eq!(body.position, start.position);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
        assert_eq!(body.angular_velocity(), Vec3::ZERO);
    }

    // The ball has come to rest on top of the floor instead of falling through.
    let y = registry.get::<Transform>(falling).unwrap().position.y;
    assert!(y > 0.3 && y < 0.7, "ball at {y}");
}

#[test]
fn transforms_follow_bodies() {
    let mut registry = Registry::new();
    let e = registry.spawn_at(Transform::from_position(Vec3::new(1.0, 10.0, 0.0)));
    let body = RigidBody::dynamic(Transform::from_position(Vec3::new(1.0, 10.0, 0.0)), vec![Collider::capsule(0.3, 0.6)])
        .unwrap()
        .with_velocity(Vec3::Z);
    registry.insert(e, body).unwrap();

    let mut world = PhysicsWorld::default();
    world.step(&mut registry, 0.5).unwrap();
    let t = registry.get::<Transform>(e).unwrap();
    assert!((t.position.z - 0.5).abs() < 1e-5);
    assert!(t.position.y < 10.0);
}

#[test]
fn resting_box_stack_generates_events() {
    let mut registry = Registry::new();
    let ground = registry.spawn();
    registry
        .insert(
            ground,
            RigidBody::fixed(Transform::default(), vec![Collider::cuboid(Vec3::new(4.0, 0.5, 4.0))]).unwrap(),
        )
        .unwrap();
    let crate_box = registry.spawn();
    registry
        .insert(
            crate_box,
            RigidBody::dynamic(
                Transform::from_position(Vec3::new(0.0, 0.95, 0.0)).with_rotation(Quat::IDENTITY),
                vec![Collider::cuboid(Vec3::splat(0.5))],
            )
            .unwrap()
            .with_restitution(0.0),
        )
        .unwrap();

    let mut world = PhysicsWorld::default();
    world.step(&mut registry, 1.0 / 60.0).unwrap();
    let events = world.contact_events();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].a, events[0].b), (ground, crate_box));
    assert!((events[0].normal - Vec3::Y).length() < 1e-4);
}

#[test]
fn debug_mesh_draws_one_box_per_body() {
    let mut registry = Registry::new();
    for x in 0..3 {
        let e = registry.spawn();
        registry
            .insert(
                e,
                RigidBody::fixed(Transform::from_position(Vec3::new(x as f32 * 3.0, 0.0, 0.0)), vec![Collider::sphere(1.0)])
                    .unwrap(),
            )
            .unwrap();
    }
    let mesh = PhysicsWorld::default().debug_mesh(&registry);
    assert_eq!(mesh.topology, DebugTopology::Lines);
    assert_eq!(mesh.vertices.len(), 24);
    assert_eq!(mesh.primitive_count(), 36);
}
