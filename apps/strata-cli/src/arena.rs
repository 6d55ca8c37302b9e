use glam::Vec3;
use strata_common::{Transform, TriMesh};
use strata_kernel::{SimError, Simulation};

pub const ARENA_SIZE: f32 = 40.0;

/// Flat floor with a few solid blocks that agents have to walk around.
pub fn build(sim: &mut Simulation) -> Result<(), SimError> {
    sim.spawn_terrain(TriMesh::quad(0.0, 0.0, ARENA_SIZE, ARENA_SIZE, 0.0), Transform::default())?;

    let blocks = [
        (Vec3::new(8.0, 0.0, 8.0), Vec3::new(12.0, 3.0, 12.0)),
        (Vec3::new(24.0, 0.0, 6.0), Vec3::new(26.0, 3.0, 20.0)),
        (Vec3::new(14.0, 0.0, 26.0), Vec3::new(30.0, 3.0, 28.0)),
    ];
    for (min, max) in blocks {
        sim.spawn_terrain(TriMesh::cuboid(min, max), Transform::default())?;
    }
    Ok(())
}

/// Patrol loop around the arena, clear of every block.
pub fn patrol_route() -> Vec<Vec3> {
    vec![
        Vec3::new(4.0, 0.0, 4.0),
        Vec3::new(20.0, 0.0, 4.0),
        Vec3::new(34.0, 0.0, 34.0),
        Vec3::new(4.0, 0.0, 34.0),
    ]
}
