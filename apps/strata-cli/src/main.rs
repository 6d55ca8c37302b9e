mod arena;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use strata_common::Transform;
use strata_kernel::{AgentSpawn, SimConfig, Simulation};
use strata_navmesh::NavMesh;
use strata_physics::{Collider, RigidBody};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", about = "Navmesh baking and crowd simulation tools")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Bake the demo arena and save the navmesh
    Bake {
        #[arg(short, long, default_value = "arena.navmesh")]
        out: PathBuf,
        /// JSON simulation config
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print tile and polygon statistics of a saved navmesh
    Inspect { file: PathBuf },
    /// Run the demo arena headless
    Simulate {
        #[arg(short, long, default_value = "300")]
        ticks: u64,
        #[arg(short, long, default_value = "16")]
        agents: usize,
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// JSON simulation config
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Navmesh cache: loaded if valid, otherwise baked and written
        #[arg(short, long)]
        navmesh: Option<PathBuf>,
        /// Seconds per tick
        #[arg(long, default_value = "0.05")]
        dt: f32,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("strata v{}", env!("CARGO_PKG_VERSION"));
            println!("ecs: {}", strata_ecs::crate_info());
            println!("spatial: {}", strata_spatial::crate_info());
            println!("navmesh: {}", strata_navmesh::crate_info());
            println!("crowd: {}", strata_crowd::crate_info());
            println!("physics: {}", strata_physics::crate_info());
            println!("kernel: {}", strata_kernel::crate_info());
        }
        Commands::Bake { out, config } => {
            let config = load_config(config.as_deref())?;
            let mut sim = Simulation::new(config)?;
            arena::build(&mut sim)?;
            let navmesh = sim.bake_navmesh()?;
            navmesh
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "Baked {} tiles, {} polygons -> {}",
                navmesh.tile_count(),
                navmesh.poly_count(),
                out.display()
            );
        }
        Commands::Inspect { file } => {
            let navmesh = NavMesh::load(&file).with_context(|| format!("loading {}", file.display()))?;
            let params = navmesh.params();
            println!(
                "{}: {} tiles, {} polygons, tile size {}x{}, origin {}",
                file.display(),
                navmesh.tile_count(),
                navmesh.poly_count(),
                params.tile_width,
                params.tile_height,
                params.orig
            );
            for (tile_ref, tile) in navmesh.tiles() {
                let (x, y) = tile.coords();
                let header = &tile.data.header;
                println!(
                    "  tile {:#x} at ({x}, {y}): {} polys, {} verts, {} detail tris, {} bytes",
                    tile_ref.0,
                    header.poly_count,
                    header.vert_count,
                    header.detail_tri_count,
                    tile.bytes().len()
                );
            }
        }
        Commands::Simulate {
            ticks,
            agents,
            seed,
            config,
            navmesh,
            dt,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.seed = seed;
            let mut sim = Simulation::new(config)?;
            arena::build(&mut sim)?;
            sim.init_navmesh(navmesh.as_deref())?;

            let route = arena::patrol_route();
            let mut spawned = Vec::new();
            for i in 0..agents {
                let x = 3.0 + (i % 8) as f32 * 4.5;
                let z = 2.0 + (i / 8) as f32 * 2.0;
                let entity = sim.spawn(Transform::from_position(Vec3::new(x, 0.0, z)));
                match sim.attach_agent(entity, AgentSpawn::default()) {
                    Ok(_) => spawned.push(entity),
                    Err(err) => {
                        // Every agent must stand on the mesh.
                        sim.despawn(entity);
                        return Err(err).with_context(|| format!("placing agent {i} at ({x}, {z})"));
                    }
                }
            }

            let center = Vec3::splat(arena::ARENA_SIZE * 0.5).with_y(0.0);
            for (i, &entity) in spawned.iter().enumerate() {
                match i % 4 {
                    0 => sim.wander(entity, center, 12.0, 3.0)?,
                    1 => sim.follow_path(entity, route.clone(), 1.0)?,
                    2 => sim.chase(entity, spawned[0], 15.0)?,
                    _ => sim.move_to(entity, Vec3::new(34.0, 0.0, 34.0))?,
                }
            }

            for i in 0..3 {
                let drop = Vec3::new(18.0 + i as f32 * 2.0, 4.0 + i as f32, 18.0);
                let body = RigidBody::dynamic(Transform::from_position(drop), vec![Collider::sphere(0.4)])?
                    .with_restitution(0.3)
                    .with_damping(0.05);
                sim.spawn_body(body)?;
            }

            let mut contacts = 0;
            for _ in 0..ticks {
                let report = sim.update(dt)?;
                contacts += report.contact_pairs;
                if report.tick % 100 == 0 {
                    tracing::info!(
                        tick = report.tick,
                        agents = report.agents,
                        moves = report.move_requests,
                        hash = %format!("{:#x}", sim.state_hash()),
                        "progress"
                    );
                }
            }

            println!(
                "Simulated {} ticks: {} agents, {} contact pairs, hash={:#x}",
                sim.tick(),
                sim.crowd().agent_count(),
                contacts,
                sim.state_hash()
            );
        }
    }

    Ok(())
}
