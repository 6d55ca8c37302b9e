//! Tiled navigation mesh for ground agents.
//!
//! Static level geometry is voxelized per tile, reduced to convex polygons
//! and serialized ([`bake`], [`tile`]). A [`NavMesh`] holds the baked tiles,
//! links polygons across tile borders and answers spatial and path queries.
//!
//! # Invariants
//! - Baking the same geometry with the same [`BakeConfig`] yields identical
//!   tile bytes.
//! - Polygons are convex with at most [`tile::MAX_VERTS_PER_POLY`] vertices.
//! - A [`PolyRef`] of zero never names a polygon.
//! - Links are symmetric: if `a` links to `b` across an edge, `b` links back.

pub mod bake;
mod config;
mod math;
mod query;
mod store;
pub mod tile;

pub use bake::{BakeError, bake_tile};
pub use config::{BakeConfig, VoxelConfig};
pub use query::{MAX_SEARCH_NODES, MoveResult, PathResult, QueryFilter};
pub use store::{
    GeometryInstance, Link, MeshTile, NAVMESH_SET_MAGIC, NAVMESH_SET_VERSION, NavMesh,
    NavMeshParams, PolyRef, TileRef,
};
pub use tile::NavTileData;

#[derive(Debug, thiserror::Error)]
pub enum NavMeshError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported version {0}")]
    BadVersion(u32),

    #[error("malformed tile data: {0}")]
    Decode(String),

    #[error("invalid navmesh parameters: {0}")]
    InvalidParams(String),

    #[error("tile ({x}, {y}) already present")]
    TileExists { x: i32, y: i32 },

    #[error("no free tile slots")]
    OutOfTiles,

    #[error("invalid tile reference {0:#x}")]
    InvalidTile(u32),

    #[error("invalid polygon reference {0}")]
    InvalidRef(PolyRef),

    #[error(transparent)]
    Bake(#[from] BakeError),
}

pub fn crate_info() -> &'static str {
    "strata-navmesh v0.1.0"
}
