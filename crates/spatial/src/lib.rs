//! Spatial Triangle Index: a static bounding-volume tree over a triangle
//! soup, answering "which triangles overlap this rectangle" on the XZ plane.
//!
//! # Invariants
//! - Internal node bounds are the union of their descendant leaves.
//! - Leaves hold at most `max_tris_per_chunk` triangles.
//! - Every source triangle lives in exactly one leaf.
//! - Nodes are laid out in depth-first pre-order; queries never chase pointers.

mod chunky;

pub use chunky::{ChunkNode, ChunkyTriMesh, SpatialError};

pub fn crate_info() -> &'static str {
    "strata-spatial v0.1.0"
}
