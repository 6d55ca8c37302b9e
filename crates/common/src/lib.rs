//! Shared types for the strata simulation core: entity ids, transforms, tags,
//! triangle meshes and debug geometry.

mod mesh;
mod types;

pub use mesh::{Aabb, DebugMesh, DebugTopology, MeshError, StaticMesh, TriMesh};
pub use types::{EntityId, Tag, Transform};
