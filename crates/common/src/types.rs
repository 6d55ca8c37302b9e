use glam::{Affine3A, Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an entity in the world.
///
/// Registry-issued ids encode a monotonically increasing index in the low
/// 64 bits, so `Ord` on `EntityId` is spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// A random id, not ordered relative to registry-issued ids.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Sequential id for the `index`-th spawned entity.
    pub fn from_index(index: u64) -> Self {
        Self(Uuid::from_u64_pair(0, index))
    }

    /// Spawn index of a sequential id.
    pub fn index(&self) -> u64 {
        self.0.as_u64_pair().1
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hi, lo) = self.0.as_u64_pair();
        if hi == 0 {
            write!(f, "e{lo}")
        } else {
            write!(f, "{}", &self.0.to_string()[..8])
        }
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.position + self.rotation * (self.scale * p)
    }

    /// Compose `self ∘ local`: a point is first mapped by `local`, then by `self`.
    pub fn compose(&self, local: &Transform) -> Affine3A {
        self.to_affine() * local.to_affine()
    }
}

/// Free-form label attached to an entity. `terrain` marks static bake input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(pub String);

impl Tag {
    pub const TERRAIN: &'static str = "terrain";

    pub fn terrain() -> Self {
        Self(Self::TERRAIN.to_string())
    }

    pub fn is_terrain(&self) -> bool {
        self.0 == Self::TERRAIN
    }
}
