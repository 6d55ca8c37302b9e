use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};

use crate::Transform;

/// Errors from mesh validation.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("mesh has no triangles")]
    Empty,
    #[error("triangle {triangle} references vertex {index}, mesh has {vertex_count}")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
}

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut b, p| {
            b.grow(p);
            b
        })
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Indexed triangle soup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    /// Axis-aligned quad on the XZ plane at height `y`, two triangles wound
    /// so the face normal points up.
    pub fn quad(min_x: f32, min_z: f32, max_x: f32, max_z: f32, y: f32) -> Self {
        Self::new(
            vec![
                Vec3::new(min_x, y, min_z),
                Vec3::new(min_x, y, max_z),
                Vec3::new(max_x, y, max_z),
                Vec3::new(max_x, y, min_z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    /// Closed box mesh with outward-facing triangles.
    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
        let vertices = vec![
            v(min.x, min.y, min.z),
            v(max.x, min.y, min.z),
            v(max.x, min.y, max.z),
            v(min.x, min.y, max.z),
            v(min.x, max.y, min.z),
            v(max.x, max.y, min.z),
            v(max.x, max.y, max.z),
            v(min.x, max.y, max.z),
        ];
        let triangles = vec![
            // top
            [4, 7, 6],
            [4, 6, 5],
            // bottom
            [0, 1, 2],
            [0, 2, 3],
            // -z
            [0, 4, 5],
            [0, 5, 1],
            // +z
            [3, 2, 6],
            [3, 6, 7],
            // -x
            [0, 3, 7],
            [0, 7, 4],
            // +x
            [1, 5, 6],
            [1, 6, 2],
        ];
        Self::new(vertices, triangles)
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.triangles.is_empty() {
            return Err(MeshError::Empty);
        }
        let vertex_count = self.vertices.len();
        for (triangle, tri) in self.triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(MeshError::IndexOutOfRange {
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(())
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().copied())
    }

    /// Copy of this mesh with every vertex mapped through `m`.
    pub fn transformed(&self, m: &Affine3A) -> TriMesh {
        TriMesh {
            vertices: self.vertices.iter().map(|&v| m.transform_point3(v)).collect(),
            triangles: self.triangles.clone(),
        }
    }

    /// Append `other`, offsetting its indices.
    pub fn append(&mut self, other: &TriMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.triangles
            .extend(other.triangles.iter().map(|t| [t[0] + base, t[1] + base, t[2] + base]));
    }
}

/// Static level geometry attached to a terrain entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMesh {
    pub mesh: TriMesh,
    /// Mesh-local transform applied before the body transform.
    pub local: Transform,
}

impl StaticMesh {
    pub fn new(mesh: TriMesh) -> Self {
        Self {
            mesh,
            local: Transform::default(),
        }
    }
}

/// Primitive layout of a [`DebugMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugTopology {
    Lines,
    Triangles,
}

/// Read-only geometry handed to the renderer for debug drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugMesh {
    pub topology: DebugTopology,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl DebugMesh {
    pub fn new(topology: DebugTopology) -> Self {
        Self {
            topology,
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn push_vertex(&mut self, v: Vec3) -> u32 {
        self.vertices.push(v);
        (self.vertices.len() - 1) as u32
    }

    pub fn primitive_count(&self) -> usize {
        match self.topology {
            DebugTopology::Lines => self.indices.len() / 2,
            DebugTopology::Triangles => self.indices.len() / 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_bad_index() {
        let mesh = TriMesh::new(vec![Vec3::ZERO; 3], vec![[0, 1, 3]]);
        assert!(matches!(
            mesh.validate(),
            Err(MeshError::IndexOutOfRange { index: 3, .. })
        ));
        assert!(matches!(TriMesh::default().validate(), Err(MeshError::Empty)));
    }

    #[test]
    fn quad_faces_up() {
        let q = TriMesh::quad(0.0, 0.0, 1.0, 1.0, 0.0);
        for t in &q.triangles {
            let a = q.vertices[t[0] as usize];
            let b = q.vertices[t[1] as usize];
            let c = q.vertices[t[2] as usize];
            assert!((b - a).cross(c - a).y > 0.0);
        }
    }

    #[test]
    fn cuboid_top_faces_up() {
        let c = TriMesh::cuboid(Vec3::ZERO, Vec3::ONE);
        let t = c.triangles[0];
        let n = (c.vertices[t[1] as usize] - c.vertices[t[0] as usize])
            .cross(c.vertices[t[2] as usize] - c.vertices[t[0] as usize]);
        assert!(n.y > 0.0);
    }

    #[test]
    fn append_offsets_indices() {
        let mut a = TriMesh::quad(0.0, 0.0, 1.0, 1.0, 0.0);
        let b = TriMesh::quad(1.0, 0.0, 2.0, 1.0, 0.0);
        a.append(&b);
        assert_eq!(a.vertices.len(), 8);
        assert_eq!(a.triangles[2], [4, 5, 6]);
        a.validate().unwrap();
    }

    #[test]
    fn aabb_overlap() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(3.0), Vec3::splat(4.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
