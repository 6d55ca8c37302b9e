use glam::{Vec2, Vec3};
use strata_common::{MeshError, TriMesh};

/// Errors from building a [`ChunkyTriMesh`].
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    #[error("invalid geometry: {0}")]
    Geometry(#[from] MeshError),
    #[error("max triangles per chunk must be at least 1")]
    ZeroChunkSize,
}

/// One node of the flattened tree.
///
/// Leaves have `i >= 0` (offset into the reordered triangle array) and
/// `n` triangles. Internal nodes store `i = -escape`, where `escape` is the
/// number of nodes in their subtree including themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkNode {
    pub bmin: Vec2,
    pub bmax: Vec2,
    pub i: i32,
    pub n: i32,
}

impl ChunkNode {
    pub fn is_leaf(&self) -> bool {
        self.i >= 0
    }

    /// Jump distance to the node after this subtree.
    pub fn escape_index(&self) -> usize {
        if self.is_leaf() { 1 } else { (-self.i) as usize }
    }

    pub fn overlaps_rect(&self, bmin: Vec2, bmax: Vec2) -> bool {
        !(bmin.x > self.bmax.x || bmax.x < self.bmin.x || bmin.y > self.bmax.y || bmax.y < self.bmin.y)
    }

    /// Slab test of segment `p..q` against the node rectangle.
    pub fn overlaps_segment(&self, p: Vec2, q: Vec2) -> bool {
        const EPS: f32 = 1e-6;
        let d = q - p;
        let mut tmin = 0.0f32;
        let mut tmax = 1.0f32;
        for axis in 0..2 {
            if d[axis].abs() < EPS {
                if p[axis] < self.bmin[axis] || p[axis] > self.bmax[axis] {
                    return false;
                }
            } else {
                let ood = 1.0 / d[axis];
                let mut t1 = (self.bmin[axis] - p[axis]) * ood;
                let mut t2 = (self.bmax[axis] - p[axis]) * ood;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                tmin = tmin.max(t1);
                tmax = tmax.min(t2);
                if tmin > tmax {
                    return false;
                }
            }
        }
        true
    }
}

/// Per-triangle 2D bounds used while building.
#[derive(Debug, Clone, Copy)]
struct BoundsItem {
    bmin: Vec2,
    bmax: Vec2,
    index: u32,
}

/// Static, read-only AABB tree over a triangle soup projected onto XZ.
///
/// The tree is flattened in depth-first pre-order so queries are a linear
/// scan that skips whole subtrees by escape index.
#[derive(Debug, Clone)]
pub struct ChunkyTriMesh {
    nodes: Vec<ChunkNode>,
    tris: Vec<[u32; 3]>,
    tri_ids: Vec<u32>,
    max_tris_per_chunk: usize,
}

impl ChunkyTriMesh {
    pub fn build(
        vertices: &[Vec3],
        triangles: &[[u32; 3]],
        max_tris_per_chunk: usize,
    ) -> Result<Self, SpatialError> {
        if max_tris_per_chunk == 0 {
            return Err(SpatialError::ZeroChunkSize);
        }
        validate(vertices, triangles)?;

        let _span = tracing::debug_span!("chunky_build", triangles = triangles.len()).entered();

        let mut items: Vec<BoundsItem> = triangles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut bmin = Vec2::splat(f32::MAX);
                let mut bmax = Vec2::splat(f32::MIN);
                for &vi in t {
                    let v = vertices[vi as usize];
                    let p = Vec2::new(v.x, v.z);
                    bmin = bmin.min(p);
                    bmax = bmax.max(p);
                }
                BoundsItem {
                    bmin,
                    bmax,
                    index: i as u32,
                }
            })
            .collect();

        let chunk_estimate = triangles.len().div_ceil(max_tris_per_chunk);
        let mut mesh = ChunkyTriMesh {
            nodes: Vec::with_capacity(chunk_estimate * 4),
            tris: Vec::with_capacity(triangles.len()),
            tri_ids: Vec::with_capacity(triangles.len()),
            max_tris_per_chunk,
        };
        let count = items.len();
        mesh.subdivide(&mut items, 0, count, triangles);

        tracing::debug!(
            nodes = mesh.nodes.len(),
            leaves = mesh.leaf_count(),
            "triangle index built"
        );
        Ok(mesh)
    }

    /// Build from a [`TriMesh`].
    pub fn from_mesh(mesh: &TriMesh, max_tris_per_chunk: usize) -> Result<Self, SpatialError> {
        Self::build(&mesh.vertices, &mesh.triangles, max_tris_per_chunk)
    }

    fn subdivide(&mut self, items: &mut [BoundsItem], imin: usize, imax: usize, src: &[[u32; 3]]) {
        let inum = imax - imin;
        let icur = self.nodes.len();
        let (bmin, bmax) = extents(&items[imin..imax]);
        self.nodes.push(ChunkNode {
            bmin,
            bmax,
            i: 0,
            n: 0,
        });

        if inum <= self.max_tris_per_chunk {
            let node = &mut self.nodes[icur];
            node.i = self.tris.len() as i32;
            node.n = inum as i32;
            for item in &items[imin..imax] {
                self.tris.push(src[item.index as usize]);
                self.tri_ids.push(item.index);
            }
        } else {
            let size = bmax - bmin;
            let axis = if size.y > size.x { 1 } else { 0 };
            items[imin..imax].sort_by(|a, b| a.bmin[axis].total_cmp(&b.bmin[axis]));

            let isplit = imin + inum / 2;
            self.subdivide(items, imin, isplit, src);
            self.subdivide(items, isplit, imax, src);

            let escape = (self.nodes.len() - icur) as i32;
            self.nodes[icur].i = -escape;
        }
    }

    /// Ids of all leaf nodes whose rectangle overlaps `[bmin, bmax]`.
    pub fn query_overlapping(&self, bmin: Vec2, bmax: Vec2) -> Vec<usize> {
        self.scan(|node| node.overlaps_rect(bmin, bmax))
    }

    /// Ids of all leaf nodes whose rectangle is crossed by segment `p..q`.
    pub fn query_segment(&self, p: Vec2, q: Vec2) -> Vec<usize> {
        self.scan(|node| node.overlaps_segment(p, q))
    }

    fn scan(&self, overlaps: impl Fn(&ChunkNode) -> bool) -> Vec<usize> {
        let mut ids = Vec::new();
        let mut i = 0;
        while i < self.nodes.len() {
            let node = &self.nodes[i];
            let overlap = overlaps(node);
            let leaf = node.is_leaf();
            if leaf && overlap {
                ids.push(i);
            }
            if overlap || leaf {
                i += 1;
            } else {
                i += node.escape_index();
            }
        }
        ids
    }

    pub fn nodes(&self) -> &[ChunkNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &ChunkNode {
        &self.nodes[id]
    }

    /// Triangles (vertex index triples) stored in leaf `id`.
    pub fn leaf_triangles(&self, id: usize) -> &[[u32; 3]] {
        let node = &self.nodes[id];
        debug_assert!(node.is_leaf(), "node {id} is not a leaf");
        let start = node.i as usize;
        &self.tris[start..start + node.n as usize]
    }

    /// Original triangle indices stored in leaf `id`.
    pub fn leaf_triangle_ids(&self, id: usize) -> &[u32] {
        let node = &self.nodes[id];
        let start = node.i as usize;
        &self.tri_ids[start..start + node.n as usize]
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn triangle_count(&self) -> usize {
        self.tris.len()
    }

    pub fn max_tris_per_chunk(&self) -> usize {
        self.max_tris_per_chunk
    }

    /// Largest triangle count of any leaf.
    pub fn max_leaf_triangles(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.n as usize)
            .max()
            .unwrap_or(0)
    }
}

fn validate(vertices: &[Vec3], triangles: &[[u32; 3]]) -> Result<(), MeshError> {
    if triangles.is_empty() {
        return Err(MeshError::Empty);
    }
    for (triangle, tri) in triangles.iter().enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(MeshError::IndexOutOfRange {
                triangle,
                index,
                vertex_count: vertices.len(),
            });
        }
    }
    Ok(())
}

fn extents(items: &[BoundsItem]) -> (Vec2, Vec2) {
    items.iter().fold(
        (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
        |(bmin, bmax), it| (bmin.min(it.bmin), bmax.max(it.bmax)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid of `n x n` unit quads on the XZ plane.
    fn grid(n: u32) -> TriMesh {
        let mut mesh = TriMesh::default();
        for z in 0..n {
            for x in 0..n {
                mesh.append(&TriMesh::quad(x as f32, z as f32, x as f32 + 1.0, z as f32 + 1.0, 0.0));
            }
        }
        mesh
    }

    fn tri_rect(mesh: &TriMesh, t: &[u32; 3]) -> (Vec2, Vec2) {
        let mut bmin = Vec2::splat(f32::MAX);
        let mut bmax = Vec2::splat(f32::MIN);
        for &i in t {
            let v = mesh.vertices[i as usize];
            bmin = bmin.min(Vec2::new(v.x, v.z));
            bmax = bmax.max(Vec2::new(v.x, v.z));
        }
        (bmin, bmax)
    }

    fn rects_overlap(a: (Vec2, Vec2), b: (Vec2, Vec2)) -> bool {
        !(a.0.x > b.1.x || a.1.x < b.0.x || a.0.y > b.1.y || a.1.y < b.0.y)
    }

    #[test]
    fn rejects_empty_and_zero_chunk() {
        assert!(matches!(
            ChunkyTriMesh::build(&[], &[], 4),
            Err(SpatialError::Geometry(MeshError::Empty))
        ));
        let mesh = grid(1);
        assert!(matches!(
            ChunkyTriMesh::from_mesh(&mesh, 0),
            Err(SpatialError::ZeroChunkSize)
        ));
    }

    #[test]
    fn every_triangle_in_exactly_one_leaf() {
        let mesh = grid(12);
        let index = ChunkyTriMesh::from_mesh(&mesh, 7).unwrap();
        let mut seen = vec![0u32; mesh.triangle_count()];
        for (id, node) in index.nodes().iter().enumerate() {
            if node.is_leaf() {
                for &t in index.leaf_triangle_ids(id) {
                    seen[t as usize] += 1;
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(index.triangle_count(), mesh.triangle_count());
        assert!(index.max_leaf_triangles() <= 7);
    }

    #[test]
    fn internal_bounds_cover_children() {
        let mesh = grid(9);
        let index = ChunkyTriMesh::from_mesh(&mesh, 5).unwrap();
        let nodes = index.nodes();
        for (i, node) in nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            for child in &nodes[i + 1..i + node.escape_index()] {
                assert!(child.bmin.cmpge(node.bmin).all());
                assert!(child.bmax.cmple(node.bmax).all());
            }
        }
        // Root escape spans the whole array.
        assert_eq!(nodes[0].escape_index(), nodes.len());
    }

    #[test]
    fn query_matches_linear_scan() {
        let mesh = grid(16);
        let index = ChunkyTriMesh::from_mesh(&mesh, 6).unwrap();
        let queries = [
            (Vec2::new(2.5, 2.5), Vec2::new(4.2, 7.9)),
            (Vec2::new(-1.0, -1.0), Vec2::new(0.1, 0.1)),
            (Vec2::new(15.5, 0.0), Vec2::new(30.0, 3.0)),
            (Vec2::new(0.0, 0.0), Vec2::new(16.0, 16.0)),
        ];
        for (qmin, qmax) in queries {
            let got = index.query_overlapping(qmin, qmax);
            let expected: Vec<usize> = index
                .nodes()
                .iter()
                .enumerate()
                .filter(|(_, n)| n.is_leaf() && n.overlaps_rect(qmin, qmax))
                .map(|(id, _)| id)
                .collect();
            assert_eq!(got, expected, "query {qmin:?}..{qmax:?}");

            // Every triangle touching the rectangle lives in a returned leaf.
            for (t, tri) in mesh.triangles.iter().enumerate() {
                if rects_overlap(tri_rect(&mesh, tri), (qmin, qmax)) {
                    assert!(got
                        .iter()
                        .any(|id| index.leaf_triangle_ids(*id).contains(&(t as u32))));
                }
            }
        }
    }

    #[test]
    fn disjoint_query_is_empty() {
        let mesh = grid(4);
        let index = ChunkyTriMesh::from_mesh(&mesh, 2).unwrap();
        assert!(index
            .query_overlapping(Vec2::new(10.0, 10.0), Vec2::new(11.0, 11.0))
            .is_empty());
    }

    #[test]
    fn split_axis_follows_longer_extent() {
        // A strip along Z must be split on Z: the first leaf covers low z only.
        let mut mesh = TriMesh::default();
        for z in 0..8 {
            mesh.append(&TriMesh::quad(0.0, z as f32, 1.0, z as f32 + 1.0, 0.0));
        }
        let index = ChunkyTriMesh::from_mesh(&mesh, 8).unwrap();
        let first_leaf = index.nodes().iter().position(|n| n.is_leaf()).unwrap();
        assert!(index.node(first_leaf).bmax.y <= 4.0);
    }

    #[test]
    fn segment_query_hits_crossed_leaves() {
        let mesh = grid(8);
        let index = ChunkyTriMesh::from_mesh(&mesh, 4).unwrap();
        let hits = index.query_segment(Vec2::new(0.5, 0.5), Vec2::new(0.5, 7.5));
        assert!(!hits.is_empty());
        for id in &hits {
            assert!(index.node(*id).bmin.x <= 0.5);
        }
        let none = index.query_segment(Vec2::new(-5.0, -5.0), Vec2::new(-4.0, 20.0));
        assert!(none.is_empty());
    }
}
