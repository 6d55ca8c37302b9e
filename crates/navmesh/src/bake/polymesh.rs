//! Convex polygon mesh built from contours: ear-clipping triangulation,
//! greedy convex merging, shared-edge adjacency and tile portal edges.

use std::collections::HashMap;

use glam::Vec3;

use super::BakeError;
use super::contour::{BORDER_VERTEX, ContourSet};
use super::geom::{self, Point};

/// Unused vertex / neighbour slot.
pub const MESH_NULL_IDX: u16 = 0xffff;
/// Neighbour flag marking an edge on the tile boundary; low bits hold the side.
pub const PORTAL_FLAG: u16 = 0x8000;

const CAN_REMOVE: i32 = i32::MIN;
const INDEX_MASK: i32 = 0x0fff_ffff;

#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertices in cells relative to `bmin`.
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex indices followed by `nvp` neighbour slots per polygon.
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub areas: Vec<u8>,
    /// Vertices flagged as lying on the tile border.
    pub border_verts: Vec<bool>,
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    pub fn poly_count(&self) -> usize {
        self.regs.len()
    }

    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2]
    }

    /// Vertex indices of polygon `i`, without unused slots.
    pub fn poly_verts(&self, i: usize) -> impl Iterator<Item = u16> + '_ {
        self.poly(i)[..self.nvp]
            .iter()
            .copied()
            .take_while(|&v| v != MESH_NULL_IDX)
    }

    /// World position of vertex `v`.
    pub fn world_vertex(&self, v: u16) -> Vec3 {
        let p = self.verts[v as usize];
        self.bmin + Vec3::new(p[0] as f32 * self.cs, p[1] as f32 * self.ch, p[2] as f32 * self.cs)
    }
}

pub fn build_poly_mesh(cset: &ContourSet, nvp: usize) -> Result<PolyMesh, BakeError> {
    let max_vertices: usize = cset.contours.iter().map(|c| c.verts.len()).sum();
    if max_vertices >= 0xfffe {
        return Err(BakeError::TooManyVertices(max_vertices));
    }

    let mut mesh = PolyMesh {
        verts: Vec::new(),
        polys: Vec::new(),
        regs: Vec::new(),
        areas: Vec::new(),
        border_verts: Vec::new(),
        nvp,
        bmin: cset.bmin,
        bmax: cset.bmax,
        cs: cset.cs,
        ch: cset.ch,
        border_size: cset.border_size,
        max_edge_error: cset.max_error,
    };
    let mut welded: HashMap<(u16, u16), Vec<u16>> = HashMap::new();

    for (ci, cont) in cset.contours.iter().enumerate() {
        if cont.verts.len() < 3 {
            continue;
        }

        let (tris, ok) = triangulate(&cont.verts);
        if !ok {
            tracing::warn!(contour = ci, region = cont.reg, "bad triangulation, keeping partial result");
        }

        let indices: Vec<u16> = cont
            .verts
            .iter()
            .map(|v| add_vertex(&mut mesh, &mut welded, v))
            .collect();

        let mut polys: Vec<Vec<u16>> = tris
            .iter()
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| t.iter().map(|&k| indices[k]).collect())
            .collect();
        if polys.is_empty() {
            continue;
        }

        if nvp > 3 {
            merge_convex(&mesh.verts, &mut polys, nvp);
        }

        for p in polys {
            let mut slot = vec![MESH_NULL_IDX; nvp * 2];
            slot[..p.len()].copy_from_slice(&p);
            mesh.polys.extend_from_slice(&slot);
            mesh.regs.push(cont.reg);
            mesh.areas.push(cont.area);
        }
    }

    if mesh.verts.len() > 0xffff {
        return Err(BakeError::TooManyVertices(mesh.verts.len()));
    }
    if mesh.poly_count() > 0xffff {
        return Err(BakeError::TooManyPolygons(mesh.poly_count()));
    }

    build_adjacency(&mut mesh);
    if mesh.border_size > 0 {
        mark_portals(&mut mesh, cset.width, cset.height);
    }
    tracing::trace!(verts = mesh.verts.len(), polys = mesh.poly_count(), "poly mesh built");
    Ok(mesh)
}

fn add_vertex(mesh: &mut PolyMesh, welded: &mut HashMap<(u16, u16), Vec<u16>>, v: &Point) -> u16 {
    let x = v[0].clamp(0, 0xffff) as u16;
    let y = v[1].clamp(0, 0xffff) as u16;
    let z = v[2].clamp(0, 0xffff) as u16;
    let bucket = welded.entry((x, z)).or_default();
    // Same column, nearly the same height: one vertex.
    if let Some(&existing) = bucket
        .iter()
        .find(|&&i| (mesh.verts[i as usize][1] as i32 - y as i32).abs() <= 2)
    {
        if v[3] & BORDER_VERTEX != 0 {
            mesh.border_verts[existing as usize] = true;
        }
        return existing;
    }
    let index = mesh.verts.len() as u16;
    mesh.verts.push([x, y, z]);
    mesh.border_verts.push(v[3] & BORDER_VERTEX != 0);
    bucket.push(index);
    index
}

fn in_cone(i: usize, j: usize, verts: &[Point], indices: &[i32], loose: bool) -> bool {
    let n = indices.len();
    let at = |k: usize| &verts[(indices[k] & INDEX_MASK) as usize];
    let pi = at(i);
    let pj = at(j);
    let pi1 = at(geom::next(i, n));
    let pin1 = at(geom::prev(i, n));
    if geom::left_on(pin1, pi, pi1) {
        if loose {
            return geom::left_on(pi, pj, pin1) && geom::left_on(pj, pi, pi1);
        }
        return geom::left(pi, pj, pin1) && geom::left(pj, pi, pi1);
    }
    !(geom::left_on(pi, pj, pi1) && geom::left_on(pj, pi, pin1))
}

fn diagonalie(i: usize, j: usize, verts: &[Point], indices: &[i32], loose: bool) -> bool {
    let n = indices.len();
    let at = |k: usize| &verts[(indices[k] & INDEX_MASK) as usize];
    let d0 = at(i);
    let d1 = at(j);
    for k in 0..n {
        let k1 = geom::next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = at(k);
        let p1 = at(k1);
        if geom::vequal(d0, p0) || geom::vequal(d1, p0) || geom::vequal(d0, p1) || geom::vequal(d1, p1) {
            continue;
        }
        let hit = if loose {
            geom::intersect_prop(d0, d1, p0, p1)
        } else {
            geom::intersect(d0, d1, p0, p1)
        };
        if hit {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, verts: &[Point], indices: &[i32], loose: bool) -> bool {
    in_cone(i, j, verts, indices, loose) && diagonalie(i, j, verts, indices, loose)
}

/// Ear-clip a simple polygon. Returns vertex-index triangles and whether the
/// whole polygon was consumed.
fn triangulate(verts: &[Point]) -> (Vec<[usize; 3]>, bool) {
    let mut indices: Vec<i32> = (0..verts.len() as i32).collect();
    let mut tris = Vec::with_capacity(verts.len().saturating_sub(2));

    let n = indices.len();
    for i in 0..n {
        let i2 = geom::next(geom::next(i, n), n);
        if diagonal(i, i2, verts, &indices, false) {
            let i1 = geom::next(i, n);
            indices[i1] |= CAN_REMOVE;
        }
    }

    let edge_len = |indices: &[i32], i: usize| {
        let n = indices.len();
        let p0 = &verts[(indices[i] & INDEX_MASK) as usize];
        let p2 = &verts[(indices[geom::next(geom::next(i, n), n)] & INDEX_MASK) as usize];
        let dx = p2[0] - p0[0];
        let dz = p2[2] - p0[2];
        dx * dx + dz * dz
    };

    while indices.len() > 3 {
        let n = indices.len();
        let mut best: Option<(usize, i32)> = None;
        for i in 0..n {
            let i1 = geom::next(i, n);
            if indices[i1] & CAN_REMOVE != 0 {
                let len = edge_len(&indices, i);
                if best.is_none_or(|(_, b)| len < b) {
                    best = Some((i, len));
                }
            }
        }

        if best.is_none() {
            // Overlapping segments: retry with the relaxed cone test.
            for i in 0..n {
                let i2 = geom::next(geom::next(i, n), n);
                if diagonal(i, i2, verts, &indices, true) {
                    let len = edge_len(&indices, i);
                    if best.is_none_or(|(_, b)| len < b) {
                        best = Some((i, len));
                    }
                }
            }
        }

        let Some((mut i, _)) = best else {
            return (tris, false);
        };
        let mut i1 = geom::next(i, n);
        let i2 = geom::next(i1, n);
        tris.push([
            (indices[i] & INDEX_MASK) as usize,
            (indices[i1] & INDEX_MASK) as usize,
            (indices[i2] & INDEX_MASK) as usize,
        ]);

        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        i = geom::prev(i1, n);

        if diagonal(geom::prev(i, n), i1, verts, &indices, false) {
            indices[i] |= CAN_REMOVE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, geom::next(i1, n), verts, &indices, false) {
            indices[i1] |= CAN_REMOVE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push([
        (indices[0] & INDEX_MASK) as usize,
        (indices[1] & INDEX_MASK) as usize,
        (indices[2] & INDEX_MASK) as usize,
    ]);
    (tris, true)
}

fn uleft(a: &[u16; 3], b: &[u16; 3], c: &[u16; 3]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    let (bx, bz) = (b[0] as i32, b[2] as i32);
    let (cx, cz) = (c[0] as i32, c[2] as i32);
    (bx - ax) * (cz - az) - (cx - ax) * (bz - az) < 0
}

/// Length² of the shared edge if `pa` and `pb` can merge into a convex
/// polygon of at most `nvp` vertices.
fn merge_value(pa: &[u16], pb: &[u16], verts: &[[u16; 3]], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let ordered = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let mut shared = None;
    'outer: for i in 0..na {
        let ea = ordered(pa[i], pa[(i + 1) % na]);
        for j in 0..nb {
            if ea == ordered(pb[j], pb[(j + 1) % nb]) {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| &verts[i as usize];
    if !uleft(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[(ea + 1) % na]);
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Repeatedly merge the pair of polygons sharing the longest edge while the
/// result stays convex and within `nvp` vertices.
fn merge_convex(verts: &[[u16; 3]], polys: &mut Vec<Vec<u16>>, nvp: usize) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.is_none_or(|b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }
        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };

        let a = &polys[pa];
        let b = &polys[pb];
        let (na, nb) = (a.len(), b.len());
        let mut merged = Vec::with_capacity(na + nb - 2);
        for i in 0..na - 1 {
            merged.push(a[(ea + 1 + i) % na]);
        }
        for i in 0..nb - 1 {
            merged.push(b[(eb + 1 + i) % nb]);
        }
        polys[pa] = merged;
        polys.swap_remove(pb);
    }
}

fn build_adjacency(mesh: &mut PolyMesh) {
    struct Edge {
        vert: [u16; 2],
        poly: [usize; 2],
        poly_edge: [usize; 2],
    }

    let nvp = mesh.nvp;
    let npolys = mesh.poly_count();
    let edge_of = |p: &[u16], j: usize| -> Option<(u16, u16)> {
        if p[j] == MESH_NULL_IDX {
            return None;
        }
        let v1 = if j + 1 >= nvp || p[j + 1] == MESH_NULL_IDX { p[0] } else { p[j + 1] };
        Some((p[j], v1))
    };

    let mut first: HashMap<u16, Vec<usize>> = HashMap::new();
    let mut edges: Vec<Edge> = Vec::new();
    for i in 0..npolys {
        let p = mesh.poly(i);
        for j in 0..nvp {
            let Some((v0, v1)) = edge_of(p, j) else { break };
            if v0 < v1 {
                first.entry(v0).or_default().push(edges.len());
                edges.push(Edge {
                    vert: [v0, v1],
                    poly: [i, i],
                    poly_edge: [j, 0],
                });
            }
        }
    }

    for i in 0..npolys {
        for j in 0..nvp {
            let Some((v0, v1)) = edge_of(mesh.poly(i), j) else { break };
            if v0 > v1 {
                if let Some(candidates) = first.get(&v1) {
                    if let Some(&e) = candidates
                        .iter()
                        .find(|&&e| edges[e].vert[1] == v0 && edges[e].poly[0] == edges[e].poly[1])
                    {
                        edges[e].poly[1] = i;
                        edges[e].poly_edge[1] = j;
                    }
                }
            }
        }
    }

    for e in &edges {
        if e.poly[0] != e.poly[1] {
            mesh.polys[e.poly[0] * nvp * 2 + nvp + e.poly_edge[0]] = e.poly[1] as u16;
            mesh.polys[e.poly[1] * nvp * 2 + nvp + e.poly_edge[1]] = e.poly[0] as u16;
        }
    }
}

/// Tag open edges lying on the tile boundary with the side they face:
/// 0 = -x, 1 = +z, 2 = +x, 3 = -z.
fn mark_portals(mesh: &mut PolyMesh, w: i32, h: i32) {
    let nvp = mesh.nvp;
    for i in 0..mesh.poly_count() {
        let base = i * nvp * 2;
        for j in 0..nvp {
            let vj = mesh.polys[base + j];
            if vj == MESH_NULL_IDX {
                break;
            }
            if mesh.polys[base + nvp + j] != MESH_NULL_IDX {
                continue;
            }
            let mut nj = j + 1;
            if nj >= nvp || mesh.polys[base + nj] == MESH_NULL_IDX {
                nj = 0;
            }
            let va = mesh.verts[vj as usize];
            let vb = mesh.verts[mesh.polys[base + nj] as usize];
            let (ax, az) = (va[0] as i32, va[2] as i32);
            let (bx, bz) = (vb[0] as i32, vb[2] as i32);
            let side = if ax == 0 && bx == 0 {
                Some(0)
            } else if az == h && bz == h {
                Some(1)
            } else if ax == w && bx == w {
                Some(2)
            } else if az == 0 && bz == 0 {
                Some(3)
            } else {
                None
            };
            if let Some(side) = side {
                mesh.polys[base + nvp + j] = PORTAL_FLAG | side;
            }
        }
    }
}
