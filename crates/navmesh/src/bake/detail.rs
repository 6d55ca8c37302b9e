//! Per-polygon height detail.
//!
//! Each polygon gets a triangle fan around its centroid. Edges are sampled
//! every `sample_dist`; samples whose heightfield height deviates from the
//! straight edge by more than `sample_max_error` become extra vertices.

use glam::Vec3;

use super::compact::CompactHeightfield;
use super::polymesh::PolyMesh;

/// Upper bound on vertices per polygon detail so indices fit in a byte.
const MAX_DETAIL_VERTS: usize = 250;
const MAX_EDGE_SAMPLES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailSubMesh {
    pub vert_base: u32,
    pub vert_count: u32,
    pub tri_base: u32,
    pub tri_count: u32,
}

/// Detail triangles index polygon vertices first (`0..nv`), then the
/// sub-mesh's own vertices (`nv..`).
#[derive(Debug, Clone, Default)]
pub struct DetailMesh {
    pub meshes: Vec<DetailSubMesh>,
    pub verts: Vec<Vec3>,
    pub tris: Vec<[u8; 4]>,
}

pub fn build_detail_mesh(
    pmesh: &PolyMesh,
    chf: &CompactHeightfield,
    sample_dist: f32,
    sample_max_error: f32,
) -> DetailMesh {
    let mut dmesh = DetailMesh::default();

    for i in 0..pmesh.poly_count() {
        let poly: Vec<Vec3> = pmesh.poly_verts(i).map(|v| pmesh.world_vertex(v)).collect();
        let nv = poly.len();
        let vert_base = dmesh.verts.len() as u32;
        let tri_base = dmesh.tris.len() as u32;

        // Boundary as (detail index, position).
        let mut boundary: Vec<u8> = Vec::with_capacity(nv * 2);
        let mut extra: Vec<Vec3> = Vec::new();
        for a in 0..nv {
            boundary.push(a as u8);
            if sample_dist <= 0.0 {
                continue;
            }
            let pa = poly[a];
            let pb = poly[(a + 1) % nv];
            let len = Vec3::new(pb.x - pa.x, 0.0, pb.z - pa.z).length();
            let nn = ((len / sample_dist).floor() as usize).clamp(1, MAX_EDGE_SAMPLES);
            for k in 1..nn {
                if nv + extra.len() + 1 >= MAX_DETAIL_VERTS {
                    break;
                }
                let p = pa.lerp(pb, k as f32 / nn as f32);
                let h = sample_height(chf, p);
                if (h - p.y).abs() > sample_max_error {
                    boundary.push((nv + extra.len()) as u8);
                    extra.push(Vec3::new(p.x, h, p.z));
                }
            }
        }

        let mut centroid = poly.iter().copied().sum::<Vec3>() / nv as f32;
        if sample_dist > 0.0 {
            centroid.y = sample_height(chf, centroid);
        }
        let center_index = (nv + extra.len()) as u8;
        extra.push(centroid);

        let nb = boundary.len();
        for k in 0..nb {
            dmesh
                .tris
                .push([boundary[k], boundary[(k + 1) % nb], center_index, 0]);
        }

        dmesh.verts.extend_from_slice(&extra);
        dmesh.meshes.push(DetailSubMesh {
            vert_base,
            vert_count: extra.len() as u32,
            tri_base,
            tri_count: nb as u32,
        });
    }

    tracing::trace!(verts = dmesh.verts.len(), tris = dmesh.tris.len(), "detail mesh built");
    dmesh
}

/// Floor height under `p` closest to `p.y`, searching nearby columns when the
/// column directly below is empty.
fn sample_height(chf: &CompactHeightfield, p: Vec3) -> f32 {
    let ix = ((p.x - chf.bmin.x) / chf.cs).floor() as i32;
    let iz = ((p.z - chf.bmin.z) / chf.cs).floor() as i32;
    for radius in 0..=2 {
        let mut best: Option<f32> = None;
        for z in iz - radius..=iz + radius {
            for x in ix - radius..=ix + radius {
                if x < 0 || z < 0 || x >= chf.width || z >= chf.height {
                    continue;
                }
                let on_ring = (x - ix).abs() == radius || (z - iz).abs() == radius;
                if !on_ring {
                    continue;
                }
                let cell = chf.cell(x, z);
                for i in cell.index..cell.index + cell.count {
                    let y = chf.bmin.y + chf.spans[i as usize].y as f32 * chf.ch;
                    if best.is_none_or(|b| (y - p.y).abs() < (b - p.y).abs()) {
                        best = Some(y);
                    }
                }
            }
        }
        if let Some(y) = best {
            return y;
        }
    }
    p.y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::contour::build_contours;
    use crate::bake::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::bake::polymesh::build_poly_mesh;
    use crate::bake::region::build_regions_monotone;

    fn flat_pipeline() -> (PolyMesh, CompactHeightfield) {
        let n = 24;
        let mut hf = Heightfield::new(n, n, Vec3::ZERO, Vec3::new(n as f32, 20.0, n as f32), 1.0, 0.5);
        for z in 0..n {
            for x in 0..n {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(&hf, 4, 1);
        build_regions_monotone(&mut chf, 0, 4, 20);
        let cset = build_contours(&chf, 1.3, 12);
        (build_poly_mesh(&cset, 6).unwrap(), chf)
    }

    #[test]
    fn every_polygon_has_a_fan() {
        let (pmesh, chf) = flat_pipeline();
        let dmesh = build_detail_mesh(&pmesh, &chf, 6.0, 0.5);
        assert_eq!(dmesh.meshes.len(), pmesh.poly_count());
        for (i, m) in dmesh.meshes.iter().enumerate() {
            let nv = pmesh.poly_verts(i).count() as u32;
            assert!(m.tri_count >= nv);
            for t in &dmesh.tris[m.tri_base as usize..(m.tri_base + m.tri_count) as usize] {
                for &k in &t[..3] {
                    assert!((k as u32) < nv + m.vert_count);
                }
            }
        }
    }

    #[test]
    fn flat_floor_keeps_no_edge_samples() {
        let (pmesh, chf) = flat_pipeline();
        let dmesh = build_detail_mesh(&pmesh, &chf, 2.0, 0.5);
        // Only the centroid is added on a flat floor.
        assert!(dmesh.meshes.iter().all(|m| m.vert_count == 1));
        assert!(dmesh.verts.iter().all(|v| (v.y - 1.0).abs() < 1e-4));
    }
}
