//! Serialized navigation tile: polygons, detail triangles and a bounding
//! volume tree. Tiles are the unit the bake produces and the store links.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bake::detail::DetailMesh;
use crate::bake::heightfield::WALKABLE_AREA;
use crate::bake::polymesh::{MESH_NULL_IDX, PORTAL_FLAG, PolyMesh};
use crate::bake::BakeError;
use crate::config::BakeConfig;
use crate::NavMeshError;

pub const TILE_MAGIC: u32 = u32::from_le_bytes(*b"NAVT");
pub const TILE_VERSION: u32 = 1;
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Neighbour flag: the edge leads into the tile on side `nei & 0xff`.
pub const EXT_LINK: u16 = PORTAL_FLAG;

pub const POLY_FLAG_WALK: u16 = 0x01;
pub const POLY_FLAG_DISABLED: u16 = 0x10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileHeader {
    pub magic: u32,
    pub version: u32,
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub poly_count: u32,
    pub vert_count: u32,
    pub detail_vert_count: u32,
    pub detail_tri_count: u32,
    pub bv_node_count: u32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bv_quant_factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poly {
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// 0 = wall, `1..` = internal polygon index + 1, `EXT_LINK | side` = portal.
    pub neis: [u16; MAX_VERTS_PER_POLY],
    pub flags: u16,
    pub vert_count: u8,
    pub area: u8,
}

impl Poly {
    pub fn is_portal_edge(&self, edge: usize) -> Option<u8> {
        let n = self.neis[edge];
        (n & EXT_LINK != 0).then_some((n & 0xff) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyDetail {
    pub vert_base: u32,
    pub tri_base: u32,
    pub vert_count: u8,
    pub tri_count: u8,
}

/// Quantized BV tree node. Leaves have `i >= 0` (the polygon index); internal
/// nodes store the negated escape offset to the next sibling subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavTileData {
    pub header: TileHeader,
    pub verts: Vec<[f32; 3]>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<[f32; 3]>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BvNode>,
}

impl NavTileData {
    pub fn build(
        tile_x: i32,
        tile_y: i32,
        pmesh: &PolyMesh,
        dmesh: &DetailMesh,
        cfg: &BakeConfig,
    ) -> Result<Self, BakeError> {
        let nvp = pmesh.nvp;
        if nvp > MAX_VERTS_PER_POLY {
            return Err(BakeError::InvalidConfig(format!(
                "{nvp} vertices per polygon exceeds {MAX_VERTS_PER_POLY}"
            )));
        }

        let verts: Vec<[f32; 3]> = (0..pmesh.verts.len())
            .map(|v| pmesh.world_vertex(v as u16).to_array())
            .collect();

        let mut polys = Vec::with_capacity(pmesh.poly_count());
        for i in 0..pmesh.poly_count() {
            let p = pmesh.poly(i);
            let mut poly = Poly {
                verts: [0; MAX_VERTS_PER_POLY],
                neis: [0; MAX_VERTS_PER_POLY],
                flags: if pmesh.areas[i] == WALKABLE_AREA { POLY_FLAG_WALK } else { 0 },
                vert_count: 0,
                area: pmesh.areas[i],
            };
            for j in 0..nvp {
                if p[j] == MESH_NULL_IDX {
                    break;
                }
                poly.verts[j] = p[j];
                let n = p[nvp + j];
                poly.neis[j] = if n == MESH_NULL_IDX {
                    0
                } else if n & PORTAL_FLAG != 0 {
                    EXT_LINK | (n & 0xf)
                } else {
                    n + 1
                };
                poly.vert_count += 1;
            }
            polys.push(poly);
        }

        let detail_meshes: Vec<PolyDetail> = dmesh
            .meshes
            .iter()
            .map(|m| PolyDetail {
                vert_base: m.vert_base,
                tri_base: m.tri_base,
                vert_count: m.vert_count as u8,
                tri_count: m.tri_count as u8,
            })
            .collect();

        let quant = 1.0 / pmesh.cs;
        let bv_tree = build_bv_tree(pmesh, quant);

        let header = TileHeader {
            magic: TILE_MAGIC,
            version: TILE_VERSION,
            x: tile_x,
            y: tile_y,
            layer: 0,
            poly_count: polys.len() as u32,
            vert_count: verts.len() as u32,
            detail_vert_count: dmesh.verts.len() as u32,
            detail_tri_count: dmesh.tris.len() as u32,
            bv_node_count: bv_tree.len() as u32,
            bmin: pmesh.bmin.to_array(),
            bmax: pmesh.bmax.to_array(),
            walkable_height: cfg.agent_height,
            walkable_radius: cfg.agent_radius,
            walkable_climb: cfg.agent_max_climb,
            bv_quant_factor: quant,
        };

        Ok(Self {
            header,
            verts,
            polys,
            detail_meshes,
            detail_verts: dmesh.verts.iter().map(|v| v.to_array()).collect(),
            detail_tris: dmesh.tris.clone(),
            bv_tree,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, BakeError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| BakeError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NavMeshError> {
        let tile: NavTileData =
            ciborium::from_reader(bytes).map_err(|e| NavMeshError::Decode(e.to_string()))?;
        if tile.header.magic != TILE_MAGIC {
            return Err(NavMeshError::BadMagic(tile.header.magic));
        }
        if tile.header.version != TILE_VERSION {
            return Err(NavMeshError::BadVersion(tile.header.version));
        }
        tile.check_counts()?;
        Ok(tile)
    }

    fn check_counts(&self) -> Result<(), NavMeshError> {
        let h = &self.header;
        let consistent = h.poly_count as usize == self.polys.len()
            && h.vert_count as usize == self.verts.len()
            && h.detail_vert_count as usize == self.detail_verts.len()
            && h.detail_tri_count as usize == self.detail_tris.len()
            && h.bv_node_count as usize == self.bv_tree.len()
            && self.detail_meshes.len() == self.polys.len();
        if !consistent {
            return Err(NavMeshError::Decode("tile counts do not match header".into()));
        }
        let nverts = self.verts.len();
        let npolys = self.polys.len();
        for (i, p) in self.polys.iter().enumerate() {
            let nv = p.vert_count as usize;
            if !(3..=MAX_VERTS_PER_POLY).contains(&nv) {
                return Err(NavMeshError::Decode(format!("polygon {i} has {nv} vertices")));
            }
            if p.verts[..nv].iter().any(|&v| v as usize >= nverts) {
                return Err(NavMeshError::Decode("polygon references missing vertex".into()));
            }
            let bad_nei = p.neis[..nv]
                .iter()
                .any(|&n| n != 0 && n & EXT_LINK == 0 && n as usize > npolys);
            if bad_nei {
                return Err(NavMeshError::Decode(format!("polygon {i} links to a missing polygon")));
            }
        }

        for (i, (p, d)) in self.polys.iter().zip(&self.detail_meshes).enumerate() {
            let nv = p.vert_count as usize;
            let vert_end = d.vert_base as usize + d.vert_count as usize;
            let tri_end = d.tri_base as usize + d.tri_count as usize;
            if vert_end > self.detail_verts.len() || tri_end > self.detail_tris.len() {
                return Err(NavMeshError::Decode(format!("detail mesh {i} out of range")));
            }
            let tris = &self.detail_tris[d.tri_base as usize..tri_end];
            if tris.iter().any(|t| t[..3].iter().any(|&k| k as usize >= nv + d.vert_count as usize)) {
                return Err(NavMeshError::Decode(format!("detail mesh {i} references missing vertex")));
            }
        }

        for node in &self.bv_tree {
            let valid = if node.i >= 0 { (node.i as usize) < npolys } else { node.i != i32::MIN };
            if !valid {
                return Err(NavMeshError::Decode(format!("bv node index {} out of range", node.i)));
            }
        }
        Ok(())
    }

    pub fn bmin(&self) -> Vec3 {
        Vec3::from_array(self.header.bmin)
    }

    pub fn bmax(&self) -> Vec3 {
        Vec3::from_array(self.header.bmax)
    }

    pub fn vertex(&self, i: u16) -> Vec3 {
        Vec3::from_array(self.verts[i as usize])
    }

    /// World-space vertices of polygon `poly`.
    pub fn poly_vertices(&self, poly: usize) -> Vec<Vec3> {
        let p = &self.polys[poly];
        p.verts[..p.vert_count as usize]
            .iter()
            .map(|&v| self.vertex(v))
            .collect()
    }

    /// Detail triangles of polygon `poly` as world-space vertex triples.
    pub fn detail_triangles(&self, poly: usize) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        let p = &self.polys[poly];
        let d = &self.detail_meshes[poly];
        let nv = p.vert_count as usize;
        let tris = &self.detail_tris[d.tri_base as usize..(d.tri_base as usize + d.tri_count as usize)];
        tris.iter().map(move |t| {
            let v = |k: u8| {
                let k = k as usize;
                if k < nv {
                    self.vertex(p.verts[k])
                } else {
                    Vec3::from_array(self.detail_verts[d.vert_base as usize + k - nv])
                }
            };
            [v(t[0]), v(t[1]), v(t[2])]
        })
    }

    /// Indices of polygons whose bounds overlap `[qmin, qmax]`.
    pub fn query_polygons(&self, qmin: Vec3, qmax: Vec3) -> Vec<usize> {
        let tbmin = self.bmin();
        let tbmax = self.bmax();
        if self.bv_tree.is_empty() {
            return (0..self.polys.len())
                .filter(|&i| {
                    let vs = self.poly_vertices(i);
                    let lo = vs.iter().fold(Vec3::MAX, |a, &b| a.min(b));
                    let hi = vs.iter().fold(Vec3::MIN, |a, &b| a.max(b));
                    lo.cmple(qmax).all() && qmin.cmple(hi).all()
                })
                .collect();
        }

        let qfac = self.header.bv_quant_factor;
        let lo = (qmin.clamp(tbmin, tbmax) - tbmin) * qfac;
        let hi = (qmax.clamp(tbmin, tbmax) - tbmin) * qfac;
        let bmin = [
            (lo.x as u16) & 0xfffe,
            (lo.y as u16) & 0xfffe,
            (lo.z as u16) & 0xfffe,
        ];
        let bmax = [
            ((hi.x + 1.0) as u16) | 1,
            ((hi.y + 1.0) as u16) | 1,
            ((hi.z + 1.0) as u16) | 1,
        ];

        let mut out = Vec::new();
        let mut n = 0;
        while n < self.bv_tree.len() {
            let node = &self.bv_tree[n];
            let overlap = (0..3).all(|a| bmin[a] <= node.bmax[a] && bmax[a] >= node.bmin[a]);
            let is_leaf = node.i >= 0;
            if is_leaf && overlap {
                out.push(node.i as usize);
            }
            if overlap || is_leaf {
                n += 1;
            } else {
                n += (-node.i) as usize;
            }
        }
        out
    }
}

struct BvItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

fn build_bv_tree(pmesh: &PolyMesh, quant: f32) -> Vec<BvNode> {
    let ch_cs = pmesh.ch * quant;
    let mut items: Vec<BvItem> = (0..pmesh.poly_count())
        .map(|i| {
            let mut bmin = [u16::MAX; 3];
            let mut bmax = [0u16; 3];
            for v in pmesh.poly_verts(i) {
                let p = pmesh.verts[v as usize];
                let y_lo = (p[1] as f32 * ch_cs).floor() as u16;
                let y_hi = (p[1] as f32 * ch_cs).ceil() as u16;
                bmin = [bmin[0].min(p[0]), bmin[1].min(y_lo), bmin[2].min(p[2])];
                bmax = [bmax[0].max(p[0]), bmax[1].max(y_hi), bmax[2].max(p[2])];
            }
            BvItem { bmin, bmax, i: i as i32 }
        })
        .collect();

    let mut nodes = Vec::with_capacity(items.len() * 2);
    if !items.is_empty() {
        let n = items.len();
        subdivide(&mut items, 0, n, &mut nodes);
    }
    nodes
}

fn subdivide(items: &mut [BvItem], imin: usize, imax: usize, nodes: &mut Vec<BvNode>) {
    let inum = imax - imin;
    let icur = nodes.len();
    if inum == 1 {
        let it = &items[imin];
        nodes.push(BvNode {
            bmin: it.bmin,
            bmax: it.bmax,
            i: it.i,
        });
        return;
    }

    let mut bmin = [u16::MAX; 3];
    let mut bmax = [0u16; 3];
    for it in &items[imin..imax] {
        for a in 0..3 {
            bmin[a] = bmin[a].min(it.bmin[a]);
            bmax[a] = bmax[a].max(it.bmax[a]);
        }
    }
    nodes.push(BvNode { bmin, bmax, i: 0 });

    let extent = |a: usize| bmax[a] as i32 - bmin[a] as i32;
    let axis = if extent(0) >= extent(1) && extent(0) >= extent(2) {
        0
    } else if extent(1) >= extent(2) {
        1
    } else {
        2
    };
    items[imin..imax].sort_by_key(|it| it.bmin[axis]);

    let isplit = imin + inum / 2;
    subdivide(items, imin, isplit, nodes);
    subdivide(items, isplit, imax, nodes);

    let escape = (nodes.len() - icur) as i32;
    nodes[icur].i = -escape;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::contour::{Contour, ContourSet};
    use crate::bake::detail::{DetailMesh, DetailSubMesh};
    use crate::bake::polymesh::build_poly_mesh;

    fn grid_tile() -> NavTileData {
        // Four separate square contours in a 2x2 layout.
        let sq = |x: i32, z: i32| vec![[x, 0, z, 0], [x, 0, z + 4, 0], [x + 4, 0, z + 4, 0], [x + 4, 0, z, 0]];
        let cset = ContourSet {
            contours: [sq(0, 0), sq(4, 0), sq(0, 4), sq(4, 4)]
                .into_iter()
                .enumerate()
                .map(|(i, verts)| Contour {
                    raw_verts: verts.clone(),
                    verts,
                    reg: i as u16 + 1,
                    area: WALKABLE_AREA,
                })
                .collect(),
            bmin: Vec3::ZERO,
            bmax: Vec3::new(8.0, 1.0, 8.0),
            cs: 1.0,
            ch: 0.5,
            width: 8,
            height: 8,
            border_size: 1,
            max_error: 1.3,
        };
        let pmesh = build_poly_mesh(&cset, 6).unwrap();
        let dmesh = DetailMesh {
            meshes: (0..pmesh.poly_count())
                .map(|i| DetailSubMesh {
                    vert_base: 0,
                    vert_count: 0,
                    tri_base: i as u32 * 2,
                    tri_count: 2,
                })
                .collect(),
            verts: Vec::new(),
            tris: (0..pmesh.poly_count()).flat_map(|_| [[0, 1, 2, 0], [0, 2, 3, 0]]).collect(),
        };
        NavTileData::build(3, -2, &pmesh, &dmesh, &BakeConfig::default()).unwrap()
    }

    #[test]
    fn build_encodes_neighbours() {
        let tile = grid_tile();
        assert_eq!(tile.polys.len(), 4);
        let p0 = &tile.polys[0];
        assert_eq!(p0.vert_count, 4);
        // Two internal neighbours and two portals for every corner square.
        let internal = p0.neis.iter().filter(|&&n| n != 0 && n & EXT_LINK == 0).count();
        let portals = p0.neis.iter().filter(|&&n| n & EXT_LINK != 0).count();
        assert_eq!((internal, portals), (2, 2));
    }

    #[test]
    fn encode_decode_preserves_tile() {
        let tile = grid_tile();
        let bytes = tile.encode().unwrap();
        let back = NavTileData::decode(&bytes).unwrap();
        assert_eq!(back, tile);
        assert_eq!(back.header.x, 3);
        assert_eq!(back.header.y, -2);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(NavTileData::decode(b"not a tile").is_err());
        let mut tile = grid_tile();
        tile.header.magic = 7;
        let bytes = tile.encode().unwrap();
        assert!(matches!(NavTileData::decode(&bytes), Err(NavMeshError::BadMagic(7))));
    }

    #[test]
    fn bv_query_matches_bounds() {
        let tile = grid_tile();
        assert_eq!(tile.bv_tree.len(), 7);
        let mut hits = tile.query_polygons(Vec3::new(0.5, -1.0, 0.5), Vec3::new(1.0, 1.0, 1.0));
        hits.sort_unstable();
        assert_eq!(hits.len(), 1);
        let all = tile.query_polygons(Vec3::splat(-10.0), Vec3::splat(10.0));
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn detail_triangles_resolve_poly_vertices() {
        let tile = grid_tile();
        let tris: Vec<_> = tile.detail_triangles(0).collect();
        assert_eq!(tris.len(), 2);
        let verts = tile.poly_vertices(0);
        assert_eq!(tris[0][0], verts[0]);
    }

    fn decode_error(tile: &NavTileData) -> bool {
        matches!(NavTileData::decode(&tile.encode().unwrap()), Err(NavMeshError::Decode(_)))
    }

    #[test]
    fn decode_rejects_bad_vertex_counts() {
        let mut tile = grid_tile();
        tile.polys[0].vert_count = MAX_VERTS_PER_POLY as u8 + 1;
        assert!(decode_error(&tile));

        let mut tile = grid_tile();
        tile.polys[1].vert_count = 2;
        assert!(decode_error(&tile));
    }

    #[test]
    fn decode_rejects_dangling_neighbour() {
        let mut tile = grid_tile();
        tile.polys[0].neis[0] = 9;
        assert!(decode_error(&tile));
    }

    #[test]
    fn decode_rejects_detail_out_of_range() {
        let mut tile = grid_tile();
        tile.detail_meshes[3].tri_base = 7;
        assert!(decode_error(&tile));

        let mut tile = grid_tile();
        tile.detail_meshes[0].vert_count = 1;
        assert!(decode_error(&tile));

        // Index 4 names a detail vertex the polygon does not have.
        let mut tile = grid_tile();
        tile.detail_tris[0] = [0, 1, 4, 0];
        assert!(decode_error(&tile));
    }

    #[test]
    fn decode_rejects_bad_bv_nodes() {
        let mut tile = grid_tile();
        let leaf = tile.bv_tree.iter().position(|n| n.i >= 0).unwrap();
        tile.bv_tree[leaf].i = 4;
        assert!(decode_error(&tile));

        let mut tile = grid_tile();
        tile.bv_tree[0].i = i32::MIN;
        assert!(decode_error(&tile));
    }
}
