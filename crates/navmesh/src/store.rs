//! Tiled navigation mesh: tile slots, polygon references, portal links
//! between neighbouring tiles and the binary set file format.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};
use strata_common::{Aabb, TriMesh};
use strata_spatial::ChunkyTriMesh;

use crate::bake::{BakeError, bake_tile};
use crate::config::BakeConfig;
use crate::tile::{EXT_LINK, NavTileData, Poly};
use crate::NavMeshError;

pub const NAVMESH_SET_MAGIC: u32 = u32::from_be_bytes(*b"MSET");
pub const NAVMESH_SET_VERSION: u32 = 1;

/// Upper bound on tile slots; a set header asking for more is rejected
/// before anything is allocated.
pub const MAX_TILES: u32 = 1 << 14;
pub const MAX_POLYS_PER_TILE: u32 = 1 << 22;
/// Largest serialized tile accepted from a set file.
pub const MAX_TILE_DATA_SIZE: usize = 32 << 20;

/// Reference to one polygon: `(tile slot + 1) << poly_bits | poly index`.
/// Zero is never a valid reference.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PolyRef(pub u32);

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "poly#{:x}", self.0)
    }
}

/// Reference to a tile slot; encoded like a [`PolyRef`] with polygon 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavMeshParams {
    /// World position of the tile grid origin.
    pub orig: Vec3,
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: u32,
    pub max_polys: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawParams {
    orig: [f32; 3],
    tile_width: f32,
    tile_height: f32,
    max_tiles: u32,
    max_polys: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SetHeader {
    magic: u32,
    version: u32,
    params: RawParams,
    /// Signed on disk; negative counts are rejected on load.
    num_tiles: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TileRecord {
    tile_ref: u32,
    /// Signed on disk; negative sizes are rejected on load.
    data_size: i32,
}

/// Connection from one polygon edge to a neighbour polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub target: PolyRef,
    pub edge: u8,
    /// Tile side for portal links, `0xff` for links inside the tile.
    pub side: u8,
    /// Endpoints of the shared part of the edge.
    pub portal: [Vec3; 2],
}

impl Link {
    pub const INTERNAL: u8 = 0xff;
}

#[derive(Debug, Clone)]
pub struct MeshTile {
    pub data: NavTileData,
    bytes: Vec<u8>,
    links: Vec<Vec<Link>>,
}

impl MeshTile {
    /// Raw bytes the tile was added from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn links(&self, poly: usize) -> &[Link] {
        &self.links[poly]
    }

    pub fn coords(&self) -> (i32, i32) {
        (self.data.header.x, self.data.header.y)
    }
}

/// One piece of static geometry fed to [`NavMesh::bake_all`].
#[derive(Debug, Clone, Copy)]
pub struct GeometryInstance<'a> {
    pub mesh: &'a TriMesh,
    pub transform: Affine3A,
}

#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    poly_bits: u32,
    tiles: Vec<Option<MeshTile>>,
    lookup: BTreeMap<(i32, i32), usize>,
}

/// Grid offset of the neighbouring tile across `side`.
fn side_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (-1, 0),
        1 => (0, 1),
        2 => (1, 0),
        _ => (0, -1),
    }
}

fn opposite_side(side: u8) -> u8 {
    (side + 2) & 3
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self, NavMeshError> {
        if params.max_tiles == 0 || params.max_polys == 0 {
            return Err(NavMeshError::InvalidParams("tile and polygon limits must be positive".into()));
        }
        if params.max_tiles > MAX_TILES || params.max_polys > MAX_POLYS_PER_TILE {
            return Err(NavMeshError::InvalidParams(format!(
                "limits {} tiles / {} polys exceed {MAX_TILES} / {MAX_POLYS_PER_TILE}",
                params.max_tiles, params.max_polys
            )));
        }
        if !(params.tile_width > 0.0 && params.tile_height > 0.0) {
            return Err(NavMeshError::InvalidParams("tile size must be positive".into()));
        }
        let tile_bits = params.max_tiles.next_power_of_two().ilog2();
        let poly_bits = params.max_polys.next_power_of_two().ilog2().max(1);
        if tile_bits + poly_bits > 31 {
            return Err(NavMeshError::InvalidParams(format!(
                "{tile_bits} tile bits + {poly_bits} poly bits exceed the reference width"
            )));
        }
        Ok(Self {
            params,
            poly_bits,
            tiles: vec![None; params.max_tiles as usize],
            lookup: BTreeMap::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn poly_count(&self) -> usize {
        self.tiles().map(|(_, t)| t.data.polys.len()).sum()
    }

    /// Occupied tiles in slot order.
    pub fn tiles(&self) -> impl Iterator<Item = (TileRef, &MeshTile)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| t.as_ref().map(|t| (self.tile_ref(slot), t)))
    }

    pub fn tile_at(&self, x: i32, y: i32) -> Option<&MeshTile> {
        self.lookup.get(&(x, y)).and_then(|&s| self.tiles[s].as_ref())
    }

    pub fn tile_ref_at(&self, x: i32, y: i32) -> Option<TileRef> {
        self.lookup.get(&(x, y)).map(|&s| self.tile_ref(s))
    }

    pub(crate) fn slot_at(&self, x: i32, y: i32) -> Option<usize> {
        self.lookup.get(&(x, y)).copied()
    }

    pub(crate) fn tile_in_slot(&self, slot: usize) -> Option<&MeshTile> {
        self.tiles.get(slot)?.as_ref()
    }

    /// Grid coordinates of the tile containing `pos`.
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let x = ((pos.x - self.params.orig.x) / self.params.tile_width).floor() as i32;
        let y = ((pos.z - self.params.orig.z) / self.params.tile_height).floor() as i32;
        (x, y)
    }

    fn tile_ref(&self, slot: usize) -> TileRef {
        TileRef(((slot as u32) + 1) << self.poly_bits)
    }

    fn slot_of(&self, tile: TileRef) -> Option<usize> {
        let high = tile.0 >> self.poly_bits;
        (high > 0 && (high as usize) <= self.tiles.len()).then(|| high as usize - 1)
    }

    pub fn poly_ref(&self, slot: usize, poly: usize) -> PolyRef {
        PolyRef((((slot as u32) + 1) << self.poly_bits) | poly as u32)
    }

    /// Split a reference into tile slot and polygon index, if it names a
    /// polygon that exists.
    pub fn decode_ref(&self, r: PolyRef) -> Option<(usize, usize)> {
        let slot = self.slot_of(TileRef(r.0))?;
        let poly = (r.0 & ((1 << self.poly_bits) - 1)) as usize;
        let tile = self.tiles[slot].as_ref()?;
        (poly < tile.data.polys.len()).then_some((slot, poly))
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.decode_ref(r).is_some()
    }

    pub fn tile_and_poly(&self, r: PolyRef) -> Option<(&MeshTile, &Poly)> {
        let (slot, poly) = self.decode_ref(r)?;
        let tile = self.tiles[slot].as_ref()?;
        Some((tile, &tile.data.polys[poly]))
    }

    pub fn links(&self, r: PolyRef) -> &[Link] {
        match self.decode_ref(r) {
            Some((slot, poly)) => self.tiles[slot].as_ref().map_or(&[], |t| t.links(poly)),
            None => &[],
        }
    }

    pub fn set_poly_flags(&mut self, r: PolyRef, flags: u16) -> Result<(), NavMeshError> {
        let (slot, poly) = self.decode_ref(r).ok_or(NavMeshError::InvalidRef(r))?;
        if let Some(tile) = self.tiles[slot].as_mut() {
            tile.data.polys[poly].flags = flags;
        }
        Ok(())
    }

    pub fn add_tile(&mut self, bytes: Vec<u8>) -> Result<TileRef, NavMeshError> {
        self.add_tile_with_ref(bytes, None)
    }

    /// Add a serialized tile, reusing `preferred`'s slot when it is free so
    /// references survive a save/load cycle.
    pub fn add_tile_with_ref(
        &mut self,
        bytes: Vec<u8>,
        preferred: Option<TileRef>,
    ) -> Result<TileRef, NavMeshError> {
        let data = NavTileData::decode(&bytes)?;
        let key = (data.header.x, data.header.y);
        if self.lookup.contains_key(&key) {
            return Err(NavMeshError::TileExists { x: key.0, y: key.1 });
        }
        if data.polys.len() > 1 << self.poly_bits {
            return Err(NavMeshError::InvalidParams(format!(
                "tile has {} polygons, limit is {}",
                data.polys.len(),
                1u32 << self.poly_bits
            )));
        }

        let slot = preferred
            .and_then(|r| self.slot_of(r))
            .filter(|&s| self.tiles[s].is_none())
            .or_else(|| self.tiles.iter().position(Option::is_none))
            .ok_or(NavMeshError::OutOfTiles)?;

        let poly_count = data.polys.len();
        self.tiles[slot] = Some(MeshTile {
            data,
            bytes,
            links: vec![Vec::new(); poly_count],
        });
        self.lookup.insert(key, slot);

        self.connect_internal_links(slot);
        for side in 0..4u8 {
            let (dx, dy) = side_offset(side);
            if let Some(&neighbour) = self.lookup.get(&(key.0 + dx, key.1 + dy)) {
                self.connect_external_links(slot, neighbour, side);
                self.connect_external_links(neighbour, slot, opposite_side(side));
            }
        }

        tracing::debug!(x = key.0, y = key.1, slot, polys = poly_count, "tile added");
        Ok(self.tile_ref(slot))
    }

    /// Add a serialized tile, first removing any tile at the same coordinate.
    pub fn replace_tile(&mut self, bytes: Vec<u8>) -> Result<TileRef, NavMeshError> {
        let data = NavTileData::decode(&bytes)?;
        let previous = self.tile_ref_at(data.header.x, data.header.y);
        if let Some(old) = previous {
            self.remove_tile(old)?;
        }
        self.add_tile_with_ref(bytes, previous)
    }

    /// Remove a tile and every link into it. Returns the tile's bytes.
    pub fn remove_tile(&mut self, tile: TileRef) -> Result<Vec<u8>, NavMeshError> {
        let slot = self.slot_of(tile).ok_or(NavMeshError::InvalidTile(tile.0))?;
        let removed = self.tiles[slot].take().ok_or(NavMeshError::InvalidTile(tile.0))?;
        let (x, y) = removed.coords();
        self.lookup.remove(&(x, y));

        let removed_high = slot as u32 + 1;
        let poly_bits = self.poly_bits;
        for side in 0..4u8 {
            let (dx, dy) = side_offset(side);
            let Some(&neighbour) = self.lookup.get(&(x + dx, y + dy)) else {
                continue;
            };
            if let Some(t) = self.tiles[neighbour].as_mut() {
                for links in &mut t.links {
                    links.retain(|l| l.target.0 >> poly_bits != removed_high);
                }
            }
        }
        tracing::debug!(x, y, slot, "tile removed");
        Ok(removed.bytes)
    }

    fn connect_internal_links(&mut self, slot: usize) {
        let Some(tile) = self.tiles[slot].as_ref() else {
            return;
        };
        let mut new_links: Vec<Vec<Link>> = vec![Vec::new(); tile.data.polys.len()];
        for (i, poly) in tile.data.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                let n = poly.neis[j];
                if n == 0 || n & EXT_LINK != 0 {
                    continue;
                }
                new_links[i].push(Link {
                    target: self.poly_ref(slot, (n - 1) as usize),
                    edge: j as u8,
                    side: Link::INTERNAL,
                    portal: [tile.data.vertex(poly.verts[j]), tile.data.vertex(poly.verts[(j + 1) % nv])],
                });
            }
        }
        if let Some(tile) = self.tiles[slot].as_mut() {
            for (links, new) in tile.links.iter_mut().zip(new_links) {
                links.extend(new);
            }
        }
    }

    /// Link portal edges of tile `a` on `side` to matching portal edges of `b`.
    fn connect_external_links(&mut self, a: usize, b: usize, side: u8) {
        let (Some(ta), Some(tb)) = (self.tiles[a].as_ref(), self.tiles[b].as_ref()) else {
            return;
        };
        let climb = ta.data.header.walkable_climb.max(tb.data.header.walkable_climb);
        let opposite = opposite_side(side);

        let mut new_links: Vec<(usize, Link)> = Vec::new();
        for (i, pa) in ta.data.polys.iter().enumerate() {
            let na = pa.vert_count as usize;
            for j in 0..na {
                if pa.is_portal_edge(j) != Some(side) {
                    continue;
                }
                let va = ta.data.vertex(pa.verts[j]);
                let vb = ta.data.vertex(pa.verts[(j + 1) % na]);
                for (k, pb) in tb.data.polys.iter().enumerate() {
                    let nb = pb.vert_count as usize;
                    for e in 0..nb {
                        if pb.is_portal_edge(e) != Some(opposite) {
                            continue;
                        }
                        let vc = tb.data.vertex(pb.verts[e]);
                        let vd = tb.data.vertex(pb.verts[(e + 1) % nb]);
                        if let Some(portal) = portal_overlap(side, [va, vb], [vc, vd], climb) {
                            new_links.push((
                                i,
                                Link {
                                    target: self.poly_ref(b, k),
                                    edge: j as u8,
                                    side,
                                    portal,
                                },
                            ));
                        }
                    }
                }
            }
        }

        if let Some(ta) = self.tiles[a].as_mut() {
            for (i, link) in new_links {
                ta.links[i].push(link);
            }
        }
    }

    /// Bake every tile of the combined geometry into a new mesh.
    pub fn bake_all(instances: &[GeometryInstance<'_>], cfg: &BakeConfig) -> Result<NavMesh, NavMeshError> {
        let _span = tracing::info_span!("bake_all", instances = instances.len()).entered();
        cfg.validate()?;

        let mut combined = TriMesh::default();
        for inst in instances {
            combined.append(&inst.mesh.transformed(&inst.transform));
        }
        let index = ChunkyTriMesh::from_mesh(&combined, cfg.max_tris_per_chunk).map_err(BakeError::from)?;
        let bounds = combined.aabb();

        let cs = cfg.cell_size;
        let grid_w = (((bounds.max.x - bounds.min.x) / cs).ceil() as i32).max(1);
        let grid_h = (((bounds.max.z - bounds.min.z) / cs).ceil() as i32).max(1);
        let ts = cfg.tile_edge_size;
        let tiles_w = (grid_w + ts - 1) / ts;
        let tiles_h = (grid_h + ts - 1) / ts;
        let tile_size = cfg.tile_world_size();

        let tile_bits = ((tiles_w * tiles_h) as u32).next_power_of_two().ilog2().min(14);
        let poly_bits = 22 - tile_bits;
        let params = NavMeshParams {
            orig: bounds.min,
            tile_width: tile_size,
            tile_height: tile_size,
            max_tiles: 1 << tile_bits,
            max_polys: 1 << poly_bits,
        };
        let mut mesh = NavMesh::new(params)?;

        for y in 0..tiles_h {
            for x in 0..tiles_w {
                let tile_bounds = Aabb::new(
                    Vec3::new(
                        bounds.min.x + x as f32 * tile_size,
                        bounds.min.y,
                        bounds.min.z + y as f32 * tile_size,
                    ),
                    Vec3::new(
                        bounds.min.x + (x + 1) as f32 * tile_size,
                        bounds.max.y,
                        bounds.min.z + (y + 1) as f32 * tile_size,
                    ),
                );
                if let Some(bytes) = bake_tile(x, y, &tile_bounds, cfg, &index, &combined.vertices)? {
                    mesh.add_tile(bytes)?;
                }
            }
        }

        tracing::info!(
            tiles = mesh.tile_count(),
            polys = mesh.poly_count(),
            grid = %format!("{tiles_w}x{tiles_h}"),
            "navmesh baked"
        );
        Ok(mesh)
    }

    pub fn save(&self, path: &Path) -> Result<(), NavMeshError> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        tracing::info!(path = %path.display(), tiles = self.tile_count(), "navmesh saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, NavMeshError> {
        let mut r = BufReader::new(File::open(path)?);
        let mesh = Self::read_from(&mut r)?;
        tracing::info!(path = %path.display(), tiles = mesh.tile_count(), "navmesh loaded");
        Ok(mesh)
    }

    /// Write the set header followed by one `(tile ref, size, bytes)` record
    /// per tile, in slot order. Fields are native-endian.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), NavMeshError> {
        let p = &self.params;
        let header = SetHeader {
            magic: NAVMESH_SET_MAGIC,
            version: NAVMESH_SET_VERSION,
            params: RawParams {
                orig: p.orig.to_array(),
                tile_width: p.tile_width,
                tile_height: p.tile_height,
                max_tiles: p.max_tiles,
                max_polys: p.max_polys,
            },
            num_tiles: i32::try_from(self.tile_count())
                .map_err(|_| NavMeshError::InvalidParams("too many tiles to save".into()))?,
        };
        w.write_all(bytemuck::bytes_of(&header))?;
        for (tile_ref, tile) in self.tiles() {
            let record = TileRecord {
                tile_ref: tile_ref.0,
                data_size: i32::try_from(tile.bytes.len())
                    .map_err(|_| NavMeshError::Decode("tile too large to save".into()))?,
            };
            w.write_all(bytemuck::bytes_of(&record))?;
            w.write_all(&tile.bytes)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, NavMeshError> {
        let mut buf = [0u8; std::mem::size_of::<SetHeader>()];
        r.read_exact(&mut buf)?;
        let header: SetHeader = bytemuck::pod_read_unaligned(&buf);
        if header.magic != NAVMESH_SET_MAGIC {
            return Err(NavMeshError::BadMagic(header.magic));
        }
        if header.version != NAVMESH_SET_VERSION {
            return Err(NavMeshError::BadVersion(header.version));
        }

        let raw = header.params;
        let mut mesh = NavMesh::new(NavMeshParams {
            orig: Vec3::from_array(raw.orig),
            tile_width: raw.tile_width,
            tile_height: raw.tile_height,
            max_tiles: raw.max_tiles,
            max_polys: raw.max_polys,
        })?;

        let num_tiles = u32::try_from(header.num_tiles)
            .map_err(|_| NavMeshError::Decode(format!("negative tile count {}", header.num_tiles)))?;
        if num_tiles > mesh.params.max_tiles {
            return Err(NavMeshError::Decode(format!(
                "{num_tiles} tiles exceed the limit of {}",
                mesh.params.max_tiles
            )));
        }

        for _ in 0..num_tiles {
            let mut rec = [0u8; std::mem::size_of::<TileRecord>()];
            r.read_exact(&mut rec)?;
            let record: TileRecord = bytemuck::pod_read_unaligned(&rec);
            let size = usize::try_from(record.data_size)
                .map_err(|_| NavMeshError::Decode(format!("negative tile size {}", record.data_size)))?;
            if record.tile_ref == 0 || size == 0 {
                break;
            }
            if size > MAX_TILE_DATA_SIZE {
                return Err(NavMeshError::Decode(format!("tile of {size} bytes exceeds {MAX_TILE_DATA_SIZE}")));
            }
            let mut data = Vec::new();
            r.by_ref().take(size as u64).read_to_end(&mut data)?;
            if data.len() != size {
                return Err(NavMeshError::Decode("truncated tile record".into()));
            }
            mesh.add_tile_with_ref(data, Some(TileRef(record.tile_ref)))?;
        }
        Ok(mesh)
    }
}

/// Shared part of two collinear portal edges facing each other across a tile
/// side, or `None` when they do not overlap or differ in height by more than
/// `climb`.
fn portal_overlap(side: u8, a: [Vec3; 2], b: [Vec3; 2], climb: f32) -> Option<[Vec3; 2]> {
    const EPS: f32 = 0.01;
    // Edges on x-facing sides run along z, and vice versa.
    let (along, across) = if side == 0 || side == 2 { (2, 0) } else { (0, 2) };
    if (a[0][across] - b[0][across]).abs() > EPS {
        return None;
    }

    let (amin, amax) = min_max(a[0][along], a[1][along]);
    let (bmin, bmax) = min_max(b[0][along], b[1][along]);
    let lo = amin.max(bmin);
    let hi = amax.min(bmax);
    if hi - lo < EPS {
        return None;
    }

    let at = |e: [Vec3; 2], u: f32| {
        let d = e[1][along] - e[0][along];
        let t = if d.abs() > f32::EPSILON { (u - e[0][along]) / d } else { 0.0 };
        e[0].lerp(e[1], t.clamp(0.0, 1.0))
    };
    let mid = (lo + hi) * 0.5;
    if (at(a, mid).y - at(b, mid).y).abs() > climb {
        return None;
    }
    Some([at(a, lo), at(a, hi)])
}

fn min_max(a: f32, b: f32) -> (f32, f32) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_overlap_clips_to_shared_span() {
        let a = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 4.0)];
        let b = [Vec3::new(0.0, 0.1, 6.0), Vec3::new(0.0, 0.1, 2.0)];
        let p = portal_overlap(0, a, b, 0.5).unwrap();
        assert!((p[0].z - 2.0).abs() < 1e-5);
        assert!((p[1].z - 4.0).abs() < 1e-5);
        assert!(portal_overlap(0, a, b, 0.05).is_none());
        let far = [Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 8.0)];
        assert!(portal_overlap(0, a, far, 0.5).is_none());
    }

    #[test]
    fn params_reject_too_many_bits() {
        let params = NavMeshParams {
            orig: Vec3::ZERO,
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 1 << 12,
            max_polys: 1 << 20,
        };
        assert!(matches!(NavMesh::new(params), Err(NavMeshError::InvalidParams(_))));
    }

    fn set_bytes(max_tiles: u32, num_tiles: i32, records: &[(u32, i32)]) -> Vec<u8> {
        let header = SetHeader {
            magic: NAVMESH_SET_MAGIC,
            version: NAVMESH_SET_VERSION,
            params: RawParams {
                orig: [0.0; 3],
                tile_width: 8.0,
                tile_height: 8.0,
                max_tiles,
                max_polys: 1 << 10,
            },
            num_tiles,
        };
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        for &(tile_ref, data_size) in records {
            bytes.extend_from_slice(bytemuck::bytes_of(&TileRecord { tile_ref, data_size }));
        }
        bytes
    }

    fn read(bytes: &[u8]) -> Result<NavMesh, NavMeshError> {
        NavMesh::read_from(&mut &bytes[..])
    }

    #[test]
    fn oversized_limits_are_rejected_before_allocating() {
        let err = read(&set_bytes(1 << 30, 0, &[])).unwrap_err();
        assert!(matches!(err, NavMeshError::InvalidParams(_)));
        let err = read(&set_bytes(4, 100, &[])).unwrap_err();
        assert!(matches!(err, NavMeshError::Decode(_)));
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(matches!(read(&set_bytes(4, -1, &[])), Err(NavMeshError::Decode(_))));
        let bytes = set_bytes(4, 1, &[(1 << 10, -5)]);
        assert!(matches!(read(&bytes), Err(NavMeshError::Decode(_))));
    }

    #[test]
    fn tile_record_size_is_bounded() {
        let bytes = set_bytes(4, 1, &[(1 << 10, i32::MAX)]);
        assert!(matches!(read(&bytes), Err(NavMeshError::Decode(_))));
        // Claims 100 bytes but the file ends after the record.
        let bytes = set_bytes(4, 1, &[(1 << 10, 100)]);
        assert!(matches!(read(&bytes), Err(NavMeshError::Decode(_))));
    }

    #[test]
    fn empty_set_loads() {
        let mesh = read(&set_bytes(4, 0, &[])).unwrap();
        assert_eq!(mesh.tile_count(), 0);
    }

    #[test]
    fn header_layout_is_fixed() {
        assert_eq!(std::mem::size_of::<SetHeader>(), 40);
        assert_eq!(std::mem::size_of::<TileRecord>(), 8);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; 40];
        bytes[..4].copy_from_slice(&0xdead_beefu32.to_ne_bytes());
        let err = NavMesh::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, NavMeshError::BadMagic(0xdead_beef)));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = vec![0u8; 40];
        bytes[..4].copy_from_slice(&NAVMESH_SET_MAGIC.to_ne_bytes());
        bytes[4..8].copy_from_slice(&99u32.to_ne_bytes());
        let err = NavMesh::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, NavMeshError::BadVersion(99)));
    }
}
