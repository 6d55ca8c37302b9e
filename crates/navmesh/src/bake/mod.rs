//! Tile bake pipeline: rasterize → filter → compact → erode → regions →
//! contours → polygon mesh → detail mesh → serialized tile.

pub mod compact;
pub mod contour;
pub mod detail;
mod geom;
pub mod heightfield;
pub mod polymesh;
pub mod region;

use glam::{Vec2, Vec3};
use strata_common::Aabb;
use strata_spatial::{ChunkyTriMesh, SpatialError};

use crate::config::{BakeConfig, VoxelConfig};
use crate::tile::NavTileData;
use compact::CompactHeightfield;
use heightfield::{Heightfield, mark_walkable_triangles};

#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("invalid bake config: {0}")]
    InvalidConfig(String),
    #[error("bad input geometry: {0}")]
    Geometry(#[from] SpatialError),
    #[error("too many vertices: {0}")]
    TooManyVertices(usize),
    #[error("too many polygons: {0}")]
    TooManyPolygons(usize),
    #[error("tile encode failed: {0}")]
    Encode(String),
}

/// Bake one tile from the triangles the index reports under `tile_bounds`.
///
/// Returns `Ok(None)` when the tile has no geometry or no walkable surface.
/// Equal inputs give byte-identical output.
pub fn bake_tile(
    tile_x: i32,
    tile_y: i32,
    tile_bounds: &Aabb,
    cfg: &BakeConfig,
    index: &ChunkyTriMesh,
    vertices: &[Vec3],
) -> Result<Option<Vec<u8>>, BakeError> {
    let _span = tracing::debug_span!("bake_tile", x = tile_x, y = tile_y).entered();
    cfg.validate()?;
    let vcfg = VoxelConfig::for_tile(cfg, tile_bounds);

    let mut hf = Heightfield::new(vcfg.width, vcfg.height, vcfg.bmin, vcfg.bmax, vcfg.cs, vcfg.ch);

    let chunks = index.query_overlapping(
        Vec2::new(vcfg.bmin.x, vcfg.bmin.z),
        Vec2::new(vcfg.bmax.x, vcfg.bmax.z),
    );
    if chunks.is_empty() {
        tracing::trace!("no geometry under tile");
        return Ok(None);
    }

    let mut tri_count = 0;
    for chunk in chunks {
        let tris = index.leaf_triangles(chunk);
        let areas = mark_walkable_triangles(vcfg.walkable_slope_angle, vertices, tris);
        hf.rasterize_triangles(vertices, tris, &areas, vcfg.walkable_climb);
        tri_count += tris.len();
    }

    hf.filter_low_hanging_obstacles(vcfg.walkable_climb);
    hf.filter_ledge_spans(vcfg.walkable_height, vcfg.walkable_climb);
    hf.filter_walkable_low_height_spans(vcfg.walkable_height);

    let mut chf = CompactHeightfield::build(&hf, vcfg.walkable_height, vcfg.walkable_climb);
    drop(hf);
    chf.erode_walkable_area(vcfg.walkable_radius);
    region::build_regions_monotone(
        &mut chf,
        vcfg.border_size,
        vcfg.min_region_area,
        vcfg.merge_region_area,
    );

    let cset = contour::build_contours(&chf, vcfg.max_simplification_error, vcfg.max_edge_len);
    if cset.contours.is_empty() {
        tracing::trace!(triangles = tri_count, "no walkable contours");
        return Ok(None);
    }

    let pmesh = polymesh::build_poly_mesh(&cset, vcfg.max_verts_per_poly)?;
    if pmesh.poly_count() == 0 {
        return Ok(None);
    }
    let dmesh = detail::build_detail_mesh(
        &pmesh,
        &chf,
        vcfg.detail_sample_dist,
        vcfg.detail_sample_max_error,
    );

    let tile = NavTileData::build(tile_x, tile_y, &pmesh, &dmesh, cfg)?;
    let bytes = tile.encode()?;
    tracing::debug!(
        triangles = tri_count,
        polys = pmesh.poly_count(),
        bytes = bytes.len(),
        "tile baked"
    );
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::TriMesh;

    fn bake_plane(size: f32, cfg: &BakeConfig) -> Option<Vec<u8>> {
        let mesh = TriMesh::quad(0.0, 0.0, size, size, 0.0);
        let index = ChunkyTriMesh::from_mesh(&mesh, cfg.max_tris_per_chunk).unwrap();
        let t = cfg.tile_world_size();
        let bounds = Aabb::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(t, 1.0, t));
        bake_tile(0, 0, &bounds, cfg, &index, &mesh.vertices).unwrap()
    }

    #[test]
    fn flat_plane_bakes_walkable_tile() {
        let cfg = BakeConfig::default();
        let bytes = bake_plane(30.0, &cfg).expect("tile");
        let tile = NavTileData::decode(&bytes).unwrap();
        assert!(!tile.polys.is_empty());
        for v in &tile.verts {
            assert!(v[1].abs() < 0.5, "vertex height {}", v[1]);
        }
    }

    #[test]
    fn bake_is_deterministic() {
        let cfg = BakeConfig::default();
        let a = bake_plane(30.0, &cfg).unwrap();
        let b = bake_plane(30.0, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tile_without_geometry_is_none() {
        let cfg = BakeConfig::default();
        let mesh = TriMesh::quad(100.0, 100.0, 110.0, 110.0, 0.0);
        let index = ChunkyTriMesh::from_mesh(&mesh, 256).unwrap();
        let bounds = Aabb::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(14.4, 1.0, 14.4));
        assert!(bake_tile(0, 0, &bounds, &cfg, &index, &mesh.vertices).unwrap().is_none());
    }

    #[test]
    fn tiny_island_is_none() {
        let cfg = BakeConfig::default();
        // Smaller than the agent after erosion.
        assert!(bake_plane(0.9, &cfg).is_none());
    }

    #[test]
    fn invalid_config_is_an_error() {
        let cfg = BakeConfig {
            cell_size: -1.0,
            ..BakeConfig::default()
        };
        let mesh = TriMesh::quad(0.0, 0.0, 1.0, 1.0, 0.0);
        let index = ChunkyTriMesh::from_mesh(&mesh, 256).unwrap();
        let bounds = mesh.aabb();
        assert!(matches!(
            bake_tile(0, 0, &bounds, &cfg, &index, &mesh.vertices),
            Err(BakeError::InvalidConfig(_))
        ));
    }
}
