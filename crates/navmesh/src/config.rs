use glam::Vec3;
use serde::{Deserialize, Serialize};
use strata_common::Aabb;

use crate::bake::BakeError;

/// Navmesh bake settings in world units.
///
/// The defaults are part of the tile layout: changing any of them changes the
/// bytes of every baked tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    /// Horizontal voxel size.
    pub cell_size: f32,
    /// Vertical voxel size.
    pub cell_height: f32,
    /// Tile edge length in cells.
    pub tile_edge_size: i32,
    pub agent_height: f32,
    pub agent_max_climb: f32,
    pub agent_radius: f32,
    /// Maximum walkable slope in degrees.
    pub walkable_slope_angle: f32,
    /// Maximum contour edge length in world units.
    pub max_edge_len: f32,
    /// Maximum distance a simplified contour may deviate from the raw one, in cells.
    pub max_simplification_error: f32,
    /// Regions smaller than `min_region_size²` cells are removed.
    pub min_region_size: i32,
    /// Regions smaller than `merge_region_size²` cells are merged into neighbours.
    pub merge_region_size: i32,
    pub max_verts_per_poly: usize,
    /// Detail sample spacing in cells.
    pub detail_sample_dist: f32,
    /// Detail height error tolerance in cell heights.
    pub detail_sample_max_error: f32,
    /// Leaf size of the triangle index built for a bake.
    pub max_tris_per_chunk: usize,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            tile_edge_size: 48,
            agent_height: 2.0,
            agent_max_climb: 0.9,
            agent_radius: 0.6,
            walkable_slope_angle: 55.0,
            max_edge_len: 12.0,
            max_simplification_error: 1.3,
            min_region_size: 8,
            merge_region_size: 20,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            max_tris_per_chunk: 256,
        }
    }
}

impl BakeConfig {
    pub fn validate(&self) -> Result<(), BakeError> {
        let invalid = |what: &str| Err(BakeError::InvalidConfig(what.to_string()));
        if !(self.cell_size > 0.0) {
            return invalid("cell_size must be positive");
        }
        if !(self.cell_height > 0.0) {
            return invalid("cell_height must be positive");
        }
        if self.tile_edge_size < 1 {
            return invalid("tile_edge_size must be at least 1");
        }
        if !(3..=crate::tile::MAX_VERTS_PER_POLY).contains(&self.max_verts_per_poly) {
            return invalid("max_verts_per_poly must be in 3..=6");
        }
        if self.max_tris_per_chunk == 0 {
            return invalid("max_tris_per_chunk must be at least 1");
        }
        Ok(())
    }

    /// World-space edge length of one tile.
    pub fn tile_world_size(&self) -> f32 {
        self.tile_edge_size as f32 * self.cell_size
    }
}

/// Bake settings converted to voxel units for one padded tile.
#[derive(Debug, Clone)]
pub struct VoxelConfig {
    pub cs: f32,
    pub ch: f32,
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub max_verts_per_poly: usize,
    pub tile_size: i32,
    pub border_size: i32,
    pub width: i32,
    pub height: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    /// Padded bounds (tile bounds grown by the border).
    pub bmin: Vec3,
    pub bmax: Vec3,
}

impl VoxelConfig {
    pub fn for_tile(cfg: &BakeConfig, tile_bounds: &Aabb) -> Self {
        let cs = cfg.cell_size;
        let ch = cfg.cell_height;
        let walkable_radius = (cfg.agent_radius / cs).ceil() as i32;
        let border_size = walkable_radius + 3;
        let tile_size = cfg.tile_edge_size;
        let pad = Vec3::new(border_size as f32 * cs, 0.0, border_size as f32 * cs);
        Self {
            cs,
            ch,
            walkable_slope_angle: cfg.walkable_slope_angle,
            walkable_height: (cfg.agent_height / ch).ceil() as i32,
            walkable_climb: (cfg.agent_max_climb / ch).floor() as i32,
            walkable_radius,
            max_edge_len: (cfg.max_edge_len / cs) as i32,
            max_simplification_error: cfg.max_simplification_error,
            min_region_area: cfg.min_region_size * cfg.min_region_size,
            merge_region_area: cfg.merge_region_size * cfg.merge_region_size,
            max_verts_per_poly: cfg.max_verts_per_poly,
            tile_size,
            border_size,
            width: tile_size + border_size * 2,
            height: tile_size + border_size * 2,
            detail_sample_dist: if cfg.detail_sample_dist < 0.9 {
                0.0
            } else {
                cs * cfg.detail_sample_dist
            },
            detail_sample_max_error: ch * cfg.detail_sample_max_error,
            bmin: tile_bounds.min - pad,
            bmax: tile_bounds.max + pad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_in_voxel_units() {
        let cfg = BakeConfig::default();
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(14.4, 2.0, 14.4));
        let v = VoxelConfig::for_tile(&cfg, &bounds);
        assert_eq!(v.walkable_height, 10);
        assert_eq!(v.walkable_climb, 4);
        assert_eq!(v.walkable_radius, 2);
        assert_eq!(v.border_size, 5);
        assert_eq!(v.width, 48 + 10);
        assert_eq!(v.max_edge_len, 40);
        assert_eq!(v.min_region_area, 64);
        assert_eq!(v.merge_region_area, 400);
        assert!((v.bmin.x + 1.5).abs() < 1e-5);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = BakeConfig::default();
        cfg.max_verts_per_poly = 9;
        assert!(cfg.validate().is_err());
        cfg.max_verts_per_poly = 6;
        cfg.cell_size = 0.0;
        assert!(cfg.validate().is_err());
        assert!(BakeConfig::default().validate().is_ok());
    }
}
