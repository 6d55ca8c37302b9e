use std::collections::HashMap;

use glam::Vec3;

use crate::crowd::AgentId;

/// A 2D cell coordinate on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// Uniform hash grid over agent positions, rebuilt every crowd update.
///
/// Queries return a superset of the agents within range; callers filter
/// by exact distance.
#[derive(Debug, Clone)]
pub struct ProximityGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, Vec<AgentId>>,
}

impl ProximityGrid {
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn position_to_cell(&self, pos: Vec3) -> CellCoord {
        CellCoord {
            x: (pos.x / self.cell_size).floor() as i32,
            z: (pos.z / self.cell_size).floor() as i32,
        }
    }

    /// Insert an agent with radius `radius` into every cell its disc touches.
    pub fn insert(&mut self, id: AgentId, pos: Vec3, radius: f32) {
        let lo = self.position_to_cell(pos - Vec3::splat(radius));
        let hi = self.position_to_cell(pos + Vec3::splat(radius));
        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                self.cells.entry(CellCoord::new(x, z)).or_default().push(id);
            }
        }
    }

    /// Agents registered in cells overlapping the square of half-size
    /// `range` around `pos`, sorted and deduplicated.
    pub fn query(&self, pos: Vec3, range: f32) -> Vec<AgentId> {
        let lo = self.position_to_cell(pos - Vec3::splat(range));
        let hi = self.position_to_cell(pos + Vec3::splat(range));
        let mut out = Vec::new();
        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                if let Some(ids) = self.cells.get(&CellCoord::new(x, z)) {
                    out.extend_from_slice(ids);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Total number of agent placements across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_to_cell_basic() {
        let grid = ProximityGrid::new(2.0);
        assert_eq!(grid.position_to_cell(Vec3::new(1.0, 5.0, 1.0)), CellCoord::new(0, 0));
        assert_eq!(grid.position_to_cell(Vec3::new(3.0, 0.0, -0.5)), CellCoord::new(1, -1));
    }

    #[test]
    fn disc_spans_cells() {
        let mut grid = ProximityGrid::new(2.0);
        grid.insert(AgentId(0), Vec3::new(2.0, 0.0, 2.0), 0.5);
        assert_eq!(grid.cell_count(), 4);
        assert_eq!(grid.total_placements(), 4);
    }

    #[test]
    fn query_dedups_and_sorts() {
        let mut grid = ProximityGrid::new(2.0);
        grid.insert(AgentId(3), Vec3::new(2.0, 0.0, 2.0), 0.5);
        grid.insert(AgentId(1), Vec3::new(1.0, 0.0, 1.0), 0.1);
        grid.insert(AgentId(7), Vec3::new(40.0, 0.0, 40.0), 0.1);
        assert_eq!(grid.query(Vec3::new(1.5, 0.0, 1.5), 1.0), vec![AgentId(1), AgentId(3)]);
        assert!(grid.query(Vec3::new(-30.0, 0.0, 0.0), 1.0).is_empty());
    }

    #[test]
    fn clear_empties_grid() {
        let mut grid = ProximityGrid::new(1.0);
        grid.insert(AgentId(0), Vec3::ZERO, 0.2);
        grid.clear();
        assert_eq!(grid.cell_count(), 0);
    }
}
