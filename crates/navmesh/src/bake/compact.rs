//! Open-space heightfield: the walkable tops of solid spans plus their
//! clearance and 4-neighbour connectivity.

use glam::Vec3;

use super::heightfield::{Heightfield, NULL_AREA};

pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
pub const DIR_OFFSET_Y: [i32; 4] = [0, 1, 0, -1];

/// Connection value meaning "no neighbour in this direction".
pub const NOT_CONNECTED: u32 = 0x3f;
const MAX_LAYERS: u32 = NOT_CONNECTED - 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    pub index: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSpan {
    /// Floor height in cells.
    pub y: u16,
    pub reg: u16,
    /// Packed neighbour layer indices, 6 bits per direction.
    pub con: u32,
    /// Clearance above the floor in cells.
    pub h: u8,
}

impl CompactSpan {
    pub fn con(&self, dir: usize) -> u32 {
        (self.con >> (dir * 6)) & 0x3f
    }

    pub fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }
}

pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub border_size: i32,
    pub max_regions: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    pub areas: Vec<u8>,
    /// Columns that exceeded the layer limit and lost connections.
    pub overflowing_layers: usize,
}

impl CompactHeightfield {
    pub fn build(hf: &Heightfield, walkable_height: i32, walkable_climb: i32) -> Self {
        let (w, h) = (hf.width, hf.height);
        let mut cells = vec![CompactCell::default(); (w * h) as usize];
        let mut spans = Vec::new();
        let mut areas = Vec::new();

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut cells[(x + z * w) as usize];
                cell.index = spans.len() as u32;
                for (si, s) in column.iter().enumerate() {
                    if s.area == NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = column.get(si + 1).map_or(0xffff, |n| n.smin as i32);
                    spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: 0,
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    areas.push(s.area);
                    cell.count += 1;
                }
            }
        }

        let mut chf = Self {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax: hf.bmax + Vec3::new(0.0, walkable_height as f32 * hf.ch, 0.0),
            cs: hf.cs,
            ch: hf.ch,
            cells,
            spans,
            areas,
            overflowing_layers: 0,
        };
        chf.connect();
        chf
    }

    fn connect(&mut self) {
        let (w, h) = (self.width, self.height);
        for z in 0..h {
            for x in 0..w {
                let cell = self.cells[(x + z * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    for dir in 0..4 {
                        self.spans[i].set_con(dir, NOT_CONNECTED);
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Y[dir];
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }
                        let s = self.spans[i];
                        let ncell = self.cells[(nx + nz * w) as usize];
                        for k in ncell.index..ncell.index + ncell.count {
                            let ns = self.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            if top - bot >= self.walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= self.walkable_climb
                            {
                                let layer = k - ncell.index;
                                if layer > MAX_LAYERS {
                                    self.overflowing_layers += 1;
                                    continue;
                                }
                                self.spans[i].set_con(dir, layer);
                                break;
                            }
                        }
                    }
                }
            }
        }
        if self.overflowing_layers > 0 {
            tracing::warn!(
                columns = self.overflowing_layers,
                "heightfield has too many layers, some connections dropped"
            );
        }
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index of the neighbour of span `i` at `(x, z)` in direction `dir`.
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<(i32, i32, usize)> {
        let c = self.spans[i].con(dir);
        if c == NOT_CONNECTED {
            return None;
        }
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Y[dir];
        let ni = self.cell(nx, nz).index as usize + c as usize;
        Some((nx, nz, ni))
    }

    /// Clear walkability within `radius` cells of any boundary, using a
    /// two-pass chamfer distance (2 straight, 3 diagonal).
    pub fn erode_walkable_area(&mut self, radius: i32) {
        let (w, h) = (self.width, self.height);
        let mut dist = vec![0xffu8; self.spans.len()];

        for z in 0..h {
            for x in 0..w {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if self.areas[i] == NULL_AREA {
                        dist[i] = 0;
                        continue;
                    }
                    let walkable_neighbours = (0..4)
                        .filter_map(|dir| self.neighbour(x, z, i, dir))
                        .filter(|&(_, _, ni)| self.areas[ni] != NULL_AREA)
                        .count();
                    if walkable_neighbours != 4 {
                        dist[i] = 0;
                    }
                }
            }
        }

        let relax = |dist: &mut [u8], i: usize, from: usize, cost: u8| {
            let nd = dist[from].saturating_add(cost);
            if nd < dist[i] {
                dist[i] = nd;
            }
        };

        for z in 0..h {
            for x in 0..w {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if let Some((ax, az, ai)) = self.neighbour(x, z, i, 0) {
                        relax(&mut dist, i, ai, 2);
                        if let Some((_, _, aai)) = self.neighbour(ax, az, ai, 3) {
                            relax(&mut dist, i, aai, 3);
                        }
                    }
                    if let Some((ax, az, ai)) = self.neighbour(x, z, i, 3) {
                        relax(&mut dist, i, ai, 2);
                        if let Some((_, _, aai)) = self.neighbour(ax, az, ai, 2) {
                            relax(&mut dist, i, aai, 3);
                        }
                    }
                }
            }
        }

        for z in (0..h).rev() {
            for x in (0..w).rev() {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if let Some((ax, az, ai)) = self.neighbour(x, z, i, 2) {
                        relax(&mut dist, i, ai, 2);
                        if let Some((_, _, aai)) = self.neighbour(ax, az, ai, 1) {
                            relax(&mut dist, i, aai, 3);
                        }
                    }
                    if let Some((ax, az, ai)) = self.neighbour(x, z, i, 1) {
                        relax(&mut dist, i, ai, 2);
                        if let Some((_, _, aai)) = self.neighbour(ax, az, ai, 0) {
                            relax(&mut dist, i, aai, 3);
                        }
                    }
                }
            }
        }

        let threshold = (radius * 2).clamp(0, 255) as u8;
        for (area, d) in self.areas.iter_mut().zip(&dist) {
            if *d < threshold {
                *area = NULL_AREA;
            }
        }
    }
}
