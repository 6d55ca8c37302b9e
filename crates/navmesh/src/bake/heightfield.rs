//! Solid heightfield: triangle rasterization into column spans plus the
//! walkability filters that run before compaction.

use glam::Vec3;

/// Largest representable span height in cells.
pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;
/// Open upper bound used by the filters when a span has no span above it.
const MAX_HEIGHT: i32 = 0xffff;

pub const NULL_AREA: u8 = 0;
pub const WALKABLE_AREA: u8 = 63;

/// Solid interval `[smin, smax)` of a column, in cell heights above `bmin.y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub smin: u16,
    pub smax: u16,
    pub area: u8,
}

pub struct Heightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); (width.max(0) * height.max(0)) as usize],
        }
    }

    /// Spans of column `(x, z)`, sorted bottom to top and non-overlapping.
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[(x + z * self.width) as usize]
    }

    fn column_mut(&mut self, x: i32, z: i32) -> &mut Vec<Span> {
        &mut self.columns[(x + z * self.width) as usize]
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Insert a span, merging it with every span it touches.
    ///
    /// When the merged tops are within `flag_merge_threshold` cells the area
    /// with the higher id wins, so walkable tops survive merges with solid.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) {
        let column = self.column_mut(x, z);
        let mut new = Span { smin, smax, area };
        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > new.smax {
                break;
            }
            if cur.smax < new.smin {
                i += 1;
                continue;
            }
            if cur.smin < new.smin {
                new.smin = cur.smin;
            }
            if cur.smax > new.smax {
                new.smax = cur.smax;
            }
            if (new.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                new.area = new.area.max(cur.area);
            }
            column.remove(i);
        }
        column.insert(i, new);
    }

    /// Rasterize a batch of triangles, one area id per triangle.
    pub fn rasterize_triangles(
        &mut self,
        vertices: &[Vec3],
        triangles: &[[u32; 3]],
        areas: &[u8],
        flag_merge_threshold: i32,
    ) {
        for (tri, &area) in triangles.iter().zip(areas) {
            let v0 = vertices[tri[0] as usize];
            let v1 = vertices[tri[1] as usize];
            let v2 = vertices[tri[2] as usize];
            self.rasterize_triangle(v0, v1, v2, area, flag_merge_threshold);
        }
    }

    fn rasterize_triangle(&mut self, v0: Vec3, v1: Vec3, v2: Vec3, area: u8, thr: i32) {
        let w = self.width;
        let h = self.height;
        let by = self.bmax.y - self.bmin.y;
        let ics = 1.0 / self.cs;
        let ich = 1.0 / self.ch;

        let tmin = v0.min(v1).min(v2);
        let tmax = v0.max(v1).max(v2);
        if tmin.cmpgt(self.bmax).any() || tmax.cmplt(self.bmin).any() {
            return;
        }

        let z0 = (((tmin.z - self.bmin.z) * ics) as i32).clamp(-1, h - 1);
        let z1 = (((tmax.z - self.bmin.z) * ics) as i32).clamp(0, h - 1);

        let mut rest = vec![v0, v1, v2];
        for z in z0..=z1 {
            let cz = self.bmin.z + z as f32 * self.cs;
            let (row, above) = divide_poly(&rest, cz + self.cs, 2);
            rest = above;
            if row.len() < 3 || z < 0 {
                continue;
            }

            let (min_x, max_x) = row
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
            let x0 = ((min_x - self.bmin.x) * ics) as i32;
            let x1 = ((max_x - self.bmin.x) * ics) as i32;
            if x1 < 0 || x0 >= w {
                continue;
            }
            let x0 = x0.clamp(-1, w - 1);
            let x1 = x1.clamp(0, w - 1);

            let mut row_rest = row;
            for x in x0..=x1 {
                let cx = self.bmin.x + x as f32 * self.cs;
                let (cell, right) = divide_poly(&row_rest, cx + self.cs, 0);
                row_rest = right;
                if cell.len() < 3 || x < 0 {
                    continue;
                }

                let (lo, hi) = cell
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
                let smin = lo - self.bmin.y;
                let smax = hi - self.bmin.y;
                if smax < 0.0 || smin > by {
                    continue;
                }
                let smin = smin.max(0.0);
                let smax = smax.min(by);

                let max = SPAN_MAX_HEIGHT as i32;
                let ismin = ((smin * ich).floor() as i32).clamp(0, max);
                let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, max);
                self.add_span(x, z, ismin as u16, ismax as u16, area, thr);
            }
        }
    }

    /// Let walkable surfaces extend over low obstacles such as curbs.
    pub fn filter_low_hanging_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_walkable = false;
            let mut previous_area = NULL_AREA;
            let mut previous_smax = 0i32;
            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if !walkable
                    && previous_walkable
                    && (span.smax as i32 - previous_smax).abs() <= walkable_climb
                {
                    span.area = previous_area;
                }
                // Only the original flag propagates, never a copied one.
                previous_walkable = walkable;
                previous_area = span.area;
                previous_smax = span.smax as i32;
            }
        }
    }

    /// Remove walkability from spans next to drops taller than the climb
    /// height, and from spans whose reachable neighbours vary too much.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let (w, h) = (self.width, self.height);
        let mut cleared = Vec::new();
        for z in 0..h {
            for x in 0..w {
                let column = self.column(x, z);
                for (si, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);

                    let mut min_h = MAX_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let dx = x + super::compact::DIR_OFFSET_X[dir];
                        let dz = z + super::compact::DIR_OFFSET_Y[dir];
                        if dx < 0 || dz < 0 || dx >= w || dz >= h {
                            min_h = min_h.min(-walkable_climb - bot);
                            continue;
                        }
                        let neighbour = self.column(dx, dz);

                        let nbot = -walkable_climb;
                        let ntop = neighbour.first().map_or(MAX_HEIGHT, |n| n.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_h = min_h.min(nbot - bot);
                        }

                        for (ni, ns) in neighbour.iter().enumerate() {
                            let nbot = ns.smax as i32;
                            let ntop = neighbour
                                .get(ni + 1)
                                .map_or(MAX_HEIGHT, |n| n.smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_h = min_h.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_h < -walkable_climb || accessible_max - accessible_min > walkable_climb
                    {
                        cleared.push((x, z, si));
                    }
                }
            }
        }
        for (x, z, si) in cleared {
            self.column_mut(x, z)[si].area = NULL_AREA;
        }
    }

    /// Remove walkability from spans without enough clearance above them.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for si in 0..column.len() {
                let bot = column[si].smax as i32;
                let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                if top - bot < walkable_height {
                    column[si].area = NULL_AREA;
                }
            }
        }
    }
}

/// Mark triangles whose slope is below `walkable_slope_angle` degrees.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    vertices: &[Vec3],
    triangles: &[[u32; 3]],
) -> Vec<u8> {
    let threshold = walkable_slope_angle.to_radians().cos();
    triangles
        .iter()
        .map(|t| {
            let v0 = vertices[t[0] as usize];
            let v1 = vertices[t[1] as usize];
            let v2 = vertices[t[2] as usize];
            let n = (v1 - v0).cross(v2 - v0).normalize_or_zero();
            if n.y > threshold { WALKABLE_AREA } else { NULL_AREA }
        })
        .collect()
}

/// Split a convex polygon along the plane `axis == x`. Returns the part with
/// coordinate below `x` and the remainder; vertices on the plane go to both.
fn divide_poly(input: &[Vec3], x: f32, axis: usize) -> (Vec<Vec3>, Vec<Vec3>) {
    let d: Vec<f32> = input.iter().map(|v| x - v[axis]).collect();
    let mut below = Vec::with_capacity(input.len() + 2);
    let mut above = Vec::with_capacity(input.len() + 2);
    let n = input.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let in_a = d[j] >= 0.0;
        let in_b = d[i] >= 0.0;
        if in_a != in_b {
            let s = d[j] / (d[j] - d[i]);
            let p = input[j] + (input[i] - input[j]) * s;
            below.push(p);
            above.push(p);
            if d[i] > 0.0 {
                below.push(input[i]);
            } else if d[i] < 0.0 {
                above.push(input[i]);
            }
        } else {
            if d[i] >= 0.0 {
                below.push(input[i]);
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(input[i]);
        }
        j = i;
    }
    (below, above)
}
