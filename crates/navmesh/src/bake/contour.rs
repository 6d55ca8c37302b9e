//! Region outlines: raw boundary walks simplified to a tolerance, with holes
//! spliced into their enclosing outline.

use glam::Vec3;

use super::compact::CompactHeightfield;
use super::geom::{self, Point};
use super::region::BORDER_REG;

/// Vertex flag: the vertex sits on the tile border.
pub const BORDER_VERTEX: i32 = 0x10000;
/// Vertex flag: the edge leaving this vertex separates two area types.
pub const AREA_BORDER: i32 = 0x20000;
/// Mask extracting the neighbour region id from a vertex flag word.
pub const CONTOUR_REG_MASK: i32 = 0xffff;

#[derive(Debug, Clone)]
pub struct Contour {
    /// Simplified vertices `[x, y, z, flags]` in cells, border removed.
    pub verts: Vec<Point>,
    /// Raw vertices before simplification.
    pub raw_verts: Vec<Point>,
    pub reg: u16,
    pub area: u8,
}

#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

pub fn build_contours(chf: &CompactHeightfield, max_error: f32, max_edge_len: i32) -> ContourSet {
    let (w, h) = (chf.width, chf.height);
    let border_size = chf.border_size;
    let pad = border_size as f32 * chf.cs;

    let mut cset = ContourSet {
        contours: Vec::new(),
        bmin: chf.bmin + Vec3::new(pad, 0.0, pad),
        bmax: chf.bmax - Vec3::new(pad, 0.0, pad),
        cs: chf.cs,
        ch: chf.ch,
        width: w - border_size * 2,
        height: h - border_size * 2,
        border_size,
        max_error,
    };

    // Bit `dir` set means the edge in that direction borders another region.
    let mut flags = vec![0u8; chf.span_count()];
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let s = chf.spans[i];
                if s.reg == 0 || s.reg & BORDER_REG != 0 {
                    flags[i] = 0;
                    continue;
                }
                let mut same = 0u8;
                for dir in 0..4 {
                    let r = chf.neighbour(x, z, i, dir).map_or(0, |(_, _, ai)| chf.spans[ai].reg);
                    if r == s.reg {
                        same |= 1 << dir;
                    }
                }
                flags[i] = same ^ 0xf;
            }
        }
    }

    let mut raw = Vec::new();
    let mut simplified = Vec::new();
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if flags[i] == 0 || flags[i] == 0xf {
                    flags[i] = 0;
                    continue;
                }
                let reg = chf.spans[i].reg;
                if reg == 0 || reg & BORDER_REG != 0 {
                    continue;
                }
                let area = chf.areas[i];

                raw.clear();
                simplified.clear();
                walk_contour(chf, x, z, i, &mut flags, &mut raw);
                simplify_contour(&raw, &mut simplified, max_error, max_edge_len);
                remove_degenerate_segments(&mut simplified);

                if simplified.len() >= 3 {
                    let unpad = |p: &Point| [p[0] - border_size, p[1], p[2] - border_size, p[3]];
                    cset.contours.push(Contour {
                        verts: simplified.iter().map(unpad).collect(),
                        raw_verts: raw.iter().map(unpad).collect(),
                        reg,
                        area,
                    });
                }
            }
        }
    }

    merge_holes(&mut cset);
    tracing::trace!(contours = cset.contours.len(), "contours built");
    cset
}

fn corner_height(chf: &CompactHeightfield, x: i32, z: i32, i: usize, dir: usize) -> (i32, bool) {
    let s = chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 3;
    let code = |idx: usize| chf.spans[idx].reg as u32 | ((chf.areas[idx] as u32) << 16);

    let mut regs = [0u32; 4];
    // Area in the high bits keeps vertices between two areas from being
    // treated as plain border vertices.
    regs[0] = code(i);

    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dir) {
        ch = ch.max(chf.spans[ai].y as i32);
        regs[1] = code(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }
    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dirp) {
        ch = ch.max(chf.spans[ai].y as i32);
        regs[3] = code(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }

    let border = BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 3;
        let c = (j + 2) & 3;
        let d = (j + 3) & 3;
        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }
    (ch, is_border_vertex)
}

fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
    points: &mut Vec<Point>,
) {
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..40_000 {
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = corner_height(chf, x, z, i, dir);
            let (mut px, mut pz) = (x, z);
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }
            let mut r = 0i32;
            let mut is_area_border = false;
            if let Some((_, _, ai)) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as i32;
                is_area_border = area != chf.areas[ai];
            }
            if is_border_vertex {
                r |= BORDER_VERTEX;
            }
            if is_area_border {
                r |= AREA_BORDER;
            }
            points.push([px, py, pz, r]);
            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 3;
        } else {
            let Some((nx, nz, ni)) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x = nx;
            z = nz;
            i = ni;
            dir = (dir + 3) & 3;
        }
        if start_i == i && start_dir == dir {
            break;
        }
    }
}

/// Reduce a raw outline to the vertices needed to stay within `max_error`
/// cells of it. Wall edges longer than `max_edge_len` are split.
fn simplify_contour(points: &[Point], simplified: &mut Vec<Point>, max_error: f32, max_edge_len: i32) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    let has_connections = points.iter().any(|p| p[3] & CONTOUR_REG_MASK != 0);
    if has_connections {
        // Keep every vertex where the neighbouring region or area changes.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = (points[i][3] & CONTOUR_REG_MASK) != (points[ii][3] & CONTOUR_REG_MASK);
            let area_borders = (points[i][3] & AREA_BORDER) != (points[ii][3] & AREA_BORDER);
            if different_regs || area_borders {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Seed with the lower-left and upper-right vertices.
        let mut ll = (points[0], 0usize);
        let mut ur = (points[0], 0usize);
        for (i, p) in points.iter().enumerate() {
            if p[0] < ll.0[0] || (p[0] == ll.0[0] && p[2] < ll.0[2]) {
                ll = (*p, i);
            }
            if p[0] > ur.0[0] || (p[0] == ur.0[0] && p[2] > ur.0[2]) {
                ur = (*p, i);
            }
        }
        simplified.push([ll.0[0], ll.0[1], ll.0[2], ll.1 as i32]);
        simplified.push([ur.0[0], ur.0[1], ur.0[2], ur.1 as i32]);
    }

    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut ax, mut az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
        let (mut bx, mut bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

        // Walk segments in a canonical direction so opposite sides of a
        // shared edge simplify identically.
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        let mut max_d = 0.0f32;
        let mut max_i = None;
        if points[ci][3] & CONTOUR_REG_MASK == 0 || points[ci][3] & AREA_BORDER != 0 {
            while ci != endi {
                let d = geom::dist_pt_seg_sqr(points[ci][0], points[ci][2], ax, az, bx, bz);
                if d > max_d {
                    max_d = d;
                    max_i = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match max_i {
            Some(mi) if max_d > max_error_sqr => {
                let p = points[mi];
                simplified.insert(i + 1, [p[0], p[1], p[2], mi as i32]);
            }
            _ => i += 1,
        }
    }

    if max_edge_len > 0 {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (ax, az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
            let (bx, bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

            let mut max_i = None;
            let ci = (ai + 1) % pn;
            if points[ci][3] & CONTOUR_REG_MASK == 0 {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        max_i = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match max_i {
                Some(mi) => {
                    let p = points[mi];
                    simplified.insert(i + 1, [p[0], p[1], p[2], mi as i32]);
                }
                None => i += 1,
            }
        }
    }

    for s in simplified.iter_mut() {
        // Neighbour region comes from the next raw vertex, the border flag
        // from the current one.
        let bi = s[3] as usize;
        let ai = (bi + 1) % pn;
        s[3] = (points[ai][3] & (CONTOUR_REG_MASK | AREA_BORDER)) | (points[bi][3] & BORDER_VERTEX);
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<Point>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = geom::next(i, simplified.len());
        if simplified.len() > 1 && geom::vequal(&simplified[i], &simplified[ni]) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

fn merge_holes(cset: &mut ContourSet) {
    let winding: Vec<bool> = cset
        .contours
        .iter()
        .map(|c| geom::polygon_area2(&c.verts) < 0)
        .collect();
    if !winding.iter().any(|&hole| hole) {
        return;
    }

    let mut regions: std::collections::BTreeMap<u16, (Option<usize>, Vec<usize>)> =
        std::collections::BTreeMap::new();
    for (i, c) in cset.contours.iter().enumerate() {
        let entry = regions.entry(c.reg).or_default();
        if winding[i] {
            entry.1.push(i);
        } else {
            entry.0 = Some(i);
        }
    }

    let mut merged_holes = Vec::new();
    for (reg, (outline, holes)) in regions {
        if holes.is_empty() {
            continue;
        }
        let Some(outline) = outline else {
            tracing::warn!(region = reg, "hole contour without an outline, skipped");
            continue;
        };
        merge_region_holes(cset, outline, &holes);
        merged_holes.extend(holes);
    }

    merged_holes.sort_unstable();
    for i in merged_holes.into_iter().rev() {
        cset.contours.remove(i);
    }
}

fn in_cone(i: usize, verts: &[Point], pj: &Point) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[geom::next(i, n)];
    let pin1 = &verts[geom::prev(i, n)];
    if geom::left_on(pin1, pi, pi1) {
        return geom::left(pi, pj, pin1) && geom::left(pj, pi, pi1);
    }
    !(geom::left_on(pi, pj, pi1) && geom::left_on(pj, pi, pin1))
}

fn intersects_contour(d0: &Point, d1: &Point, skip: Option<usize>, verts: &[Point]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = geom::next(k, n);
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = &verts[k];
        let p1 = &verts[k1];
        if geom::vequal(d0, p0) || geom::vequal(d1, p0) || geom::vequal(d0, p1) || geom::vequal(d1, p1) {
            continue;
        }
        if geom::intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Leftmost (then lowest z) vertex of a contour.
fn leftmost(verts: &[Point]) -> usize {
    let mut best = 0;
    for (i, v) in verts.iter().enumerate() {
        let b = &verts[best];
        if v[0] < b[0] || (v[0] == b[0] && v[2] < b[2]) {
            best = i;
        }
    }
    best
}

fn merge_region_holes(cset: &mut ContourSet, outline: usize, holes: &[usize]) {
    let mut holes: Vec<(usize, usize)> = holes
        .iter()
        .map(|&h| (h, leftmost(&cset.contours[h].verts)))
        .collect();
    holes.sort_by(|a, b| {
        let va = cset.contours[a.0].verts[a.1];
        let vb = cset.contours[b.0].verts[b.1];
        va[0].cmp(&vb[0]).then(va[2].cmp(&vb[2]))
    });

    for hi in 0..holes.len() {
        let (hole, start) = holes[hi];
        let hole_verts = cset.contours[hole].verts.clone();
        let outline_verts = &cset.contours[outline].verts;

        let mut bridge = None;
        let mut best_vertex = start;
        for _ in 0..hole_verts.len() {
            let corner = hole_verts[best_vertex];
            let mut diags: Vec<(usize, i32)> = outline_verts
                .iter()
                .enumerate()
                .filter(|(j, _)| in_cone(*j, outline_verts, &corner))
                .map(|(j, v)| {
                    let dx = v[0] - corner[0];
                    let dz = v[2] - corner[2];
                    (j, dx * dx + dz * dz)
                })
                .collect();
            diags.sort_by_key(|d| d.1);

            bridge = diags.into_iter().map(|d| d.0).find(|&j| {
                let pt = outline_verts[j];
                !intersects_contour(&pt, &corner, Some(j), outline_verts)
                    && holes[hi..]
                        .iter()
                        .all(|(k, _)| !intersects_contour(&pt, &corner, None, &cset.contours[*k].verts))
            });
            if bridge.is_some() {
                break;
            }
            best_vertex = (best_vertex + 1) % hole_verts.len();
        }

        let Some(ia) = bridge else {
            tracing::warn!(region = cset.contours[outline].reg, "failed to find a bridge to a hole");
            continue;
        };

        let outline_verts = &cset.contours[outline].verts;
        let na = outline_verts.len();
        let nb = hole_verts.len();
        let mut merged = Vec::with_capacity(na + nb + 2);
        for k in 0..=na {
            merged.push(outline_verts[(ia + k) % na]);
        }
        for k in 0..=nb {
            merged.push(hole_verts[(best_vertex + k) % nb]);
        }
        cset.contours[outline].verts = merged;
        cset.contours[hole].verts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::bake::region::build_regions_monotone;

    fn chf_from(walkable: impl Fn(i32, i32) -> bool, n: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(n, n, Vec3::ZERO, Vec3::new(n as f32, 20.0, n as f32), 1.0, 0.5);
        for z in 0..n {
            for x in 0..n {
                if walkable(x, z) {
                    hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
                }
            }
        }
        CompactHeightfield::build(&hf, 4, 1)
    }

    #[test]
    fn square_region_gives_square_contour() {
        let mut chf = chf_from(|_, _| true, 16);
        build_regions_monotone(&mut chf, 0, 4, 20);
        let cset = build_contours(&chf, 1.3, 0);
        assert_eq!(cset.contours.len(), 1);
        let c = &cset.contours[0];
        assert_eq!(c.verts.len(), 4);
        for v in &c.verts {
            assert!(v[0] == 0 || v[0] == 16);
            assert!(v[2] == 0 || v[2] == 16);
        }
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut chf = chf_from(|_, _| true, 16);
        build_regions_monotone(&mut chf, 0, 4, 20);
        let cset = build_contours(&chf, 1.3, 6);
        let c = &cset.contours[0];
        assert!(c.verts.len() > 4);
        let n = c.verts.len();
        for i in 0..n {
            let a = c.verts[i];
            let b = c.verts[(i + 1) % n];
            let (dx, dz) = (b[0] - a[0], b[2] - a[2]);
            assert!(dx * dx + dz * dz <= 36, "edge {a:?} -> {b:?}");
        }
    }

    #[test]
    fn border_is_trimmed_from_contours() {
        let mut chf = chf_from(|_, _| true, 20);
        build_regions_monotone(&mut chf, 4, 4, 20);
        let cset = build_contours(&chf, 1.3, 0);
        assert_eq!(cset.width, 12);
        assert_eq!(cset.contours.len(), 1);
        for v in &cset.contours[0].verts {
            assert!((0..=12).contains(&v[0]) && (0..=12).contains(&v[2]));
        }
    }

    #[test]
    fn hole_is_merged_into_outline() {
        let mut chf = chf_from(|x, z| !((7..9).contains(&x) && (7..9).contains(&z)), 16);
        build_regions_monotone(&mut chf, 0, 4, 400);
        let cset = build_contours(&chf, 1.3, 0);
        // Holes are spliced in, so every remaining contour is an outline.
        for c in &cset.contours {
            assert!(geom::polygon_area2(&c.verts) >= 0 || c.verts.is_empty());
        }
        assert!(cset.contours.iter().all(|c| !c.verts.is_empty()));
    }
}
