//! Monotone region partitioning followed by small-region filtering and merging.

use super::compact::CompactHeightfield;
use super::heightfield::NULL_AREA;

/// Flag on region ids painted into the tile border.
pub const BORDER_REG: u16 = 0x8000;
const NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone, Copy, Default)]
struct Sweep {
    id: u16,
    ns: i32,
    nei: u16,
}

#[derive(Debug, Clone)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn add_unique_floor(&mut self, floor: u16) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in &mut self.connections {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in &mut self.floors {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        if self.connections.iter().filter(|&&c| c == other.id).count() > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }
}

/// Partition walkable spans into regions by sweeping rows, then drop regions
/// smaller than `min_region_area` and merge those below `merge_region_area`.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) {
    let (w, h) = (chf.width, chf.height);
    let mut id: u16 = 1;
    let mut src_reg = vec![0u16; chf.span_count()];

    if border_size > 0 {
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect(chf, &mut src_reg, 0, bw, 0, h, id | BORDER_REG);
        id += 1;
        paint_rect(chf, &mut src_reg, w - bw, w, 0, h, id | BORDER_REG);
        id += 1;
        paint_rect(chf, &mut src_reg, 0, w, 0, bh, id | BORDER_REG);
        id += 1;
        paint_rect(chf, &mut src_reg, 0, w, h - bh, h, id | BORDER_REG);
        id += 1;
    }
    chf.border_size = border_size;

    let mut sweeps: Vec<Sweep> = Vec::new();
    let mut prev: Vec<i32> = Vec::new();

    for z in border_size..h - border_size {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid: u16 = 1;

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut previd = 0u16;
                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 0) {
                    if src_reg[ai] & BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }
                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    if sweeps.len() <= previd as usize {
                        sweeps.resize(previd as usize + 1, Sweep::default());
                    }
                    sweeps[previd as usize] = Sweep::default();
                }

                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && nr & BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // A row segment continues the region above it only when it is the
        // sole segment touching that region.
        for sweep in sweeps.iter_mut().take(rid as usize).skip(1) {
            if sweep.nei != NULL_NEI && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                sweep.id = id;
                id += 1;
            }
        }

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if src_reg[i] > 0 && src_reg[i] < rid {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    let max_region_id =
        merge_and_filter_regions(chf, &mut src_reg, id, min_region_area, merge_region_area);
    chf.max_regions = max_region_id;
    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    tracing::trace!(regions = max_region_id, "regions built");
}

fn paint_rect(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    reg: u16,
) {
    for z in min_z..max_z {
        for x in min_x..max_x {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg;
                }
            }
        }
    }
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, z: i32, i: usize, dir: usize) -> bool {
    let r = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    r != src_reg[i]
}

/// Collect the ordered list of neighbouring region ids around a region,
/// starting from span `i` whose `dir` edge is on the region boundary.
fn walk_contour(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let start_i = i;

    let mut cur_reg = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    cont.push(cur_reg);

    for _ in 0..40_000 {
        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let r = chf
                .neighbour(x, z, i, dir)
                .map_or(0, |(_, _, ai)| src_reg[ai]);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
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

    let mut j = 0;
    while j < cont.len() && cont.len() > 1 {
        let nj = (j + 1) % cont.len();
        if cont[j] == cont[nj] {
            cont.remove(j);
        } else {
            j += 1;
        }
    }
}

fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;
    let acon = regions[a].connections.clone();
    let bcon = regions[b].connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for k in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + k) % acon.len()]);
    }
    for k in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + k) % bcon.len()]);
    }

    let b_floors = regions[b].floors.clone();
    let b_spans = regions[b].span_count;
    let rega = &mut regions[a];
    rega.connections = merged;
    rega.remove_adjacent_neighbours();
    for f in b_floors {
        rega.add_unique_floor(f);
    }
    rega.span_count += b_spans;

    let regb = &mut regions[b];
    regb.span_count = 0;
    regb.connections.clear();
    true
}

fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    max_region_id: u16,
    min_region_area: i32,
    merge_region_area: i32,
) -> u16 {
    let (w, h) = (chf.width, chf.height);
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            let range = cell.index as usize..(cell.index + cell.count) as usize;
            for i in range.clone() {
                let r = src_reg[i] as usize;
                if r == 0 || r >= nreg {
                    continue;
                }
                regions[r].span_count += 1;

                for j in range.clone() {
                    if i == j {
                        continue;
                    }
                    let floor = src_reg[j];
                    if floor == 0 || floor as usize >= nreg {
                        continue;
                    }
                    if floor as usize == r {
                        regions[r].overlap = true;
                    }
                    regions[r].add_unique_floor(floor);
                }

                if !regions[r].connections.is_empty() {
                    continue;
                }
                regions[r].area_type = chf.areas[i];

                if let Some(dir) = (0..4).find(|&d| is_solid_edge(chf, src_reg, x, z, i, d)) {
                    let mut cont = Vec::new();
                    walk_contour(chf, src_reg, x, z, i, dir, &mut cont);
                    regions[r].connections = cont;
                }
            }
        }
    }

    // Remove islands smaller than the minimum area that never touch the border.
    let mut stack = Vec::new();
    let mut trace = Vec::new();
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
            continue;
        }
        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();
        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);
            for k in 0..regions[ri].connections.len() {
                let c = regions[ri].connections[k];
                if c & BORDER_REG != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[c as usize];
                if nei.visited || nei.id == 0 || nei.id & BORDER_REG != 0 {
                    continue;
                }
                nei.visited = true;
                stack.push(nei.id as usize);
            }
        }

        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                continue;
            }
            if reg.span_count > merge_region_area && reg.connected_to_border() {
                continue;
            }

            let mut smallest = i32::MAX;
            let mut merge_id = reg.id;
            for &c in &reg.connections {
                if c & BORDER_REG != 0 {
                    continue;
                }
                let mreg = &regions[c as usize];
                if mreg.id == 0 || mreg.id & BORDER_REG != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg) {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id != reg.id {
                let old_id = reg.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    for other in regions.iter_mut() {
                        if other.id == 0 || other.id & BORDER_REG != 0 {
                            continue;
                        }
                        if other.id == old_id {
                            other.id = merge_id;
                        }
                        other.replace_neighbour(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compress ids to 1..=n.
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && reg.id & BORDER_REG == 0;
    }
    let mut next_id: u16 = 0;
    for i in 0..nreg {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        next_id += 1;
        for reg in regions.iter_mut().skip(i) {
            if reg.id == old_id {
                reg.id = next_id;
                reg.remap = false;
            }
        }
    }

    for reg in src_reg.iter_mut() {
        if *reg & BORDER_REG == 0 {
            *reg = regions[*reg as usize].id;
        }
    }

    next_id
}
