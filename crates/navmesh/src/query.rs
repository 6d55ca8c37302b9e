//! Polygon queries over a [`NavMesh`]: nearest polygon, heights, A* corridor
//! search, funnel string-pulling and constrained surface movement.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use strata_common::{DebugMesh, DebugTopology};

use crate::math::{self, tri_area_2d, vequal};
use crate::store::{NavMesh, PolyRef};
use crate::tile::{MAX_VERTS_PER_POLY, POLY_FLAG_DISABLED, POLY_FLAG_WALK, Poly};
use crate::NavMeshError;

/// Search-node budget for [`NavMesh::find_path`].
pub const MAX_SEARCH_NODES: usize = 2048;
const HEURISTIC_SCALE: f32 = 0.999;

/// Polygon flag filter applied by every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub include_flags: u16,
    pub exclude_flags: u16,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: POLY_FLAG_WALK,
            exclude_flags: POLY_FLAG_DISABLED,
        }
    }
}

impl QueryFilter {
    pub fn passes(&self, poly: &Poly) -> bool {
        poly.flags & self.include_flags != 0 && poly.flags & self.exclude_flags == 0
    }
}

/// Polygon corridor from a start polygon toward an end polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub polys: Vec<PolyRef>,
    /// `false` when the end was unreachable and the corridor leads to the
    /// polygon closest to it instead.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveResult {
    pub pos: Vec3,
    pub poly: PolyRef,
    /// Polygons crossed from the start polygon to `poly`, inclusive.
    pub visited: Vec<PolyRef>,
}

#[derive(Debug, Clone, Copy)]
struct SearchNode {
    pos: Vec3,
    cost: f32,
    total: f32,
    parent: Option<PolyRef>,
    closed: bool,
}

#[derive(Debug, PartialEq)]
struct OpenEntry {
    total: f32,
    poly: PolyRef,
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    // Reversed: BinaryHeap pops the cheapest entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.poly.cmp(&self.poly))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl NavMesh {
    /// Polygons passing `filter` whose bounds overlap the box around `center`.
    pub fn query_polygons(&self, center: Vec3, half_extents: Vec3, filter: &QueryFilter) -> Vec<PolyRef> {
        let bmin = center - half_extents;
        let bmax = center + half_extents;
        let (min_x, min_y) = self.calc_tile_loc(bmin);
        let (max_x, max_y) = self.calc_tile_loc(bmax);

        let mut out = Vec::new();
        for ty in min_y..=max_y {
            for tx in min_x..=max_x {
                let Some(slot) = self.slot_at(tx, ty) else {
                    continue;
                };
                let Some(tile) = self.tile_in_slot(slot) else {
                    continue;
                };
                for poly in tile.data.query_polygons(bmin, bmax) {
                    if filter.passes(&tile.data.polys[poly]) {
                        out.push(self.poly_ref(slot, poly));
                    }
                }
            }
        }
        out
    }

    /// Nearest polygon to `center` within the search box, with the closest
    /// point on it. Points above a polygon within climb height count as on it.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        let mut best: Option<(PolyRef, Vec3, f32)> = None;
        for r in self.query_polygons(center, half_extents, filter) {
            let Some((closest, over)) = self.closest_point_on_poly(r, center) else {
                continue;
            };
            let diff = center - closest;
            let d = if over {
                let climb = self
                    .tile_and_poly(r)
                    .map_or(0.0, |(t, _)| t.data.header.walkable_climb);
                let dy = diff.y.abs() - climb;
                if dy > 0.0 { dy * dy } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if best.is_none_or(|b| d < b.2) {
                best = Some((r, closest, d));
            }
        }
        best.map(|(r, p, _)| (r, p))
    }

    /// Nearest navmesh point no farther than `radius` from `pos`.
    pub fn query_nearest_point(&self, pos: Vec3, radius: f32, filter: &QueryFilter) -> Option<(PolyRef, Vec3)> {
        self.find_nearest_poly(pos, Vec3::splat(radius), filter)
            .filter(|(_, p)| p.distance(pos) <= radius)
    }

    /// Closest point on polygon `r` to `pos`, and whether `pos` lies over it.
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: Vec3) -> Option<(Vec3, bool)> {
        let (slot, poly) = self.decode_ref(r)?;
        let tile = self.tile_in_slot(slot)?;
        let verts = tile.data.poly_vertices(poly);
        if math::point_in_polygon_2d(pos, &verts) {
            let h = self
                .poly_height(r, pos)
                .unwrap_or_else(|| math::centroid(&verts).y);
            return Some((Vec3::new(pos.x, h, pos.z), true));
        }
        Some((closest_on_boundary(pos, &verts), false))
    }

    /// Surface height of polygon `r` under `pos`, from its detail triangles.
    pub fn poly_height(&self, r: PolyRef, pos: Vec3) -> Option<f32> {
        let (slot, poly) = self.decode_ref(r)?;
        let tile = self.tile_in_slot(slot)?;
        tile.data
            .detail_triangles(poly)
            .find_map(|[a, b, c]| math::closest_height_on_triangle(pos, a, b, c))
    }

    /// Portal between adjacent polygons as `(left, right)` seen when moving
    /// from `from` into `to`.
    pub fn portal_points(&self, from: PolyRef, to: PolyRef) -> Option<(Vec3, Vec3)> {
        let link = self.links(from).iter().find(|l| l.target == to)?;
        let (tile, poly) = self.tile_and_poly(from)?;
        let verts: Vec<Vec3> = poly.verts[..poly.vert_count as usize]
            .iter()
            .map(|&v| tile.data.vertex(v))
            .collect();
        let c = math::centroid(&verts);
        let [p, q] = link.portal;
        let m = (p + q) * 0.5;
        if tri_area_2d(c, m, p) > 0.0 { Some((q, p)) } else { Some((p, q)) }
    }

    /// A* over polygon adjacency. Node positions are portal midpoints.
    pub fn find_path(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<PathResult, NavMeshError> {
        if !self.is_valid_poly_ref(start_ref) {
            return Err(NavMeshError::InvalidRef(start_ref));
        }
        if !self.is_valid_poly_ref(end_ref) {
            return Err(NavMeshError::InvalidRef(end_ref));
        }
        if start_ref == end_ref {
            return Ok(PathResult {
                polys: vec![start_ref],
                complete: true,
            });
        }

        let mut nodes: HashMap<PolyRef, SearchNode> = HashMap::new();
        let mut open = BinaryHeap::new();
        let h0 = start_pos.distance(end_pos) * HEURISTIC_SCALE;
        nodes.insert(
            start_ref,
            SearchNode {
                pos: start_pos,
                cost: 0.0,
                total: h0,
                parent: None,
                closed: false,
            },
        );
        open.push(OpenEntry {
            total: h0,
            poly: start_ref,
        });

        let mut last_best = start_ref;
        let mut last_best_h = h0;
        let mut out_of_nodes = false;

        while let Some(entry) = open.pop() {
            let Some(current) = nodes.get_mut(&entry.poly) else {
                continue;
            };
            if current.closed || entry.total != current.total {
                continue;
            }
            current.closed = true;
            let current = *current;

            if entry.poly == end_ref {
                last_best = end_ref;
                break;
            }

            for link in self.links(entry.poly) {
                let next = link.target;
                if Some(next) == current.parent {
                    continue;
                }
                let Some((_, poly)) = self.tile_and_poly(next) else {
                    continue;
                };
                if !filter.passes(poly) {
                    continue;
                }
                if nodes.len() >= MAX_SEARCH_NODES && !nodes.contains_key(&next) {
                    out_of_nodes = true;
                    continue;
                }

                let pos = (link.portal[0] + link.portal[1]) * 0.5;
                let (cost, heuristic) = if next == end_ref {
                    (current.cost + current.pos.distance(pos) + pos.distance(end_pos), 0.0)
                } else {
                    (current.cost + current.pos.distance(pos), pos.distance(end_pos) * HEURISTIC_SCALE)
                };
                let total = cost + heuristic;

                if let Some(existing) = nodes.get(&next) {
                    if total >= existing.total {
                        continue;
                    }
                }
                nodes.insert(
                    next,
                    SearchNode {
                        pos,
                        cost,
                        total,
                        parent: Some(entry.poly),
                        closed: false,
                    },
                );
                open.push(OpenEntry { total, poly: next });

                if heuristic < last_best_h {
                    last_best_h = heuristic;
                    last_best = next;
                }
            }
        }

        let mut polys = Vec::new();
        let mut cursor = Some(last_best);
        while let Some(r) = cursor {
            polys.push(r);
            if polys.len() > nodes.len() {
                break;
            }
            cursor = nodes.get(&r).and_then(|n| n.parent);
        }
        polys.reverse();

        let complete = last_best == end_ref;
        if !complete {
            tracing::debug!(%start_ref, %end_ref, out_of_nodes, "partial path");
        }
        Ok(PathResult { polys, complete })
    }

    /// String-pull a polygon corridor into corner points, start and end
    /// included, at most `max_points` long.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<Vec3>, NavMeshError> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Ok(Vec::new());
        };
        let start = self
            .closest_point_on_poly(first, start_pos)
            .ok_or(NavMeshError::InvalidRef(first))?
            .0;
        let end = self
            .closest_point_on_poly(last, end_pos)
            .ok_or(NavMeshError::InvalidRef(last))?
            .0;

        let mut portals = Vec::with_capacity(path.len() + 1);
        portals.push((start, start));
        for w in path.windows(2) {
            let portal = self
                .portal_points(w[0], w[1])
                .ok_or(NavMeshError::InvalidRef(w[1]))?;
            portals.push(portal);
        }
        portals.push((end, end));

        let mut pts = vec![start];
        let push = |pts: &mut Vec<Vec3>, p: Vec3| {
            if pts.last().is_none_or(|&l| !vequal(l, p)) {
                pts.push(p);
            }
        };

        let mut apex = start;
        let mut left = start;
        let mut right = start;
        let (mut apex_i, mut left_i, mut right_i) = (0usize, 0usize, 0usize);
        let mut i = 1;
        while i < portals.len() && pts.len() < max_points {
            let (l, r) = portals[i];

            if tri_area_2d(apex, right, r) <= 0.0 {
                if vequal(apex, right) || tri_area_2d(apex, left, r) > 0.0 {
                    right = r;
                    right_i = i;
                } else {
                    apex = left;
                    apex_i = left_i;
                    push(&mut pts, apex);
                    left = apex;
                    right = apex;
                    left_i = apex_i;
                    right_i = apex_i;
                    i = apex_i + 1;
                    continue;
                }
            }

            if tri_area_2d(apex, left, l) >= 0.0 {
                if vequal(apex, left) || tri_area_2d(apex, right, l) < 0.0 {
                    left = l;
                    left_i = i;
                } else {
                    apex = right;
                    apex_i = right_i;
                    push(&mut pts, apex);
                    left = apex;
                    right = apex;
                    left_i = apex_i;
                    right_i = apex_i;
                    i = apex_i + 1;
                    continue;
                }
            }
            i += 1;
        }

        if pts.len() < max_points {
            push(&mut pts, end);
        }
        Ok(pts)
    }

    /// Move from `start_pos` on `start_ref` toward `end_pos`, sliding along
    /// walls. Only polygons near the straight segment are searched.
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<MoveResult, NavMeshError> {
        if !self.is_valid_poly_ref(start_ref) {
            return Err(NavMeshError::InvalidRef(start_ref));
        }

        let search_pos = (start_pos + end_pos) * 0.5;
        let search_radius = start_pos.distance(end_pos) * 0.5 + 0.001;
        let search_radius_sqr = search_radius * search_radius;

        let mut parents: HashMap<PolyRef, PolyRef> = HashMap::new();
        let mut seen: HashSet<PolyRef> = HashSet::from([start_ref]);
        let mut queue = VecDeque::from([start_ref]);

        let mut best_pos = start_pos;
        let mut best_dist = f32::MAX;
        let mut best_ref = start_ref;

        while let Some(cur) = queue.pop_front() {
            let Some((tile, poly)) = self.tile_and_poly(cur) else {
                continue;
            };
            let nv = poly.vert_count as usize;
            let verts: Vec<Vec3> = poly.verts[..nv].iter().map(|&v| tile.data.vertex(v)).collect();

            if math::point_in_polygon_2d(end_pos, &verts) {
                best_ref = cur;
                best_pos = end_pos;
                break;
            }

            for j in 0..nv {
                let a = verts[j];
                let b = verts[(j + 1) % nv];
                let mut passable = Vec::new();
                for link in self.links(cur).iter().filter(|l| l.edge as usize == j) {
                    if self
                        .tile_and_poly(link.target)
                        .is_some_and(|(_, p)| filter.passes(p))
                    {
                        passable.push(link);
                    }
                }

                if passable.is_empty() {
                    let (d, t) = math::dist_pt_seg_sqr_2d(end_pos, a, b);
                    if d < best_dist {
                        best_dist = d;
                        best_pos = a.lerp(b, t);
                        best_ref = cur;
                    }
                    continue;
                }

                for link in passable {
                    if seen.contains(&link.target) {
                        continue;
                    }
                    let (d, _) = math::dist_pt_seg_sqr_2d(search_pos, link.portal[0], link.portal[1]);
                    if d > search_radius_sqr {
                        continue;
                    }
                    seen.insert(link.target);
                    parents.insert(link.target, cur);
                    queue.push_back(link.target);
                }
            }
        }

        let mut visited = vec![best_ref];
        let mut cursor = best_ref;
        while let Some(&p) = parents.get(&cursor) {
            visited.push(p);
            cursor = p;
        }
        visited.reverse();

        let y = self.poly_height(best_ref, best_pos).unwrap_or(start_pos.y);
        Ok(MoveResult {
            pos: Vec3::new(best_pos.x, y, best_pos.z),
            poly: best_ref,
            visited,
        })
    }

    /// Detail triangles of every walkable polygon, for debug drawing.
    pub fn debug_mesh(&self) -> DebugMesh {
        let mut mesh = DebugMesh::new(DebugTopology::Triangles);
        for (_, tile) in self.tiles() {
            for (poly, p) in tile.data.polys.iter().enumerate() {
                let malformed = p.vert_count < 3 || p.vert_count as usize > MAX_VERTS_PER_POLY;
                if malformed || p.flags & POLY_FLAG_WALK == 0 || p.flags & POLY_FLAG_DISABLED != 0 {
                    tracing::debug!(poly, flags = p.flags, verts = p.vert_count, "skipping poly in debug mesh");
                    continue;
                }
                for tri in tile.data.detail_triangles(poly) {
                    for v in tri {
                        let i = mesh.push_vertex(v);
                        mesh.indices.push(i);
                    }
                }
            }
        }
        mesh
    }
}

fn closest_on_boundary(pos: Vec3, verts: &[Vec3]) -> Vec3 {
    let n = verts.len();
    let mut best = (f32::MAX, verts.first().copied().unwrap_or(pos));
    for j in 0..n {
        let a = verts[j];
        let b = verts[(j + 1) % n];
        let (d, t) = math::dist_pt_seg_sqr_2d(pos, a, b);
        if d < best.0 {
            best = (d, a.lerp(b, t));
        }
    }
    best.1
}
