//! Reciprocal velocity obstacles on the XZ plane.
//!
//! Each neighbour contributes one half-plane of permitted velocities; a 2D
//! linear program picks the permitted velocity closest to the preferred
//! one, falling back to the least-violating velocity when the half-planes
//! have no common point inside the speed disc.

use glam::Vec2;

const EPSILON: f32 = 1e-5;

/// One agent as seen by the velocity planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrcaAgent {
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f32,
}

/// Permitted velocities lie on the left of the directed line through `point`.
#[derive(Debug, Clone, Copy)]
struct HalfPlane {
    point: Vec2,
    dir: Vec2,
}

impl HalfPlane {
    /// Positive when `v` is on the forbidden side.
    fn violation(&self, v: Vec2) -> f32 {
        cross(self.dir, self.point - v)
    }
}

fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Half-plane `me` must respect to avoid `other` for `horizon` seconds,
/// taking half of the avoidance effort.
fn half_plane(me: &OrcaAgent, other: &OrcaAgent, horizon: f32, inv_dt: f32) -> HalfPlane {
    let rel_pos = other.pos - me.pos;
    let rel_vel = me.vel - other.vel;
    let dist_sq = rel_pos.length_squared();
    let r = me.radius + other.radius;
    let r_sq = r * r;

    let (dir, u) = if dist_sq > r_sq {
        // Cut-off circle centre sits at rel_pos / horizon.
        let w = rel_vel - rel_pos / horizon;
        let w_len_sq = w.length_squared();
        let w_dot = w.dot(rel_pos);

        if w_dot < 0.0 && w_dot * w_dot > r_sq * w_len_sq {
            let w_len = w_len_sq.sqrt();
            let n = if w_len > EPSILON { w / w_len } else { Vec2::X };
            (Vec2::new(n.y, -n.x), n * (r / horizon - w_len))
        } else {
            let leg = (dist_sq - r_sq).max(0.0).sqrt();
            let dir = if cross(rel_pos, w) > 0.0 {
                Vec2::new(rel_pos.x * leg - rel_pos.y * r, rel_pos.x * r + rel_pos.y * leg) / dist_sq
            } else {
                -Vec2::new(rel_pos.x * leg + rel_pos.y * r, -rel_pos.x * r + rel_pos.y * leg) / dist_sq
            };
            (dir, dir * rel_vel.dot(dir) - rel_vel)
        }
    } else {
        // Already overlapping: resolve within one step.
        let w = rel_vel - rel_pos * inv_dt;
        let w_len = w.length();
        let n = if w_len > EPSILON {
            w / w_len
        } else if dist_sq > EPSILON * EPSILON {
            -rel_pos / dist_sq.sqrt()
        } else {
            Vec2::X
        };
        (Vec2::new(n.y, -n.x), n * (r * inv_dt - w_len))
    };

    HalfPlane {
        point: me.vel + u * 0.5,
        dir,
    }
}

/// Best velocity on the boundary of plane `k` that satisfies planes `..k`.
/// Returns `None` when that boundary segment is empty.
fn solve_on_line(planes: &[HalfPlane], k: usize, max_speed: f32, target: Vec2, directional: bool) -> Option<Vec2> {
    let line = planes[k];
    let along = line.point.dot(line.dir);
    let disc = along * along + max_speed * max_speed - line.point.length_squared();
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    let mut t_lo = -along - root;
    let mut t_hi = -along + root;

    for other in &planes[..k] {
        let denom = cross(line.dir, other.dir);
        let numer = cross(other.dir, line.point - other.point);
        if denom.abs() <= EPSILON {
            if numer < 0.0 {
                return None;
            }
            continue;
        }
        let t = numer / denom;
        if denom >= 0.0 {
            t_hi = t_hi.min(t);
        } else {
            t_lo = t_lo.max(t);
        }
        if t_lo > t_hi {
            return None;
        }
    }

    let t = if directional {
        if target.dot(line.dir) > 0.0 { t_hi } else { t_lo }
    } else {
        line.dir.dot(target - line.point).clamp(t_lo, t_hi)
    };
    Some(line.point + line.dir * t)
}

/// Incremental 2D LP. Returns the index of the first plane that could not be
/// satisfied, or `planes.len()` on success; `result` holds the best velocity.
fn solve(planes: &[HalfPlane], max_speed: f32, target: Vec2, directional: bool, result: &mut Vec2) -> usize {
    *result = if directional {
        target.normalize_or_zero() * max_speed
    } else {
        target.clamp_length_max(max_speed)
    };

    for k in 0..planes.len() {
        if planes[k].violation(*result) > 0.0 {
            match solve_on_line(planes, k, max_speed, target, directional) {
                Some(v) => *result = v,
                None => return k,
            }
        }
    }
    planes.len()
}

/// Minimise the largest violation over planes `from..` when the LP is
/// infeasible.
fn solve_least_violating(planes: &[HalfPlane], from: usize, max_speed: f32, result: &mut Vec2) {
    let mut worst = 0.0f32;
    for k in from..planes.len() {
        let line = planes[k];
        if line.violation(*result) <= worst {
            continue;
        }

        let mut projected = Vec::with_capacity(k);
        for other in &planes[..k] {
            let denom = cross(line.dir, other.dir);
            let point = if denom.abs() <= EPSILON {
                if line.dir.dot(other.dir) > 0.0 {
                    continue;
                }
                (line.point + other.point) * 0.5
            } else {
                line.point + line.dir * (cross(other.dir, line.point - other.point) / denom)
            };
            projected.push(HalfPlane {
                point,
                dir: (other.dir - line.dir).normalize_or_zero(),
            });
        }

        let before = *result;
        if solve(&projected, max_speed, Vec2::new(-line.dir.y, line.dir.x), true, result) < projected.len() {
            *result = before;
        }
        worst = line.violation(*result);
    }
}

/// Velocity for `me` closest to `preferred` that avoids every neighbour for
/// `horizon` seconds, capped at `max_speed`.
pub fn plan_velocity(
    me: &OrcaAgent,
    preferred: Vec2,
    max_speed: f32,
    neighbours: &[OrcaAgent],
    horizon: f32,
    dt: f32,
) -> Vec2 {
    let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
    let planes: Vec<HalfPlane> = neighbours
        .iter()
        .map(|n| half_plane(me, n, horizon, inv_dt))
        .collect();

    let mut result = preferred;
    let failed = solve(&planes, max_speed, preferred, false, &mut result);
    if failed < planes.len() {
        solve_least_violating(&planes, failed, max_speed, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(x: f32, vx: f32) -> OrcaAgent {
        OrcaAgent {
            pos: Vec2::new(x, 0.0),
            vel: Vec2::new(vx, 0.0),
            radius: 0.5,
        }
    }

    #[test]
    fn unobstructed_keeps_preferred() {
        let me = agent(0.0, 1.0);
        let v = plan_velocity(&me, Vec2::new(1.0, 0.0), 2.0, &[], 2.0, 0.1);
        assert_eq!(v, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn preferred_is_capped_by_speed() {
        let me = agent(0.0, 0.0);
        let v = plan_velocity(&me, Vec2::new(5.0, 0.0), 2.0, &[], 2.0, 0.1);
        assert!((v.length() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn head_on_agents_sidestep_in_opposite_directions() {
        let a = agent(0.0, 1.0);
        let b = agent(3.0, -1.0);
        let va = plan_velocity(&a, Vec2::new(1.0, 0.0), 1.5, &[b], 4.0, 0.1);
        let vb = plan_velocity(&b, Vec2::new(-1.0, 0.0), 1.5, &[a], 4.0, 0.1);
        assert!(va.y.abs() > 0.05, "a keeps straight: {va}");
        assert!(vb.y.abs() > 0.05, "b keeps straight: {vb}");
        // Reciprocal: both turn to the same side of their own heading.
        assert!(va.y * vb.y < 0.0);
        assert!(va.length() <= 1.5 + 1e-4);
    }

    #[test]
    fn far_neighbour_is_ignored() {
        let a = agent(0.0, 1.0);
        let b = agent(100.0, -1.0);
        let v = plan_velocity(&a, Vec2::new(1.0, 0.0), 1.5, &[b], 2.0, 0.1);
        assert!((v - Vec2::new(1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn overlapping_agents_push_apart() {
        let a = agent(0.0, 0.0);
        let b = agent(0.5, 0.0);
        let v = plan_velocity(&a, Vec2::ZERO, 2.0, &[b], 2.0, 0.1);
        assert!(v.x < 0.0, "should move away from b: {v}");
    }
}
