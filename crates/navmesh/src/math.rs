//! 2D (XZ-plane) float geometry used by the polygon queries.

use glam::Vec3;

/// Twice the signed area of `abc` on XZ. Positive when `c` lies to the right
/// of the ray `a -> b`.
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

pub fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < 1e-6
}

/// Even-odd test of `p` against a polygon on XZ.
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > p.z) != (vj.z > p.z) && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared XZ distance from `p` to segment `ab`, and the segment parameter
/// of the closest point.
pub fn dist_pt_seg_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let pqx = b.x - a.x;
    let pqz = b.z - a.z;
    let dx = p.x - a.x;
    let dz = p.z - a.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let ex = a.x + t * pqx - p.x;
    let ez = a.z + t * pqz - p.z;
    (ex * ex + ez * ez, t)
}

/// Height of triangle `abc` under `p`, if `p` projects inside it.
pub fn closest_height_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    // Slack so points on shared edges resolve in either triangle.
    let slack = -1e-4 * denom;
    if u >= slack && v >= slack && u + v <= denom - slack {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

pub fn centroid(verts: &[Vec3]) -> Vec3 {
    verts.iter().copied().sum::<Vec3>() / verts.len().max(1) as f32
}
