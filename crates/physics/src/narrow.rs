//! Narrow phase: exact overlap tests between posed primitives.
//!
//! Every test reports at most one contact whose normal points from the
//! first shape towards the second.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::shape::Shape;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub point: Vec3,
    /// Unit normal from the first body towards the second.
    pub normal: Vec3,
    pub depth: f32,
}

impl Contact {
    fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            ..self
        }
    }
}

/// A shape placed in world space.
#[derive(Debug, Clone, Copy)]
pub enum WorldShape {
    Sphere { center: Vec3, radius: f32 },
    Capsule { a: Vec3, b: Vec3, radius: f32 },
    Box { center: Vec3, axes: Mat3, half_extents: Vec3 },
}

impl WorldShape {
    pub fn new(shape: &Shape, center: Vec3, rotation: Quat) -> Self {
        match *shape {
            Shape::Sphere { radius } => WorldShape::Sphere { center, radius },
            Shape::Capsule { radius, half_height } => {
                let axis = rotation * Vec3::Y * half_height;
                WorldShape::Capsule {
                    a: center - axis,
                    b: center + axis,
                    radius,
                }
            }
            Shape::Box { half_extents } => WorldShape::Box {
                center,
                axes: Mat3::from_quat(rotation),
                half_extents,
            },
        }
    }
}

pub fn collide(first: &WorldShape, second: &WorldShape) -> Option<Contact> {
    use WorldShape::*;
    match (*first, *second) {
        (Sphere { center: c1, radius: r1 }, Sphere { center: c2, radius: r2 }) => sphere_sphere(c1, r1, c2, r2),
        (Sphere { center, radius }, Capsule { a, b, radius: rc }) => {
            let q = closest_on_segment(a, b, center);
            sphere_sphere(center, radius, q, rc)
        }
        (Capsule { .. }, Sphere { .. }) => collide(second, first).map(Contact::flipped),
        (Capsule { a: a1, b: b1, radius: r1 }, Capsule { a: a2, b: b2, radius: r2 }) => {
            let (p, q) = closest_between_segments(a1, b1, a2, b2);
            sphere_sphere(p, r1, q, r2)
        }
        (Box { center, axes, half_extents }, Sphere { center: c, radius }) => box_sphere(center, axes, half_extents, c, radius),
        (Sphere { .. }, Box { .. }) => collide(second, first).map(Contact::flipped),
        (Box { center, axes, half_extents }, Capsule { a, b, radius }) => {
            let p = closest_segment_point_to_box(center, axes, half_extents, a, b);
            box_sphere(center, axes, half_extents, p, radius)
        }
        (Capsule { .. }, Box { .. }) => collide(second, first).map(Contact::flipped),
        (Box { center: c1, axes: a1, half_extents: h1 }, Box { center: c2, axes: a2, half_extents: h2 }) => {
            box_box(c1, a1, h1, c2, a2, h2)
        }
    }
}

fn sphere_sphere(c1: Vec3, r1: f32, c2: Vec3, r2: f32) -> Option<Contact> {
    let d = c2 - c1;
    let dist_sq = d.length_squared();
    let sum = r1 + r2;
    if dist_sq >= sum * sum {
        return None;
    }
    let dist = dist_sq.sqrt();
    let normal = if dist > EPSILON { d / dist } else { Vec3::X };
    let depth = sum - dist;
    Some(Contact {
        point: c1 + normal * (r1 - depth * 0.5),
        normal,
        depth,
    })
}

fn closest_on_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= EPSILON {
        return a;
    }
    a + ab * ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0)
}

/// Closest points between segments `p1q1` and `p2q2`.
fn closest_between_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= EPSILON && e <= EPSILON {
        (0.0, 0.0)
    } else if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    (p1 + d1 * s, p2 + d2 * t)
}

fn closest_on_box(center: Vec3, axes: Mat3, half: Vec3, p: Vec3) -> Vec3 {
    let local = axes.transpose() * (p - center);
    center + axes * local.clamp(-half, half)
}

/// Alternating projection between the segment and the box.
fn closest_segment_point_to_box(center: Vec3, axes: Mat3, half: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let mut p = (a + b) * 0.5;
    for _ in 0..4 {
        let q = closest_on_box(center, axes, half, p);
        p = closest_on_segment(a, b, q);
    }
    p
}

fn box_sphere(center: Vec3, axes: Mat3, half: Vec3, sphere: Vec3, radius: f32) -> Option<Contact> {
    let local = axes.transpose() * (sphere - center);
    let clamped = local.clamp(-half, half);

    if clamped != local {
        let closest = center + axes * clamped;
        let d = sphere - closest;
        let dist_sq = d.length_squared();
        if dist_sq >= radius * radius {
            return None;
        }
        let dist = dist_sq.sqrt();
        let normal = if dist > EPSILON { d / dist } else { axes * Vec3::Y };
        return Some(Contact {
            point: closest,
            normal,
            depth: radius - dist,
        });
    }

    // Centre inside the box: push out through the nearest face.
    let gap = half - local.abs();
    let axis = if gap.x <= gap.y && gap.x <= gap.z {
        0
    } else if gap.y <= gap.z {
        1
    } else {
        2
    };
    let sign = if local[axis] < 0.0 { -1.0 } else { 1.0 };
    let normal = axes.col(axis) * sign;
    Some(Contact {
        point: sphere,
        normal,
        depth: radius + gap[axis],
    })
}

fn box_corners(center: Vec3, axes: Mat3, half: Vec3) -> [Vec3; 8] {
    let mut out = [Vec3::ZERO; 8];
    for (i, corner) in out.iter_mut().enumerate() {
        let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
        let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
        let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
        *corner = center + axes * (half * Vec3::new(sx, sy, sz));
    }
    out
}

fn inside_box(center: Vec3, axes: Mat3, half: Vec3, p: Vec3) -> bool {
    let local = (axes.transpose() * (p - center)).abs();
    local.cmple(half + Vec3::splat(1e-4)).all()
}

/// Separating axis test over the 15 candidate axes.
fn box_box(c1: Vec3, a1: Mat3, h1: Vec3, c2: Vec3, a2: Mat3, h2: Vec3) -> Option<Contact> {
    let delta = c2 - c1;
    let project = |axes: Mat3, half: Vec3, n: Vec3| {
        half.x * axes.x_axis.dot(n).abs() + half.y * axes.y_axis.dot(n).abs() + half.z * axes.z_axis.dot(n).abs()
    };

    let mut best: Option<(f32, Vec3)> = None;
    let mut test = |axis: Vec3, bias: f32| -> bool {
        let len_sq = axis.length_squared();
        if len_sq < EPSILON {
            return true;
        }
        let n = axis / len_sq.sqrt();
        let overlap = project(a1, h1, n) + project(a2, h2, n) - delta.dot(n).abs();
        if overlap < 0.0 {
            return false;
        }
        // Edge axes must beat face axes by a margin to win.
        if best.is_none_or(|(d, _)| overlap * bias < d) {
            let n = if delta.dot(n) < 0.0 { -n } else { n };
            best = Some((overlap * bias, n));
        }
        true
    };

    for i in 0..3 {
        if !test(a1.col(i), 1.0) || !test(a2.col(i), 1.0) {
            return None;
        }
    }
    for i in 0..3 {
        for j in 0..3 {
            if !test(a1.col(i).cross(a2.col(j)), 1.05) {
                return None;
            }
        }
    }
    let (_, normal) = best?;
    let depth = project(a1, h1, normal) + project(a2, h2, normal) - delta.dot(normal).abs();

    let mut sum = Vec3::ZERO;
    let mut count = 0u32;
    for p in box_corners(c2, a2, h2) {
        if inside_box(c1, a1, h1, p) {
            sum += p;
            count += 1;
        }
    }
    for p in box_corners(c1, a1, h1) {
        if inside_box(c2, a2, h2, p) {
            sum += p;
            count += 1;
        }
    }
    let point = if count > 0 {
        sum / count as f32
    } else {
        // Edge against edge: midway between the deepest supports.
        let support = |center: Vec3, axes: Mat3, half: Vec3, dir: Vec3| {
            center
                + axes.x_axis * half.x * axes.x_axis.dot(dir).signum()
                + axes.y_axis * half.y * axes.y_axis.dot(dir).signum()
                + axes.z_axis * half.z * axes.z_axis.dot(dir).signum()
        };
        (support(c1, a1, h1, normal) + support(c2, a2, h2, -normal)) * 0.5
    };

    Some(Contact {
        point,
        normal,
        depth: depth.max(0.0),
    })
}
