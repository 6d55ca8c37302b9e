//! Integer 2D predicates on the XZ plane shared by contour hole merging and
//! polygon triangulation. Points are `[x, y, z, flags]`; `y` is ignored.

pub type Point = [i32; 4];

pub fn area2(a: &Point, b: &Point, c: &Point) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

pub fn left(a: &Point, b: &Point, c: &Point) -> bool {
    area2(a, b, c) < 0
}

pub fn left_on(a: &Point, b: &Point, c: &Point) -> bool {
    area2(a, b, c) <= 0
}

pub fn collinear(a: &Point, b: &Point, c: &Point) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments share a point interior to both.
pub fn intersect_prop(a: &Point, b: &Point, c: &Point, d: &Point) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// `c` lies on the closed segment `ab`.
pub fn between(a: &Point, b: &Point, c: &Point) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

pub fn intersect(a: &Point, b: &Point, c: &Point, d: &Point) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

pub fn vequal(a: &Point, b: &Point) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

pub fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

pub fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Twice the signed area of a polygon.
pub fn polygon_area2(verts: &[Point]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        area += verts[i][0] * verts[j][2] - verts[j][0] * verts[i][2];
        j = i;
    }
    (area + 1) / 2
}

/// Squared distance from `(x, z)` to the segment `p -> q`.
pub fn dist_pt_seg_sqr(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}
