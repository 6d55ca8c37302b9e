use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use strata_common::{Aabb, Transform};

use crate::PhysicsError;

/// Collision primitive in its own local frame. Capsules run along local Y.
///
/// Serialized with an explicit `kind` tag; an unrecognised kind fails to
/// deserialize instead of producing a default shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Shape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
}

impl Shape {
    pub fn validate(&self) -> Result<(), PhysicsError> {
        let ok = match *self {
            Shape::Box { half_extents } => half_extents.is_finite() && half_extents.cmpgt(Vec3::ZERO).all(),
            Shape::Sphere { radius } => radius.is_finite() && radius > 0.0,
            Shape::Capsule { radius, half_height } => {
                radius.is_finite() && half_height.is_finite() && radius > 0.0 && half_height >= 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidShape(format!("{self:?}")))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Box { .. } => "box",
            Shape::Sphere { .. } => "sphere",
            Shape::Capsule { .. } => "capsule",
        }
    }

    /// Principal moments of inertia about the shape centre for `mass`.
    pub fn principal_inertia(&self, mass: f32) -> Vec3 {
        match *self {
            Shape::Box { half_extents: h } => {
                let sq = h * h;
                Vec3::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y) * (mass / 3.0)
            }
            Shape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            Shape::Capsule { radius: r, half_height: h } => {
                // Split the mass between the cylinder and the two end caps by volume.
                let cylinder = std::f32::consts::PI * r * r * 2.0 * h;
                let caps = 4.0 / 3.0 * std::f32::consts::PI * r * r * r;
                let mc = mass * cylinder / (cylinder + caps);
                let ms = mass - mc;
                let axial = mc * r * r * 0.5 + ms * 0.4 * r * r;
                let lateral = mc * (h * h / 3.0 + r * r / 4.0) + ms * (0.4 * r * r + h * h + 0.75 * h * r);
                Vec3::new(lateral, axial, lateral)
            }
        }
    }

    /// The shape stretched by a body scale given in the shape's own axes.
    /// Round shapes take the largest factor across their round axes.
    pub fn scaled(&self, scale: Vec3) -> Shape {
        let s = scale.abs();
        match *self {
            Shape::Box { half_extents } => Shape::Box { half_extents: half_extents * s },
            Shape::Sphere { radius } => Shape::Sphere { radius: radius * s.max_element() },
            Shape::Capsule { radius, half_height } => Shape::Capsule {
                radius: radius * s.x.max(s.z),
                half_height: half_height * s.y,
            },
        }
    }

    /// Half extents of the world-axis box enclosing the shape at `rotation`.
    pub fn rotated_half_extents(&self, rotation: Quat) -> Vec3 {
        match *self {
            Shape::Box { half_extents } => {
                let m = Mat3::from_quat(rotation);
                m.x_axis.abs() * half_extents.x + m.y_axis.abs() * half_extents.y + m.z_axis.abs() * half_extents.z
            }
            Shape::Sphere { radius } => Vec3::splat(radius),
            Shape::Capsule { radius, half_height } => (rotation * Vec3::Y * half_height).abs() + Vec3::splat(radius),
        }
    }
}

/// One shape attached to a body, with its pose relative to the body origin
/// and its share of the body mass. Scale in `local` is ignored; the owning
/// body's scale applies through [`Collider::scaled`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub shape: Shape,
    #[serde(default)]
    pub local: Transform,
    #[serde(default = "default_collider_mass")]
    pub mass: f32,
}

fn default_collider_mass() -> f32 {
    1.0
}

impl Collider {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            local: Transform::default(),
            mass: default_collider_mass(),
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(Shape::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(Shape::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::new(Shape::Capsule { radius, half_height })
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.local.position = offset;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.local.rotation = rotation;
        self
    }

    /// Inertia tensor about the collider centre, in body axes.
    pub fn inertia(&self) -> Mat3 {
        let r = Mat3::from_quat(self.local.rotation);
        r * Mat3::from_diagonal(self.shape.principal_inertia(self.mass)) * r.transpose()
    }

    /// This collider on a body with `scale`: offset and shape both stretch.
    pub fn scaled(&self, scale: Vec3) -> Collider {
        if scale == Vec3::ONE {
            return *self;
        }
        let mut c = *self;
        c.shape = self.shape.scaled(scale);
        c.local.position = self.local.position * scale;
        c
    }

    /// World pose of this collider on a body at `position`/`rotation`.
    pub fn world_pose(&self, position: Vec3, rotation: Quat) -> (Vec3, Quat) {
        (position + rotation * self.local.position, rotation * self.local.rotation)
    }

    pub fn world_aabb(&self, position: Vec3, rotation: Quat) -> Aabb {
        let (center, rot) = self.world_pose(position, rotation);
        let half = self.shape.rotated_half_extents(rot);
        Aabb::new(center - half, center + half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_rejected() {
        let err = serde_json::from_str::<Shape>(r#"{"kind":"cone","radius":1.0}"#);
        assert!(err.is_err());
        let ok: Shape = serde_json::from_str(r#"{"kind":"sphere","radius":0.5}"#).unwrap();
        assert_eq!(ok, Shape::Sphere { radius: 0.5 });
    }

    #[test]
    fn collider_defaults_from_json() {
        let c: Collider = serde_json::from_str(r#"{"shape":{"kind":"box","half_extents":[1.0,2.0,3.0]}}"#).unwrap();
        assert_eq!(c.mass, 1.0);
        assert_eq!(c.local, Transform::default());
    }

    #[test]
    fn validate_rejects_degenerate_dimensions() {
        assert!(Shape::Sphere { radius: 0.0 }.validate().is_err());
        assert!(Shape::Box { half_extents: Vec3::new(1.0, -1.0, 1.0) }.validate().is_err());
        assert!(Shape::Capsule { radius: 0.3, half_height: 0.0 }.validate().is_ok());
        assert!(Shape::Sphere { radius: f32::NAN }.validate().is_err());
    }

    #[test]
    fn cube_inertia_matches_closed_form() {
        // Solid cube of side 2 and mass 6: I = m * (2² + 2²) / 12 = 4.
        let i = Shape::Box { half_extents: Vec3::ONE }.principal_inertia(6.0);
        assert!((i - Vec3::splat(4.0)).abs().max_element() < 1e-5);
    }

    #[test]
    fn capsule_without_cylinder_is_a_sphere() {
        let cap = Shape::Capsule { radius: 0.5, half_height: 0.0 }.principal_inertia(2.0);
        let sphere = Shape::Sphere { radius: 0.5 }.principal_inertia(2.0);
        assert!((cap - sphere).abs().max_element() < 1e-5);
    }

    #[test]
    fn scale_stretches_offset_and_extents() {
        let c = Collider::cuboid(Vec3::new(5.0, 0.25, 5.0))
            .with_offset(Vec3::new(5.0, -0.25, 5.0))
            .scaled(Vec3::new(2.0, 1.0, 2.0));
        let aabb = c.world_aabb(Vec3::ZERO, Quat::IDENTITY);
        assert!((aabb.min - Vec3::new(0.0, -0.5, 0.0)).abs().max_element() < 1e-5);
        assert!((aabb.max - Vec3::new(20.0, 0.0, 20.0)).abs().max_element() < 1e-5);

        let capsule = Shape::Capsule { radius: 0.5, half_height: 1.0 }.scaled(Vec3::new(2.0, 3.0, 1.0));
        assert_eq!(capsule, Shape::Capsule { radius: 1.0, half_height: 3.0 });
    }

    #[test]
    fn rotated_box_bounds_grow() {
        let shape = Shape::Box { half_extents: Vec3::new(1.0, 0.1, 0.1) };
        let flat = shape.rotated_half_extents(Quat::IDENTITY);
        let turned = shape.rotated_half_extents(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4));
        assert!((flat.x - 1.0).abs() < 1e-6);
        assert!(turned.z > flat.z);
        assert!(turned.x < flat.x);
    }
}
