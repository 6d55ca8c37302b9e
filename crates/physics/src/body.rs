use glam::{Mat3, Quat, Vec3};
use strata_common::{Aabb, Transform};
use strata_ecs::Component;

use crate::PhysicsError;
use crate::shape::Collider;

/// Rigid body state for one entity.
///
/// Mass, centre of mass and inertia are derived from the colliders once, at
/// construction, with the initial scale applied. Collision shapes follow
/// `scale` every step, mass properties do not.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// Fraction of velocity lost per second.
    pub damping: f32,
    /// 1.0 is perfectly elastic.
    pub restitution: f32,
    pub use_gravity: bool,
    colliders: Vec<Collider>,
    is_static: bool,
    mass: f32,
    inv_mass: f32,
    /// Body-local offset of the centre of mass.
    center_of_mass: Vec3,
    inertia: Mat3,
    inv_inertia: Mat3,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    force: Vec3,
    torque: Vec3,
    impulse: Vec3,
    angular_impulse: Vec3,
}

impl Component for RigidBody {}

impl RigidBody {
    /// A simulated body. Fails when a shape is degenerate or the colliders
    /// carry no mass.
    pub fn dynamic(transform: Transform, colliders: Vec<Collider>) -> Result<Self, PhysicsError> {
        for c in &colliders {
            c.shape.validate()?;
            if !c.mass.is_finite() || c.mass < 0.0 {
                return Err(PhysicsError::InvalidShape(format!("collider mass {}", c.mass)));
            }
        }
        let mass: f32 = colliders.iter().map(|c| c.mass).sum();
        if mass <= f32::EPSILON {
            return Err(PhysicsError::ZeroMass);
        }

        let scaled: Vec<Collider> = colliders.iter().map(|c| c.scaled(transform.scale)).collect();
        let center_of_mass = scaled
            .iter()
            .fold(Vec3::ZERO, |acc, c| acc + c.local.position * c.mass)
            / mass;

        // Parallel axis theorem about the shared centre of mass.
        let inertia = scaled.iter().fold(Mat3::ZERO, |acc, c| {
            let d = c.local.position - center_of_mass;
            let shift = Mat3::from_diagonal(Vec3::splat(d.length_squared())) - outer(d, d);
            acc + c.inertia() + shift * c.mass
        });
        let inv_inertia = if inertia.determinant().abs() > f32::EPSILON {
            inertia.inverse()
        } else {
            Mat3::ZERO
        };

        let mut body = Self::base(transform, colliders, false);
        body.mass = mass;
        body.inv_mass = 1.0 / mass;
        body.center_of_mass = center_of_mass;
        body.inertia = inertia;
        body.inv_inertia = inv_inertia;
        Ok(body)
    }

    /// An immovable body with infinite mass.
    pub fn fixed(transform: Transform, colliders: Vec<Collider>) -> Result<Self, PhysicsError> {
        for c in &colliders {
            c.shape.validate()?;
        }
        Ok(Self::base(transform, colliders, true))
    }

    fn base(transform: Transform, colliders: Vec<Collider>, is_static: bool) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            scale: transform.scale,
            damping: 0.0,
            restitution: 0.5,
            use_gravity: !is_static,
            colliders,
            is_static,
            mass: 0.0,
            inv_mass: 0.0,
            center_of_mass: Vec3::ZERO,
            inertia: Mat3::ZERO,
            inv_inertia: Mat3::ZERO,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            impulse: Vec3::ZERO,
            angular_impulse: Vec3::ZERO,
        }
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_gravity(mut self, use_gravity: bool) -> Self {
        self.use_gravity = use_gravity && !self.is_static;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.set_linear_velocity(velocity);
        self
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn colliders(&self) -> &[Collider] {
        &self.colliders
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    pub fn local_center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn local_inertia(&self) -> Mat3 {
        self.inertia
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Ignored on static bodies.
    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        if !self.is_static {
            self.linear_velocity = velocity;
        }
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        if !self.is_static {
            self.angular_velocity = velocity;
        }
    }

    pub fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
        }
    }

    pub fn world_center_of_mass(&self) -> Vec3 {
        self.position + self.rotation * self.center_of_mass
    }

    /// Inverse inertia tensor rotated into world axes.
    pub fn world_inv_inertia(&self) -> Mat3 {
        let r = Mat3::from_quat(self.rotation);
        r * self.inv_inertia * r.transpose()
    }

    /// Velocity of the material point currently at `point`.
    pub fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.world_center_of_mass())
    }

    /// World bounds of all colliders, `None` for a body without any.
    pub fn aabb(&self) -> Option<Aabb> {
        self.colliders
            .iter()
            .map(|c| c.scaled(self.scale).world_aabb(self.position, self.rotation))
            .reduce(|a, b| a.union(&b))
    }

    /// Adds a force for the next step only.
    pub fn apply_force(&mut self, force: Vec3) {
        if !self.is_static {
            self.force += force;
        }
    }

    pub fn apply_force_at(&mut self, force: Vec3, point: Vec3) {
        if !self.is_static {
            self.force += force;
            self.torque += (point - self.world_center_of_mass()).cross(force);
        }
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        if !self.is_static {
            self.torque += torque;
        }
    }

    /// Queues an instantaneous impulse at `point`; it changes velocity at
    /// the start of the next step.
    pub fn apply_impulse(&mut self, impulse: Vec3, point: Vec3) {
        if !self.is_static {
            self.impulse += impulse;
            self.angular_impulse += (point - self.world_center_of_mass()).cross(impulse);
        }
    }

    pub fn pending_impulse(&self) -> Vec3 {
        self.impulse
    }

    /// Semi-implicit Euler: velocities first, then the pose from the new
    /// velocities. Accumulators are cleared afterwards, statics included.
    pub(crate) fn integrate(&mut self, gravity: Vec3, dt: f32) {
        if !self.is_static {
            let inv_inertia = self.world_inv_inertia();
            self.linear_velocity += self.impulse * self.inv_mass;
            self.angular_velocity += inv_inertia * self.angular_impulse;

            if self.use_gravity {
                self.linear_velocity += gravity * dt;
            }
            self.linear_velocity += self.force * self.inv_mass * dt;
            self.angular_velocity += inv_inertia * self.torque * dt;

            let keep = (1.0 - self.damping).clamp(0.0, 1.0).powf(dt);
            self.linear_velocity *= keep;
            self.angular_velocity *= keep;

            let com = self.world_center_of_mass() + self.linear_velocity * dt;
            self.rotation = (Quat::from_scaled_axis(self.angular_velocity * dt) * self.rotation).normalize();
            self.position = com - self.rotation * self.center_of_mass;
        }
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
        self.impulse = Vec3::ZERO;
        self.angular_impulse = Vec3::ZERO;
    }
}

fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Mat3, b: Mat3) -> bool {
        (a - b).to_cols_array().iter().all(|v| v.abs() < 1e-4)
    }

    #[test]
    fn zero_mass_is_rejected() {
        let err = RigidBody::dynamic(Transform::default(), vec![Collider::sphere(1.0).with_mass(0.0)]);
        assert!(matches!(err, Err(PhysicsError::ZeroMass)));
        let err = RigidBody::dynamic(Transform::default(), Vec::new());
        assert!(matches!(err, Err(PhysicsError::ZeroMass)));
    }

    #[test]
    fn center_of_mass_is_mass_weighted() {
        let body = RigidBody::dynamic(
            Transform::default(),
            vec![
                Collider::sphere(0.5).with_mass(1.0).with_offset(Vec3::new(-1.0, 0.0, 0.0)),
                Collider::sphere(0.5).with_mass(3.0).with_offset(Vec3::new(1.0, 0.0, 0.0)),
            ],
        )
        .unwrap();
        assert_eq!(body.mass(), 4.0);
        assert!((body.local_center_of_mass() - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn composite_inertia_uses_parallel_axis() {
        let r = 0.5;
        let body = RigidBody::dynamic(
            Transform::default(),
            vec![
                Collider::sphere(r).with_offset(Vec3::new(-1.0, 0.0, 0.0)),
                Collider::sphere(r).with_offset(Vec3::new(1.0, 0.0, 0.0)),
            ],
        )
        .unwrap();
        let own = 0.4 * r * r;
        // Each unit mass sits 1 from the centre, so y and z gain 1 apiece.
        let expected = Mat3::from_diagonal(Vec3::new(2.0 * own, 2.0 * own + 2.0, 2.0 * own + 2.0));
        assert!(approx(body.local_inertia(), expected), "{:?}", body.local_inertia());
    }

    #[test]
    fn fixed_body_ignores_forces() {
        let mut body = RigidBody::fixed(Transform::default(), vec![Collider::cuboid(Vec3::ONE)])
            .unwrap()
            .with_gravity(true);
        body.apply_force(Vec3::X * 100.0);
        body.apply_impulse(Vec3::Y * 10.0, Vec3::ONE);
        body.set_linear_velocity(Vec3::Z);
        body.integrate(Vec3::new(0.0, -9.81, 0.0), 0.1);
        assert_eq!(body.position, Vec3::ZERO);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
        assert_eq!(body.inv_mass(), 0.0);
    }

    #[test]
    fn integration_is_velocity_then_position() {
        let mut body = RigidBody::dynamic(Transform::default(), vec![Collider::sphere(0.5)]).unwrap();
        body.integrate(Vec3::new(0.0, -10.0, 0.0), 0.5);
        assert!((body.linear_velocity().y + 5.0).abs() < 1e-6);
        assert!((body.position.y + 2.5).abs() < 1e-6);
    }

    #[test]
    fn forces_last_one_step() {
        let mut body = RigidBody::dynamic(Transform::default(), vec![Collider::sphere(0.5).with_mass(2.0)])
            .unwrap()
            .with_gravity(false);
        body.apply_force(Vec3::new(4.0, 0.0, 0.0));
        body.integrate(Vec3::ZERO, 1.0);
        assert!((body.linear_velocity().x - 2.0).abs() < 1e-6);
        body.integrate(Vec3::ZERO, 1.0);
        assert!((body.linear_velocity().x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn damping_decays_exponentially() {
        let mut body = RigidBody::dynamic(Transform::default(), vec![Collider::sphere(0.5)])
            .unwrap()
            .with_gravity(false)
            .with_damping(0.5)
            .with_velocity(Vec3::X * 4.0);
        body.integrate(Vec3::ZERO, 1.0);
        assert!((body.linear_velocity().x - 2.0).abs() < 1e-5);
        body.integrate(Vec3::ZERO, 2.0);
        assert!((body.linear_velocity().x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn off_centre_impulse_spins() {
        let mut body = RigidBody::dynamic(Transform::default(), vec![Collider::cuboid(Vec3::ONE)])
            .unwrap()
            .with_gravity(false);
        body.apply_impulse(Vec3::Z, Vec3::X);
        body.integrate(Vec3::ZERO, 0.01);
        // r × j = x × z = -y
        assert!(body.angular_velocity().y < 0.0);
        assert!(body.linear_velocity().z > 0.0);
    }
}
