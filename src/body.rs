//! The physical side of a vehicle: what the decision pipeline's outputs are applied to.

use crate::math::{rotate_deg, Point2d, Vector2d};
use crate::vehicle::{DriveControls, VehicleAttributes};
use cgmath::prelude::*;

/// Drives a vehicle's position from brake force, motor torque and steer angle.
pub trait VehicleBody {
    /// Hands the resolved controls to the body. Takes effect from the next [VehicleBody::step].
    fn apply(&mut self, controls: &DriveControls);

    /// Advances the body by `dt` seconds.
    fn step(&mut self, dt: f64);

    /// The position of the centre of the vehicle.
    fn position(&self) -> Point2d;

    /// A unit vector aligned with the vehicle's heading.
    fn forward(&self) -> Vector2d;
}

/// A simple kinematic bicycle model.
#[derive(Clone, Debug)]
pub struct KinematicBody {
    pos: Point2d,
    dir: Vector2d,
    /// Speed in m/s.
    speed: f64,
    /// Distance from the vehicle's centre to the rear axle, in m.
    wheel_base: f64,
    max_torque: f64,
    max_brake: f64,
    max_acc: f64,
    max_dec: f64,
    controls: DriveControls,
}

impl KinematicBody {
    /// Creates a stationary body.
    pub fn new(attributes: &VehicleAttributes, pos: Point2d, dir: Vector2d) -> Self {
        Self {
            pos,
            dir: dir.normalize(),
            speed: 0.0,
            wheel_base: attributes.wheel_base,
            max_torque: attributes.max_motor_torque,
            max_brake: attributes.max_brake_force,
            max_acc: attributes.max_acc,
            max_dec: attributes.max_dec,
            controls: DriveControls::default(),
        }
    }

    /// The body's speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    fn acceleration(&self) -> f64 {
        let motor = (self.controls.motor / self.max_torque).clamp(0.0, 1.0);
        let brake = f64::min(self.controls.brake / self.max_brake, 1.0).max(0.0);
        motor * self.max_acc - brake * self.max_dec
    }
}

impl VehicleBody for KinematicBody {
    fn apply(&mut self, controls: &DriveControls) {
        self.controls = *controls;
    }

    fn step(&mut self, dt: f64) {
        let speed = f64::max(self.speed + dt * self.acceleration(), 0.0);
        let travel = 0.5 * (self.speed + speed) * dt;
        self.speed = speed;
        if travel <= 0.0 {
            return;
        }

        let new_pos = self.pos + travel * rotate_deg(self.dir, self.controls.steer);
        self.dir = calc_direction(self.pos, self.dir, new_pos, self.wheel_base);
        self.pos = new_pos;
    }

    fn position(&self) -> Point2d {
        self.pos
    }

    fn forward(&self) -> Vector2d {
        self.dir
    }
}

/// Computes the heading of a vehicle whose centre moves from `pos` to `new_pos`,
/// with its rear axle trailing `radius` behind.
fn calc_direction(pos: Point2d, dir: Vector2d, new_pos: Point2d, radius: f64) -> Vector2d {
    let b = pos - radius * dir;
    let v = pos - b;
    let h = (v.magnitude2() - radius.powi(2)) / (2.0 * (radius + v.dot(dir)));
    let bp = b + h * dir;
    (new_pos - bp).normalize()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn accelerates_and_brakes() {
        let attrs = VehicleAttributes::default();
        let mut body = KinematicBody::new(&attrs, Point2d::new(0.0, 0.0), Vector2d::new(1.0, 0.0));
        body.apply(&DriveControls {
            motor: attrs.max_motor_torque,
            ..Default::default()
        });
        for _ in 0..10 {
            body.step(0.1);
        }
        assert_approx_eq!(body.speed(), attrs.max_acc);
        assert!(body.position().x > 0.0);
        assert_approx_eq!(body.position().y, 0.0);

        body.apply(&DriveControls {
            brake: f64::INFINITY,
            ..Default::default()
        });
        for _ in 0..20 {
            body.step(0.1);
        }
        assert_eq!(body.speed(), 0.0);
    }

    #[test]
    fn positive_steer_turns_left() {
        let attrs = VehicleAttributes::default();
        let mut body = KinematicBody::new(&attrs, Point2d::new(0.0, 0.0), Vector2d::new(1.0, 0.0));
        body.apply(&DriveControls {
            motor: attrs.max_motor_torque,
            steer: 20.0,
            ..Default::default()
        });
        for _ in 0..10 {
            body.step(0.1);
        }
        assert!(body.position().y > 0.0);
        assert!(body.forward().y > 0.0);
        assert_approx_eq!(body.forward().magnitude(), 1.0);
    }
}
