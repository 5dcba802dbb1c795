use super::{DriveControls, DriverParams, LaneChangePhase, TickContext, Vehicle};
use crate::math::{SampledCurve, SmoothStep};

/// Target speeds below this are treated as standing still.
const MIN_TARGET_SPEED: f64 = 0.05; // m/s

/// The speed excess over the target at which the brakes are fully applied.
const BRAKE_RAMP: f64 = 5.0; // m/s

/// The sample spacing of the brake response curve.
const RESPONSE_STEP: f64 = 0.25; // m

/// Maps the distance to the nearest reason to stop onto a multiplier of the target speed.
///
/// The multiplier is zero up to the hard stop distance and rises smoothly to one at the
/// braking distance.
#[derive(Clone, Debug)]
pub(crate) struct BrakeResponse {
    curve: SampledCurve,
    hard_stop: f64,
    full_speed: f64,
}

impl BrakeResponse {
    pub fn new(params: &DriverParams) -> Self {
        let hard_stop = params.hard_stop_distance;
        let full_speed = f64::max(params.braking_distance, hard_stop + RESPONSE_STEP);
        let ease = SmoothStep::new(hard_stop, 0.0, full_speed, 1.0);
        let curve = SampledCurve::new(hard_stop, full_speed, RESPONSE_STEP, |x| ease.y(x));
        Self {
            curve,
            hard_stop,
            full_speed,
        }
    }

    /// The fraction of the target speed to keep with a stop `distance` m ahead.
    pub fn multiplier(&self, distance: f64) -> f64 {
        if distance <= self.hard_stop {
            0.0
        } else if distance >= self.full_speed {
            1.0
        } else {
            self.curve.sample(distance)
        }
    }
}

impl Vehicle {
    /// Works out the target speed and sets the drive controls to reach it.
    pub(crate) fn resolve_speed(&mut self, ctx: &TickContext) {
        let params = ctx.params;
        let lane = ctx.graph.lane(self.lane);

        let mut target = lane.speed_limit_ms() * self.speed_factor;
        if self.curve_ahead {
            target = target.min(params.curve_speed / 3.6);
        }
        if self.lane_change_phase() == LaneChangePhase::ChangingLane {
            target *= params.lane_change_speed_factor;
        }
        if self.slowdown.is_some() {
            target *= params.slowdown_factor;
        }
        let nearest_stop = [self.obstacle(), self.intersection_stop, self.crosswalk_stop]
            .into_iter()
            .flatten()
            .fold(f64::INFINITY, f64::min);
        target *= ctx.response.multiplier(nearest_stop);
        self.target_speed = target;

        let attribs = &self.attributes;
        let hard_stop = self
            .obstacle()
            .map_or(false, |dist| dist < params.hard_stop_distance);

        let mut controls = if hard_stop {
            DriveControls::full_brake()
        } else if target < MIN_TARGET_SPEED {
            DriveControls {
                brake: attribs.max_brake_force,
                ..Default::default()
            }
        } else if self.speed < target {
            DriveControls {
                motor: attribs.max_motor_torque,
                ..Default::default()
            }
        } else if self.speed > target + params.brake_tolerance {
            let amount = f64::min((self.speed - target) / BRAKE_RAMP, 1.0);
            DriveControls {
                brake: amount * attribs.max_brake_force,
                ..Default::default()
            }
        } else {
            DriveControls::default()
        };
        controls.steer = self.steer_angle;
        self.controls = controls;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::Command;
    use crate::math::Point2d;
    use crate::vehicle::fixture::World;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn brake_response_is_monotonic() {
        let response = BrakeResponse::new(&DriverParams::default());
        assert_eq!(response.multiplier(0.0), 0.0);
        assert_eq!(response.multiplier(2.5), 0.0);
        assert_eq!(response.multiplier(25.0), 1.0);
        assert_eq!(response.multiplier(f64::INFINITY), 1.0);

        let samples = (0..120).map(|i| response.multiplier(0.25 * i as f64));
        let mut last = 0.0;
        for value in samples {
            assert!(value >= last);
            assert!((0.0..=1.0).contains(&value));
            last = value;
        }
    }

    #[test]
    fn accelerates_towards_speed_limit() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);
        vehicle.resolve_speed(&world.ctx(0.1));

        assert_approx_eq!(vehicle.target_speed(), 50.0 / 3.6);
        let controls = vehicle.controls();
        assert_eq!(controls.brake, 0.0);
        assert_eq!(controls.motor, vehicle.attributes().max_motor_torque);
    }

    #[test]
    fn slows_for_curves_lane_changes_and_requests() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);

        vehicle.curve_ahead = true;
        vehicle.resolve_speed(&world.ctx(0.1));
        assert_approx_eq!(vehicle.target_speed(), 25.0 / 3.6);

        let requester = world.spawn(lane, 3).id();
        vehicle.apply_command(Command::SlowDown { requester });
        vehicle.resolve_speed(&world.ctx(0.1));
        assert_approx_eq!(vehicle.target_speed(), 0.5 * 25.0 / 3.6);
    }

    #[test]
    fn stops_hard_for_close_obstacles() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);
        vehicle.obstacle_ahead = true;
        vehicle.obstacle_distance = 2.0;
        vehicle.resolve_speed(&world.ctx(0.1));

        assert_eq!(vehicle.target_speed(), 0.0);
        assert_eq!(vehicle.controls().brake, f64::INFINITY);
        assert_eq!(vehicle.controls().motor, 0.0);
    }

    #[test]
    fn brakes_when_too_fast() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);
        vehicle.crosswalk_stop = Some(1.0);

        // 20 m/s, derived from displacement
        vehicle.update_motion(0.1);
        vehicle.observe(Point2d::new(2.0, 0.0), vehicle.forward());
        vehicle.update_motion(0.1);
        assert_approx_eq!(vehicle.speed(), 20.0);

        vehicle.resolve_speed(&world.ctx(0.1));
        assert_eq!(vehicle.target_speed(), 0.0);
        assert_eq!(vehicle.controls().brake, vehicle.attributes().max_brake_force);
        assert_eq!(vehicle.controls().motor, 0.0);
    }
}
