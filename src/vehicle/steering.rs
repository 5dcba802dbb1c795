use super::{DriverParams, Vehicle};
use crate::graph::LaneGraph;
use crate::math::{project_local, rot90, signed_angle_deg};
use cgmath::prelude::*;
use itertools::Itertools;

impl Vehicle {
    /// Steers towards the next waypoint.
    pub(crate) fn update_steering(&mut self, graph: &LaneGraph) {
        let max_steer = self.attributes.max_steer;
        let target = graph.position(self.next_node);
        let local = project_local(target, self.position, self.forward, rot90(self.forward));
        let distance = local.to_vec().magnitude();

        let steer = if distance < 1e-6 {
            0.0
        } else if local.x < 0.0 {
            // Waypoint is behind: turn as hard as possible towards it
            max_steer.copysign(local.y)
        } else {
            (local.y / distance * max_steer).clamp(-max_steer, max_steer)
        };

        let previous = self.steer_angle;
        self.oversteering =
            previous != 0.0 && steer.signum() == previous.signum() && steer.abs() > previous.abs();
        self.steer_angle = steer;
    }

    /// Looks along the planned path for a sharp bend within the curve horizon.
    pub(crate) fn update_curve_lookahead(&mut self, graph: &LaneGraph, params: &DriverParams) {
        // The waypoint before `next_node` on the current lane
        let prev = self
            .next_index
            .checked_sub(1)
            .and_then(|idx| graph.lane(self.lane).nodes().get(idx).copied())
            .unwrap_or(self.prev_node);
        let prev = graph.position(prev);
        let points = std::iter::once(prev)
            .chain(self.upcoming_nodes(graph).map(|node| graph.position(node)));

        // Distances are measured from the vehicle's progress along its current segment
        let segment = graph.position(self.next_node) - prev;
        let mut travelled = if segment.magnitude2() > 1e-9 {
            -(self.position - prev).dot(segment.normalize()).max(0.0)
        } else {
            0.0
        };
        let mut curve_ahead = false;
        for (a, b, c) in points.tuple_windows() {
            travelled += a.distance(b);
            if travelled > params.curve_horizon {
                break;
            }
            let (first, second) = (b - a, c - b);
            if first.magnitude2() < 1e-9 || second.magnitude2() < 1e-9 {
                continue;
            }
            if signed_angle_deg(first, second).abs() > params.curve_threshold {
                curve_ahead = true;
                break;
            }
        }
        self.curve_ahead = curve_ahead;
    }
}

#[cfg(test)]
mod test {
    use crate::graph::{GraphBuilder, LaneAttributes};
    use crate::math::{Point2d, Vector2d};
    use crate::vehicle::fixture::World;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn steers_towards_next_waypoint() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);
        let max = vehicle.attributes().max_steer;

        vehicle.update_steering(&world.graph);
        assert_approx_eq!(vehicle.steer_angle(), 0.0);
        assert!(!vehicle.is_oversteering());

        // Drifted right of the lane: steer left
        vehicle.observe(Point2d::new(2.0, -4.0), Vector2d::new(1.0, 0.0));
        vehicle.update_steering(&world.graph);
        assert_approx_eq!(vehicle.steer_angle(), 0.8 * max);
        assert!(!vehicle.is_oversteering());

        vehicle.observe(Point2d::new(2.0, -4.0), Vector2d::new(0.0, -1.0));
        vehicle.update_steering(&world.graph);
        assert_approx_eq!(vehicle.steer_angle(), max);
        assert!(vehicle.is_oversteering());

        // Drifted left: steer right
        vehicle.observe(Point2d::new(2.0, 4.0), Vector2d::new(1.0, 0.0));
        vehicle.update_steering(&world.graph);
        assert_approx_eq!(vehicle.steer_angle(), -0.8 * max);
        assert!(!vehicle.is_oversteering());
    }

    #[test]
    fn detects_sharp_bends_within_horizon() {
        let mut builder = GraphBuilder::new();
        builder.allow_dead_ends(true);
        // Straight for 40 m, then a right angle
        let points = [
            Point2d::new(0.0, 0.0),
            Point2d::new(20.0, 0.0),
            Point2d::new(40.0, 0.0),
            Point2d::new(40.0, -20.0),
        ];
        let lane = builder.add_lane(&LaneAttributes::default(), &points);
        let mut world = World::new(builder.build().unwrap());
        let mut vehicle = world.spawn(lane, 0);

        vehicle.update_curve_lookahead(&world.graph, &world.params);
        assert!(!vehicle.curve_ahead());

        vehicle.observe(Point2d::new(15.0, 0.0), Vector2d::new(1.0, 0.0));
        vehicle.update_curve_lookahead(&world.graph, &world.params);
        assert!(vehicle.curve_ahead());
    }

    #[test]
    fn lateral_offset_is_not_a_bend() {
        let (mut world, lane) = World::straight(100.0);
        let mut vehicle = world.spawn(lane, 0);

        // Well off to the side of a straight lane, just short of the next waypoint
        vehicle.observe(Point2d::new(3.0, -3.5), Vector2d::new(1.0, 0.0));
        vehicle.update_curve_lookahead(&world.graph, &world.params);
        assert!(!vehicle.curve_ahead());
    }
}
