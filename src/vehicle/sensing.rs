//! Looking for vehicles in the way.

use super::{TickContext, Vehicle};
use crate::debug::debug_ray;
use crate::graph::Lane;
use crate::math::rotate_deg;
use crate::sensor::PeerState;
use crate::LaneId;
use arrayvec::ArrayVec;
use cgmath::prelude::*;

/// Below this steer angle a single straight ray is cast.
const SINGLE_RAY_STEER: f64 = 5.0; // degrees

/// Below this steer angle two rays are cast; above it, three.
const DOUBLE_RAY_STEER: f64 = 15.0; // degrees

/// The gap kept to the crossing point when giving way to a crossing vehicle.
const CROSSING_CLEARANCE: f64 = 2.0; // m

impl Vehicle {
    /// Finds the nearest obstacle ahead, from the sensor rays and, inside intersections, from
    /// the vehicles on shared and crossing lanes.
    pub(crate) fn sense_obstacles(&mut self, ctx: &TickContext) {
        let mut nearest = self.cast_rays(ctx);

        let lane = self.intersection_lane(ctx);
        if let Some(lane) = lane {
            let shared = std::iter::once(self.lane)
                .chain(self.lookahead.iter().copied().take(2))
                .collect::<ArrayVec<LaneId, 3>>();
            for peer in ctx.peers.iter().filter(|peer| peer.id != self.id) {
                if shared.contains(&peer.lane) {
                    if let Some(gap) = self.gap_to(peer) {
                        if gap < ctx.params.sensor_range {
                            nearest = nearest.min(gap);
                        }
                    }
                }
            }
            nearest = nearest.min(self.crossing_obstacle(lane, ctx));
        }

        self.obstacle_ahead = nearest.is_finite();
        self.obstacle_distance = nearest;
    }

    /// Casts one to three rays from the front of the vehicle, fanning out towards the steer
    /// direction, and returns the distance to the nearest hit.
    fn cast_rays(&self, ctx: &TickContext) -> f64 {
        let steer = self.steer_angle;
        let angles: &[f64] = if steer.abs() < SINGLE_RAY_STEER {
            &[0.0]
        } else if steer.abs() < DOUBLE_RAY_STEER {
            &[0.0, 0.5]
        } else {
            &[0.0, 0.5, 1.0]
        };

        let origin = self.front();
        let range = ctx.params.sensor_range;
        angles
            .iter()
            .map(|fraction| rotate_deg(self.forward, fraction * steer))
            .filter_map(|dir| {
                debug_ray(self.id, origin, origin + range * dir);
                ctx.sensor.cast(origin, dir, range, Some(self.id))
            })
            .map(|hit| hit.distance)
            .fold(f64::INFINITY, f64::min)
    }

    /// The intersection lane whose crossings must be watched, if the vehicle is inside an intersection.
    fn intersection_lane<'g>(&self, ctx: &TickContext<'g>) -> Option<&'g Lane> {
        let lane = ctx.graph.lane(self.lane);
        if lane.kind().is_intersection() {
            return Some(lane);
        }
        self.admission
            .filter(|admission| admission.entered)
            .map(|admission| ctx.graph.lane(admission.lane))
    }

    /// The bumper to bumper gap to a vehicle ahead, if it is ahead.
    fn gap_to(&self, peer: &PeerState) -> Option<f64> {
        let offset = (peer.position - self.position).dot(self.forward);
        (offset > 0.0).then(|| f64::max(offset - self.half_length() - 0.5 * peer.length, 0.0))
    }

    /// The distance to stop at to give way to vehicles on lanes crossing this one.
    fn crossing_obstacle(&self, lane: &Lane, ctx: &TickContext) -> f64 {
        let own_yields = lane.kind().yields();
        let mut nearest = f64::INFINITY;

        for crossing in lane.crossings() {
            let own = (crossing.point - self.position).dot(self.forward);
            if own < -self.half_length() {
                // Already clear of the crossing point
                continue;
            }
            let their_yields = ctx.graph.lane(crossing.lane).kind().yields();

            let must_yield = ctx
                .peers
                .iter()
                .filter(|peer| peer.id != self.id && peer.is_on_or_entering(crossing.lane))
                .any(|peer| {
                    let theirs = peer.longitudinal_offset(crossing.point);
                    if theirs < -0.5 * peer.length {
                        return false;
                    }
                    if theirs <= 0.0 {
                        return true;
                    }
                    // Held back at the stop line, so it will not come through
                    if peer.holding {
                        return false;
                    }
                    match (own_yields, their_yields) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => theirs < own || (theirs == own && peer.id < self.id),
                    }
                });

            if must_yield {
                let distance = own - self.half_length() - CROSSING_CLEARANCE;
                nearest = nearest.min(distance.max(0.0));
            }
        }
        nearest
    }
}
