//! Negotiating lane changes with the vehicles around.

use super::{LaneChange, LaneChangePhase, TickContext, Vehicle};
use crate::command::Command;
use crate::error::AgentError;
use crate::graph::{Lane, Side};
use crate::route::{HopKind, RouteTable};
use crate::sensor::TrafficView;
use crate::{LaneId, NodeId};
use cgmath::prelude::*;

impl Vehicle {
    /// Asks the vehicle to change onto the adjacent lane on the given side when it can.
    pub(crate) fn request_lane_change(&mut self, side: Side) {
        self.requested_change = Some(side);
    }

    /// Abandons any requested or in-progress lane change.
    pub(crate) fn reset_lane_change(&mut self) {
        if let Some(lc) = self.lane_change.take() {
            log::debug!(
                "vehicle {:?} abandoned its lane change during {:?}",
                self.id,
                lc.phase
            );
        }
        self.requested_change = None;
    }

    /// Steps the lane change state machine.
    pub(crate) fn update_lane_change(&mut self, ctx: &mut TickContext) -> Result<(), AgentError> {
        self.clear_stale_slowdown(ctx.peers);
        let lane = self.current_lane(ctx.graph)?;

        let Some(mut lc) = self.lane_change else {
            self.request_route_lane_change(ctx.routes, lane);
            // Requests stay pending until the vehicle is clear of the intersection
            if !lane.kind().is_intersection() {
                if let Some(side) = self.requested_change.take() {
                    log::debug!("vehicle {:?} requests to move {:?}", self.id, side);
                    self.lane_change = Some(LaneChange {
                        phase: LaneChangePhase::RequestToMove,
                        side,
                        timer: 0.0,
                        junction: None,
                    });
                }
            }
            return Ok(());
        };

        lc.timer += ctx.dt;
        match lc.phase {
            LaneChangePhase::NotChanging => {
                self.lane_change = None;
            }
            LaneChangePhase::RequestToMove => {
                if lc.timer >= ctx.params.lane_change_delay {
                    log::debug!("vehicle {:?} is ready to move {:?}", self.id, lc.side);
                    lc.phase = LaneChangePhase::ReadyToMove;
                    lc.timer = 0.0;
                }
                self.lane_change = Some(lc);
            }
            LaneChangePhase::ReadyToMove => {
                self.lane_change = Some(lc);
                self.try_move_over(lc, ctx)?;
            }
            LaneChangePhase::ChangingLane => {
                let done = match lc.junction {
                    Some((lane, index)) => self.lane != lane || self.next_index >= index + 2,
                    None => true,
                };
                if done {
                    log::debug!("vehicle {:?} completed its lane change", self.id);
                    self.lane_change = None;
                } else {
                    self.lane_change = Some(lc);
                }
            }
        }
        Ok(())
    }

    /// Moves onto the adjacent lane if nothing is in the way.
    fn try_move_over(&mut self, mut lc: LaneChange, ctx: &mut TickContext) -> Result<(), AgentError> {
        let graph = ctx.graph;
        let Some(target) = graph.lane_change_target(self.next_node, lc.side) else {
            log::debug!(
                "vehicle {:?} cannot move {:?} from {:?}; cancelling",
                self.id,
                lc.side,
                self.next_node
            );
            self.lane_change = None;
            return Ok(());
        };

        let target_lane = graph.node(target).lane();
        let index = graph
            .get_lane(target_lane)
            .and_then(|lane| lane.index_of(target))
            .ok_or(AgentError::UnknownLane {
                vehicle: self.id,
                lane: target_lane,
            })?;
        // Never land on a lane start; wait for the next waypoint
        if index == 0 || self.is_lane_change_blocked(target, target_lane, ctx) {
            return Ok(());
        }

        self.lane = target_lane;
        self.next_index = index;
        self.prev_node = self.next_node;
        self.next_node = target;
        lc.phase = LaneChangePhase::ChangingLane;
        lc.timer = 0.0;
        lc.junction = Some((target_lane, index));
        self.lane_change = Some(lc);
        self.replan(graph, ctx.routes, ctx.rng);
        log::debug!("vehicle {:?} moved onto lane {:?}", self.id, target_lane);
        Ok(())
    }

    /// Checks the gap on the target lane. Vehicles just behind are asked to slow down.
    fn is_lane_change_blocked(
        &self,
        target: NodeId,
        target_lane: LaneId,
        ctx: &mut TickContext,
    ) -> bool {
        let origin = self.front();
        let to_target = ctx.graph.position(target) - origin;
        let distance = to_target.magnitude();
        if distance > 1e-6
            && ctx
                .sensor
                .cast(origin, to_target / distance, distance, Some(self.id))
                .is_some()
        {
            return true;
        }

        let params = ctx.params;
        let mut blocked = false;
        for peer in ctx.peers.on_lane(target_lane).filter(|p| p.id != self.id) {
            let offset = (peer.position - self.position).dot(self.forward);
            if offset <= 0.0 && offset > -params.lane_change_rear_range {
                ctx.outbox.send(
                    peer.id,
                    Command::SlowDown {
                        requester: self.id,
                    },
                );
                blocked = true;
            } else if offset > 0.0 && offset < params.lane_change_front_clearance {
                blocked = true;
            }
        }
        blocked
    }

    /// Requests a lane change when the route to the destination calls for one.
    fn request_route_lane_change(&mut self, routes: &RouteTable, lane: &Lane) {
        if self.requested_change.is_some() {
            return;
        }
        let Some(dst) = self.destination else {
            return;
        };
        if let Some((_, HopKind::Change(side))) = routes.next_lane(lane.id(), dst) {
            self.requested_change = Some(side);
        }
    }

    /// Forgets a slowdown request once the requester is gone or has stopped changing lanes.
    fn clear_stale_slowdown(&mut self, peers: &TrafficView) {
        if let Some(requester) = self.slowdown {
            let active = peers
                .get(requester)
                .map_or(false, |peer| peer.lane_change != LaneChangePhase::NotChanging);
            if !active {
                self.slowdown = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{GraphBuilder, LaneAttributes};
    use crate::math::Point2d;
    use crate::sensor::SensorHit;
    use crate::vehicle::fixture::{FixedSensor, World};

    /// Two parallel lanes along the x axis; b is to the right of a.
    fn two_lanes() -> (World, LaneId, LaneId) {
        let mut builder = GraphBuilder::new();
        builder.allow_dead_ends(true);
        let line = |y: f64| (0..=20).map(|i| Point2d::new(5.0 * i as f64, y)).collect::<Vec<_>>();
        let a = builder.add_lane(&LaneAttributes::default(), &line(0.0));
        let b = builder.add_lane(&LaneAttributes::default(), &line(-3.5));
        builder.link_parallel(a, b, Side::Right);
        builder.allow_lane_change(a, b, Side::Right, 1);
        (World::new(builder.build().unwrap()), a, b)
    }

    fn tick(vehicle: &mut Vehicle, world: &mut World, count: usize) {
        for _ in 0..count {
            vehicle.update_lane_change(&mut world.ctx(0.1)).unwrap();
        }
    }

    /// Ticks through the signalling delay, up to the tick the vehicle becomes ready to move.
    fn tick_until_ready(vehicle: &mut Vehicle, world: &mut World) {
        tick(vehicle, world, 14);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::RequestToMove);
        for _ in 0..5 {
            if vehicle.lane_change_phase() != LaneChangePhase::RequestToMove {
                break;
            }
            tick(vehicle, world, 1);
        }
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::ReadyToMove);
    }

    #[test]
    fn changes_lane_after_delay() {
        let (mut world, a, b) = two_lanes();
        let mut vehicle = world.spawn(a, 2);
        vehicle.request_lane_change(Side::Right);

        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::RequestToMove);
        assert_eq!(vehicle.lane_change_side(), Some(Side::Right));
        tick_until_ready(&mut vehicle, &mut world);

        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::ChangingLane);
        assert_eq!(vehicle.lane(), b);
        assert_eq!(vehicle.next_node(), world.graph.lane(b).nodes()[4]);
        assert_eq!(vehicle.previous_node(), world.graph.lane(a).nodes()[3]);

        // Finishes two waypoints past the junction
        vehicle.next_index = 5;
        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::ChangingLane);
        vehicle.next_index = 6;
        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::NotChanging);
    }

    #[test]
    fn sensor_hit_defers_change() {
        let (mut world, a, _) = two_lanes();
        world.sensor = FixedSensor(Some(SensorHit {
            distance: 2.0,
            vehicle: None,
        }));
        let mut vehicle = world.spawn(a, 2);
        vehicle.request_lane_change(Side::Right);
        tick(&mut vehicle, &mut world, 30);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::ReadyToMove);
        assert_eq!(vehicle.lane(), a);
    }

    #[test]
    fn rear_vehicle_is_asked_to_slow_down() {
        let (mut world, a, b) = two_lanes();
        let mut vehicle = world.spawn(a, 4);
        let other = world.spawn(b, 2);
        world.view.insert(vehicle.publish());
        world.view.insert(other.publish());

        vehicle.request_lane_change(Side::Right);
        tick(&mut vehicle, &mut world, 20);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::ReadyToMove);
        assert_eq!(vehicle.lane(), a);

        let commands = world.outbox.drain().collect::<Vec<_>>();
        assert!(!commands.is_empty());
        assert!(commands.iter().all(|c| *c
            == (
                other.id(),
                Command::SlowDown {
                    requester: vehicle.id()
                }
            )));
    }

    #[test]
    fn slowdown_clears_when_requester_stops_changing() {
        let (mut world, a, b) = two_lanes();
        let requester = world.spawn(a, 4);
        let mut vehicle = world.spawn(b, 2);
        vehicle.apply_command(Command::SlowDown {
            requester: requester.id(),
        });

        // The requester is not changing lanes in the snapshot
        world.view.insert(requester.publish());
        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.slowdown_requester(), None);
    }

    #[test]
    fn missing_target_cancels() {
        let (mut world, a, _) = two_lanes();
        let mut vehicle = world.spawn(a, 2);
        vehicle.request_lane_change(Side::Left);
        tick_until_ready(&mut vehicle, &mut world);
        tick(&mut vehicle, &mut world, 1);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::NotChanging);
    }

    #[test]
    fn reset_abandons_change() {
        let (mut world, a, _) = two_lanes();
        let mut vehicle = world.spawn(a, 2);
        vehicle.request_lane_change(Side::Right);
        tick(&mut vehicle, &mut world, 3);
        vehicle.apply_command(Command::ResetLaneChange);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::NotChanging);
        tick(&mut vehicle, &mut world, 20);
        assert_eq!(vehicle.lane_change_phase(), LaneChangePhase::NotChanging);
    }
}
