use super::{TickContext, UpcomingCrossing, Vehicle};
use crate::debug::debug_crossing;
use crate::graph::{Lane, LaneGraph};
use cgmath::prelude::*;

impl Vehicle {
    /// Rebuilds the queue of crossings ahead from the current lane and the lookahead.
    pub(crate) fn recompute_crosswalks(&mut self, graph: &LaneGraph) {
        self.crosswalks.clear();
        self.queue_crosswalks(graph.lane(self.lane), self.next_index);
        for lane in self.lookahead.clone() {
            self.queue_crosswalks(graph.lane(lane), 0);
        }
    }

    /// Queues the crossings met on `lane` at or after the waypoint `from`, in lane order.
    pub(crate) fn queue_crosswalks(&mut self, lane: &Lane, from: usize) {
        let mut encounters = lane
            .crosswalks()
            .iter()
            .filter(|enc| enc.node_index >= from)
            .collect::<Vec<_>>();
        encounters.sort_by_key(|enc| enc.node_index);
        self.crosswalks
            .extend(encounters.into_iter().map(|enc| UpcomingCrossing {
                crosswalk: enc.crosswalk,
                crossing: enc.crossing,
                lane: lane.id(),
            }));
    }

    /// Forgets crossings on lanes the vehicle no longer plans to drive.
    pub(crate) fn prune_crosswalks(&mut self) {
        let (lane, lookahead) = (self.lane, &self.lookahead);
        self.crosswalks
            .retain(|c| c.lane == lane || lookahead.contains(&c.lane));
    }

    /// Gives way at the next crossing unless it is clear, and tells the crosswalk when the
    /// vehicle starts driving over it.
    pub(crate) fn update_crosswalks(&mut self, ctx: &mut TickContext) {
        let params = ctx.params;
        self.crosswalk_stop = None;

        while let Some(next) = self.crosswalks.front().copied() {
            let Some(crosswalk) = ctx
                .crosswalks
                .get_mut(next.crosswalk.index())
                .and_then(Option::as_mut)
            else {
                log::warn!(
                    "no crosswalk attached to {:?}; vehicle {:?} ignores it",
                    next.crosswalk,
                    self.id
                );
                self.crosswalks.pop_front();
                continue;
            };

            let point = crosswalk.crossing_point(next.crossing);
            let ahead = (point - self.position).dot(self.forward);
            let passed = ahead < 0.0;
            if !passed && ahead > params.crosswalk_check_distance {
                break;
            }
            let clear = crosswalk.is_clear(next.crossing);
            debug_crossing(self.id, point, clear);
            if passed || (clear && ahead < params.crosswalk_enter_distance) {
                if clear {
                    crosswalk.notify_crossing_started(next.crossing);
                }
                log::trace!(
                    "vehicle {:?} crossing {:?}/{}",
                    self.id,
                    next.crosswalk,
                    next.crossing
                );
                self.crosswalks.pop_front();
                continue;
            }
            if !clear {
                let stop = ahead - self.half_length() - params.crosswalk_stop_margin;
                self.crosswalk_stop = Some(stop.max(0.0));
            }
            break;
        }
    }
}
