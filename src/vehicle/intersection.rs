//! Checking in to and out of intersections.

use super::{Admission, TickContext, Vehicle};
use crate::control::IntersectionController;
use cgmath::MetricSpace;

impl Vehicle {
    /// Checks in to the next intersection once close enough, and tells its controller when the
    /// vehicle enters. Check-out happens once the vehicle passes the start of a lane beyond it.
    pub(crate) fn update_admission(&mut self, ctx: &mut TickContext) {
        let graph = ctx.graph;
        let params = ctx.params;
        self.intersection_stop = None;

        if self.admission.is_none() {
            let upcoming = self
                .lookahead
                .iter()
                .map(|lane| graph.lane(*lane))
                .find(|lane| lane.kind().is_intersection());
            let Some(lane) = upcoming else {
                return;
            };
            let Some(intersection) = lane.intersection() else {
                return;
            };
            if lane.start_position().distance(self.position) >= params.check_in_distance {
                return;
            }

            self.intersection_yield = false;
            let ticket = match ctx
                .intersections
                .get_mut(intersection.index())
                .and_then(Option::as_mut)
            {
                Some(controller) => {
                    let ticket = controller.check_in(self.id, lane.id(), ctx.outbox);
                    log::debug!(
                        "vehicle {:?} checked in to {:?} with {:?}",
                        self.id,
                        intersection,
                        ticket
                    );
                    Some(ticket)
                }
                None => {
                    log::warn!(
                        "no controller attached to {:?}; vehicle {:?} proceeds unchecked",
                        intersection,
                        self.id
                    );
                    None
                }
            };
            self.admission = Some(Admission {
                intersection,
                lane: lane.id(),
                ticket,
                entered: false,
            });
        }

        let Some(mut admission) = self.admission else {
            return;
        };
        if admission.entered {
            return;
        }
        // The lane plan changed underneath the admission
        if self.lane != admission.lane && !self.lookahead.contains(&admission.lane) {
            self.check_out(ctx.intersections);
            return;
        }

        let distance = graph
            .lane_start_position(admission.lane)
            .distance(self.position);
        let on_lane = self.lane == admission.lane && self.next_index > 0;
        if on_lane || (distance < params.enter_distance && !self.intersection_yield) {
            admission.entered = true;
            self.admission = Some(admission);
            if let (Some(ticket), Some(controller)) = (
                admission.ticket,
                ctx.intersections
                    .get_mut(admission.intersection.index())
                    .and_then(Option::as_mut),
            ) {
                controller.notify_entered(ticket, self.id);
            }
            log::debug!("vehicle {:?} entered {:?}", self.id, admission.intersection);
        } else if self.intersection_yield {
            self.intersection_stop = Some(f64::max(distance - self.half_length(), 0.0));
        }
    }

    /// Releases the vehicle's admission, if it holds one.
    pub(crate) fn check_out(&mut self, intersections: &mut [Option<Box<dyn IntersectionController>>]) {
        if let Some(admission) = self.admission.take() {
            if let (Some(ticket), Some(controller)) = (
                admission.ticket,
                intersections
                    .get_mut(admission.intersection.index())
                    .and_then(Option::as_mut),
            ) {
                controller.check_out(self.id, ticket);
            }
            log::debug!("vehicle {:?} checked out of {:?}", self.id, admission.intersection);
        }
        self.intersection_yield = false;
        self.intersection_stop = None;
    }
}
