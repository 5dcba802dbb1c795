//! Tracking the vehicle along its waypoints.

use super::{TickContext, Vehicle, LOOKAHEAD};
use crate::error::AgentError;
use crate::graph::LaneGraph;
use crate::math::{rot90, segment_intersection};
use crate::{LaneId, NodeId};
use arrayvec::ArrayVec;
use cgmath::prelude::*;

/// Half the width of the segment, transverse to the vehicle, used to detect passing a waypoint.
const TRANSVERSAL_HALF_WIDTH: f64 = 4.0; // m

/// A vehicle further than this from the waypoint it is driving towards has lost its track.
const LOST_TRACK_DISTANCE: f64 = 100.0; // m

impl Vehicle {
    /// Derives the vehicle's speed from its displacement since the previous tick.
    pub(crate) fn update_motion(&mut self, dt: f64) {
        if let Some(last) = self.last_position {
            if dt > 0.0 {
                self.speed = last.distance(self.position) / dt;
            }
        }
        self.last_position = Some(self.position);
    }

    /// Advances the waypoint pointers if the vehicle has passed its next waypoint.
    /// At most one waypoint is passed per call.
    pub(crate) fn update_node_progress(&mut self, ctx: &mut TickContext) -> Result<(), AgentError> {
        let graph = ctx.graph;
        self.current_lane(graph)?;
        if graph.position(self.next_node).distance(self.position) > LOST_TRACK_DISTANCE {
            return Err(AgentError::LostTrack {
                vehicle: self.id,
                lane: self.lane,
                index: self.next_index,
            });
        }
        if self.has_passed_next_node(graph) {
            self.advance_node(ctx)?;
        }
        Ok(())
    }

    /// Whether the vehicle lies beyond the plane separating the next waypoint from the one after it.
    pub(crate) fn has_passed_next_node(&self, graph: &LaneGraph) -> bool {
        let next = graph.position(self.next_node);
        match self.after_next {
            Some(after) => {
                let after = graph.position(after);
                let half = TRANSVERSAL_HALF_WIDTH * rot90(self.forward);
                let crossed =
                    segment_intersection(self.position - half, self.position + half, next, after)
                        .is_some();
                crossed || self.position.distance2(after) < self.position.distance2(next)
            }
            None => {
                // The end of the line: compare against the direction of the last segment
                let prev = graph.position(self.prev_node);
                (self.position - next).dot(next - prev) > 0.0
            }
        }
    }

    fn advance_node(&mut self, ctx: &mut TickContext) -> Result<(), AgentError> {
        let graph = ctx.graph;
        self.prev_node = self.next_node;
        self.next_index += 1;

        if self.next_index >= self.current_lane(graph)?.nodes().len() {
            match self.lookahead.first().copied() {
                Some(lane) => self.enter_lane(lane, ctx)?,
                None => {
                    log::debug!(
                        "vehicle {:?} left the network at the end of lane {:?}",
                        self.id,
                        self.lane
                    );
                    self.exited = true;
                    return Ok(());
                }
            }
        }

        let lane = self.current_lane(graph)?;
        self.next_node = lane.nodes()[self.next_index];
        self.after_next = self.node_after_next(graph);
        log::trace!(
            "vehicle {:?} passed {:?}, heading for {:?}",
            self.id,
            self.prev_node,
            self.next_node
        );

        if graph.node(self.prev_node).is_lane_start() {
            let inside = self.admission.map_or(false, |admission| admission.entered);
            if inside && !lane.kind().is_intersection() {
                self.check_out(ctx.intersections);
            }
            self.prune_crosswalks();
        }
        Ok(())
    }

    /// Commits to the first lane of the lookahead. Its start waypoint becomes the next waypoint.
    fn enter_lane(&mut self, lane: LaneId, ctx: &mut TickContext) -> Result<(), AgentError> {
        if ctx.graph.get_lane(lane).is_none() {
            return Err(AgentError::UnknownLane {
                vehicle: self.id,
                lane,
            });
        }
        self.lane = lane;
        self.next_index = 0;
        self.lookahead.remove(0);
        let planned = self.lookahead.len();
        self.fill_lookahead(ctx.graph, ctx.routes, ctx.rng);
        let added = self.lookahead[planned..]
            .iter()
            .copied()
            .collect::<ArrayVec<LaneId, LOOKAHEAD>>();
        for lane in added {
            self.queue_crosswalks(ctx.graph.lane(lane), 0);
        }

        if self.destination == Some(lane) {
            log::info!("vehicle {:?} reached its destination {:?}", self.id, lane);
            self.destination = None;
        }
        Ok(())
    }

    /// The waypoint after `next_node`, which may be the start of the first lookahead lane.
    pub(crate) fn node_after_next(&self, graph: &LaneGraph) -> Option<NodeId> {
        graph
            .lane(self.lane)
            .nodes()
            .get(self.next_index + 1)
            .copied()
            .or_else(|| self.lookahead.first().map(|lane| graph.lane(*lane).first_node()))
    }

    /// Returns an iterator over the waypoints still ahead of the vehicle, starting with `next_node`.
    pub(crate) fn upcoming_nodes<'g>(
        &'g self,
        graph: &'g LaneGraph,
    ) -> impl Iterator<Item = NodeId> + 'g {
        let current = graph.lane(self.lane).nodes().get(self.next_index..).unwrap_or(&[]);
        let ahead = self
            .lookahead
            .iter()
            .flat_map(move |lane| graph.lane(*lane).nodes().iter());
        current.iter().chain(ahead).copied()
    }
}
