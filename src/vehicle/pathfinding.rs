//! Choosing which lanes to take.
//! This can be conceptualised as the vehicle's GPS navigation unit.

use super::Vehicle;
use crate::graph::LaneGraph;
use crate::route::RouteTable;
use crate::LaneId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

impl Vehicle {
    /// Sets the lane the vehicle should head for, and replans its lookahead.
    pub(crate) fn set_destination(
        &mut self,
        destination: Option<LaneId>,
        graph: &LaneGraph,
        routes: &RouteTable,
        rng: &mut StdRng,
    ) {
        self.destination = destination;
        self.replan(graph, routes, rng);
    }

    /// Discards the lookahead and plans it afresh from the current lane.
    pub(crate) fn replan(&mut self, graph: &LaneGraph, routes: &RouteTable, rng: &mut StdRng) {
        self.lookahead.clear();
        self.fill_lookahead(graph, routes, rng);
        self.after_next = self.node_after_next(graph);
        self.recompute_crosswalks(graph);
    }

    /// Extends the lookahead until it is full or reaches a dead end.
    pub(crate) fn fill_lookahead(&mut self, graph: &LaneGraph, routes: &RouteTable, rng: &mut StdRng) {
        while !self.lookahead.is_full() {
            let tail = self.lookahead.last().copied().unwrap_or(self.lane);
            match self.choose_next_lane(tail, graph, routes, rng) {
                Some(lane) => self.lookahead.push(lane),
                None => break,
            }
        }
    }

    /// Picks the lane to take after `tail`.
    ///
    /// With a destination, the successor with the shortest route to it wins, ties going to the
    /// lowest lane index. Otherwise, or if the destination cannot be reached, the pick is random.
    fn choose_next_lane(
        &self,
        tail: LaneId,
        graph: &LaneGraph,
        routes: &RouteTable,
        rng: &mut StdRng,
    ) -> Option<LaneId> {
        let candidates = graph.lane(tail).successors();
        let planned = |lane: LaneId| lane == self.lane || self.lookahead.contains(&lane);

        let directed = self
            .destination
            .filter(|dst| !planned(*dst))
            .and_then(|dst| {
                candidates
                    .iter()
                    .filter_map(|lane| routes.get(*lane, dst).map(|e| (*lane, e.distance)))
                    .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            });

        match directed {
            Some((lane, _)) => Some(lane),
            None => candidates.choose(rng).copied(),
        }
    }
}
