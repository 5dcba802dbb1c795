//! Precomputed lane-to-lane routing.
//!
//! For every ordered pair of lanes the [RouteTable] stores the next lane to target,
//! the number of lanes traversed and the distance travelled. It is built once from a
//! [LaneGraph] by relaxing routes outwards from each destination, one hop at a time,
//! over two kinds of edge: following a lane onto its successor, and changing onto an
//! adjacent lane, which costs a fixed penalty.
//!
//! Ties between routes of equal distance go to the route with the fewest hops,
//! then to the lowest next-hop lane index, then to a lane change over a follow.

use crate::graph::{LaneGraph, Side};
use crate::LaneId;

/// The default cost added to every lane change, in m.
pub const DEFAULT_LANE_CHANGE_PENALTY: f64 = 1.0;

/// How a vehicle moves from a lane towards the next lane of its route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HopKind {
    /// Already on the destination lane.
    Stay,
    /// Continue to the end of the lane and onto a successor.
    Follow,
    /// Change onto the adjacent lane on the given side.
    Change(Side),
}

/// The best known route from one lane to another.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteEntry {
    /// The next lane to target.
    pub next: LaneId,
    /// The number of lanes traversed before reaching the destination.
    pub hops: u32,
    /// The distance from the start of the origin lane to the start of the destination lane.
    pub distance: f64,
    pub kind: HopKind,
}

/// The routes from a single origin lane to every destination lane.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneRouteInfo {
    entries: Vec<Option<RouteEntry>>,
}

/// Next-hop routes between every pair of lanes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteTable {
    routes: Vec<LaneRouteInfo>,
    penalty: f64,
}

/// Incrementally builds a [RouteTable], one hop depth at a time.
pub struct RouteBuilder<'a> {
    graph: &'a LaneGraph,
    routes: Vec<LaneRouteInfo>,
    penalty: f64,
    depth: u32,
}

impl LaneRouteInfo {
    /// The route towards the destination lane, if it is reachable.
    pub fn get(&self, dst: LaneId) -> Option<&RouteEntry> {
        self.entries.get(dst.index())?.as_ref()
    }

    /// Returns an iterator over the reachable destinations and their routes.
    pub fn iter(&self) -> impl Iterator<Item = (LaneId, &RouteEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|e| (LaneId::new(idx), e)))
    }
}

impl RouteTable {
    /// Builds the route table for a lane graph.
    pub fn build(graph: &LaneGraph, lane_change_penalty: f64) -> Self {
        let mut builder = RouteBuilder::new(graph, lane_change_penalty);
        while builder.relax() {}
        let table = builder.finish();
        log::info!(
            "built route table for {} lanes ({} reachable pairs)",
            table.routes.len(),
            table.routes.iter().map(|r| r.iter().count()).sum::<usize>()
        );
        table
    }

    /// The lane change penalty the table was built with.
    pub fn lane_change_penalty(&self) -> f64 {
        self.penalty
    }

    /// The routes from a given origin lane.
    pub fn lane_info(&self, src: LaneId) -> &LaneRouteInfo {
        &self.routes[src.index()]
    }

    /// The route from `src` towards `dst`, if one exists.
    pub fn get(&self, src: LaneId, dst: LaneId) -> Option<&RouteEntry> {
        self.routes.get(src.index())?.get(dst)
    }

    /// Whether `dst` can be reached from `src`.
    pub fn is_reachable(&self, src: LaneId, dst: LaneId) -> bool {
        self.get(src, dst).is_some()
    }

    /// The number of lanes traversed between `src` and `dst`, or `None` if unreachable.
    pub fn hops(&self, src: LaneId, dst: LaneId) -> Option<u32> {
        self.get(src, dst).map(|e| e.hops)
    }

    /// The routing distance between `src` and `dst`, or infinity if unreachable.
    pub fn distance(&self, src: LaneId, dst: LaneId) -> f64 {
        self.get(src, dst).map_or(f64::INFINITY, |e| e.distance)
    }

    /// The next lane to target when travelling from `src` to `dst`.
    /// Returns `None` when already there or when there is no route.
    pub fn next_lane(&self, src: LaneId, dst: LaneId) -> Option<(LaneId, HopKind)> {
        self.get(src, dst)
            .filter(|e| e.kind != HopKind::Stay)
            .map(|e| (e.next, e.kind))
    }

    /// Expands the route from `src` to `dst` into the full sequence of lanes, including both ends.
    pub fn path(&self, src: LaneId, dst: LaneId) -> Option<Vec<(LaneId, HopKind)>> {
        let mut path = vec![];
        let mut current = src;
        loop {
            let entry = self.get(current, dst)?;
            path.push((current, entry.kind));
            if entry.kind == HopKind::Stay || path.len() > self.routes.len() {
                break;
            }
            current = entry.next;
        }
        Some(path)
    }
}

impl<'a> RouteBuilder<'a> {
    /// Starts building routes: every lane reaches itself at distance zero, and nothing else.
    pub fn new(graph: &'a LaneGraph, lane_change_penalty: f64) -> Self {
        let n = graph.num_lanes();
        let routes = (0..n)
            .map(|i| {
                let mut entries = vec![None; n];
                entries[i] = Some(RouteEntry {
                    next: LaneId::new(i),
                    hops: 0,
                    distance: 0.0,
                    kind: HopKind::Stay,
                });
                LaneRouteInfo { entries }
            })
            .collect();
        Self {
            graph,
            routes,
            penalty: lane_change_penalty,
            depth: 0,
        }
    }

    /// The hop depth of the next round of relaxation.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The best distance found so far between two lanes.
    pub fn distance(&self, src: LaneId, dst: LaneId) -> f64 {
        self.routes[src.index()]
            .get(dst)
            .map_or(f64::INFINITY, |e| e.distance)
    }

    /// Performs one round of relaxation: every route found at the current depth is
    /// extended backwards by one hop. Returns `false` once there was nothing left to extend.
    pub fn relax(&mut self) -> bool {
        if self.depth as usize > self.graph.num_lanes() {
            return false;
        }

        let depth = self.depth;
        let frontier = self
            .routes
            .iter()
            .enumerate()
            .flat_map(|(k, info)| {
                info.iter()
                    .filter(move |(_, e)| e.hops == depth)
                    .map(move |(dst, e)| (LaneId::new(k), dst, e.distance))
            })
            .collect::<Vec<_>>();
        if frontier.is_empty() {
            return false;
        }

        let graph = self.graph;
        let hops = depth + 1;
        for (lane, dst, dist) in frontier {
            let lane_data = graph.lane(lane);
            for (side, src) in lane_data.lane_change_sources() {
                self.offer(*src, dst, lane, dist + self.penalty, hops, HopKind::Change(*side));
            }
            for src in lane_data.predecessors() {
                let length = graph.lane_length(*src);
                self.offer(*src, dst, lane, dist + length, hops, HopKind::Follow);
            }
        }

        self.depth += 1;
        true
    }

    /// Completes the table, relaxing any remaining depths.
    pub fn finish(mut self) -> RouteTable {
        while self.relax() {}
        RouteTable {
            routes: self.routes,
            penalty: self.penalty,
        }
    }

    fn offer(
        &mut self,
        src: LaneId,
        dst: LaneId,
        next: LaneId,
        distance: f64,
        hops: u32,
        kind: HopKind,
    ) {
        let entry = &mut self.routes[src.index()].entries[dst.index()];
        if entry.map_or(true, |e| distance < e.distance) {
            *entry = Some(RouteEntry {
                next,
                hops,
                distance,
                kind,
            });
        }
    }
}
