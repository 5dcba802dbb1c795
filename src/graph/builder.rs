use super::{
    CrossingLane, CrosswalkEncounter, Lane, LaneGraph, LaneKind, Node, Passage, Road, Side,
    TrafficVolume, TurnDirection,
};
use crate::error::GraphError;
use crate::math::{segment_intersection, Point2d};
use crate::{CrosswalkId, IntersectionId, LaneId, NodeId, RoadId};
use cgmath::MetricSpace;
use itertools::{iproduct, Itertools};
use smallvec::{smallvec, SmallVec};

/// The attributes of a lane.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneAttributes {
    pub kind: LaneKind,
    pub volume: TrafficVolume,
    /// The speed limit in km/h.
    pub speed_limit: f64,
    pub turn: TurnDirection,
    /// The intersection the lane passes through. Required for intersection lanes.
    pub intersection: Option<IntersectionId>,
    pub road: Option<RoadId>,
    /// Overrides the position at which the lane is considered to be entered.
    /// Defaults to the position of the first waypoint.
    pub start_position: Option<Point2d>,
}

impl Default for LaneAttributes {
    fn default() -> Self {
        Self {
            kind: LaneKind::Road,
            volume: TrafficVolume::Medium,
            speed_limit: 50.0,
            turn: TurnDirection::Straight,
            intersection: None,
            road: None,
            start_position: None,
        }
    }
}

/// Assembles a [LaneGraph].
///
/// Construction methods never fail; the structure is validated as a whole by [GraphBuilder::build].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    lanes: Vec<Lane>,
    roads: Vec<Road>,
    /// Pending `(from, to)` lane connections.
    connections: Vec<(LaneId, LaneId)>,
    /// Lanes which begin at a pre-existing waypoint.
    branches: Vec<(LaneId, NodeId)>,
    start_overrides: Vec<Option<Point2d>>,
    num_intersections: usize,
    num_crosswalks: usize,
    allow_dead_ends: bool,
}

impl GraphBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Permits lanes which lead nowhere. Vehicles reaching the end of such a lane leave the simulation.
    pub fn allow_dead_ends(&mut self, allow: bool) -> &mut Self {
        self.allow_dead_ends = allow;
        self
    }

    /// Adds a road to group lanes under.
    pub fn add_road(&mut self) -> RoadId {
        let id = RoadId::new(self.roads.len());
        self.roads.push(Road {
            id,
            lanes: vec![],
            passages: vec![],
        });
        id
    }

    /// Adds a group of in and out lanes to a road.
    pub fn add_passage(&mut self, road: RoadId, lanes_in: &[LaneId], lanes_out: &[LaneId]) {
        self.roads[road.index()].passages.push(Passage {
            lanes_in: lanes_in.to_vec(),
            lanes_out: lanes_out.to_vec(),
        });
    }

    /// Reserves an intersection ID.
    pub fn add_intersection(&mut self) -> IntersectionId {
        self.num_intersections += 1;
        IntersectionId::new(self.num_intersections - 1)
    }

    /// Reserves a crosswalk ID.
    pub fn add_crosswalk(&mut self) -> CrosswalkId {
        self.num_crosswalks += 1;
        CrosswalkId::new(self.num_crosswalks - 1)
    }

    /// Adds a lane through the given points, creating a waypoint for each.
    pub fn add_lane(&mut self, attribs: &LaneAttributes, points: &[Point2d]) -> LaneId {
        let id = LaneId::new(self.lanes.len());
        let nodes = self.add_nodes(id, None, points);
        if let Some(first) = nodes.first() {
            self.nodes[first.index()].starting_lanes.push(id);
        }
        self.push_lane(id, attribs, nodes);
        id
    }

    /// Adds a lane which branches off at `start`, the existing first waypoint of another lane.
    /// `points` are the lane's remaining waypoints.
    pub fn add_lane_from(
        &mut self,
        start: NodeId,
        attribs: &LaneAttributes,
        points: &[Point2d],
    ) -> LaneId {
        let id = LaneId::new(self.lanes.len());
        let mut nodes = vec![start];
        nodes.extend(self.add_nodes(id, Some(start), points));
        if let Some(node) = self.nodes.get_mut(start.index()) {
            node.starting_lanes.push(id);
        }
        self.branches.push((id, start));
        self.push_lane(id, attribs, nodes);
        id
    }

    /// The start waypoint of a lane already added, for branching other lanes off it.
    pub fn lane_start(&self, lane: LaneId) -> NodeId {
        self.lanes[lane.index()].nodes[0]
    }

    /// Specifies that the end of the `from` lane leads to the start of the `to` lane.
    pub fn connect(&mut self, from: LaneId, to: LaneId) {
        self.connections.push((from, to));
    }

    /// Specifies that `other` runs alongside `lane` on the given side,
    /// pairing their waypoints by index.
    pub fn link_parallel(&mut self, lane: LaneId, other: LaneId, side: Side) {
        let pairs = self.lanes[lane.index()]
            .nodes
            .iter()
            .copied()
            .zip(self.lanes[other.index()].nodes.iter().copied())
            .collect::<Vec<_>>();
        for (a, b) in pairs {
            self.nodes[a.index()].parallel[side.index()] = Some(b);
            self.nodes[b.index()].parallel[side.opposite().index()] = Some(a);
        }
    }

    /// Allows vehicles to change from `from` onto `to`, which lies on the given side.
    /// Each lane change lands `ahead` waypoints further along than where it started.
    pub fn allow_lane_change(&mut self, from: LaneId, to: LaneId, side: Side, ahead: usize) {
        let targets = self.lanes[to.index()].nodes.clone();
        if targets.len() < 2 {
            return;
        }
        let ahead = ahead.max(1);
        let sources = self.lanes[from.index()].nodes.clone();
        for (idx, node) in sources.into_iter().enumerate() {
            let target = targets[usize::min(idx + ahead, targets.len() - 1)];
            self.nodes[node.index()].lane_change[side.index()] = Some(target);
        }
    }

    /// Records that a lane passes over one of a crosswalk's crossings near the given waypoint.
    pub fn add_crosswalk_encounter(
        &mut self,
        lane: LaneId,
        crosswalk: CrosswalkId,
        crossing: usize,
        node_index: usize,
    ) {
        let lane = &mut self.lanes[lane.index()];
        lane.crosswalks.push(CrosswalkEncounter {
            crosswalk,
            crossing,
            node_index,
        });
        lane.crosswalks.sort_by_key(|c| c.node_index);
    }

    /// Records that `other` crosses `lane` at the given point.
    pub fn add_crossing(&mut self, lane: LaneId, other: LaneId, point: Point2d) {
        self.lanes[lane.index()]
            .crossings
            .push(CrossingLane { lane: other, point });
    }

    /// Validates the network and computes derived lane data.
    pub fn build(mut self) -> Result<LaneGraph, GraphError> {
        self.validate()?;
        self.resolve_connections()?;
        self.compute_lane_data();
        self.resolve_lane_changes()?;
        self.compute_crossings();

        log::info!(
            "built lane graph: {} lanes, {} waypoints, {} roads",
            self.lanes.len(),
            self.nodes.len(),
            self.roads.len()
        );

        Ok(LaneGraph {
            nodes: self.nodes,
            lanes: self.lanes,
            roads: self.roads,
            num_intersections: self.num_intersections,
            num_crosswalks: self.num_crosswalks,
        })
    }

    fn add_nodes(&mut self, lane: LaneId, prev: Option<NodeId>, points: &[Point2d]) -> Vec<NodeId> {
        let first = self.nodes.len();
        let ids = (first..first + points.len()).map(NodeId::new).collect::<Vec<_>>();
        for (idx, pos) in points.iter().enumerate() {
            let prev = if idx == 0 { prev } else { Some(ids[idx - 1]) };
            self.nodes.push(Node {
                pos: *pos,
                lane,
                next: ids.get(idx + 1).copied(),
                prev,
                parallel: [None; 2],
                lane_change: [None; 2],
                starting_lanes: SmallVec::new(),
            });
        }
        ids
    }

    fn push_lane(&mut self, id: LaneId, attribs: &LaneAttributes, nodes: Vec<NodeId>) {
        if let Some(road) = attribs.road {
            self.roads[road.index()].lanes.push(id);
        }
        self.start_overrides.push(attribs.start_position);
        self.lanes.push(Lane {
            id,
            road: attribs.road,
            nodes,
            kind: attribs.kind,
            volume: attribs.volume,
            speed_limit: attribs.speed_limit,
            turn: attribs.turn,
            intersection: attribs.intersection,
            crosswalks: vec![],
            crossings: vec![],
            start_pos: Point2d::new(0.0, 0.0),
            length: 0.0,
            successors: smallvec![],
            predecessors: smallvec![],
            changes_to: smallvec![],
            changes_from: smallvec![],
        });
    }

    fn validate(&self) -> Result<(), GraphError> {
        for (_, start) in &self.branches {
            if start.index() >= self.nodes.len() {
                return Err(GraphError::DanglingNode(*start));
            }
        }
        for lane in &self.lanes {
            if lane.nodes.len() < 2 {
                return Err(GraphError::EmptyLane(lane.id));
            }
        }
        for (_, start) in &self.branches {
            let owner = &self.lanes[self.nodes[start.index()].lane.index()];
            if owner.nodes[0] != *start {
                return Err(GraphError::NotLaneStart(*start));
            }
        }
        for lane in &self.lanes {
            match lane.intersection {
                None if lane.kind.is_intersection() => {
                    return Err(GraphError::MissingIntersection(lane.id));
                }
                Some(intersection) if intersection.index() >= self.num_intersections => {
                    return Err(GraphError::UnknownIntersection {
                        lane: lane.id,
                        intersection,
                    });
                }
                _ => {}
            }
            for encounter in &lane.crosswalks {
                if encounter.crosswalk.index() >= self.num_crosswalks {
                    return Err(GraphError::UnknownCrosswalk {
                        lane: lane.id,
                        crosswalk: encounter.crosswalk,
                    });
                }
                if encounter.node_index >= lane.nodes.len() {
                    return Err(GraphError::CrosswalkOutOfRange {
                        lane: lane.id,
                        index: encounter.node_index,
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_connections(&mut self) -> Result<(), GraphError> {
        for (from, to) in std::mem::take(&mut self.connections) {
            let last = self.lanes[from.index()].last_node();
            let start = self.lanes[to.index()].first_node();
            let node = &mut self.nodes[last.index()];
            match node.next {
                Some(next) if next != start => return Err(GraphError::AmbiguousSuccessor(from)),
                _ => node.next = Some(start),
            }
            self.nodes[start.index()].prev.get_or_insert(last);
        }
        Ok(())
    }

    fn compute_lane_data(&mut self) {
        let nodes = &self.nodes;
        for (lane, start) in self.lanes.iter_mut().zip(&self.start_overrides) {
            lane.length = lane
                .nodes
                .iter()
                .map(|id| nodes[id.index()].pos)
                .tuple_windows()
                .map(|(a, b)| a.distance(b))
                .sum();
            lane.start_pos = start.unwrap_or(nodes[lane.nodes[0].index()].pos);
            lane.successors = nodes[lane.last_node().index()]
                .next
                .map(|next| nodes[next.index()].starting_lanes.iter().copied().collect())
                .unwrap_or_default();
        }

        let edges = self
            .lanes
            .iter()
            .flat_map(|lane| lane.successors.iter().map(move |succ| (lane.id, *succ)))
            .collect::<Vec<_>>();
        for (from, to) in edges {
            self.lanes[to.index()].predecessors.push(from);
        }
        for lane in &mut self.lanes {
            lane.predecessors.sort();
            lane.predecessors.dedup();
        }
    }

    fn resolve_lane_changes(&mut self) -> Result<(), GraphError> {
        let mut changes = vec![];
        for lane in &self.lanes {
            if lane.successors.is_empty() && !self.allow_dead_ends {
                return Err(GraphError::MissingSuccessor(lane.id));
            }
            for node in &lane.nodes {
                let node = &self.nodes[node.index()];
                // A shared lane-start waypoint's links belong to the lane that owns it
                if node.lane != lane.id {
                    continue;
                }
                for side in [Side::Left, Side::Right] {
                    if let Some(target) = node.lane_change[side.index()] {
                        let target_lane = self.nodes[target.index()].lane;
                        if target_lane == lane.id {
                            return Err(GraphError::SelfLaneChange(lane.id));
                        }
                        changes.push((lane.id, side, target_lane));
                    }
                }
            }
        }

        for (from, side, to) in changes {
            if !self.lanes[from.index()].changes_to.contains(&(side, to)) {
                self.lanes[from.index()].changes_to.push((side, to));
            }
            if !self.lanes[to.index()].changes_from.contains(&(side, from)) {
                self.lanes[to.index()].changes_from.push((side, from));
            }
        }
        for lane in &mut self.lanes {
            lane.changes_from.sort_by_key(|(side, lane)| (*lane, side.index()));
        }
        Ok(())
    }

    /// Finds where lanes through the same intersection cross each other.
    fn compute_crossings(&mut self) {
        let nodes = &self.nodes;
        let polyline = |lane: &Lane| {
            lane.nodes
                .iter()
                .map(|id| nodes[id.index()].pos)
                .collect::<Vec<_>>()
        };

        let lanes = self
            .lanes
            .iter()
            .filter(|lane| lane.intersection.is_some())
            .collect::<Vec<_>>();
        let mut found = vec![];
        for (a, b) in iproduct!(&lanes, &lanes) {
            if a.id == b.id || a.intersection != b.intersection || a.nodes[0] == b.nodes[0] {
                continue;
            }
            if a.crossings.iter().any(|c| c.lane == b.id) {
                continue;
            }
            let (pa, pb) = (polyline(*a), polyline(*b));
            let point = iproduct!(pa.iter().tuple_windows(), pb.iter().tuple_windows())
                .find_map(|((a1, a2), (b1, b2))| segment_intersection(*a1, *a2, *b1, *b2));
            if let Some(point) = point {
                found.push((a.id, CrossingLane { lane: b.id, point }));
            }
        }

        for (lane, crossing) in found {
            self.lanes[lane.index()].crossings.push(crossing);
        }
    }
}
