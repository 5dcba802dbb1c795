//! The lane network that vehicles drive on.
//!
//! Waypoints ([Node]s) and [Lane]s live in dense arenas owned by the [LaneGraph]
//! and refer to each other by index. The graph is assembled with a [GraphBuilder]
//! and is immutable afterwards.

pub use builder::{GraphBuilder, LaneAttributes};

use crate::math::Point2d;
use crate::{CrosswalkId, IntersectionId, LaneId, NodeId, RoadId};
use smallvec::SmallVec;

mod builder;

/// A side of a lane, relative to its direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Left,
    Right,
}

/// What a lane is used for, which determines right of way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneKind {
    /// An ordinary lane between intersections.
    #[default]
    Road,
    /// A lane through an intersection which has right of way.
    IntersectionPriority,
    /// A lane through an intersection which must yield.
    IntersectionYield,
    /// A lane joining from a driveway or access road, which must yield.
    AccessYield,
    /// A lane circulating a roundabout.
    RoundaboutPriority,
    /// A lane entering a roundabout, which must yield.
    RoundaboutYield,
}

/// The amount of traffic a lane is expected to carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrafficVolume {
    Low,
    #[default]
    Medium,
    High,
}

/// The direction a lane turns, used for turn signals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TurnDirection {
    #[default]
    Straight,
    Left,
    Right,
}

/// A waypoint.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub(crate) pos: Point2d,
    pub(crate) lane: LaneId,
    pub(crate) next: Option<NodeId>,
    pub(crate) prev: Option<NodeId>,
    /// The waypoint at the same offset on the adjacent lane, indexed by [Side].
    pub(crate) parallel: [Option<NodeId>; 2],
    /// The waypoint a lane change lands on, indexed by [Side].
    pub(crate) lane_change: [Option<NodeId>; 2],
    /// The lanes which start at this waypoint. Empty unless this is a lane-start waypoint.
    pub(crate) starting_lanes: SmallVec<[LaneId; 2]>,
}

/// A point along a lane at which a crosswalk is met.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrosswalkEncounter {
    pub crosswalk: CrosswalkId,
    /// Which of the crosswalk's crossings the lane passes over.
    pub crossing: usize,
    /// The index of the waypoint along the lane nearest the crossing.
    pub node_index: usize,
}

/// Another lane which crosses this one.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrossingLane {
    pub lane: LaneId,
    pub point: Point2d,
}

/// A single lane of traffic.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lane {
    pub(crate) id: LaneId,
    pub(crate) road: Option<RoadId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) kind: LaneKind,
    pub(crate) volume: TrafficVolume,
    /// Speed limit in km/h.
    pub(crate) speed_limit: f64,
    pub(crate) turn: TurnDirection,
    pub(crate) intersection: Option<IntersectionId>,
    pub(crate) crosswalks: Vec<CrosswalkEncounter>,
    pub(crate) crossings: Vec<CrossingLane>,
    pub(crate) start_pos: Point2d,
    pub(crate) length: f64,
    pub(crate) successors: SmallVec<[LaneId; 4]>,
    pub(crate) predecessors: SmallVec<[LaneId; 4]>,
    /// Lanes this lane can change onto.
    pub(crate) changes_to: SmallVec<[(Side, LaneId); 2]>,
    /// Lanes from which a lane change lands on this lane.
    pub(crate) changes_from: SmallVec<[(Side, LaneId); 2]>,
}

/// A group of in and out lanes entering an intersection from one direction.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Passage {
    pub lanes_in: Vec<LaneId>,
    pub lanes_out: Vec<LaneId>,
}

/// A road, grouping the lanes that run along it.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Road {
    pub(crate) id: RoadId,
    pub(crate) lanes: Vec<LaneId>,
    pub(crate) passages: Vec<Passage>,
}

/// The lane network.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneGraph {
    nodes: Vec<Node>,
    lanes: Vec<Lane>,
    roads: Vec<Road>,
    num_intersections: usize,
    num_crosswalks: usize,
}

impl Side {
    pub(crate) fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    /// The other side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl LaneKind {
    /// Whether lanes of this kind pass through an intersection controller.
    pub fn is_intersection(self) -> bool {
        matches!(
            self,
            LaneKind::IntersectionPriority
                | LaneKind::IntersectionYield
                | LaneKind::RoundaboutPriority
                | LaneKind::RoundaboutYield
        )
    }

    /// Whether vehicles on lanes of this kind give way to crossing traffic.
    pub fn yields(self) -> bool {
        matches!(
            self,
            LaneKind::IntersectionYield | LaneKind::AccessYield | LaneKind::RoundaboutYield
        )
    }
}

impl TrafficVolume {
    /// The relative likelihood of spawning a vehicle on a lane with this volume.
    pub fn spawn_weight(self) -> u32 {
        match self {
            TrafficVolume::Low => 1,
            TrafficVolume::Medium => 2,
            TrafficVolume::High => 4,
        }
    }
}

impl Node {
    /// The position of the waypoint in world space.
    pub fn position(&self) -> Point2d {
        self.pos
    }

    /// The lane that owns this waypoint.
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// Whether one or more lanes start at this waypoint.
    pub fn is_lane_start(&self) -> bool {
        !self.starting_lanes.is_empty()
    }
}

impl Lane {
    /// The lane ID.
    pub fn id(&self) -> LaneId {
        self.id
    }

    /// The road this lane belongs to, if any.
    pub fn road(&self) -> Option<RoadId> {
        self.road
    }

    /// The waypoints along the lane, in order of travel.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The lane-start waypoint.
    pub fn first_node(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn last_node(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Finds the position of a waypoint along the lane.
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    pub fn kind(&self) -> LaneKind {
        self.kind
    }

    pub fn volume(&self) -> TrafficVolume {
        self.volume
    }

    /// The speed limit in km/h.
    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    /// The speed limit in m/s.
    pub fn speed_limit_ms(&self) -> f64 {
        self.speed_limit / 3.6
    }

    pub fn turn(&self) -> TurnDirection {
        self.turn
    }

    /// The intersection this lane passes through.
    pub fn intersection(&self) -> Option<IntersectionId> {
        self.intersection
    }

    /// The crosswalks met along this lane, in order of travel.
    pub fn crosswalks(&self) -> &[CrosswalkEncounter] {
        &self.crosswalks
    }

    /// The lanes which cross this one.
    pub fn crossings(&self) -> &[CrossingLane] {
        &self.crossings
    }

    /// The 2D position at which the lane is entered, used as the stop line.
    pub fn start_position(&self) -> Point2d {
        self.start_pos
    }

    /// The sum of the distances between consecutive waypoints.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The lanes that may be entered at the end of this lane.
    pub fn successors(&self) -> &[LaneId] {
        &self.successors
    }

    /// The lanes whose end leads to the start of this lane.
    pub fn predecessors(&self) -> &[LaneId] {
        &self.predecessors
    }

    /// The lanes this lane can change onto on the given side.
    pub fn lane_changes(&self, side: Side) -> impl Iterator<Item = LaneId> + '_ {
        self.changes_to
            .iter()
            .filter(move |(s, _)| *s == side)
            .map(|(_, lane)| *lane)
    }

    /// The lanes, and the side they change towards, from which a lane change lands on this lane.
    pub fn lane_change_sources(&self) -> &[(Side, LaneId)] {
        &self.changes_from
    }
}

impl Passage {
    /// The stop line of the passage: the entry points of its in-lanes.
    pub fn stop_line<'a>(&'a self, graph: &'a LaneGraph) -> impl Iterator<Item = Point2d> + 'a {
        self.lanes_in
            .iter()
            .map(|lane| graph.lane_start_position(*lane))
    }
}

impl Road {
    pub fn id(&self) -> RoadId {
        self.id
    }

    pub fn lanes(&self) -> &[LaneId] {
        &self.lanes
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }
}

impl LaneGraph {
    /// Gets a waypoint.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Gets a lane.
    pub fn lane(&self, id: LaneId) -> &Lane {
        &self.lanes[id.index()]
    }

    /// Gets a lane, if the ID belongs to this graph.
    pub fn get_lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id.index())
    }

    /// Gets a road.
    pub fn road(&self, id: RoadId) -> &Road {
        &self.roads[id.index()]
    }

    /// Returns an iterator over all the lanes in the network.
    pub fn iter_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter()
    }

    /// Returns an iterator over all the roads in the network.
    pub fn iter_roads(&self) -> impl Iterator<Item = &Road> {
        self.roads.iter()
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_intersections(&self) -> usize {
        self.num_intersections
    }

    pub fn num_crosswalks(&self) -> usize {
        self.num_crosswalks
    }

    /// The waypoint after this one.
    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).next
    }

    /// The waypoint before this one.
    pub fn previous(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).prev
    }

    /// The waypoint at the same offset on the adjacent lane.
    pub fn parallel(&self, node: NodeId, side: Side) -> Option<NodeId> {
        self.node(node).parallel[side.index()]
    }

    /// The waypoint a lane change from this one lands on.
    pub fn lane_change_target(&self, node: NodeId, side: Side) -> Option<NodeId> {
        self.node(node).lane_change[side.index()]
    }

    /// The lanes that may be entered from this waypoint.
    pub fn starting_lanes(&self, node: NodeId) -> &[LaneId] {
        &self.node(node).starting_lanes
    }

    /// The geometric length of a lane.
    pub fn lane_length(&self, lane: LaneId) -> f64 {
        self.lane(lane).length
    }

    /// The 2D position at which a lane is entered.
    pub fn lane_start_position(&self, lane: LaneId) -> Point2d {
        self.lane(lane).start_pos
    }

    /// The position of a waypoint.
    pub fn position(&self, node: NodeId) -> Point2d {
        self.node(node).pos
    }
}
