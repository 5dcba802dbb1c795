pub(crate) use self::acceleration::BrakeResponse;
use crate::command::{Command, Outbox};
use crate::control::{Crosswalk, IntersectionController, Ticket};
use crate::error::AgentError;
use crate::graph::{Lane, LaneGraph, Side};
use crate::math::{Point2d, Vector2d};
use crate::route::RouteTable;
use crate::sensor::{ObstacleSensor, PeerState};
use crate::{CrosswalkId, IntersectionId, LaneId, NodeId, VehicleId};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use rand::rngs::StdRng;
use std::collections::VecDeque;

mod acceleration;
mod crosswalk;
mod intersection;
mod lane_change;
mod pathfinding;
mod progress;
mod sensing;
mod signals;
mod steering;

/// The number of upcoming lanes a vehicle plans ahead.
pub(crate) const LOOKAHEAD: usize = 4;

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID
    pub(crate) id: VehicleId,
    attributes: VehicleAttributes,
    /// The world space coordinates of the centre of the vehicle.
    position: Point2d,
    /// A unit vector in world space aligned with the vehicle's heading.
    forward: Vector2d,
    /// The position observed on the previous tick.
    last_position: Option<Point2d>,
    /// The speed in m/s, derived from displacement.
    speed: f64,
    /// The lane the vehicle is currently on.
    lane: LaneId,
    /// The index of `next_node` within the current lane.
    next_index: usize,
    prev_node: NodeId,
    next_node: NodeId,
    after_next: Option<NodeId>,
    /// The lanes the vehicle will enter after the current one, in order.
    lookahead: ArrayVec<LaneId, LOOKAHEAD>,
    destination: Option<LaneId>,
    lane_change: Option<LaneChange>,
    /// A lane change asked for but not yet started.
    requested_change: Option<Side>,
    /// The vehicle which asked this one to slow down for its lane change.
    slowdown: Option<VehicleId>,
    admission: Option<Admission>,
    /// Whether the intersection controller has told the vehicle to give way.
    intersection_yield: bool,
    crosswalks: VecDeque<UpcomingCrossing>,
    curve_ahead: bool,
    obstacle_ahead: bool,
    /// Distance from the front of the vehicle to the nearest obstacle, in m.
    obstacle_distance: f64,
    /// Distance to stop before the intersection, while yielding there.
    intersection_stop: Option<f64>,
    /// Distance to stop before a crosswalk, while yielding there.
    crosswalk_stop: Option<f64>,
    /// The steer angle in degrees; positive is to the left.
    steer_angle: f64,
    oversteering: bool,
    /// The target speed in m/s.
    target_speed: f64,
    controls: DriveControls,
    signals: Signals,
    frozen: bool,
    exited: bool,
    /// A scalar multiplied with the speed limit to get the desired speed.
    speed_factor: f64,
}

/// The attributes of a simulated vehicle.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleAttributes {
    /// The vehicle width in m.
    pub width: f64,
    /// The vehicle length in m.
    pub length: f64,
    /// Distance from vehicle's centre to centre of the rear axle.
    pub wheel_base: f64,
    /// The maximum steer angle in degrees.
    pub max_steer: f64,
    /// The motor torque at full throttle.
    pub max_motor_torque: f64,
    /// The brake force at full braking.
    pub max_brake_force: f64,
    /// The acceleration at full throttle, in m/s^2.
    pub max_acc: f64,
    /// The deceleration at full braking, a positive number in m/s^2.
    pub max_dec: f64,
}

/// The tunable parameters of the driving behaviour.
/// Distances are in m, times in s and speeds in km/h.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverParams {
    /// How long a lane change is signalled before the vehicle moves over.
    pub lane_change_delay: f64,
    pub blink_period: f64,
    /// How close to an intersection's stop line a vehicle checks in.
    pub check_in_distance: f64,
    /// How close to an intersection's stop line a vehicle is considered to have entered.
    pub enter_distance: f64,
    pub curve_horizon: f64,
    /// The heading change between consecutive segments, in degrees, which counts as a curve.
    pub curve_threshold: f64,
    pub curve_speed: f64,
    pub sensor_range: f64,
    /// Obstacles closer than this cause full braking.
    pub hard_stop_distance: f64,
    /// Yield causes closer than this reduce the target speed.
    pub braking_distance: f64,
    pub crosswalk_check_distance: f64,
    pub crosswalk_enter_distance: f64,
    /// How far before a crossing point a yielding vehicle stops.
    pub crosswalk_stop_margin: f64,
    /// How far behind a lane-changing vehicle other vehicles in the target lane block the change.
    pub lane_change_rear_range: f64,
    /// How far ahead of a lane-changing vehicle other vehicles in the target lane block the change.
    pub lane_change_front_clearance: f64,
    /// Multiplies the target speed of a vehicle asked to slow down.
    pub slowdown_factor: f64,
    /// Multiplies the target speed while changing lanes.
    pub lane_change_speed_factor: f64,
    /// How far ahead a turning lane starts the turn signal.
    pub signal_distance: f64,
    /// How far above the target speed, in m/s, a vehicle goes before braking.
    pub brake_tolerance: f64,
    /// The routing cost of a lane change, used when building the [RouteTable](crate::RouteTable).
    pub lane_change_penalty: f64,
}

/// The outputs of the decision pipeline, handed to the [VehicleBody](crate::VehicleBody).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveControls {
    pub brake: f64,
    pub motor: f64,
    /// The steer angle in degrees; positive is to the left.
    pub steer: f64,
}

/// The phase of a lane change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneChangePhase {
    #[default]
    NotChanging,
    /// The vehicle is signalling its intention to change lanes.
    RequestToMove,
    /// The vehicle is waiting for a gap.
    ReadyToMove,
    /// The vehicle has moved onto the target lane and is merging over.
    ChangingLane,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TurnSignal {
    #[default]
    Off,
    Left,
    Right,
}

/// The vehicle's lamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct Signals {
    pub turn: TurnSignal,
    /// Whether the turn signal lamp is lit at this instant.
    pub lamp_on: bool,
    pub brake_light: bool,
    blink_timer: f64,
}

/// An in-progress lane change.
#[derive(Clone, Copy, Debug)]
struct LaneChange {
    phase: LaneChangePhase,
    side: Side,
    /// Time spent in the current phase.
    timer: f64,
    /// The lane moved onto and the index of the waypoint landed on, once committed.
    junction: Option<(LaneId, usize)>,
}

/// The vehicle's standing with the next intersection.
#[derive(Clone, Copy, Debug)]
struct Admission {
    intersection: IntersectionId,
    lane: LaneId,
    /// `None` if no controller was attached.
    ticket: Option<Ticket>,
    entered: bool,
}

/// A crosswalk the vehicle will drive over.
#[derive(Clone, Copy, Debug)]
struct UpcomingCrossing {
    crosswalk: CrosswalkId,
    crossing: usize,
    /// The lane on which the crossing is met.
    lane: LaneId,
}

/// Everything a vehicle's decision pipeline can see and touch during a tick.
pub(crate) struct TickContext<'a> {
    pub dt: f64,
    pub graph: &'a LaneGraph,
    pub routes: &'a RouteTable,
    pub params: &'a DriverParams,
    pub response: &'a BrakeResponse,
    pub peers: &'a crate::sensor::TrafficView,
    pub sensor: &'a dyn ObstacleSensor,
    pub intersections: &'a mut [Option<Box<dyn IntersectionController>>],
    pub crosswalks: &'a mut [Option<Box<dyn Crosswalk>>],
    pub outbox: &'a mut Outbox,
    pub rng: &'a mut StdRng,
}

impl Default for VehicleAttributes {
    fn default() -> Self {
        Self {
            width: 1.8,
            length: 4.5,
            wheel_base: 1.5,
            max_steer: 35.0,
            max_motor_torque: 400.0,
            max_brake_force: 1500.0,
            max_acc: 3.0,
            max_dec: 6.0,
        }
    }
}

impl Default for DriverParams {
    fn default() -> Self {
        Self {
            lane_change_delay: 1.5,
            blink_period: 0.6,
            check_in_distance: 50.0,
            enter_distance: 3.0,
            curve_horizon: 30.0,
            curve_threshold: 30.0,
            curve_speed: 25.0,
            sensor_range: 20.0,
            hard_stop_distance: 2.5,
            braking_distance: 25.0,
            crosswalk_check_distance: 20.0,
            crosswalk_enter_distance: 4.0,
            crosswalk_stop_margin: 3.0,
            lane_change_rear_range: 12.0,
            lane_change_front_clearance: 6.0,
            slowdown_factor: 0.5,
            lane_change_speed_factor: 0.8,
            signal_distance: 30.0,
            brake_tolerance: 1.0,
            lane_change_penalty: crate::route::DEFAULT_LANE_CHANGE_PENALTY,
        }
    }
}

impl DriveControls {
    /// Full braking, no throttle, wheels straight.
    pub fn full_brake() -> Self {
        Self {
            brake: f64::INFINITY,
            motor: 0.0,
            steer: 0.0,
        }
    }
}

impl Vehicle {
    /// Creates a new vehicle at the given waypoint of a lane, facing along the lane.
    /// The lookahead is empty until [Vehicle::replan] is called.
    pub(crate) fn new(
        id: VehicleId,
        attributes: &VehicleAttributes,
        graph: &LaneGraph,
        lane: LaneId,
        node_index: usize,
    ) -> Self {
        let nodes = graph.lane(lane).nodes();
        let idx = usize::min(node_index, nodes.len() - 2);
        let (prev, next) = (nodes[idx], nodes[idx + 1]);
        let position = graph.position(prev);
        let forward = (graph.position(next) - position).normalize();
        Self {
            id,
            attributes: *attributes,
            position,
            forward,
            last_position: None,
            speed: 0.0,
            lane,
            next_index: idx + 1,
            prev_node: prev,
            next_node: next,
            after_next: nodes.get(idx + 2).copied(),
            lookahead: ArrayVec::new(),
            destination: None,
            lane_change: None,
            requested_change: None,
            slowdown: None,
            admission: None,
            intersection_yield: false,
            crosswalks: VecDeque::new(),
            curve_ahead: false,
            obstacle_ahead: false,
            obstacle_distance: f64::INFINITY,
            intersection_stop: None,
            crosswalk_stop: None,
            steer_angle: 0.0,
            oversteering: false,
            target_speed: 0.0,
            controls: DriveControls::default(),
            signals: Signals::default(),
            frozen: false,
            exited: false,
            speed_factor: 1.0,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn attributes(&self) -> &VehicleAttributes {
        &self.attributes
    }

    /// The coordinates in world space of the centre of the vehicle.
    pub fn position(&self) -> Point2d {
        self.position
    }

    /// A unit vector in world space aligned with the vehicle's heading.
    pub fn forward(&self) -> Vector2d {
        self.forward
    }

    /// The vehicle's speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The lane the vehicle is on.
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// The waypoint the vehicle is driving towards.
    pub fn next_node(&self) -> NodeId {
        self.next_node
    }

    /// The waypoint the vehicle last passed.
    pub fn previous_node(&self) -> NodeId {
        self.prev_node
    }

    /// The lanes the vehicle plans to enter after its current one.
    pub fn lookahead(&self) -> &[LaneId] {
        &self.lookahead
    }

    pub fn destination(&self) -> Option<LaneId> {
        self.destination
    }

    pub fn lane_change_phase(&self) -> LaneChangePhase {
        self.lane_change
            .map_or(LaneChangePhase::NotChanging, |lc| lc.phase)
    }

    /// The side of the lane change in progress, if any.
    pub fn lane_change_side(&self) -> Option<Side> {
        self.lane_change.map(|lc| lc.side)
    }

    /// The vehicle whose lane change this vehicle is slowing down for.
    pub fn slowdown_requester(&self) -> Option<VehicleId> {
        self.slowdown
    }

    /// The ticket held for the next intersection, if the vehicle has checked in.
    pub fn intersection_ticket(&self) -> Option<Ticket> {
        self.admission.and_then(|a| a.ticket)
    }

    /// Whether the vehicle has entered the intersection it is checked in to.
    pub fn has_entered_intersection(&self) -> bool {
        self.admission.map_or(false, |a| a.entered)
    }

    /// Whether the vehicle has been told to give way at its next intersection.
    pub fn is_yielding_at_intersection(&self) -> bool {
        self.intersection_yield
    }

    /// The distance to the nearest obstacle ahead, if one was sensed.
    pub fn obstacle(&self) -> Option<f64> {
        self.obstacle_ahead.then_some(self.obstacle_distance)
    }

    pub fn curve_ahead(&self) -> bool {
        self.curve_ahead
    }

    /// The steer angle in degrees; positive is to the left.
    pub fn steer_angle(&self) -> f64 {
        self.steer_angle
    }

    /// Whether the steer angle grew in magnitude on the last tick.
    pub fn is_oversteering(&self) -> bool {
        self.oversteering
    }

    /// The target speed in m/s.
    pub fn target_speed(&self) -> f64 {
        self.target_speed
    }

    /// The controls resolved on the last tick.
    pub fn controls(&self) -> &DriveControls {
        &self.controls
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Whether the vehicle has driven off the end of the network.
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub(crate) fn set_speed_factor(&mut self, factor: f64) {
        self.speed_factor = factor;
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
        if frozen {
            self.controls = DriveControls::full_brake();
        }
    }

    /// Records the pose reported by the vehicle's body.
    pub(crate) fn observe(&mut self, position: Point2d, forward: Vector2d) {
        self.position = position;
        if forward.magnitude2() > 0.0 {
            self.forward = forward.normalize();
        }
    }

    /// The state other vehicles see during a tick.
    pub(crate) fn publish(&self) -> PeerState {
        PeerState {
            id: self.id,
            position: self.position,
            forward: self.forward,
            speed: self.speed,
            length: self.attributes.length,
            width: self.attributes.width,
            lane: self.lane,
            lookahead: self.lookahead.clone(),
            lane_change: self.lane_change_phase(),
            next_node: self.next_node,
            holding: self.intersection_yield,
        }
    }

    /// Delivers a command sent by another vehicle or a collaborator.
    pub(crate) fn apply_command(&mut self, command: Command) {
        match command {
            Command::SlowDown { requester } => self.slowdown = Some(requester),
            Command::IntersectionYield(yielding) => self.intersection_yield = yielding,
            Command::ResetLaneChange => self.reset_lane_change(),
        }
    }

    /// Runs the decision pipeline for one tick.
    pub(crate) fn update(&mut self, ctx: &mut TickContext) -> Result<(), AgentError> {
        if self.frozen {
            self.controls = DriveControls::full_brake();
            return Ok(());
        }

        self.update_motion(ctx.dt);
        self.update_node_progress(ctx)?;
        if self.exited {
            return Ok(());
        }
        self.update_lane_change(ctx)?;
        self.update_turn_signal(ctx);
        self.update_admission(ctx);
        self.update_steering(ctx.graph);
        self.update_curve_lookahead(ctx.graph, ctx.params);
        self.sense_obstacles(ctx);
        self.update_crosswalks(ctx);
        self.update_brake_light(ctx.params);
        self.resolve_speed(ctx);
        Ok(())
    }

    /// Gets the current lane, failing if it is not part of the graph.
    fn current_lane<'g>(&self, graph: &'g LaneGraph) -> Result<&'g Lane, AgentError> {
        graph.get_lane(self.lane).ok_or(AgentError::UnknownLane {
            vehicle: self.id,
            lane: self.lane,
        })
    }

    /// Half the vehicle's length in m.
    fn half_length(&self) -> f64 {
        0.5 * self.attributes.length
    }

    /// The centre of the front of the vehicle.
    fn front(&self) -> Point2d {
        self.position + self.half_length() * self.forward
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! A small world for driving a single vehicle's pipeline by hand.

    use super::*;
    use crate::graph::{GraphBuilder, LaneAttributes};
    use crate::sensor::{SensorHit, TrafficView};
    use rand::SeedableRng;
    use slotmap::SlotMap;

    /// A sensor which always reports the same thing.
    pub struct FixedSensor(pub Option<SensorHit>);

    impl ObstacleSensor for FixedSensor {
        fn cast(&self, _: Point2d, _: Vector2d, _: f64, _: Option<VehicleId>) -> Option<SensorHit> {
            self.0
        }
    }

    pub struct World {
        pub graph: LaneGraph,
        pub routes: RouteTable,
        pub params: DriverParams,
        pub response: BrakeResponse,
        pub view: TrafficView,
        pub sensor: FixedSensor,
        pub intersections: Vec<Option<Box<dyn IntersectionController>>>,
        pub crosswalks: Vec<Option<Box<dyn Crosswalk>>>,
        pub outbox: Outbox,
        pub rng: StdRng,
        pub ids: SlotMap<VehicleId, ()>,
    }

    impl World {
        pub fn new(graph: LaneGraph) -> Self {
            let params = DriverParams::default();
            Self {
                routes: RouteTable::build(&graph, params.lane_change_penalty),
                response: BrakeResponse::new(&params),
                params,
                view: TrafficView::new(),
                sensor: FixedSensor(None),
                intersections: (0..graph.num_intersections()).map(|_| None).collect(),
                crosswalks: (0..graph.num_crosswalks()).map(|_| None).collect(),
                outbox: Outbox::default(),
                rng: StdRng::seed_from_u64(0),
                ids: SlotMap::with_key(),
                graph,
            }
        }

        /// A single straight 50 km/h lane along the x axis, with a waypoint every 5 m.
        pub fn straight(length: f64) -> (Self, LaneId) {
            let mut builder = GraphBuilder::new();
            builder.allow_dead_ends(true);
            let count = (length / 5.0) as usize + 1;
            let points = (0..count)
                .map(|i| Point2d::new(5.0 * i as f64, 0.0))
                .collect::<Vec<_>>();
            let lane = builder.add_lane(&LaneAttributes::default(), &points);
            (Self::new(builder.build().unwrap()), lane)
        }

        pub fn spawn(&mut self, lane: LaneId, node_index: usize) -> Vehicle {
            let id = self.ids.insert(());
            let mut vehicle =
                Vehicle::new(id, &VehicleAttributes::default(), &self.graph, lane, node_index);
            vehicle.replan(&self.graph, &self.routes, &mut self.rng);
            vehicle
        }

        pub fn ctx(&mut self, dt: f64) -> TickContext<'_> {
            TickContext {
                dt,
                graph: &self.graph,
                routes: &self.routes,
                params: &self.params,
                response: &self.response,
                peers: &self.view,
                sensor: &self.sensor,
                intersections: &mut self.intersections,
                crosswalks: &mut self.crosswalks,
                outbox: &mut self.outbox,
                rng: &mut self.rng,
            }
        }
    }
}
