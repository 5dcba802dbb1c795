use crate::body::{KinematicBody, VehicleBody};
use crate::command::{Command, Outbox};
use crate::control::{Crosswalk, IntersectionController};
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::graph::{LaneGraph, Side};
use crate::route::RouteTable;
use crate::sensor::{ObstacleSensor, TrafficView, VehicleSensor};
use crate::vehicle::{BrakeResponse, DriverParams, TickContext, Vehicle, VehicleAttributes};
use crate::{CrosswalkId, IntersectionId, LaneId, VehicleId};
use cgmath::MetricSpace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, WeightedIndex};
use slotmap::{SecondaryMap, SlotMap};

/// A traffic simulation.
pub struct Simulation {
    /// The lane network.
    graph: LaneGraph,
    /// The precomputed routes through the lane network.
    routes: RouteTable,
    params: DriverParams,
    /// The brake response curve derived from `params`.
    response: BrakeResponse,
    /// The vehicles being simulated.
    vehicles: SlotMap<VehicleId, Vehicle>,
    /// The physical bodies the vehicles drive.
    bodies: SecondaryMap<VehicleId, Box<dyn VehicleBody>>,
    /// The intersection controllers, indexed by [IntersectionId].
    intersections: Vec<Option<Box<dyn IntersectionController>>>,
    /// The crosswalks, indexed by [CrosswalkId].
    crosswalks: Vec<Option<Box<dyn Crosswalk>>>,
    /// Replaces the built-in [VehicleSensor] if set.
    sensor: Option<Box<dyn ObstacleSensor>>,
    /// Commands awaiting delivery at the start of the next frame.
    outbox: Outbox,
    rng: StdRng,
    /// The current frame of simulation.
    frame: usize,
    /// Debugging information from the previously simulated frame.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Simulation {
    /// Creates a new simulation over the given lane network.
    pub fn new(graph: LaneGraph, routes: RouteTable, params: DriverParams) -> Self {
        Self::with_rng(graph, routes, params, StdRng::from_entropy())
    }

    /// Creates a new simulation whose random choices are reproducible.
    pub fn with_seed(graph: LaneGraph, routes: RouteTable, params: DriverParams, seed: u64) -> Self {
        Self::with_rng(graph, routes, params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(graph: LaneGraph, routes: RouteTable, params: DriverParams, rng: StdRng) -> Self {
        Self {
            intersections: (0..graph.num_intersections()).map(|_| None).collect(),
            crosswalks: (0..graph.num_crosswalks()).map(|_| None).collect(),
            response: BrakeResponse::new(&params),
            graph,
            routes,
            params,
            vehicles: SlotMap::with_key(),
            bodies: SecondaryMap::new(),
            sensor: None,
            outbox: Outbox::default(),
            rng,
            frame: 0,
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        }
    }

    /// Binds a controller to an intersection of the network.
    pub fn attach_intersection(
        &mut self,
        id: IntersectionId,
        controller: Box<dyn IntersectionController>,
    ) {
        match self.intersections.get_mut(id.index()) {
            Some(slot) => *slot = Some(controller),
            None => log::warn!("{:?} is not part of the lane graph", id),
        }
    }

    /// Binds a crosswalk to a crosswalk of the network.
    pub fn attach_crosswalk(&mut self, id: CrosswalkId, crosswalk: Box<dyn Crosswalk>) {
        match self.crosswalks.get_mut(id.index()) {
            Some(slot) => *slot = Some(crosswalk),
            None => log::warn!("{:?} is not part of the lane graph", id),
        }
    }

    /// Replaces the built-in sensor, which only sees other vehicles.
    pub fn set_obstacle_sensor(&mut self, sensor: Box<dyn ObstacleSensor>) {
        self.sensor = Some(sensor);
    }

    /// Adds a vehicle at the start of a lane, driving a [KinematicBody].
    pub fn add_vehicle(&mut self, attributes: &VehicleAttributes, lane: LaneId) -> VehicleId {
        self.add_vehicle_at(attributes, lane, 0)
    }

    /// Adds a vehicle at the given waypoint of a lane, driving a [KinematicBody].
    pub fn add_vehicle_at(
        &mut self,
        attributes: &VehicleAttributes,
        lane: LaneId,
        node_index: usize,
    ) -> VehicleId {
        let id = self.insert_vehicle(attributes, lane, node_index);
        let vehicle = &self.vehicles[id];
        let body = KinematicBody::new(attributes, vehicle.position(), vehicle.forward());
        self.bodies.insert(id, Box::new(body));
        id
    }

    /// Adds a vehicle at the start of a lane, driving the given body.
    pub fn add_vehicle_with_body(
        &mut self,
        attributes: &VehicleAttributes,
        lane: LaneId,
        body: Box<dyn VehicleBody>,
    ) -> VehicleId {
        let id = self.insert_vehicle(attributes, lane, 0);
        self.vehicles[id].observe(body.position(), body.forward());
        self.bodies.insert(id, body);
        id
    }

    fn insert_vehicle(
        &mut self,
        attributes: &VehicleAttributes,
        lane: LaneId,
        node_index: usize,
    ) -> VehicleId {
        let (graph, routes, rng) = (&self.graph, &self.routes, &mut self.rng);
        let id = self.vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::new(id, attributes, graph, lane, node_index);
            vehicle.replan(graph, routes, rng);
            vehicle
        });
        log::debug!("added vehicle {:?} on lane {:?}", id, lane);
        id
    }

    /// Adds up to `count` vehicles at the first free waypoints of randomly chosen lanes.
    /// Lanes are weighted by their traffic volume; lanes inside intersections are never chosen.
    /// A draw is skipped if its lane has no free waypoint, so fewer ids may be returned.
    pub fn spawn_random(&mut self, count: usize, attributes: &VehicleAttributes) -> Vec<VehicleId> {
        let lanes = self
            .graph
            .iter_lanes()
            .filter(|lane| !lane.kind().is_intersection())
            .map(|lane| (lane.id(), lane.volume().spawn_weight()))
            .collect::<Vec<_>>();
        let distr = match WeightedIndex::new(lanes.iter().map(|(_, weight)| *weight)) {
            Ok(distr) => distr,
            Err(err) => {
                log::warn!("cannot spawn vehicles: {}", err);
                return vec![];
            }
        };
        (0..count)
            .filter_map(|_| {
                let (lane, _) = lanes[distr.sample(&mut self.rng)];
                let Some(node_index) = self.free_node(lane, attributes) else {
                    log::debug!("no room to spawn a vehicle on lane {:?}", lane);
                    return None;
                };
                Some(self.add_vehicle_at(attributes, lane, node_index))
            })
            .collect()
    }

    /// The first waypoint of a lane, other than its last, with no vehicle close enough
    /// for the two to overlap or start inside each other's sensor range.
    fn free_node(&self, lane: LaneId, attributes: &VehicleAttributes) -> Option<usize> {
        let nodes = self.graph.lane(lane).nodes();
        let spacing = 2.0 * attributes.length;
        (0..nodes.len().saturating_sub(1)).find(|idx| {
            let pos = self.graph.position(nodes[*idx]);
            self.vehicles
                .values()
                .all(|vehicle| vehicle.position().distance(pos) >= spacing)
        })
    }

    /// Removes a vehicle from the simulation, releasing any intersection it is checked in to.
    pub fn remove_vehicle(&mut self, id: VehicleId) {
        if let Some(mut vehicle) = self.vehicles.remove(id) {
            vehicle.check_out(&mut self.intersections);
            log::debug!("removed vehicle {:?}", id);
        }
        self.bodies.remove(id);
    }

    /// Sets the lane the vehicle heads for, or lets it roam if `None`.
    pub fn set_vehicle_destination(&mut self, id: VehicleId, destination: Option<LaneId>) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.set_destination(destination, &self.graph, &self.routes, &mut self.rng);
        }
    }

    /// Asks the vehicle to change onto the adjacent lane on the given side.
    pub fn request_lane_change(&mut self, id: VehicleId, side: Side) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.request_lane_change(side);
        }
    }

    /// Tells the vehicle to abandon its lane change at the start of the next frame.
    pub fn cancel_lane_change(&mut self, id: VehicleId) {
        self.outbox.send(id, Command::ResetLaneChange);
    }

    /// Sets the `frozen` attribute of a vehicle. A frozen vehicle brakes fully
    /// and makes no decisions until it is no longer frozen.
    pub fn set_vehicle_frozen(&mut self, id: VehicleId, frozen: bool) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.set_frozen(frozen);
        }
    }

    /// Randomly assigns a speed factor to each vehicle, sampled from a normal distribution
    /// with a mean of 1 (the speed limit) and standard deviation of `stddev`.
    pub fn randomise_speed_factors(&mut self, stddev: f64) {
        let distr = match Normal::new(1.0, stddev) {
            Ok(distr) => distr,
            Err(err) => {
                log::warn!("invalid speed factor deviation {}: {}", stddev, err);
                return;
            }
        };
        for vehicle in self.vehicles.values_mut() {
            let factor = distr.sample(&mut self.rng).clamp(0.75, 1.25);
            vehicle.set_speed_factor(factor);
        }
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.deliver_commands();
        for controller in self.intersections.iter_mut().flatten() {
            controller.update(dt, &mut self.outbox);
        }
        self.observe_bodies();
        let view = self.snapshot();
        self.run_pipelines(dt, &view);
        self.actuate(dt);
        self.remove_exited();
        self.frame += 1;

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn graph(&self) -> &LaneGraph {
        &self.graph
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Gets the debugging information for the previously simulated frame as JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&self) -> serde_json::Value {
        self.debug.clone()
    }

    /// Hands the commands queued during the previous frame to their vehicles.
    fn deliver_commands(&mut self) {
        for (id, command) in self.outbox.drain() {
            match self.vehicles.get_mut(id) {
                Some(vehicle) => vehicle.apply_command(command),
                None => log::trace!("dropped {:?} for removed vehicle {:?}", command, id),
            }
        }
    }

    /// Reads every vehicle's pose from its body.
    fn observe_bodies(&mut self) {
        for (id, vehicle) in &mut self.vehicles {
            if let Some(body) = self.bodies.get(id) {
                vehicle.observe(body.position(), body.forward());
            }
        }
    }

    /// Captures the state every vehicle publishes to the others this frame.
    fn snapshot(&self) -> TrafficView {
        let mut view = TrafficView::new();
        for vehicle in self.vehicles.values() {
            view.insert(vehicle.publish());
        }
        view
    }

    /// Runs each vehicle's decision pipeline. A failing vehicle is frozen.
    fn run_pipelines(&mut self, dt: f64, view: &TrafficView) {
        let builtin = VehicleSensor::new(view);
        let sensor: &dyn ObstacleSensor = match &self.sensor {
            Some(sensor) => &**sensor,
            None => &builtin,
        };
        let mut ctx = TickContext {
            dt,
            graph: &self.graph,
            routes: &self.routes,
            params: &self.params,
            response: &self.response,
            peers: view,
            sensor,
            intersections: &mut self.intersections,
            crosswalks: &mut self.crosswalks,
            outbox: &mut self.outbox,
            rng: &mut self.rng,
        };
        for vehicle in self.vehicles.values_mut() {
            if let Err(err) = vehicle.update(&mut ctx) {
                log::error!("{}; freezing vehicle {:?}", err, vehicle.id());
                vehicle.set_frozen(true);
            }
        }
    }

    /// Applies each vehicle's controls to its body and moves the bodies on.
    fn actuate(&mut self, dt: f64) {
        for (id, vehicle) in &self.vehicles {
            if let Some(body) = self.bodies.get_mut(id) {
                body.apply(vehicle.controls());
                body.step(dt);
            }
        }
    }

    /// Removes the vehicles which have driven off the end of the network.
    fn remove_exited(&mut self) {
        let exited = self
            .vehicles
            .iter()
            .filter(|(_, vehicle)| vehicle.has_exited())
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for id in exited {
            self.remove_vehicle(id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{GraphBuilder, LaneAttributes};
    use crate::math::{Point2d, Vector2d};
    use crate::vehicle::LaneChangePhase;

    fn straight_road(length: f64) -> (LaneGraph, LaneId) {
        let mut builder = GraphBuilder::new();
        builder.allow_dead_ends(true);
        let points = (0..=(length / 5.0) as usize)
            .map(|i| Point2d::new(5.0 * i as f64, 0.0))
            .collect::<Vec<_>>();
        let lane = builder.add_lane(&LaneAttributes::default(), &points);
        (builder.build().unwrap(), lane)
    }

    fn simulation(graph: LaneGraph) -> Simulation {
        let params = DriverParams::default();
        let routes = RouteTable::build(&graph, params.lane_change_penalty);
        Simulation::with_seed(graph, routes, params, 0)
    }

    /// A body that stays wherever it is put.
    struct Parked(Point2d);

    impl VehicleBody for Parked {
        fn apply(&mut self, _: &crate::DriveControls) {}
        fn step(&mut self, _: f64) {}
        fn position(&self) -> Point2d {
            self.0
        }
        fn forward(&self) -> Vector2d {
            Vector2d::new(1.0, 0.0)
        }
    }

    #[test]
    fn vehicles_drive_off_the_end() {
        let (graph, lane) = straight_road(30.0);
        let mut sim = simulation(graph);
        let id = sim.add_vehicle(&VehicleAttributes::default(), lane);
        for _ in 0..200 {
            sim.step(0.1);
        }
        assert!(sim.get_vehicle(id).is_none());
        assert_eq!(sim.frame(), 200);
    }

    #[test]
    fn failing_vehicle_is_frozen_alone() {
        let (graph, lane) = straight_road(100.0);
        let mut sim = simulation(graph);
        let attrs = VehicleAttributes::default();
        let lost = sim.add_vehicle_with_body(&attrs, lane, Box::new(Parked(Point2d::new(0.0, 500.0))));
        let fine = sim.add_vehicle_at(&attrs, lane, 10);
        sim.step(0.1);

        assert!(sim.get_vehicle(lost).unwrap().is_frozen());
        let fine = sim.get_vehicle(fine).unwrap();
        assert!(!fine.is_frozen());
        assert!(fine.controls().motor > 0.0);
    }

    #[test]
    fn commands_arrive_on_the_next_frame() {
        let (graph, lane) = straight_road(100.0);
        let mut sim = simulation(graph);
        let id = sim.add_vehicle(&VehicleAttributes::default(), lane);
        sim.request_lane_change(id, Side::Left);
        sim.step(0.1);
        assert_eq!(
            sim.get_vehicle(id).unwrap().lane_change_phase(),
            LaneChangePhase::RequestToMove
        );

        sim.cancel_lane_change(id);
        assert_eq!(
            sim.get_vehicle(id).unwrap().lane_change_phase(),
            LaneChangePhase::RequestToMove
        );
        sim.step(0.1);
        assert_eq!(
            sim.get_vehicle(id).unwrap().lane_change_phase(),
            LaneChangePhase::NotChanging
        );
    }

    #[test]
    fn speed_factors_stay_in_range() {
        let (graph, _) = straight_road(300.0);
        let mut sim = simulation(graph);
        let ids = sim.spawn_random(20, &VehicleAttributes::default());
        assert_eq!(ids.len(), 20);
        sim.randomise_speed_factors(0.5);
        for vehicle in sim.iter_vehicles() {
            assert!((0.75..=1.25).contains(&vehicle.speed_factor()));
        }
    }

    #[test]
    fn spawned_vehicles_do_not_overlap() {
        let (graph, lane) = straight_road(300.0);
        let mut sim = simulation(graph);
        let ids = sim.spawn_random(2, &VehicleAttributes::default());
        assert_eq!(ids.len(), 2);
        let [a, b] = [ids[0], ids[1]].map(|id| sim.get_vehicle(id).unwrap().position());
        assert!(a.distance(b) >= 2.0 * VehicleAttributes::default().length);

        for _ in 0..100 {
            sim.step(0.1);
        }
        for id in ids {
            let vehicle = sim.get_vehicle(id).unwrap();
            assert_eq!(vehicle.lane(), lane);
            assert!(vehicle.position().x > 20.0);
        }
    }

    #[test]
    fn full_lane_spawns_nothing() {
        let (graph, _) = straight_road(20.0);
        let mut sim = simulation(graph);
        let attrs = VehicleAttributes::default();
        let ids = sim.spawn_random(5, &attrs);
        assert!(ids.len() < 5);
        assert!(!ids.is_empty());
        assert!(sim.spawn_random(1, &attrs).is_empty());
    }
}
