//! Tests of intersection admission with the first come, first served controller.

use lane_traffic::{
    math::Point2d, DriverParams, FirstComeController, GraphBuilder, IntersectionController,
    LaneAttributes, LaneId, LaneKind, Outbox, RouteTable, Simulation, Ticket, VehicleAttributes,
    VehicleId,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    CheckIn,
    Entered,
    CheckOut,
}

type Log = Rc<RefCell<Vec<(Event, VehicleId)>>>;

/// Records every call made to the controller it wraps.
struct Recorder {
    inner: FirstComeController,
    log: Log,
}

impl IntersectionController for Recorder {
    fn check_in(&mut self, vehicle: VehicleId, lane: LaneId, outbox: &mut Outbox) -> Ticket {
        self.log.borrow_mut().push((Event::CheckIn, vehicle));
        self.inner.check_in(vehicle, lane, outbox)
    }

    fn notify_entered(&mut self, ticket: Ticket, vehicle: VehicleId) {
        self.log.borrow_mut().push((Event::Entered, vehicle));
        self.inner.notify_entered(ticket, vehicle);
    }

    fn check_out(&mut self, vehicle: VehicleId, ticket: Ticket) {
        self.log.borrow_mut().push((Event::CheckOut, vehicle));
        self.inner.check_out(vehicle, ticket);
    }

    fn update(&mut self, dt: f64, outbox: &mut Outbox) {
        self.inner.update(dt, outbox);
    }
}

fn line(from: Point2d, to: Point2d) -> Vec<Point2d> {
    let steps = ((to.x - from.x).abs() + (to.y - from.y).abs()) / 5.0;
    let steps = steps.round() as usize;
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            Point2d::new(from.x + t * (to.x - from.x), from.y + t * (to.y - from.y))
        })
        .collect()
}

/// Two roads crossing at the origin: west to east, and south to north.
/// Returns the simulation and the west and south approach lanes.
fn crossroads() -> (Simulation, Log, LaneId, LaneId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let p = Point2d::new;
    let mut builder = GraphBuilder::new();
    builder.allow_dead_ends(true);
    let intersection = builder.add_intersection();
    let road = LaneAttributes::default();
    let inside = LaneAttributes {
        kind: LaneKind::IntersectionPriority,
        intersection: Some(intersection),
        ..Default::default()
    };

    let west = builder.add_lane(&road, &line(p(-100.0, 0.0), p(-10.0, 0.0)));
    let west_east = builder.add_lane(&inside, &line(p(-5.0, 0.0), p(5.0, 0.0)));
    let east = builder.add_lane(&road, &line(p(10.0, 0.0), p(100.0, 0.0)));
    builder.connect(west, west_east);
    builder.connect(west_east, east);

    let south = builder.add_lane(&road, &line(p(0.0, -100.0), p(0.0, -10.0)));
    let south_north = builder.add_lane(&inside, &line(p(0.0, -5.0), p(0.0, 5.0)));
    let north = builder.add_lane(&road, &line(p(0.0, 10.0), p(0.0, 100.0)));
    builder.connect(south, south_north);
    builder.connect(south_north, north);

    let graph = builder.build().unwrap();
    assert_eq!(graph.lane(west_east).crossings().len(), 1);

    let params = DriverParams::default();
    let routes = RouteTable::build(&graph, params.lane_change_penalty);
    let mut sim = Simulation::with_seed(graph, routes, params, 7);
    let log = Log::default();
    sim.attach_intersection(
        intersection,
        Box::new(Recorder {
            inner: FirstComeController::new(0),
            log: log.clone(),
        }),
    );
    (sim, log, west, south)
}

fn count(log: &Log, event: Event, vehicle: VehicleId) -> usize {
    log.borrow()
        .iter()
        .filter(|entry| **entry == (event, vehicle))
        .count()
}

fn position(log: &Log, event: Event, vehicle: VehicleId) -> usize {
    log.borrow()
        .iter()
        .position(|entry| *entry == (event, vehicle))
        .unwrap()
}

#[test]
fn each_vehicle_checks_in_enters_and_out_once() {
    let (mut sim, log, west, south) = crossroads();
    let attrs = VehicleAttributes::default();
    let a = sim.add_vehicle(&attrs, west);
    let b = sim.add_vehicle_at(&attrs, south, 8);

    for _ in 0..600 {
        sim.step(0.1);
    }

    assert_eq!(sim.iter_vehicles().count(), 0);
    for vehicle in [a, b] {
        assert_eq!(count(&log, Event::CheckIn, vehicle), 1);
        assert_eq!(count(&log, Event::Entered, vehicle), 1);
        assert_eq!(count(&log, Event::CheckOut, vehicle), 1);
        assert!(position(&log, Event::CheckIn, vehicle) < position(&log, Event::Entered, vehicle));
        assert!(position(&log, Event::Entered, vehicle) < position(&log, Event::CheckOut, vehicle));
    }
}

#[test]
fn second_vehicle_waits_for_first_to_leave() {
    let (mut sim, log, west, south) = crossroads();
    let attrs = VehicleAttributes::default();
    let a = sim.add_vehicle(&attrs, west);
    let b = sim.add_vehicle(&attrs, south);

    let mut b_waited = false;
    for _ in 0..600 {
        sim.step(0.1);
        if let Some(vehicle) = sim.get_vehicle(b) {
            b_waited |= vehicle.is_yielding_at_intersection() && vehicle.speed() < 1.0;
        }
    }

    assert!(b_waited);
    assert_eq!(sim.iter_vehicles().count(), 0);
    assert!(position(&log, Event::CheckIn, a) < position(&log, Event::CheckIn, b));
    assert!(position(&log, Event::CheckOut, a) < position(&log, Event::Entered, b));
    assert_eq!(count(&log, Event::Entered, b), 1);
}

#[test]
fn split_approach_checks_in_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let p = Point2d::new;
    let mut builder = GraphBuilder::new();
    builder.allow_dead_ends(true);
    let intersection = builder.add_intersection();
    let road = LaneAttributes::default();
    let inside = LaneAttributes {
        kind: LaneKind::IntersectionPriority,
        intersection: Some(intersection),
        ..Default::default()
    };

    // The second approach lane starts within check-in range of the intersection
    let far = builder.add_lane(&road, &line(p(0.0, 0.0), p(60.0, 0.0)));
    let near = builder.add_lane(&road, &line(p(65.0, 0.0), p(95.0, 0.0)));
    let across = builder.add_lane(&inside, &line(p(100.0, 0.0), p(110.0, 0.0)));
    let exit = builder.add_lane(&road, &line(p(115.0, 0.0), p(200.0, 0.0)));
    builder.connect(far, near);
    builder.connect(near, across);
    builder.connect(across, exit);
    let graph = builder.build().unwrap();

    let params = DriverParams::default();
    let routes = RouteTable::build(&graph, params.lane_change_penalty);
    let mut sim = Simulation::with_seed(graph, routes, params, 11);
    let log = Log::default();
    sim.attach_intersection(
        intersection,
        Box::new(Recorder {
            inner: FirstComeController::new(0),
            log: log.clone(),
        }),
    );
    let vehicle = sim.add_vehicle(&VehicleAttributes::default(), far);

    for _ in 0..600 {
        sim.step(0.1);
    }

    assert_eq!(sim.iter_vehicles().count(), 0);
    assert_eq!(count(&log, Event::CheckIn, vehicle), 1);
    assert_eq!(count(&log, Event::Entered, vehicle), 1);
    assert_eq!(count(&log, Event::CheckOut, vehicle), 1);
    assert!(position(&log, Event::Entered, vehicle) < position(&log, Event::CheckOut, vehicle));
}
