use std::f64::consts::PI;
use std::time::Instant;

use lane_traffic::math::Point2d;
use lane_traffic::{
    DriverParams, GraphBuilder, LaneAttributes, LaneChangePhase, LaneGraph, LaneId, RouteTable,
    Side, Simulation, VehicleAttributes,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ARCS: usize = 8;
const STEPS_PER_ARC: usize = 9;
const RADIUS: f64 = 60.0;
const LANE_WIDTH: f64 = 3.5;

/// Two lanes running anticlockwise around a circle, cut into arcs.
/// The outer lane is on the right, and vehicles may change between them anywhere.
fn ring_road() -> (LaneGraph, Vec<[LaneId; 2]>) {
    let mut builder = GraphBuilder::new();
    let attribs = LaneAttributes::default();
    let step = 2.0 * PI / (ARCS * STEPS_PER_ARC) as f64;

    let arcs = (0..ARCS)
        .map(|arc| {
            let lane = |radius: f64, builder: &mut GraphBuilder| {
                let points = (0..STEPS_PER_ARC)
                    .map(|i| {
                        let angle = step * (arc * STEPS_PER_ARC + i) as f64;
                        Point2d::new(radius * angle.cos(), radius * angle.sin())
                    })
                    .collect::<Vec<_>>();
                builder.add_lane(&attribs, &points)
            };
            let inner = lane(RADIUS, &mut builder);
            let outer = lane(RADIUS + LANE_WIDTH, &mut builder);
            builder.link_parallel(inner, outer, Side::Right);
            builder.allow_lane_change(inner, outer, Side::Right, 2);
            builder.allow_lane_change(outer, inner, Side::Left, 2);
            [inner, outer]
        })
        .collect::<Vec<_>>();

    for (from, to) in arcs.iter().zip(arcs.iter().cycle().skip(1)) {
        builder.connect(from[0], to[0]);
        builder.connect(from[1], to[1]);
    }

    let graph = builder.build().expect("ring road is well formed");
    (graph, arcs)
}

fn main() {
    env_logger::init();

    let (graph, arcs) = ring_road();
    let params = DriverParams::default();
    let routes = RouteTable::build(&graph, params.lane_change_penalty);
    let mut sim = Simulation::with_seed(graph, routes, params, 42);

    let attrs = VehicleAttributes::default();
    for lanes in &arcs {
        sim.add_vehicle_at(&attrs, lanes[0], 0);
        sim.add_vehicle_at(&attrs, lanes[1], 4);
    }
    sim.randomise_speed_factors(0.1);

    let mut rng = StdRng::seed_from_u64(7);
    let ids = sim.iter_vehicles().map(|v| v.id()).collect::<Vec<_>>();

    println!("Simulating {} vehicles...", ids.len());
    const NUM_FRAMES: u32 = 200;
    for round in 0..10 {
        // Send a random vehicle to the other lane
        let id = ids[rng.gen_range(0..ids.len())];
        if let Some(vehicle) = sim.get_vehicle(id) {
            let side = if vehicle.lane().index() % 2 == 0 {
                Side::Right
            } else {
                Side::Left
            };
            sim.request_lane_change(id, side);
        }

        let start = Instant::now();
        for _ in 0..NUM_FRAMES {
            sim.step(0.05);
        }
        let frame = start.elapsed() / NUM_FRAMES;

        let count = sim.iter_vehicles().count();
        let mean_speed = sim.iter_vehicles().map(|v| v.speed()).sum::<f64>() / count.max(1) as f64;
        let changing = sim
            .iter_vehicles()
            .filter(|v| v.lane_change_phase() != LaneChangePhase::NotChanging)
            .count();
        println!(
            "round {}: avg. frame {:?}, {} vehs, mean speed {:.1} km/h, {} changing lanes",
            round,
            frame,
            count,
            3.6 * mean_speed,
            changing,
        );
    }
}
