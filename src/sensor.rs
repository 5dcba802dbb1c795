//! Forward obstacle sensing.

use crate::math::{project_local, rot90, Point2d, Vector2d};
use crate::vehicle::LaneChangePhase;
use crate::{LaneId, NodeId, VehicleId};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use slotmap::SecondaryMap;

/// The nearest thing struck by a sensor ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorHit {
    /// The distance along the ray to the hit, in m.
    pub distance: f64,
    /// The vehicle that was hit, if it was a vehicle.
    pub vehicle: Option<VehicleId>,
}

/// A spatial query used by vehicles to look for obstacles.
pub trait ObstacleSensor {
    /// Casts a ray from `origin` along the unit vector `direction` and returns the
    /// nearest hit within `range`, ignoring the given vehicle.
    fn cast(
        &self,
        origin: Point2d,
        direction: Vector2d,
        range: f64,
        ignore: Option<VehicleId>,
    ) -> Option<SensorHit>;
}

/// The published state of a vehicle, as seen by every other vehicle during a tick.
#[derive(Clone, Debug)]
pub struct PeerState {
    pub id: VehicleId,
    pub position: Point2d,
    /// A unit vector aligned with the vehicle's heading.
    pub forward: Vector2d,
    pub speed: f64,
    pub length: f64,
    pub width: f64,
    pub lane: LaneId,
    pub lookahead: ArrayVec<LaneId, 4>,
    pub lane_change: LaneChangePhase,
    pub next_node: NodeId,
    /// Whether the vehicle is being held back by its intersection controller.
    pub holding: bool,
}

/// A snapshot of every vehicle's published state, taken once per tick.
#[derive(Clone, Debug, Default)]
pub struct TrafficView {
    peers: SecondaryMap<VehicleId, PeerState>,
}

/// An [ObstacleSensor] which tests rays against the footprints of the vehicles in a [TrafficView].
pub struct VehicleSensor<'a> {
    view: &'a TrafficView,
}

impl PeerState {
    /// The distance of `point` ahead of this vehicle's centre, along its heading.
    pub fn longitudinal_offset(&self, point: Point2d) -> f64 {
        (point - self.position).dot(self.forward)
    }

    /// Whether the vehicle is on, or about to enter, the given lane.
    pub fn is_on_or_entering(&self, lane: LaneId) -> bool {
        self.lane == lane || self.lookahead.first() == Some(&lane)
    }
}

impl TrafficView {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn insert(&mut self, peer: PeerState) {
        self.peers.insert(peer.id, peer);
    }

    pub fn get(&self, id: VehicleId) -> Option<&PeerState> {
        self.peers.get(id)
    }

    /// Returns an iterator over every vehicle in the snapshot.
    pub fn iter(&self) -> impl Iterator<Item = &PeerState> {
        self.peers.values()
    }

    /// Returns an iterator over the vehicles currently on the given lane.
    pub fn on_lane(&self, lane: LaneId) -> impl Iterator<Item = &PeerState> {
        self.peers.values().filter(move |peer| peer.lane == lane)
    }
}

impl<'a> VehicleSensor<'a> {
    pub fn new(view: &'a TrafficView) -> Self {
        Self { view }
    }
}

impl ObstacleSensor for VehicleSensor<'_> {
    fn cast(
        &self,
        origin: Point2d,
        direction: Vector2d,
        range: f64,
        ignore: Option<VehicleId>,
    ) -> Option<SensorHit> {
        self.view
            .iter()
            .filter(|peer| Some(peer.id) != ignore)
            .filter_map(|peer| {
                let lat = rot90(peer.forward);
                let local_origin = project_local(origin, peer.position, lat, peer.forward);
                let local_dir = Vector2d::new(direction.dot(lat), direction.dot(peer.forward));
                let half = Vector2d::new(0.5 * peer.width, 0.5 * peer.length);
                ray_box(local_origin, local_dir, half)
                    .filter(|dist| *dist <= range)
                    .map(|distance| SensorHit {
                        distance,
                        vehicle: Some(peer.id),
                    })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Intersects a ray with an axis-aligned box centred on the origin with the given half extents.
/// Returns the distance along the ray to the first point inside the box.
fn ray_box(origin: Point2d, dir: Vector2d, half: Vector2d) -> Option<f64> {
    let mut t_min = 0.0f64;
    let mut t_max = f64::INFINITY;
    for (o, d, h) in [(origin.x, dir.x, half.x), (origin.y, dir.y, half.y)] {
        if d.abs() < 1e-12 {
            if o.abs() > h {
                return None;
            }
        } else {
            let (t1, t2) = ((-h - o) / d, (h - o) / d);
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
            if t_min > t_max {
                return None;
            }
        }
    }
    Some(t_min)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::SlotMap;

    fn peer(id: VehicleId, x: f64, y: f64) -> PeerState {
        PeerState {
            id,
            position: Point2d::new(x, y),
            forward: Vector2d::new(1.0, 0.0),
            speed: 0.0,
            length: 4.0,
            width: 2.0,
            lane: LaneId::new(0),
            lookahead: ArrayVec::new(),
            lane_change: LaneChangePhase::NotChanging,
            next_node: NodeId::new(0),
            holding: false,
        }
    }

    #[test]
    fn ray_hits_nearest_vehicle() {
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let (a, b, c) = (ids.insert(()), ids.insert(()), ids.insert(()));
        let mut view = TrafficView::new();
        view.insert(peer(a, 0.0, 0.0));
        view.insert(peer(b, 12.0, 0.0));
        view.insert(peer(c, 22.0, 0.0));

        let sensor = VehicleSensor::new(&view);
        let origin = Point2d::new(2.0, 0.0);
        let dir = Vector2d::new(1.0, 0.0);
        let hit = sensor.cast(origin, dir, 50.0, Some(a)).unwrap();
        assert_eq!(hit.vehicle, Some(b));
        assert_approx_eq!(hit.distance, 8.0);

        // Out of range
        assert!(sensor.cast(origin, dir, 7.0, Some(a)).is_none());
        // Not ignoring self: the origin is inside the footprint
        let hit = sensor.cast(origin, dir, 50.0, None).unwrap();
        assert_eq!(hit.vehicle, Some(a));
        assert_approx_eq!(hit.distance, 0.0);
    }

    #[test]
    fn ray_misses_adjacent_lane() {
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut view = TrafficView::new();
        view.insert(peer(a, 0.0, 0.0));
        view.insert(peer(b, 10.0, 3.5));
        let sensor = VehicleSensor::new(&view);
        let hit = sensor.cast(Point2d::new(2.0, 0.0), Vector2d::new(1.0, 0.0), 50.0, Some(a));
        assert!(hit.is_none());
        assert_eq!(view.on_lane(LaneId::new(0)).count(), 2);
    }
}
