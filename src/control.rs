//! Contracts for the intersection and crosswalk controllers vehicles negotiate with.

use crate::command::Outbox;
use crate::math::Point2d;
use crate::{LaneId, VehicleId};
use std::collections::VecDeque;

/// An opaque admission ticket handed out by an [IntersectionController].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(pub u32, pub u32);

/// Decides which vehicles may enter an intersection.
pub trait IntersectionController {
    /// Called once when a vehicle approaches the intersection along `lane`.
    /// The controller tells the vehicle whether to give way through the `outbox`.
    fn check_in(&mut self, vehicle: VehicleId, lane: LaneId, outbox: &mut Outbox) -> Ticket;

    /// Called once when the vehicle reaches the stop line and enters the intersection.
    fn notify_entered(&mut self, ticket: Ticket, vehicle: VehicleId);

    /// Called once when the vehicle has left the intersection.
    fn check_out(&mut self, vehicle: VehicleId, ticket: Ticket);

    /// Advances any internal timing by `dt` seconds.
    fn update(&mut self, _dt: f64, _outbox: &mut Outbox) {}
}

/// A pedestrian crosswalk with one or more crossings.
pub trait Crosswalk {
    /// Whether vehicles may drive over the crossing: it is not signalled for pedestrians
    /// and nobody is on it.
    fn is_clear(&self, crossing: usize) -> bool;

    /// Called when a vehicle starts driving over the crossing.
    fn notify_crossing_started(&mut self, crossing: usize);

    /// The point where the crossing meets the lanes.
    fn crossing_point(&self, crossing: usize) -> Point2d;
}

/// An intersection controller which admits vehicles in the order they checked in.
///
/// The vehicle at the head of the queue may enter, along with any vehicles
/// queued directly behind it on the same lane.
#[derive(Debug)]
pub struct FirstComeController {
    id: u32,
    serial: u32,
    queue: VecDeque<Admission>,
}

#[derive(Clone, Copy, Debug)]
struct Admission {
    vehicle: VehicleId,
    lane: LaneId,
    ticket: Ticket,
    entered: bool,
}

impl FirstComeController {
    /// Creates a controller whose tickets are tagged with the given ID.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            serial: 0,
            queue: VecDeque::new(),
        }
    }

    /// The number of vehicles checked in.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether the given vehicle has entered the intersection.
    pub fn has_entered(&self, vehicle: VehicleId) -> bool {
        self.queue.iter().any(|a| a.vehicle == vehicle && a.entered)
    }

    fn publish(&self, outbox: &mut Outbox) {
        let Some(head) = self.queue.front() else {
            return;
        };
        let mut admitting = true;
        for admission in &self.queue {
            admitting &= admission.lane == head.lane;
            outbox.set_intersection_yield(admission.vehicle, !admitting);
        }
    }
}

impl IntersectionController for FirstComeController {
    fn check_in(&mut self, vehicle: VehicleId, lane: LaneId, outbox: &mut Outbox) -> Ticket {
        self.serial += 1;
        let ticket = Ticket(self.id, self.serial);
        self.queue.push_back(Admission {
            vehicle,
            lane,
            ticket,
            entered: false,
        });
        self.publish(outbox);
        ticket
    }

    fn notify_entered(&mut self, ticket: Ticket, vehicle: VehicleId) {
        if let Some(admission) = self
            .queue
            .iter_mut()
            .find(|a| a.ticket == ticket && a.vehicle == vehicle)
        {
            admission.entered = true;
        }
    }

    fn check_out(&mut self, vehicle: VehicleId, ticket: Ticket) {
        match self.queue.iter().position(|a| a.ticket == ticket) {
            Some(idx) => {
                self.queue.remove(idx);
            }
            None => log::warn!("vehicle {vehicle:?} checked out with unknown ticket {ticket:?}"),
        }
    }

    fn update(&mut self, _dt: f64, outbox: &mut Outbox) {
        self.publish(outbox);
    }
}
