//! Messages between vehicles and from collaborators to vehicles.
//!
//! A vehicle's state is only ever written by its own decision pipeline. Anything else which
//! wants to influence a vehicle posts a [Command] to the [Outbox]; the simulation delivers
//! queued commands at the start of the next step.

use crate::VehicleId;

/// A request addressed to a single vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Another vehicle wants to change into this vehicle's lane just ahead of it.
    SlowDown { requester: VehicleId },
    /// The intersection controller's decision on whether the vehicle must give way.
    IntersectionYield(bool),
    /// Abandon any lane change in progress and continue straight on.
    ResetLaneChange,
}

/// A queue of commands awaiting delivery.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<(VehicleId, Command)>,
}

impl Outbox {
    /// Queues a command for a vehicle.
    pub fn send(&mut self, vehicle: VehicleId, command: Command) {
        self.queue.push((vehicle, command));
    }

    /// Tells a vehicle whether it must give way at its intersection.
    pub fn set_intersection_yield(&mut self, vehicle: VehicleId, yielding: bool) {
        self.send(vehicle, Command::IntersectionYield(yielding));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes all queued commands, in the order they were sent.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (VehicleId, Command)> + '_ {
        self.queue.drain(..)
    }
}
