pub use body::{KinematicBody, VehicleBody};
pub use cgmath;
pub use command::{Command, Outbox};
pub use control::{Crosswalk, FirstComeController, IntersectionController, Ticket};
pub use error::{AgentError, GraphError};
pub use graph::{
    CrossingLane, CrosswalkEncounter, GraphBuilder, Lane, LaneAttributes, LaneGraph, LaneKind,
    Node, Passage, Road, Side, TrafficVolume, TurnDirection,
};
pub use route::{HopKind, LaneRouteInfo, RouteBuilder, RouteEntry, RouteTable};
pub use sensor::{ObstacleSensor, PeerState, SensorHit, TrafficView, VehicleSensor};
pub use simulation::Simulation;
use slotmap::new_key_type;
pub use slotmap::{Key, KeyData};
pub use vehicle::{
    DriveControls, DriverParams, LaneChangePhase, Signals, TurnSignal, Vehicle, VehicleAttributes,
};

mod body;
mod command;
mod control;
mod debug;
mod error;
mod graph;
pub mod math;
mod route;
mod sensor;
mod simulation;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

/// Declares an index into one of the dense arenas of the [LaneGraph].
macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// The position of this item in its arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

dense_id!(
    /// Unique ID of a [Node] (waypoint).
    NodeId
);
dense_id!(
    /// Unique ID of a [Lane].
    LaneId
);
dense_id!(
    /// Unique ID of a [Road].
    RoadId
);
dense_id!(
    /// Unique ID of an intersection, bound to an [IntersectionController] at runtime.
    IntersectionId
);
dense_id!(
    /// Unique ID of a crosswalk, bound to a [Crosswalk] at runtime.
    CrosswalkId
);
