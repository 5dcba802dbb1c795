//! Error types.

use thiserror::Error;

use crate::{CrosswalkId, IntersectionId, LaneId, NodeId, VehicleId};

/// A malformation found while building a [LaneGraph](crate::LaneGraph).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("lane {0:?} has fewer than two waypoints")]
    EmptyLane(LaneId),

    #[error("lane {0:?} does not lead anywhere")]
    MissingSuccessor(LaneId),

    #[error("lane {0:?} is connected to more than one lane start")]
    AmbiguousSuccessor(LaneId),

    #[error("waypoint {0:?} does not start a lane")]
    NotLaneStart(NodeId),

    #[error("waypoint {0:?} does not exist")]
    DanglingNode(NodeId),

    #[error("intersection lane {0:?} is not assigned to an intersection")]
    MissingIntersection(LaneId),

    #[error("lane {lane:?} refers to unknown intersection {intersection:?}")]
    UnknownIntersection {
        lane: LaneId,
        intersection: IntersectionId,
    },

    #[error("lane {lane:?} refers to unknown crosswalk {crosswalk:?}")]
    UnknownCrosswalk { lane: LaneId, crosswalk: CrosswalkId },

    #[error("crosswalk encounter at waypoint {index} is beyond the end of lane {lane:?}")]
    CrosswalkOutOfRange { lane: LaneId, index: usize },

    #[error("lane {0:?} has a lane change onto itself")]
    SelfLaneChange(LaneId),
}

/// A failure in a single vehicle's decision pipeline.
/// The affected vehicle is frozen; the rest of the simulation carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("vehicle {vehicle:?} refers to unknown lane {lane:?}")]
    UnknownLane { vehicle: VehicleId, lane: LaneId },

    #[error("vehicle {vehicle:?} lost track of waypoint {index} on lane {lane:?}")]
    LostTrack {
        vehicle: VehicleId,
        lane: LaneId,
        index: usize,
    },
}
