//! Per-frame geometry describing what vehicles looked at, for drawing over the network.
//! Only recorded with the `debug` feature.

use crate::math::Point2d;
use crate::VehicleId;
#[cfg(feature = "debug")]
use serde_json::{json, Value};
#[cfg(feature = "debug")]
use slotmap::Key;

#[cfg(feature = "debug")]
thread_local!(
    static FRAME: std::cell::RefCell<Vec<Value>> = Default::default();
);

#[cfg(feature = "debug")]
fn record(vehicle: VehicleId, shape: Value) {
    FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "vehicle": vehicle.data().as_ffi(),
            "shape": shape,
        }))
    })
}

/// Records a sensor ray cast by a vehicle.
#[allow(unused)]
pub fn debug_ray(vehicle: VehicleId, from: Point2d, to: Point2d) {
    #[cfg(feature = "debug")]
    record(
        vehicle,
        json!({ "type": "ray", "from": [from.x, from.y], "to": [to.x, to.y] }),
    );
}

/// Records a crossing point a vehicle is watching.
#[allow(unused)]
pub fn debug_crossing(vehicle: VehicleId, point: Point2d, clear: bool) {
    #[cfg(feature = "debug")]
    record(
        vehicle,
        json!({ "type": "crossing", "point": [point.x, point.y], "clear": clear }),
    );
}

/// Takes everything recorded since the last call, as a JSON array.
#[cfg(feature = "debug")]
pub fn take_debug_frame() -> Value {
    Value::Array(FRAME.with(|frame| frame.take()))
}
