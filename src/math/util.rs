use super::{Point2d, Vector2d};
use cgmath::prelude::*;

/// Projects a point onto a local coordinate system.
///
/// # Parameters
/// * `point` - The point to project
/// * `origin` - The origin of the coordinate system
/// * `x_axis` - The basis vector pointing in the positive x-axis.
/// * `y_axis` - The basis vector pointing in the positive y-axis.
pub fn project_local(
    point: Point2d,
    origin: Point2d,
    x_axis: Vector2d,
    y_axis: Vector2d,
) -> Point2d {
    let point = point - origin;
    Point2d::new(point.dot(x_axis), point.dot(y_axis))
}

/// Rotates a vector 90 degrees counter-clockwise.
pub fn rot90(vec: Vector2d) -> Vector2d {
    Vector2d::new(-vec.y, vec.x)
}

/// Rotates a vector counter-clockwise by the given angle in degrees.
pub fn rotate_deg(vec: Vector2d, degrees: f64) -> Vector2d {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Vector2d::new(cos * vec.x - sin * vec.y, sin * vec.x + cos * vec.y)
}

/// The signed angle in degrees needed to rotate `from` onto `to`.
/// Positive values are counter-clockwise.
pub fn signed_angle_deg(from: Vector2d, to: Vector2d) -> f64 {
    let cross = from.x * to.y - from.y * to.x;
    cross.atan2(from.dot(to)).to_degrees()
}

/// Finds the point where the segments `a1-a2` and `b1-b2` intersect, if they do.
/// Parallel segments are never considered to intersect.
pub fn segment_intersection(
    a1: Point2d,
    a2: Point2d,
    b1: Point2d,
    b2: Point2d,
) -> Option<Point2d> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-12 {
        return None;
    }
    let qp = b1 - a1;
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a1 + t * r)
    } else {
        None
    }
}
