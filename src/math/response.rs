//! Smooth response curves, and tables of their samples.

/// A cubic easing between two points with zero slope at both ends.
/// Constant outside of the points.
#[derive(Clone, Copy, Debug)]
pub struct SmoothStep {
    x0: f64,
    width: f64,
    y0: f64,
    rise: f64,
}

impl SmoothStep {
    /// Creates an easing from `(x0, y0)` to `(x1, y1)`. Requires `x1 > x0`.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0,
            width: x1 - x0,
            y0,
            rise: y1 - y0,
        }
    }

    pub fn y(&self, x: f64) -> f64 {
        let t = ((x - self.x0) / self.width).clamp(0.0, 1.0);
        self.y0 + self.rise * t * t * (3.0 - 2.0 * t)
    }
}

/// Evenly spaced samples of a function over `[min, max]`, linearly interpolated.
/// Inputs outside the range take the value at the nearest end.
#[derive(Clone, Debug)]
pub struct SampledCurve {
    min: f64,
    step: f64,
    values: Vec<f64>,
}

impl SampledCurve {
    pub fn new(min: f64, max: f64, step: f64, mut f: impl FnMut(f64) -> f64) -> Self {
        let intervals = ((max - min) / step).ceil().max(1.0) as usize;
        let step = (max - min) / intervals as f64;
        let values = (0..=intervals).map(|i| f(min + step * i as f64)).collect();
        Self { min, step, values }
    }

    pub fn sample(&self, x: f64) -> f64 {
        let last = self.values.len() - 1;
        let pos = ((x - self.min) / self.step).max(0.0);
        let idx = pos.floor() as usize;
        if idx >= last {
            return self.values[last];
        }
        let frac = pos - idx as f64;
        self.values[idx] + frac * (self.values[idx + 1] - self.values[idx])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn smooth_step_ends() {
        let ease = SmoothStep::new(10.0, 20.0, 45.0, 5.0);
        assert_approx_eq!(ease.y(10.0), 20.0);
        assert_approx_eq!(ease.y(45.0), 5.0);
        assert_approx_eq!(ease.y(27.5), 12.5);
        // Flat at both ends
        assert_approx_eq!(ease.y(10.5), 20.0, 0.02);
        assert_approx_eq!(ease.y(44.5), 5.0, 0.02);
        assert_eq!(ease.y(0.0), 20.0);
        assert_eq!(ease.y(100.0), 5.0);
    }

    #[test]
    fn smooth_step_is_monotonic() {
        let ease = SmoothStep::new(2.0, 0.0, 25.0, 1.0);
        let mut last = ease.y(0.0);
        for i in 1..=150 {
            let y = ease.y(0.2 * i as f64);
            assert!(y >= last);
            last = y;
        }
    }

    #[test]
    fn sampled_curve_interpolates() {
        let curve = SampledCurve::new(50.0, 200.0, 5.0, |x| 2.0 * x);
        assert_approx_eq!(curve.sample(50.0), 100.0);
        assert_approx_eq!(curve.sample(52.0), 104.0);
        assert_approx_eq!(curve.sample(91.5), 183.0);
        assert_approx_eq!(curve.sample(200.0), 400.0);

        // Clamped outside the range
        assert_approx_eq!(curve.sample(20.0), 100.0);
        assert_approx_eq!(curve.sample(888.0), 400.0);
    }
}
