//! Scalar parabolic search step.
//!
//! The inner primitive of the adaptive calibration loops: a quadratic
//! interpolation through three equally spaced measurements that estimates
//! where the minimum lies.

/// Estimates the minimum of a parabola through three equally spaced points.
///
/// `left`, `center` and `right` are measurements taken at `x - 1`, `x` and
/// `x + 1` in units of the current step size. The return value is the offset
/// of the estimated minimum relative to the center point, in the same units,
/// bounded by `[-1, 1]`.
///
/// A non-positive curvature (`left + right - 2 * center <= 0`) means the
/// points do not bracket a local minimum, due to noise or a locally flat or
/// concave response. The vertex estimate would be unreliable or divergent
/// there, so the step is zero and the caller's shrinking step size is left to
/// escape the region.
pub fn parabolic_step(left: f64, center: f64, right: f64) -> f64 {
    let d = left + right - 2.0 * center;
    if d <= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / d).clamp(-1.0, 1.0)
}
