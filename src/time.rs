// Time and tolerance helpers shared by ChannelBuffer and Channel.

/// Sentinel marking an event-style sample that bypasses time-window
/// reasoning entirely.
pub const EVENT_TIME: f64 = -1.0;

/// Absolute tolerance for time comparisons: `step_tolerance * max(step, 0)`.
pub fn tolerance(step: f64, step_tolerance: f64) -> f64 {
    step_tolerance * step.max(0.0)
}

/// Whether two times are equal within `tol`.
pub fn times_equal(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

pub fn is_event_time(t: f64) -> bool {
    t == EVENT_TIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_clamps_negative_step() {
        assert_eq!(tolerance(-5.0, 1e-3), 0.0);
        assert_eq!(tolerance(2.0, 1e-3), 2e-3);
    }

    #[test]
    fn equal_within_tolerance() {
        assert!(times_equal(1.0, 1.0 + 1e-7, 1e-6));
        assert!(!times_equal(1.0, 1.1, 1e-6));
    }
}
