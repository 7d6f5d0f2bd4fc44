//! Instantaneous frame rate from successive frame counters.

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct FpsCalculator {
    last_frame_count: u64,
    last_time: Instant,
}

impl FpsCalculator {
    pub fn with_baseline(frame_count: u64, at: Instant) -> Self {
        Self {
            last_frame_count: frame_count,
            last_time: at,
        }
    }

    /// Forget the previous stream's counters.
    pub fn reset_at(&mut self, at: Instant) {
        self.last_frame_count = 0;
        self.last_time = at;
    }

    /// Frames per second since the previous sample. Returns 0 without
    /// updating the baseline when no time has elapsed.
    pub fn calculate_at(&mut self, frame_count: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        let frames = frame_count as f64 - self.last_frame_count as f64;
        self.last_frame_count = frame_count;
        self.last_time = now;
        frames / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn thirty_frames_in_one_second() {
        let t0 = Instant::now();
        let mut fps = FpsCalculator::with_baseline(100, t0);
        assert_eq!(fps.calculate_at(130, t0 + Duration::from_millis(1000)), 30.0);
    }

    #[test]
    fn zero_elapsed_yields_zero() {
        let t0 = Instant::now();
        let mut fps = FpsCalculator::with_baseline(100, t0);
        assert_eq!(fps.calculate_at(130, t0), 0.0);
        // Baseline kept.
        assert_eq!(fps.calculate_at(160, t0 + Duration::from_secs(2)), 30.0);
    }

    #[test]
    fn earlier_timestamp_is_treated_as_zero_elapsed() {
        let t0 = Instant::now() + Duration::from_secs(5);
        let mut fps = FpsCalculator::with_baseline(0, t0);
        assert_eq!(fps.calculate_at(50, t0 - Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn counter_reset_is_negative() {
        let t0 = Instant::now();
        let mut fps = FpsCalculator::with_baseline(500, t0);
        assert!(fps.calculate_at(10, t0 + Duration::from_secs(1)) < 0.0);
        fps.reset_at(t0 + Duration::from_secs(1));
        assert_eq!(fps.calculate_at(25, t0 + Duration::from_secs(2)), 25.0);
    }
}
