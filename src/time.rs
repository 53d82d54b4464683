use std::time::{Duration, Instant};

pub struct Time {
    delta: Duration,
    delta_seconds: f64,
    elapsed: Duration,
    last_update: Instant,
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl Time {
    pub fn new() -> Time {
        Time {
            delta: Duration::from_secs(0),
            delta_seconds: 0.0,
            elapsed: Duration::from_secs(0),
            last_update: Instant::now(),
        }
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds as f32
    }

    /// Sum of all deltas so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn update(&mut self) {
        let delta_time = self.last_update.elapsed();
        self.last_update = Instant::now();
        self.advance(delta_time);
    }

    /// Moves time forward by a fixed step, for loops that are not tied to the wall clock.
    pub fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.delta_seconds = delta.as_secs_f64();
        self.elapsed += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_sums_deltas() {
        let mut time = Time::new();
        time.advance(Duration::from_millis(16));
        time.advance(Duration::from_millis(20));
        assert_eq!(time.delta(), Duration::from_millis(20));
        assert_eq!(time.elapsed(), Duration::from_millis(36));
        assert!((time.delta_seconds() - 0.02).abs() < 1e-6);
    }
}
