//! Simulated time of a session, counted in whole communication steps.

use std::time::Duration;

/// Slack for deciding whether a stop time falls on a step boundary.
const EPSILON: f64 = 1e-9;

/// Counts communication steps and converts them to simulated seconds. Time
/// is derived from the integer step count so it never accumulates rounding
/// error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    numerator: u32,
    denominator: u32,
    steps: u64,
    final_step: u64,
}

impl SessionClock {
    /// A clock stepping `numerator / denominator` seconds at a time that is
    /// done once simulated time reaches `stop_time`.
    ///
    /// Both parts of the step must be positive.
    pub fn new(numerator: u32, denominator: u32, stop_time: f64) -> Self {
        let step = numerator.max(1) as f64 / denominator.max(1) as f64;
        let exact = (stop_time.max(0.0) / step) - EPSILON;
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
            steps: 0,
            final_step: exact.ceil().max(0.0) as u64,
        }
    }

    /// The step size in seconds.
    pub fn step_seconds(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub fn step_duration(&self) -> Duration {
        self.due(1)
    }

    /// Steps completed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The number of steps the session runs before it stops.
    pub fn final_step(&self) -> u64 {
        self.final_step
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.time_at(self.steps)
    }

    pub fn time_at(&self, steps: u64) -> f64 {
        steps as f64 * self.numerator as f64 / self.denominator as f64
    }

    /// The stop time rounded up to a whole step.
    pub fn stop_time(&self) -> f64 {
        self.time_at(self.final_step)
    }

    /// Wall-clock offset from the start of a real-time run at which step
    /// `steps` may begin.
    pub fn due(&self, steps: u64) -> Duration {
        let nanos = steps as u128 * self.numerator as u128 * 1_000_000_000 / self.denominator as u128;
        Duration::from_nanos(nanos.try_into().unwrap_or(u64::MAX))
    }

    pub fn advance(&mut self, steps: u64) {
        self.steps = self.steps.saturating_add(steps);
    }

    /// Whether simulated time has reached the stop time.
    pub fn is_done(&self) -> bool {
        self.steps >= self.final_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_time_on_step_boundary() {
        let mut clock = SessionClock::new(1, 10, 0.5);
        assert_eq!(clock.final_step(), 5);
        for _ in 0..4 {
            clock.advance(1);
        }
        assert!(!clock.is_done());
        clock.advance(1);
        assert!(clock.is_done());
        assert!((clock.time() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn stop_time_between_steps_rounds_up() {
        let clock = SessionClock::new(1, 10, 0.25);
        assert_eq!(clock.final_step(), 3);
        assert_eq!(SessionClock::new(1, 10, 0.0).final_step(), 0);
        assert_eq!(SessionClock::new(1, 10, 1.0).final_step(), 10);
    }

    #[test]
    fn wall_clock_schedule() {
        let clock = SessionClock::new(1, 10, 1.0);
        assert_eq!(clock.step_duration(), Duration::from_millis(100));
        assert_eq!(clock.due(3), Duration::from_millis(300));
    }
}
