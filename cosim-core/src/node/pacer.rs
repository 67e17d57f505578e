use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// The wall-clock cadence of a real-time node.
///
/// A spawned task ticks once per communication step and reports the number of
/// steps that should have completed by now. The node loop owns every piece of
/// state the ticks affect, so the task shares nothing with it but the channel.
pub(super) struct Pacer {
    task: JoinHandle<()>,
}

impl Pacer {
    /// Starts ticking `step` after `start`, then every `step`.
    pub fn start(start: Instant, step: Duration, ticks: mpsc::UnboundedSender<u64>) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(start + step, step);
            // A late tick is reported once, with the step count it catches up to
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let at = interval.tick().await;
                let due = elapsed_steps(at.saturating_duration_since(start), step);
                if ticks.send(due).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whole steps of length `step` that fit in `elapsed`, tolerating timer jitter
/// of a millisecond.
fn elapsed_steps(elapsed: Duration, step: Duration) -> u64 {
    let step = step.as_nanos().max(1);
    let elapsed = elapsed.as_nanos() + Duration::from_millis(1).as_nanos();
    (elapsed / step).try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_whole_steps() {
        let step = Duration::from_millis(100);
        assert_eq!(elapsed_steps(Duration::from_millis(99), step), 0);
        assert_eq!(elapsed_steps(Duration::from_micros(99_500), step), 1);
        assert_eq!(elapsed_steps(Duration::from_millis(350), step), 3);
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(5000)]
    async fn ticks_once_per_step() {
        let (send, mut receive) = mpsc::unbounded_channel();
        let pacer = Pacer::start(Instant::now(), Duration::from_millis(100), send);
        assert_eq!(receive.recv().await, Some(1));
        assert_eq!(receive.recv().await, Some(2));
        drop(pacer);
        // The aborted task drops its sender
        while receive.recv().await.is_some() {}
    }
}
