//! Session and node runtime configuration.

use crate::descriptor::OpMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

/// How the orchestrator drives a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// The communication step is `step_numerator / step_denominator` seconds.
    pub step_numerator: u32,
    pub step_denominator: u32,

    /// Simulated time in seconds at which the session stops.
    pub stop_time: f64,

    /// The operating mode requested at registration. Anything but
    /// non-real-time paces steps against the wall clock.
    pub op_mode: OpMode,

    /// How many times `initialize` is repeated before `run`.
    pub initialization_passes: u32,

    /// The longest the session may go without the progress it waits for
    /// before it is aborted.
    #[serde(with = "millis")]
    pub phase_timeout: Duration,

    /// How long an abort waits for nodes to confirm `stop` and `deregister`.
    #[serde(with = "millis")]
    pub abort_window: Duration,

    /// How far in the future the real-time start deadline is placed.
    #[serde(with = "millis")]
    pub sync_lead: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_numerator: 1,
            step_denominator: 10,
            stop_time: 1.0,
            op_mode: OpMode::NonRealTime,
            initialization_passes: 0,
            phase_timeout: Duration::from_secs(5),
            abort_window: Duration::from_secs(1),
            sync_lead: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, numerator: u32, denominator: u32) -> Self {
        self.step_numerator = numerator;
        self.step_denominator = denominator;
        self
    }

    pub fn with_stop_time(mut self, stop_time: f64) -> Self {
        self.stop_time = stop_time;
        self
    }

    pub fn with_op_mode(mut self, op_mode: OpMode) -> Self {
        self.op_mode = op_mode;
        self
    }

    pub fn with_initialization_passes(mut self, passes: u32) -> Self {
        self.initialization_passes = passes;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_abort_window(mut self, window: Duration) -> Self {
        self.abort_window = window;
        self
    }

    pub fn with_sync_lead(mut self, lead: Duration) -> Self {
        self.sync_lead = lead;
        self
    }

    pub fn real_time(&self) -> bool {
        self.op_mode.is_real_time()
    }

    pub fn step(&self) -> (u32, u32) {
        (self.step_numerator, self.step_denominator)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_numerator == 0 || self.step_denominator == 0 {
            return Err(ConfigError::Step(self.step_numerator, self.step_denominator));
        }
        if !self.stop_time.is_finite() || self.stop_time < 0.0 {
            return Err(ConfigError::StopTime(self.stop_time));
        }
        if self.phase_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// How a node runtime behaves while it serves a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// A node that hears nothing on its control endpoint for this long gives
    /// up on the session.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,

    /// The longest a step waits for coupling data of the previous step before
    /// it reuses the last value it applied.
    #[serde(with = "millis")]
    pub input_wait: Duration,

    /// Whether formatted log records are also sent to the orchestrator.
    pub log_to_orchestrator: bool,
    /// Simulated seconds after which a real-time node stops on its own,
    /// measured on the wall clock from the start of its run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<f64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            input_wait: Duration::from_millis(200),
            log_to_orchestrator: false,
            stop_time: None,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_input_wait(mut self, wait: Duration) -> Self {
        self.input_wait = wait;
        self
    }

    pub fn with_log_to_orchestrator(mut self, enabled: bool) -> Self {
        self.log_to_orchestrator = enabled;
        self
    }

    pub fn with_stop_time(mut self, stop_time: f64) -> Self {
        self.stop_time = Some(stop_time);
        self
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("The communication step {0}/{1} must be positive")]
    Step(u32, u32),
    #[error("The stop time {0} must be a non-negative number of seconds")]
    StopTime(f64),
    #[error("The phase timeout must be positive")]
    ZeroTimeout,
}

/// Serializes a [`Duration`] as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
