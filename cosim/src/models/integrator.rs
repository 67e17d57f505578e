use super::float_input;
use cosim_core::{Engine, EngineError, Value, ValueReference};

/// Integrates `u` (value reference 1) into `y` (value reference 0) with one
/// explicit Euler update per step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Integrator {
    u: f64,
    y: f64,
}

impl Integrator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for Integrator {
    fn initialize(&mut self, _time: f64) -> Result<(), EngineError> {
        Ok(())
    }

    fn do_step(&mut self, _time: f64, step: f64) -> Result<(), EngineError> {
        self.y += self.u * step;
        if self.y.is_finite() {
            Ok(())
        } else {
            Err(EngineError::Failed(format!("the integral diverged to {}", self.y)))
        }
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        match value_reference {
            0 => Ok(Value::Float64(self.y)),
            1 => Ok(Value::Float64(self.u)),
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }

    fn write(&mut self, value_reference: ValueReference, value: Value) -> Result<(), EngineError> {
        match value_reference {
            1 => {
                self.u = float_input(value_reference, value)?;
                Ok(())
            }
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }
}
