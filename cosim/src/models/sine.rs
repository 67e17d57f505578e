use cosim_core::{Engine, EngineError, Value, ValueReference};
use std::f64::consts::TAU;

/// Outputs `amplitude * sin(2 pi frequency t)` on value reference 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Sine {
    amplitude: f64,
    frequency: f64,
    y: f64,
}

impl Sine {
    pub fn new(amplitude: f64, frequency: f64) -> Self {
        Self {
            amplitude,
            frequency,
            y: 0.0,
        }
    }

    fn at(&self, time: f64) -> f64 {
        self.amplitude * (TAU * self.frequency * time).sin()
    }
}

impl Engine for Sine {
    fn initialize(&mut self, time: f64) -> Result<(), EngineError> {
        self.y = self.at(time);
        Ok(())
    }

    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError> {
        self.y = self.at(time + step);
        Ok(())
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        match value_reference {
            0 => Ok(Value::Float64(self.y)),
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }

    fn write(&mut self, value_reference: ValueReference, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::UnknownValueReference(value_reference))
    }
}
