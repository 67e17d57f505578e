use cosim_core::{Engine, EngineError, Value, ValueReference};

/// Outputs `slope * t` on value reference 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp {
    slope: f64,
    y: f64,
}

impl Ramp {
    pub fn new(slope: f64) -> Self {
        Self { slope, y: 0.0 }
    }
}

impl Engine for Ramp {
    fn initialize(&mut self, time: f64) -> Result<(), EngineError> {
        self.y = self.slope * time;
        Ok(())
    }

    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError> {
        self.y = self.slope * (time + step);
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
