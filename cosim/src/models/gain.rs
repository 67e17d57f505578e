use super::float_input;
use cosim_core::{Engine, EngineError, Value, ValueReference};

/// Outputs `gain * u` on value reference 0, reading `u` from value
/// reference 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Gain {
    gain: f64,
    u: f64,
    y: f64,
}

impl Gain {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            u: 0.0,
            y: 0.0,
        }
    }
}

impl Engine for Gain {
    fn initialize(&mut self, _time: f64) -> Result<(), EngineError> {
        self.y = self.gain * self.u;
        Ok(())
    }

    fn do_step(&mut self, _time: f64, _step: f64) -> Result<(), EngineError> {
        self.y = self.gain * self.u;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use cosim_core::DataType;

    #[test]
    fn scales_its_input() {
        let mut gain = Gain::new(0.5);
        gain.write(1, Value::Float64(4.0)).unwrap();
        gain.do_step(0.0, 0.1).unwrap();
        assert_eq!(gain.read(0), Ok(Value::Float64(2.0)));
        assert_eq!(
            gain.write(1, Value::Int64(4)),
            Err(EngineError::Type {
                value_reference: 1,
                expected: DataType::Float64,
                actual: DataType::Int64,
            })
        );
        assert!(gain.write(0, Value::Float64(1.0)).is_err());
    }
}
