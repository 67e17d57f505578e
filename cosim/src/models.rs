//! Built-in simulation models and the descriptors generated for them.
//!
//! A model reference names a model and optionally its parameters, separated by
//! colons: `ramp`, `ramp:2`, `gain:0.5`, `sine:1:0.25`, `integrator`. Outputs
//! take the value references `0..n` and inputs follow.

use cosim_core::{
    descriptor::{
        ControlEndpoint, Direction, LogCategory, LogTemplate, OpMode, Resolution, Variable,
        PROTOCOL_VERSION,
    },
    node::STEP_TEMPLATE,
    DataType, Descriptor, Engine, EngineError, SessionUuid, Value, ValueReference,
};
use std::{net::Ipv4Addr, str::FromStr};
use thiserror::Error as ThisError;

mod gain;
pub use gain::Gain;

mod integrator;
pub use integrator::Integrator;

mod ramp;
pub use ramp::Ramp;

mod sine;
pub use sine::Sine;

const STEP_CATEGORY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Model {
    /// `y = slope * t`
    Ramp { slope: f64 },
    /// `y = gain * u`
    Gain { gain: f64 },
    /// `y = amplitude * sin(2 pi frequency t)`
    Sine { amplitude: f64, frequency: f64 },
    /// `y` integrates `u` over time.
    Integrator,
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Model::Ramp { .. } => "ramp",
            Model::Gain { .. } => "gain",
            Model::Sine { .. } => "sine",
            Model::Integrator => "integrator",
        }
    }

    pub fn outputs(&self) -> &'static [&'static str] {
        &["y"]
    }

    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            Model::Ramp { .. } | Model::Sine { .. } => &[],
            Model::Gain { .. } | Model::Integrator => &["u"],
        }
    }

    /// A fresh engine running this model.
    pub fn engine(&self) -> Box<dyn Engine> {
        match *self {
            Model::Ramp { slope } => Box::new(Ramp::new(slope)),
            Model::Gain { gain } => Box::new(Gain::new(gain)),
            Model::Sine {
                amplitude,
                frequency,
            } => Box::new(Sine::new(amplitude, frequency)),
            Model::Integrator => Box::new(Integrator::new()),
        }
    }

    /// Generates the descriptor of a node running this model at
    /// `host:port`, stepping every `step` seconds.
    pub fn descriptor(
        &self,
        name: &str,
        host: Ipv4Addr,
        port: u16,
        step: f64,
    ) -> Result<Descriptor, ModelError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(ModelError::Step(step));
        }
        let denominator = (1.0 / step).round();
        if !(1.0..=u32::MAX as f64).contains(&denominator) {
            return Err(ModelError::Step(step));
        }
        // Coupling data goes to the port after the control port
        if port == u16::MAX {
            return Err(ModelError::Port(port));
        }

        let outputs = self.outputs().iter().map(|name| Variable {
            name: (*name).into(),
            value_reference: 0,
            direction: Direction::Output,
            data_type: DataType::Float64,
            start: None,
        });
        let inputs = self.inputs().iter().map(|name| Variable {
            name: (*name).into(),
            value_reference: 0,
            direction: Direction::Input,
            data_type: DataType::Float64,
            start: Some(Value::Float64(0.0)),
        });
        let variables = outputs
            .chain(inputs)
            .zip(0..)
            .map(|(variable, value_reference)| Variable {
                value_reference,
                ..variable
            })
            .collect();

        Ok(Descriptor {
            name: name.into(),
            uuid: SessionUuid::random(),
            version: PROTOCOL_VERSION,
            control: ControlEndpoint {
                host,
                port,
                data_port: None,
            },
            op_modes: vec![OpMode::RealTime, OpMode::SoftRealTime, OpMode::NonRealTime],
            resolutions: vec![Resolution {
                numerator: 1,
                denominator: denominator as u32,
                fixed: true,
            }],
            variables,
            log_categories: vec![LogCategory {
                id: STEP_CATEGORY,
                name: "NODE".into(),
            }],
            log_templates: vec![LogTemplate {
                id: STEP_TEMPLATE,
                category: STEP_CATEGORY,
                level: 3,
                message: "[Time = %float64]: output = %float64".into(),
            }],
        })
    }
}

impl FromStr for Model {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let name = parts.next().unwrap_or_default();
        let parameters: Vec<f64> = parts
            .map(|part| {
                part.trim()
                    .parse()
                    .map_err(|_| ModelError::Parameter(part.into()))
            })
            .collect::<Result<_, _>>()?;
        let parameter = |i: usize, default: f64| parameters.get(i).copied().unwrap_or(default);
        let (model, accepted) = match name.trim().to_ascii_lowercase().as_str() {
            "ramp" => (Model::Ramp { slope: parameter(0, 1.0) }, 1),
            "gain" => (Model::Gain { gain: parameter(0, 1.0) }, 1),
            "sine" => (
                Model::Sine {
                    amplitude: parameter(0, 1.0),
                    frequency: parameter(1, 1.0),
                },
                2,
            ),
            "integrator" => (Model::Integrator, 0),
            _ => return Err(ModelError::Unknown(s.into())),
        };
        if parameters.len() > accepted {
            return Err(ModelError::TooManyParameters(s.into()));
        }
        Ok(model)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown model {0:?}")]
    Unknown(String),
    #[error("Model parameter {0:?} is not a number")]
    Parameter(String),
    #[error("Too many parameters in {0:?}")]
    TooManyParameters(String),
    #[error("A communication step of {0} seconds is not usable")]
    Step(f64),
    #[error("Control port {0} leaves no port for coupling data")]
    Port(u16),
}

/// Reads a value written to a `Float64` input.
fn float_input(value_reference: ValueReference, value: Value) -> Result<f64, EngineError> {
    match value {
        Value::Float64(v) => Ok(v),
        other => Err(EngineError::Type {
            value_reference,
            expected: DataType::Float64,
            actual: other.data_type(),
        }),
    }
}
