//! Loads a session from a JSON file.
//!
//! ```json
//! {
//!   "orchestrator": { "address": "127.0.0.1", "port": 4000 },
//!   "nodes": ["ramp.json", "gain.json"],
//!   "connections": [{ "source": "ramp.y", "targets": ["gain.u"] }],
//!   "config": { "step_numerator": 1, "step_denominator": 10, "stop_time": 2.0 }
//! }
//! ```
//!
//! Descriptor paths are relative to the session file. Terminals name a node by
//! its descriptor name and a variable by its name.

use cosim_core::{
    descriptor::DescriptorError,
    pdu::Scope,
    wiring::{Connection, Terminal, WiringError},
    Descriptor, Endpoint, Orchestrator, SessionConfig, SessionError,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    /// Where the orchestrator listens.
    #[serde(default = "default_orchestrator")]
    pub orchestrator: Endpoint,
    pub nodes: Vec<PathBuf>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
    #[serde(default)]
    pub config: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// `node.variable`
    pub source: String,
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<u32>,
}

fn default_orchestrator() -> Endpoint {
    Endpoint::localhost(4000)
}

/// A session file with its descriptors loaded.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub orchestrator: Endpoint,
    pub descriptors: Vec<Descriptor>,
    pub connections: Vec<Connection>,
    pub config: SessionConfig,
}

impl LoadedSession {
    pub fn into_orchestrator(self) -> Result<(Endpoint, Orchestrator), SessionError> {
        let orchestrator = Orchestrator::new(self.descriptors, self.connections, self.config)?;
        Ok((self.orchestrator, orchestrator))
    }
}

impl SessionFile {
    pub fn parse(text: &str) -> Result<Self, SessionFileError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a session file and every descriptor it names.
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedSession, SessionFileError> {
        let path = path.as_ref();
        let file = Self::parse(&fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        file.resolve(base)
    }

    /// Loads the descriptors relative to `base` and resolves the connections
    /// against them.
    pub fn resolve(self, base: &Path) -> Result<LoadedSession, SessionFileError> {
        let descriptors = self
            .nodes
            .iter()
            .map(|node| {
                Descriptor::load(base.join(node)).map_err(|source| SessionFileError::Descriptor {
                    path: node.clone(),
                    error: source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let connections = self
            .connections
            .iter()
            .map(|spec| spec.resolve(&descriptors))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LoadedSession {
            orchestrator: self.orchestrator,
            descriptors,
            connections,
            config: self.config,
        })
    }
}

impl ConnectionSpec {
    pub fn resolve(&self, descriptors: &[Descriptor]) -> Result<Connection, WiringError> {
        let source = Terminal::by_name(descriptors, &self.source)?;
        let targets = self
            .targets
            .iter()
            .map(|target| Terminal::by_name(descriptors, target))
            .collect::<Result<Vec<_>, _>>()?;
        let mut connection = Connection::new(source, targets);
        if let Some(scope) = self.scope {
            connection.scope = scope;
        }
        if let Some(step_count) = self.step_count {
            connection.step_count = step_count;
        }
        Ok(connection)
    }
}

#[derive(Debug, ThisError)]
pub enum SessionFileError {
    #[error("Could not read the session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed session file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Descriptor {path:?}: {error}")]
    Descriptor {
        path: PathBuf,
        error: DescriptorError,
    },
    #[error("Invalid connection: {0}")]
    Wiring(#[from] WiringError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Model;
    use std::net::Ipv4Addr;

    #[test]
    fn defaults_fill_in_the_gaps() -> anyhow::Result<()> {
        let file = SessionFile::parse(r#"{ "nodes": ["a.json"] }"#)?;
        assert_eq!(file.orchestrator, Endpoint::localhost(4000));
        assert!(file.connections.is_empty());
        assert_eq!(file.config, SessionConfig::default());
        Ok(())
    }

    #[test]
    fn resolves_terminals_by_name() -> anyhow::Result<()> {
        let ramp = Model::Ramp { slope: 1.0 }.descriptor("ramp", Ipv4Addr::LOCALHOST, 5000, 0.1)?;
        let gain = Model::Gain { gain: 2.0 }.descriptor("gain", Ipv4Addr::LOCALHOST, 5010, 0.1)?;
        let spec = ConnectionSpec {
            source: "ramp.y".into(),
            targets: vec!["gain.u".into()],
            scope: Some(Scope::Run),
            step_count: None,
        };
        let connection = spec.resolve(&[ramp.clone(), gain.clone()])?;
        assert_eq!(connection.source.value_reference, 0);
        assert_eq!(connection.targets[0].node.into_inner(), 2);
        assert_eq!(connection.targets[0].value_reference, 1);
        assert_eq!(connection.scope, Scope::Run);
        assert_eq!(connection.step_count, 1);

        let missing = ConnectionSpec {
            targets: vec!["gain.v".into()],
            ..spec
        };
        assert!(missing.resolve(&[ramp, gain]).is_err());
        Ok(())
    }

    #[test]
    fn loads_descriptors_next_to_the_file() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("cosim-session-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        Model::Ramp { slope: 1.0 }
            .descriptor("ramp", Ipv4Addr::LOCALHOST, 5000, 0.1)?
            .save(dir.join("ramp.json"))?;
        Model::Integrator
            .descriptor("sum", Ipv4Addr::LOCALHOST, 5010, 0.1)?
            .save(dir.join("sum.json"))?;
        fs::write(
            dir.join("session.json"),
            r#"{
                "nodes": ["ramp.json", "sum.json"],
                "connections": [{ "source": "ramp.y", "targets": ["sum.u"] }],
                "config": { "stop_time": 0.5 }
            }"#,
        )?;

        let session = SessionFile::load(dir.join("session.json"))?;
        assert_eq!(session.descriptors.len(), 2);
        assert_eq!(session.connections.len(), 1);
        assert_eq!(session.config.stop_time, 0.5);
        assert!(session.into_orchestrator().is_ok());
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
