//! The wiring a node learns from its configuration items.
//!
//! Items may arrive in any order, so everything is keyed by data id and only
//! put together when it is used.

use crate::{
    id::{DataId, ValueReference},
    pdu::{ErrorCode, Scope},
    transport::Endpoint,
    value::{DataType, Value, ValueError},
};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub(super) struct Bindings {
    scopes: BTreeMap<DataId, Scope>,
    step_counts: BTreeMap<DataId, u32>,
    outputs: BTreeMap<DataId, ValueReference>,
    targets: BTreeMap<DataId, Vec<Endpoint>>,
    inputs: BTreeMap<DataId, Vec<(ValueReference, DataType)>>,
    sources: BTreeMap<DataId, Endpoint>,
    /// Received coupling values by data id and producing step.
    received: BTreeMap<DataId, BTreeMap<u64, Value>>,
}

/// An output due for transmission.
pub(super) struct DueOutput<'a> {
    pub data_id: DataId,
    pub value_reference: ValueReference,
    pub targets: &'a [Endpoint],
}

/// The input values to apply before a step.
#[derive(Debug, Default, PartialEq)]
pub(super) struct Inputs {
    pub values: Vec<(ValueReference, Value)>,
    /// Data ids whose value for the step never arrived.
    pub stale: Vec<DataId>,
}

impl Bindings {
    pub fn set_scope(&mut self, data_id: DataId, scope: Scope) {
        self.scopes.insert(data_id, scope);
    }

    pub fn set_step_count(&mut self, data_id: DataId, steps: u32) {
        self.step_counts.insert(data_id, steps);
    }

    pub fn bind_output(&mut self, data_id: DataId, value_reference: ValueReference) {
        self.outputs.insert(data_id, value_reference);
    }

    pub fn bind_input(&mut self, data_id: DataId, value_reference: ValueReference, data_type: DataType) {
        let bound = self.inputs.entry(data_id).or_default();
        if !bound.iter().any(|(vr, _)| *vr == value_reference) {
            bound.push((value_reference, data_type));
        }
    }

    pub fn add_target(&mut self, data_id: DataId, endpoint: Endpoint) {
        let targets = self.targets.entry(data_id).or_default();
        if !targets.contains(&endpoint) {
            targets.push(endpoint);
        }
    }

    pub fn set_source(&mut self, data_id: DataId, endpoint: Endpoint) {
        self.sources.insert(data_id, endpoint);
    }

    pub fn scope(&self, data_id: DataId) -> Scope {
        self.scopes
            .get(&data_id)
            .copied()
            .unwrap_or(Scope::InitializationRun)
    }

    pub fn step_count(&self, data_id: DataId) -> u32 {
        self.step_counts.get(&data_id).copied().unwrap_or(1).max(1)
    }

    /// Every output needs somewhere to go and every input needs a source.
    pub fn check_complete(&self) -> Result<(), ErrorCode> {
        let outputs_routed = self
            .outputs
            .keys()
            .all(|data_id| self.targets.get(data_id).map_or(false, |t| !t.is_empty()));
        let inputs_sourced = self
            .inputs
            .keys()
            .all(|data_id| self.sources.contains_key(data_id));
        let targets_bound = self.targets.keys().all(|id| self.outputs.contains_key(id));
        if outputs_routed && inputs_sourced && targets_bound {
            Ok(())
        } else {
            Err(ErrorCode::IncompleteConfiguration)
        }
    }

    /// The declared input variables, for applying start values.
    pub fn input_references(&self) -> impl Iterator<Item = ValueReference> + '_ {
        self.inputs
            .values()
            .flat_map(|bound| bound.iter().map(|(vr, _)| *vr))
    }

    /// Stores a received `DATA` payload. Returns false when the data id is not
    /// bound as an input here.
    pub fn receive(&mut self, data_id: DataId, step: u64, payload: &[u8]) -> Result<bool, ValueError> {
        let Some(bound) = self.inputs.get(&data_id) else {
            return Ok(false);
        };
        let Some((_, data_type)) = bound.first() else {
            return Ok(false);
        };
        let value = Value::from_bytes(*data_type, payload)?;
        self.received.entry(data_id).or_default().insert(step, value);
        Ok(true)
    }

    /// Whether a fresh value produced at `step` is expected for `data_id`.
    fn expects(&self, data_id: DataId, step: u64, initialized: bool) -> bool {
        let scope = self.scope(data_id);
        if step == 0 {
            initialized && scope.includes_initialization()
        } else {
            scope.includes_run() && step % self.step_count(data_id) as u64 == 0
        }
    }

    /// Whether every expected value produced at `step` has arrived.
    pub fn ready(&self, step: u64, initialized: bool) -> bool {
        self.inputs.keys().all(|data_id| {
            !self.expects(*data_id, step, initialized)
                || self
                    .received
                    .get(data_id)
                    .map_or(false, |values| values.contains_key(&step))
        })
    }

    /// The values to apply before computing the step after `step`: for each
    /// input the value produced at `step`, or the newest older one. Expected
    /// values that are missing are reported as stale. Older values are
    /// dropped afterwards.
    pub fn take(&mut self, step: u64, initialized: bool) -> Inputs {
        let mut inputs = Inputs::default();
        let data_ids: Vec<DataId> = self.inputs.keys().copied().collect();
        for data_id in data_ids {
            let expected = self.expects(data_id, step, initialized);
            let latest = self
                .received
                .get(&data_id)
                .and_then(|values| values.range(..=step).next_back())
                .map(|(produced, value)| (*produced, *value));
            match latest {
                Some((produced, value)) => {
                    if expected && produced != step {
                        inputs.stale.push(data_id);
                    }
                    if let Some(bound) = self.inputs.get(&data_id) {
                        inputs
                            .values
                            .extend(bound.iter().map(|(vr, _)| (*vr, value)));
                    }
                    if let Some(values) = self.received.get_mut(&data_id) {
                        *values = values.split_off(&produced);
                    }
                }
                None if expected => inputs.stale.push(data_id),
                None => {}
            }
        }
        inputs
    }

    /// The outputs that must be sent after reaching `step`.
    pub fn outputs_due(&self, step: u64, initializing: bool) -> Vec<DueOutput<'_>> {
        self.outputs
            .iter()
            .filter(|(data_id, _)| {
                let scope = self.scope(**data_id);
                if initializing {
                    scope.includes_initialization()
                } else {
                    scope.includes_run() && step % self.step_count(**data_id) as u64 == 0
                }
            })
            .map(|(data_id, value_reference)| DueOutput {
                data_id: *data_id,
                value_reference: *value_reference,
                targets: self
                    .targets
                    .get(data_id)
                    .map_or(&[][..], |targets| targets.as_slice()),
            })
            .collect()
    }

    /// Forgets every received value.
    pub fn clear_received(&mut self) {
        self.received.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(v: f64) -> Vec<u8> {
        Value::Float64(v).to_bytes()
    }

    fn wired() -> Bindings {
        let mut bindings = Bindings::default();
        bindings.bind_input(1, 0, DataType::Float64);
        bindings.set_source(1, Endpoint::localhost(5001));
        bindings.bind_output(2, 4);
        bindings.add_target(2, Endpoint::localhost(5003));
        bindings
    }

    #[test]
    fn completeness_is_order_independent() {
        let mut bindings = Bindings::default();
        bindings.add_target(2, Endpoint::localhost(5003));
        assert_eq!(bindings.check_complete(), Err(ErrorCode::IncompleteConfiguration));
        bindings.bind_output(2, 4);
        assert_eq!(bindings.check_complete(), Ok(()));
        bindings.bind_input(1, 0, DataType::Float64);
        assert!(bindings.check_complete().is_err());
        bindings.set_source(1, Endpoint::localhost(5001));
        assert_eq!(wired().check_complete(), Ok(()));
    }

    #[test]
    fn uses_the_value_of_the_previous_step() {
        let mut bindings = wired();
        bindings.receive(1, 3, &float(0.3)).unwrap();
        // A faster source may already have sent the next step
        bindings.receive(1, 4, &float(0.4)).unwrap();
        assert!(bindings.ready(3, false));
        let inputs = bindings.take(3, false);
        assert_eq!(inputs.values, vec![(0, Value::Float64(0.3))]);
        assert!(inputs.stale.is_empty());
        assert_eq!(bindings.take(4, false).values, vec![(0, Value::Float64(0.4))]);
    }

    #[test]
    fn missing_values_are_stale() {
        let mut bindings = wired();
        bindings.receive(1, 1, &float(0.1)).unwrap();
        assert!(!bindings.ready(2, false));
        let inputs = bindings.take(2, false);
        assert_eq!(inputs.values, vec![(0, Value::Float64(0.1))]);
        assert_eq!(inputs.stale, vec![1]);
    }

    #[test]
    fn first_step_without_initialization_uses_start_values() {
        let mut bindings = wired();
        assert!(bindings.ready(0, false));
        assert_eq!(bindings.take(0, false), Inputs::default());
        assert!(!bindings.ready(0, true));
    }

    #[test]
    fn step_count_and_scope_select_outputs() {
        let mut bindings = wired();
        bindings.set_step_count(2, 2);
        assert!(bindings.outputs_due(1, false).is_empty());
        assert_eq!(bindings.outputs_due(2, false).len(), 1);
        bindings.set_scope(2, Scope::Initialization);
        assert_eq!(bindings.outputs_due(0, true).len(), 1);
        assert!(bindings.outputs_due(2, false).is_empty());
    }

    #[test]
    fn rejects_payloads_of_the_wrong_width() {
        let mut bindings = wired();
        assert!(bindings.receive(1, 0, &[1, 2]).is_err());
        assert_eq!(bindings.receive(9, 0, &float(1.0)), Ok(false));
    }
}
