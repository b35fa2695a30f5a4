// A named I/O variable on a connector's bus endpoint (§3.2).

use crate::data_type::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarState {
    NotDefined,
    PartiallyDefined,
    FullyDefined,
    IsConnected,
}

#[derive(Debug, Clone)]
pub struct IoVar {
    pub id: u32,
    pub name: String,
    /// Wire-level key; empty means the variable is not put on the bus.
    pub connect_id: String,
    pub causality: Causality,
    pub data_type: DataType,
    step_size: f64,
    pub store: bool,
    pub sync_timeout_ms: i64,
    pub state: VarState,
    pub checked: bool,
    /// Index into the owning connector's channel arena, once connected.
    pub channel_ix: Option<usize>,
    /// This connector's reader slot on its channel, once attached as a
    /// reader (inputs and viewer-mode outputs only).
    pub reader_ix: Option<usize>,
}

impl IoVar {
    pub fn new(id: u32, name: impl Into<String>, causality: Causality, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            connect_id: String::new(),
            causality,
            data_type,
            step_size: -1.0,
            store: false,
            sync_timeout_ms: -1,
            state: VarState::NotDefined,
            checked: false,
            channel_ix: None,
            reader_ix: None,
        }
    }

    pub fn is_on_bus(&self) -> bool {
        !self.connect_id.is_empty()
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// `0.0` is normalized to `-1.0` ("inherit the connector's step").
    pub fn set_step_size(&mut self, step: f64) {
        self.step_size = if step == 0.0 { -1.0 } else { step };
    }

    pub fn effective_step(&self, connector_step: f64) -> f64 {
        if self.step_size < 0.0 {
            connector_step
        } else {
            self.step_size
        }
    }

    pub fn waits_forever(&self) -> bool {
        self.sync_timeout_ms < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataKind;

    fn sample() -> IoVar {
        IoVar::new(1, "speed", Causality::Output, DataType::scalar(DataKind::Real, 1))
    }

    #[test]
    fn zero_step_normalizes_to_inherit() {
        let mut v = sample();
        v.set_step_size(0.0);
        assert_eq!(v.step_size(), -1.0);
    }

    #[test]
    fn negative_step_is_kept_as_is() {
        let mut v = sample();
        v.set_step_size(-1.0);
        assert_eq!(v.step_size(), -1.0);
    }

    #[test]
    fn effective_step_falls_back_to_connector_step() {
        let v = sample();
        assert_eq!(v.effective_step(0.1), 0.1);
    }

    #[test]
    fn explicit_step_overrides_connector_step() {
        let mut v = sample();
        v.set_step_size(0.5);
        assert_eq!(v.effective_step(0.1), 0.5);
    }

    #[test]
    fn not_on_bus_until_connect_id_set() {
        let mut v = sample();
        assert!(!v.is_on_bus());
        v.connect_id = "speed_out".into();
        assert!(v.is_on_bus());
    }

    #[test]
    fn negative_timeout_means_infinite_wait() {
        let mut v = sample();
        v.sync_timeout_ms = -1;
        assert!(v.waits_forever());
        v.sync_timeout_ms = 500;
        assert!(!v.waits_forever());
    }
}
