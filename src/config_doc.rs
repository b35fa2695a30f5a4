// Persisted connector configuration document (§6.2): the
// `Model/Information/Cosimulation/Variables/Variable` shape, read with
// `quick_xml::de::from_str` and written with `quick_xml::se::to_string`.
// `Connector::load`/`save` are the only callers; this module just owns the
// on-disk shape and its round-trip.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ids, IslError, IslResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Information {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_type")]
    pub r#type: String,
}

fn default_type() -> String {
    "ISL".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cosimulation {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(rename = "connecttimeout", default)]
    pub connect_timeout: f64,
    #[serde(rename = "starttime")]
    pub start_time: f64,
    #[serde(rename = "endtime")]
    pub end_time: f64,
    #[serde(rename = "stepsize")]
    pub step_size: f64,
    #[serde(rename = "steptolerance")]
    pub step_tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CausalityDoc {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarValue<T> {
    #[serde(default = "default_scalar_size")]
    pub size: i32,
    #[serde(rename = "initialvalue", default)]
    pub initial_value: Option<T>,
}

fn default_scalar_size() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableKind {
    Real(ScalarValue<f64>),
    Integer(ScalarValue<i32>),
    Boolean(ScalarValue<bool>),
    String(ScalarValue<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDoc {
    pub id: u32,
    pub name: String,
    #[serde(rename = "connectid", default)]
    pub connect_id: String,
    pub causality: CausalityDoc,
    #[serde(rename = "stepsize", default)]
    pub step_size: Option<f64>,
    #[serde(default)]
    pub store: bool,
    #[serde(rename = "synctimeout", default = "default_sync_timeout")]
    pub sync_timeout: i64,
    #[serde(flatten)]
    pub kind: VariableKind,
}

fn default_sync_timeout() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variables {
    #[serde(rename = "Variable", default)]
    pub variable: Vec<VariableDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "Model")]
pub struct ModelDoc {
    #[serde(rename = "Information")]
    pub information: Information,
    #[serde(rename = "Cosimulation")]
    pub cosimulation: Cosimulation,
    #[serde(rename = "Variables")]
    pub variables: Variables,
}

impl ModelDoc {
    pub fn load(path: &Path) -> IslResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IslError::ipc(ids::ATTACH_FAILED, e.to_string()))?;
        quick_xml::de::from_str(&text).map_err(|e| IslError::config(ids::BAD_SESSION_ID, e.to_string()))
    }

    pub fn save(&self, path: &Path) -> IslResult<()> {
        let text = quick_xml::se::to_string(self).map_err(|e| IslError::config(ids::BAD_SESSION_ID, e.to_string()))?;
        std::fs::write(path, text).map_err(|e| IslError::ipc(ids::ATTACH_FAILED, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> ModelDoc {
        ModelDoc {
            information: Information { name: "demo".into(), id: String::new(), r#type: "ISL".into() },
            cosimulation: Cosimulation {
                session: Some("demo-session".into()),
                connect_timeout: 30.0,
                start_time: 0.0,
                end_time: 10.0,
                step_size: 0.1,
                step_tolerance: 1e-6,
            },
            variables: Variables {
                variable: vec![VariableDoc {
                    id: 1,
                    name: "Token1W".into(),
                    connect_id: "Token1W".into(),
                    causality: CausalityDoc::Output,
                    step_size: None,
                    store: false,
                    sync_timeout: -1,
                    kind: VariableKind::Real(ScalarValue { size: 1, initial_value: Some(1.0) }),
                }],
            },
        }
    }

    #[test]
    fn round_trip_via_tempfile() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("openisl_config_test_{}.xml", std::process::id()));
        let doc = sample_doc();
        doc.save(&path).expect("save");
        let loaded = ModelDoc::load(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, doc);
    }
}
