// App settings loaded from `isl_api.ini`'s single `[Common]` group.
//
// Uses the `ini` crate; the original upstream `CINI` wrapper around
// `boost::property_tree::ptree` is the behavioral reference for defaults
// and key names.

use std::path::Path;

use crate::error::{IslError, IslResult};

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub max_shm_string_size: usize,
    pub max_fifo_depth: usize,
    pub max_nb_readers: usize,
    pub max_nb_simulations: usize,
    pub step_tolerance: f64,
    pub isl_compatible: bool,
    pub is_global_ipc: bool,
    /// FMI-master-only key, carried for round-trip fidelity though unused
    /// by the core itself.
    pub timeout_pending_step: u32,
    /// FMI-master-only key, carried for round-trip fidelity.
    pub zip_cmd: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_shm_string_size: 1024,
            max_fifo_depth: 1024,
            max_nb_readers: 16,
            max_nb_simulations: 256,
            step_tolerance: 1e-6,
            isl_compatible: false,
            is_global_ipc: false,
            timeout_pending_step: 0,
            zip_cmd: String::new(),
        }
    }
}

impl AppSettings {
    pub fn load(path: &Path) -> IslResult<Self> {
        let doc = ini::Ini::load_from_file(path)
            .map_err(|e| IslError::ipc(crate::error::ids::ATTACH_FAILED, e.to_string()))?;
        let mut settings = Self::default();
        if let Some(section) = doc.section(Some("Common")) {
            if let Some(v) = section.get("MaxSHMStringSize") {
                settings.max_shm_string_size = v.parse().unwrap_or(settings.max_shm_string_size);
            }
            if let Some(v) = section.get("MaxFIFODepth") {
                settings.max_fifo_depth = v.parse().unwrap_or(settings.max_fifo_depth);
            }
            if let Some(v) = section.get("MaxNbReaders") {
                settings.max_nb_readers = v.parse().unwrap_or(settings.max_nb_readers);
            }
            if let Some(v) = section.get("MaxNbSimulations") {
                settings.max_nb_simulations = v.parse().unwrap_or(settings.max_nb_simulations);
            }
            if let Some(v) = section.get("StepTolerance") {
                settings.step_tolerance = v.parse().unwrap_or(settings.step_tolerance);
            }
            if let Some(v) = section.get("ISLCompatible") {
                settings.isl_compatible = v.eq_ignore_ascii_case("true");
            }
            if let Some(v) = section.get("IsGlobalIPC") {
                settings.is_global_ipc = v.eq_ignore_ascii_case("true");
            }
            if let Some(v) = section.get("TimeOutPendingStep") {
                settings.timeout_pending_step = v.parse().unwrap_or(settings.timeout_pending_step);
            }
            if let Some(v) = section.get("ZipCmd") {
                settings.zip_cmd = v.to_string();
            }
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> IslResult<()> {
        let mut doc = ini::Ini::new();
        doc.with_section(Some("Common"))
            .set("MaxSHMStringSize", self.max_shm_string_size.to_string())
            .set("MaxFIFODepth", self.max_fifo_depth.to_string())
            .set("MaxNbReaders", self.max_nb_readers.to_string())
            .set("MaxNbSimulations", self.max_nb_simulations.to_string())
            .set("StepTolerance", self.step_tolerance.to_string())
            .set("ISLCompatible", self.isl_compatible.to_string())
            .set("IsGlobalIPC", self.is_global_ipc.to_string())
            .set("TimeOutPendingStep", self.timeout_pending_step.to_string())
            .set("ZipCmd", self.zip_cmd.clone());
        doc.write_to_file(path)
            .map_err(|e| IslError::ipc(crate::error::ids::ATTACH_FAILED, e.to_string()))
    }

    /// Legacy semaphore/shm name prefixes selected by `ISLCompatible`.
    pub fn sem_prefix(&self) -> &'static str {
        if self.isl_compatible { "qipc_systemsem_" } else { "isl_sem_" }
    }

    pub fn shm_prefix(&self) -> &'static str {
        if self.isl_compatible { "qipc_sharedmemory_" } else { "isl_shm_" }
    }
}
