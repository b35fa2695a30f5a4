// Error kinds and numeric log ids for the OpenISL core.
//
// The five kinds below are not type names in the upstream sense; they're
// exactly the five surfaced-failure categories of the design. Every
// constructor also carries the stable numeric id used by `crate::log`
// (error 1000-1999, warning 1300-1399, info 1500-1599).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IslError {
    #[error("config validation failed: {message} (id {id})")]
    ConfigValidation { id: u32, message: String },

    #[error("ipc resource failure: {message} (id {id})")]
    IpcResource { id: u32, message: String },

    #[error("protocol wait failed: {message} (id {id})")]
    ProtocolWait { id: u32, message: String },

    #[error("shape mismatch: {message} (id {id})")]
    ShapeMismatch { id: u32, message: String },

    #[error("lookup miss: {message} (id {id})")]
    LookupMiss { id: u32, message: String },
}

impl IslError {
    pub fn config(id: u32, message: impl Into<String>) -> Self {
        Self::ConfigValidation { id, message: message.into() }
    }

    pub fn ipc(id: u32, message: impl Into<String>) -> Self {
        Self::IpcResource { id, message: message.into() }
    }

    pub fn protocol(id: u32, message: impl Into<String>) -> Self {
        Self::ProtocolWait { id, message: message.into() }
    }

    pub fn shape(id: u32, message: impl Into<String>) -> Self {
        Self::ShapeMismatch { id, message: message.into() }
    }

    pub fn lookup(id: u32, message: impl Into<String>) -> Self {
        Self::LookupMiss { id, message: message.into() }
    }

    /// The numeric id carried by this error, for logging and the C ABI.
    pub fn id(&self) -> u32 {
        match self {
            Self::ConfigValidation { id, .. }
            | Self::IpcResource { id, .. }
            | Self::ProtocolWait { id, .. }
            | Self::ShapeMismatch { id, .. }
            | Self::LookupMiss { id, .. } => *id,
        }
    }
}

impl From<std::io::Error> for IslError {
    fn from(e: std::io::Error) -> Self {
        IslError::ipc(1000, e.to_string())
    }
}

pub type IslResult<T> = Result<T, IslError>;

/// Error ids used by the core. Mirrors the reference numbering of the
/// error-handling design: 1000-1999 error, 1300-1399 warning, 1500-1599 info.
pub mod ids {
    pub const SHM_CREATE_FAILED: u32 = 1001;
    pub const SEM_CREATE_FAILED: u32 = 1002;
    pub const ATTACH_FAILED: u32 = 1003;
    pub const BAD_SESSION_ID: u32 = 1010;
    pub const BAD_TIME_WINDOW: u32 = 1011;
    pub const BAD_TOLERANCE: u32 = 1012;
    pub const MISSING_NAME: u32 = 1013;
    pub const UNKNOWN_VAR_TYPE: u32 = 1014;
    pub const NO_IO: u32 = 1015;
    pub const WAIT_TIMEOUT: u32 = 1020;
    pub const TERMINATED: u32 = 1021;
    pub const STRUCT_SIZE_NOT_ONE: u32 = 1030;
    pub const STRUCT_FIELD_MISSING: u32 = 1031;
    pub const UNKNOWN_VAR_ID: u32 = 1040;
    pub const INDEX_OUT_OF_RANGE: u32 = 1041;

    pub const WARN_NO_SESSION_ID: u32 = 1300;
    pub const WARN_STRUCTURE_ARRAY_COERCED: u32 = 1301;

    pub const INFO_CONNECTOR_CREATED: u32 = 1500;
    pub const INFO_CONNECTOR_CONNECTED: u32 = 1501;
    pub const INFO_CONNECTOR_DISCONNECTED: u32 = 1502;
    pub const INFO_STOP_RECEIVED: u32 = 1503;
}
