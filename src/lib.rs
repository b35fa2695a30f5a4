// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory transport and session state machine for the OpenISL
// co-simulation bus: named semaphores and shared regions, a time-indexed
// ring-buffer channel per variable, the connector state machine that wires
// channels up from a persisted config, and the C ABI that every language
// binding consumes.

mod error;
pub use error::{ids, IslError, IslResult};

mod log;

mod time;
pub use time::{is_event_time, tolerance, times_equal, EVENT_TIME};

mod names;

pub mod settings;
pub use settings::AppSettings;

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod named_sem;
pub use named_sem::NamedSem;

mod named_shm;
pub use named_shm::NamedShm;

mod data_type;
pub use data_type::{kind_from_code, type_code, DataKind, DataType, StructureField};

mod io_var;
pub use io_var::{Causality, IoVar, VarState};

mod channel_buffer;
pub use channel_buffer::{ChannelBuffer, ChannelLayout};

mod channel;
pub use channel::{Channel, ReleaseMode};

mod connector_shm;
pub use connector_shm::{ConnectorShm, ConnectorShmLayout};

mod registry_shm;
pub use registry_shm::{RegistryShm, RegistryShmLayout, SlotView, MAX_RUN_SIMS};

mod registry;
pub use registry::Registry;

mod stop_bus;
pub use stop_bus::{send_stop_request, send_stop_session, StopListener, StopMode};

mod connector;
pub use connector::Connector;

pub mod config_doc;

pub mod c_api;
