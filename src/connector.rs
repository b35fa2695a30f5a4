// The connector state machine (§3.3, §4.7) — a simulator's endpoint on the
// bus. Owns its I/O catalog and channel arena by stable index (per the
// design note's cyclic-reference resolution: `Connector -> Vec<IoVar>`,
// `IoVar.channel_ix -> Connector -> Vec<Channel>`, no back-pointers).

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::channel::Channel;
use crate::channel_buffer::ChannelLayout;
use crate::config_doc::{CausalityDoc, Cosimulation, Information, ModelDoc, ScalarValue, VariableDoc, VariableKind, Variables};
use crate::connector_shm::{ConnectorShm, ConnectorShmLayout};
use crate::data_type::{type_code, DataKind, DataType};
use crate::error::{ids, IslError, IslResult};
use crate::io_var::{Causality, IoVar, VarState};
use crate::log;
use crate::named_shm::NamedShm;
use crate::names;
use crate::registry::Registry;
use crate::settings::AppSettings;
use crate::stop_bus::{StopListener, StopMode};

const STATE_ENTRY: u8 = 0;
const STATE_CHECKED: u8 = 1;
const STATE_CREATED: u8 = 3;
const STATE_CONNECTED: u8 = 7;

fn bad_state(expected: &str) -> IslError {
    IslError::config(ids::BAD_SESSION_ID, format!("operation requires state {expected}"))
}

pub struct Connector {
    settings: AppSettings,
    name: String,
    uuid: String,
    type_name: String,
    uid: u32,
    session: Option<String>,
    connect_timeout: f64,
    pub viewer: bool,
    start_time: f64,
    end_time: f64,
    step_size: f64,
    step_tolerance: f64,
    pub stop_mode: StopMode,
    terminated: Arc<AtomicBool>,
    state: u8,
    ios: Vec<IoVar>,
    io_by_id: HashMap<u32, usize>,
    io_by_name: HashMap<String, usize>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    channels: Vec<Channel>,
    connector_shm: Option<NamedShm>,
    connector_shm_layout: ConnectorShmLayout,
    registry: Option<Registry>,
    connected_at: Option<Instant>,
    source_file: Option<String>,
    global_stop_listener: Option<StopListener>,
    session_stop_listener: Option<StopListener>,
}

impl Connector {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            name: String::new(),
            uuid: String::new(),
            type_name: String::new(),
            uid: 0,
            session: None,
            connect_timeout: 0.0,
            viewer: false,
            start_time: 0.0,
            end_time: 10.0,
            step_size: 1.0,
            step_tolerance: 1e-6,
            stop_mode: StopMode::Stop,
            terminated: Arc::new(AtomicBool::new(false)),
            state: STATE_ENTRY,
            ios: Vec::new(),
            io_by_id: HashMap::new(),
            io_by_name: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            channels: Vec::new(),
            connector_shm: None,
            connector_shm_layout: ConnectorShmLayout::new(),
            registry: None,
            connected_at: None,
            source_file: None,
            global_stop_listener: None,
            session_stop_listener: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn set_terminated(&self, value: bool) {
        self.terminated.store(value, Ordering::Release);
    }

    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }

    /// Spawn a thread listening for the single process-wide stop signal
    /// (P7); `self.stop_mode` decides whether it exits the process or sets
    /// `terminated`. Replaces any previously running global listener.
    pub fn start_thread_listen_to_stop(&mut self) -> IslResult<()> {
        let listener = StopListener::listen_to_stop_request(self.stop_mode, self.terminated.clone())?;
        self.global_stop_listener = Some(listener);
        Ok(())
    }

    /// Spawn a thread listening for this connector's own session stop
    /// signal. Replaces any previously running session listener.
    pub fn listen_to_exit_session(&mut self) -> IslResult<()> {
        let session = self.session.clone().unwrap_or_default();
        let listener = StopListener::listen_to_exit_session(&session, self.stop_mode, self.terminated.clone())?;
        self.session_stop_listener = Some(listener);
        Ok(())
    }

    /// Release this connector's own session stop semaphore.
    pub fn send_stop_session(&self) -> IslResult<()> {
        let session = self.session.clone().unwrap_or_default();
        crate::stop_bus::send_stop_session(&session)
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    fn require_state(&self, expected: u8, label: &str) -> IslResult<()> {
        if self.state != expected {
            return Err(bad_state(label));
        }
        Ok(())
    }

    /// `new(name)`: configure name/uuid/type/default times, staying in Entry.
    pub fn configure_new(&mut self, name: &str) -> IslResult<()> {
        self.require_state(STATE_ENTRY, "Entry")?;
        self.name = name.to_string();
        self.uuid = Uuid::new_v4().to_string();
        self.type_name = "ISL".to_string();
        self.start_time = 0.0;
        self.end_time = 10.0;
        self.step_size = 1.0;
        self.uid = names::uid_from_uuid(&self.uuid);
        Ok(())
    }

    /// `load(file)`: parse the persisted config and populate this connector.
    pub fn load(&mut self, file: &Path) -> IslResult<()> {
        self.require_state(STATE_ENTRY, "Entry")?;
        let doc = ModelDoc::load(file)?;

        self.name = doc.information.name;
        self.uuid = if doc.information.id.is_empty() { Uuid::new_v4().to_string() } else { doc.information.id };
        self.type_name = if doc.information.r#type.is_empty() { "ISL".to_string() } else { doc.information.r#type };
        self.session = doc.cosimulation.session;
        self.connect_timeout = doc.cosimulation.connect_timeout;
        self.start_time = doc.cosimulation.start_time;
        self.end_time = doc.cosimulation.end_time;
        self.step_size = doc.cosimulation.step_size;
        self.step_tolerance = doc.cosimulation.step_tolerance;
        self.uid = names::uid_from_uuid(&self.uuid);
        self.source_file = Some(file.to_string_lossy().into_owned());

        self.ios.clear();
        for v in doc.variables.variable {
            let causality = match v.causality {
                CausalityDoc::Input => Causality::Input,
                CausalityDoc::Output => Causality::Output,
            };
            let mut data_type = match v.kind {
                VariableKind::Real(s) => scalar_from_doc(DataKind::Real, s.size, s.initial_value.map(|x| x.to_le_bytes().to_vec())),
                VariableKind::Integer(s) => scalar_from_doc(DataKind::Integer, s.size, s.initial_value.map(|x| x.to_le_bytes().to_vec())),
                VariableKind::Boolean(s) => scalar_from_doc(DataKind::Boolean, s.size, s.initial_value.map(|x| vec![x as u8])),
                VariableKind::String(s) => scalar_from_doc(DataKind::String, s.size, s.initial_value.map(|x| x.into_bytes())),
            };
            data_type.allocate();
            let mut io = IoVar::new(v.id, v.name, causality, data_type);
            io.connect_id = v.connect_id;
            if let Some(step) = v.step_size {
                io.set_step_size(step);
            }
            io.store = v.store;
            io.sync_timeout_ms = v.sync_timeout;
            self.ios.push(io);
        }
        Ok(())
    }

    /// `save(file)`: write the current config back in the same document shape.
    pub fn save(&self, file: &Path) -> IslResult<()> {
        let variables = self
            .ios
            .iter()
            .map(|io| VariableDoc {
                id: io.id,
                name: io.name.clone(),
                connect_id: io.connect_id.clone(),
                causality: match io.causality {
                    Causality::Input => CausalityDoc::Input,
                    Causality::Output => CausalityDoc::Output,
                },
                step_size: if io.step_size() < 0.0 { None } else { Some(io.step_size()) },
                store: io.store,
                sync_timeout: io.sync_timeout_ms,
                kind: variable_kind_for_doc(&io.data_type),
            })
            .collect();

        let doc = ModelDoc {
            information: Information { name: self.name.clone(), id: self.uuid.clone(), r#type: self.type_name.clone() },
            cosimulation: Cosimulation {
                session: self.session.clone(),
                connect_timeout: self.connect_timeout,
                start_time: self.start_time,
                end_time: self.end_time,
                step_size: self.step_size,
                step_tolerance: self.step_tolerance,
            },
            variables: Variables { variable: variables },
        };
        doc.save(file)
    }

    pub fn add_io(&mut self, io: IoVar) {
        self.ios.push(io);
    }

    /// Drop a variable from the catalog before it has been wired to a
    /// channel. Indices into `ios` shift, so this is only valid ahead of
    /// `create()` (re-running `check()` rebuilds the id/name maps).
    pub fn remove_io(&mut self, id: u32) -> IslResult<()> {
        if self.state >= STATE_CREATED {
            return Err(bad_state("Entry or Checked"));
        }
        let ix = self.ios.iter().position(|io| io.id == id).ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "unknown variable id"))?;
        self.ios.remove(ix);
        self.io_by_id.clear();
        self.io_by_name.clear();
        self.inputs.clear();
        self.outputs.clear();
        for (i, io) in self.ios.iter().enumerate() {
            self.io_by_id.insert(io.id, i);
            self.io_by_name.insert(io.name.clone(), i);
            match io.causality {
                Causality::Input => self.inputs.push(i),
                Causality::Output => self.outputs.push(i),
            }
        }
        Ok(())
    }

    /// `check()`: validate, build the input/output index, set bit 1.
    pub fn check(&mut self) -> IslResult<()> {
        self.require_state(STATE_ENTRY, "Entry")?;

        if self.name.is_empty() {
            return Err(IslError::config(ids::MISSING_NAME, "connector name must not be empty"));
        }
        if self.uuid.is_empty() {
            self.uuid = Uuid::new_v4().to_string();
        }
        if self.type_name.is_empty() {
            self.type_name = "ISL".to_string();
        }
        self.uid = names::uid_from_uuid(&self.uuid);
        if self.session.is_none() {
            log::warning(ids::WARN_NO_SESSION_ID, "connector has no session id");
        }
        if self.connect_timeout < 0.0 {
            return Err(IslError::config(ids::BAD_TIME_WINDOW, "connection timeout must be non-negative"));
        }
        let event_mode = self.step_size == -1.0;
        if !event_mode {
            if !(self.start_time >= 0.0 && self.start_time < self.end_time) {
                return Err(IslError::config(ids::BAD_TIME_WINDOW, "start time must be in [0, end)"));
            }
            if !(self.step_size > 0.0 && self.step_size < self.end_time - self.start_time) {
                return Err(IslError::config(ids::BAD_TIME_WINDOW, "step must be in (0, end-start)"));
            }
        }
        if !(self.step_tolerance > 0.0 && self.step_tolerance < 1.0) {
            return Err(IslError::config(ids::BAD_TOLERANCE, "step tolerance must be in (0, 1)"));
        }
        if self.ios.is_empty() {
            return Err(IslError::config(ids::NO_IO, "connector has no I/O"));
        }

        if self.viewer {
            for io in self.ios.iter_mut() {
                io.causality = Causality::Input;
            }
        }

        self.io_by_id.clear();
        self.io_by_name.clear();
        self.inputs.clear();
        self.outputs.clear();
        for (i, io) in self.ios.iter_mut().enumerate() {
            if io.name.is_empty() {
                return Err(IslError::config(ids::MISSING_NAME, "variable name must not be empty"));
            }
            io.checked = true;
            self.io_by_id.insert(io.id, i);
            self.io_by_name.insert(io.name.clone(), i);
            match io.causality {
                Causality::Input => self.inputs.push(i),
                Causality::Output => self.outputs.push(i),
            }
        }

        self.state = STATE_CHECKED;
        Ok(())
    }

    fn channel_layout_for(&self, elem_size: usize) -> ChannelLayout {
        ChannelLayout::new(self.settings.max_fifo_depth, self.settings.max_nb_readers, self.settings.max_shm_string_size, elem_size)
    }

    /// `create(session?)`: requires Checked.
    pub fn create(&mut self, session: Option<&str>) -> IslResult<()> {
        self.require_state(STATE_CHECKED, "Checked")?;
        if let Some(s) = session {
            self.session = Some(s.to_string());
        }

        if self.viewer {
            self.state = STATE_CREATED;
            return Ok(());
        }

        let session_id = self.session.clone().unwrap_or_default();
        let shm_key = names::connector_shm_key(&session_id, self.uid);
        let layout = ConnectorShmLayout::new();
        let shm = NamedShm::create(&shm_key, layout.total_size())?;
        shm.lock()?;
        let view = unsafe { ConnectorShm::new(shm.as_mut_ptr(), layout) };
        let file = self.source_file.clone().unwrap_or_default();
        view.initialize(pack_type_tag(&self.type_name), self.uid, std::process::id() as u64, &self.uuid, &self.name, &file, self.ios.len() as i32);
        shm.unlock()?;
        self.connector_shm = Some(shm);
        self.connector_shm_layout = layout;

        for ix in self.outputs.clone() {
            let io = &self.ios[ix];
            if io.connect_id.is_empty() {
                continue;
            }
            let elem_size = io.data_type.size_in_bytes();
            let channel_layout = self.channel_layout_for(elem_size);
            let shm_key = names::variable_shm_key(&session_id, &io.connect_id);
            let wr_key = names::writer_wait_key(&session_id, &io.connect_id);
            let rd_key = names::reader_wait_key(&session_id, &io.connect_id);
            let initial = io.data_type.initial()?.to_vec();
            let type_id = io.data_type.kind().map(type_code).unwrap_or(-1);

            let channel = Channel::create(
                &shm_key,
                &wr_key,
                &rd_key,
                channel_layout,
                io.id,
                &io.name,
                type_id,
                io.data_type.size_of() as i32,
                io.data_type.size() as i32,
                self.settings.max_fifo_depth as u16,
                self.step_tolerance,
                self.start_time,
                &initial,
            )?;
            let cix = self.channels.len();
            self.channels.push(channel);
            self.ios[ix].channel_ix = Some(cix);
            self.ios[ix].state = VarState::FullyDefined;
        }

        let registry = Registry::open(&names::registry_key(), self.settings.max_nb_simulations)?;
        registry.add(self.uid, std::process::id() as u64, &self.name, &session_id)?;
        self.registry = Some(registry);

        self.state = STATE_CREATED;
        log::info(ids::INFO_CONNECTOR_CREATED, &format!("connector {} created", self.name));
        Ok(())
    }

    fn attach_with_retry(&self, shm_key: &str, wr_key: &str, rd_key: &str, layout: ChannelLayout, wait: bool) -> IslResult<(Channel, usize)> {
        let deadline = if self.connect_timeout > 0.0 { Some(Instant::now() + Duration::from_secs_f64(self.connect_timeout)) } else { None };
        loop {
            match Channel::attach(shm_key, wr_key, rd_key, layout, self.step_tolerance) {
                Ok(pair) => return Ok(pair),
                Err(e) => {
                    if !wait {
                        return Err(e);
                    }
                    if let Some(dl) = deadline {
                        if Instant::now() >= dl {
                            return Err(IslError::ipc(ids::ATTACH_FAILED, "attach wait timed out"));
                        }
                    }
                    std::thread::sleep(Duration::from_millis(500));
                }
            }
        }
    }

    /// `connect(wait)`: requires Created.
    pub fn connect(&mut self, wait: bool) -> IslResult<()> {
        self.require_state(STATE_CREATED, "Created")?;
        let session_id = self.session.clone().unwrap_or_default();

        let targets: Vec<usize> = if self.viewer { (0..self.ios.len()).collect() } else { self.inputs.clone() };
        for ix in targets {
            let io = &self.ios[ix];
            if io.connect_id.is_empty() {
                continue;
            }
            let elem_size = io.data_type.size_in_bytes();
            let channel_layout = self.channel_layout_for(elem_size);
            let shm_key = names::variable_shm_key(&session_id, &io.connect_id);
            let wr_key = names::writer_wait_key(&session_id, &io.connect_id);
            let rd_key = names::reader_wait_key(&session_id, &io.connect_id);

            let (channel, r) = self.attach_with_retry(&shm_key, &wr_key, &rd_key, channel_layout, wait)?;
            let cix = self.channels.len();
            self.channels.push(channel);
            self.ios[ix].channel_ix = Some(cix);
            self.ios[ix].reader_ix = Some(r);
            self.ios[ix].state = VarState::IsConnected;
        }

        self.connected_at = Some(Instant::now());
        self.state = STATE_CONNECTED;
        log::info(ids::INFO_CONNECTOR_CONNECTED, &format!("connector {} connected", self.name));
        Ok(())
    }

    /// `disconnect()`: requires Created or Connected; returns to Checked.
    pub fn disconnect(&mut self) -> IslResult<()> {
        if self.state != STATE_CREATED && self.state != STATE_CONNECTED {
            return Err(bad_state("Created or Connected"));
        }
        self.connected_at = None;
        if let Some(registry) = self.registry.take() {
            let _ = registry.remove(self.uid);
            registry.teardown();
        }
        self.connector_shm = None;
        for channel in self.channels.drain(..) {
            channel.disconnect()?;
        }
        for io in self.ios.iter_mut() {
            io.channel_ix = None;
            io.reader_ix = None;
            io.state = VarState::FullyDefined;
        }
        self.state = STATE_CHECKED;
        log::info(ids::INFO_CONNECTOR_DISCONNECTED, &format!("connector {} disconnected", self.name));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.uid = uid;
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn set_session(&mut self, session: impl Into<String>) {
        self.session = Some(session.into());
    }

    pub fn connect_timeout(&self) -> f64 {
        self.connect_timeout
    }

    pub fn set_connect_timeout(&mut self, timeout: f64) {
        self.connect_timeout = timeout;
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn step_tolerance(&self) -> f64 {
        self.step_tolerance
    }

    pub fn set_times(&mut self, start: f64, end: f64, step: f64, tolerance: f64) {
        self.start_time = start;
        self.end_time = end;
        self.step_size = step;
        self.step_tolerance = tolerance;
    }

    pub fn nb_ios(&self) -> usize {
        self.ios.len()
    }

    pub fn nb_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn nb_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn io_by_id(&self, id: u32) -> Option<&IoVar> {
        self.io_by_id.get(&id).map(|&i| &self.ios[i])
    }

    pub fn io_by_index(&self, index: usize) -> Option<&IoVar> {
        self.ios.get(index)
    }

    pub fn io_by_name(&self, name: &str) -> Option<&IoVar> {
        self.io_by_name.get(name).map(|&i| &self.ios[i])
    }

    fn io_index(&self, id: u32) -> IslResult<usize> {
        self.io_by_id.get(&id).copied().ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "unknown variable id"))
    }

    fn channel_ix_for(&self, ix: usize) -> IslResult<usize> {
        self.ios[ix].channel_ix.ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "variable has no channel"))
    }

    fn require_not_viewer(&self) -> IslResult<()> {
        if self.viewer {
            return Err(IslError::config(ids::BAD_SESSION_ID, "viewer connector cannot write"));
        }
        Ok(())
    }

    pub fn set_data(&self, id: u32, value: &[u8], time: f64) -> IslResult<()> {
        self.require_not_viewer()?;
        let ix = self.io_index(id)?;
        let step = self.ios[ix].effective_step(self.step_size);
        let cix = self.channel_ix_for(ix)?;
        self.channels[cix].set(value, time, step)
    }

    /// Like `set_data`, but the caller supplies the step explicitly instead
    /// of inheriting the variable's configured step size.
    pub fn set_data_and_next_step(&self, id: u32, value: &[u8], time: f64, next_step: f64) -> IslResult<()> {
        self.require_not_viewer()?;
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        self.channels[cix].set(value, time, next_step)
    }

    pub fn get_data(&self, id: u32) -> IslResult<(Vec<u8>, f64)> {
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        let r = self.ios[ix].reader_ix.ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "variable has no reader slot"))?;
        self.channels[cix].get(r)
    }

    /// `IOGetData(p, val, out_time, in_time, wait)`: delegates to the
    /// time-unaware get when the current slot holds an event sample, per
    /// the preserved source behavior of §9.
    pub fn get_data_at(&self, id: u32, in_time: f64) -> IslResult<(Vec<u8>, f64)> {
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        let r = self.ios[ix].reader_ix.ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "variable has no reader slot"))?;
        self.channels[cix].get_at(r, in_time)
    }

    pub fn set_event_data(&self, id: u32, value: &[u8]) -> IslResult<()> {
        self.require_not_viewer()?;
        let ix = self.io_index(id)?;
        let step = self.ios[ix].effective_step(self.step_size);
        let cix = self.channel_ix_for(ix)?;
        self.channels[cix].set_event(value, step)
    }

    pub fn get_event_data(&self, id: u32) -> IslResult<Vec<u8>> {
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        let r = self.ios[ix].reader_ix.ok_or_else(|| IslError::lookup(ids::UNKNOWN_VAR_ID, "variable has no reader slot"))?;
        self.channels[cix].get_event(r)
    }

    pub fn set_data_at(&self, id: u32, value: &[u8], time: f64, index: usize) -> IslResult<()> {
        self.require_not_viewer()?;
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        let step = self.ios[ix].effective_step(self.step_size);
        self.channels[cix].set_at(index, value, time, step)
    }

    pub fn get_data_at_index(&self, id: u32, index: usize) -> IslResult<(Vec<u8>, f64)> {
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        self.channels[cix].get_at_index(index)
    }

    pub fn get_mem_data(&self, id: u32, index: usize) -> IslResult<Vec<u8>> {
        let ix = self.io_index(id)?;
        let cix = self.channel_ix_for(ix)?;
        self.channels[cix].get_mem(index)
    }
}

/// Pack up to 4 ASCII bytes of `name` (e.g. "ISL") into the `ConnectorShm`
/// `type` tag (§3.5), zero-padded on the right.
fn pack_type_tag(name: &str) -> u32 {
    let mut bytes = [0u8; 4];
    for (dst, src) in bytes.iter_mut().zip(name.as_bytes()) {
        *dst = *src;
    }
    u32::from_be_bytes(bytes)
}

fn scalar_from_doc(kind: DataKind, size: i32, initial: Option<Vec<u8>>) -> DataType {
    let mut dt = DataType::scalar(kind, size.max(1) as usize);
    if let Some(bytes) = initial {
        // allocate first so set_initial has somewhere to write.
        dt.allocate();
        let _ = dt.set_initial(&bytes);
    }
    dt
}

fn variable_kind_for_doc(dt: &DataType) -> VariableKind {
    let size = dt.size() as i32;
    match dt.kind() {
        Some(DataKind::Real) => {
            let initial = dt.initial().ok().and_then(|b| b.try_into().ok()).map(f64::from_le_bytes);
            VariableKind::Real(ScalarValue { size, initial_value: initial })
        }
        Some(DataKind::Integer) => {
            let initial = dt.initial().ok().and_then(|b| b.try_into().ok()).map(i32::from_le_bytes);
            VariableKind::Integer(ScalarValue { size, initial_value: initial })
        }
        Some(DataKind::Boolean) => {
            let initial = dt.initial().ok().and_then(|b| b.first().copied()).map(|b| b != 0);
            VariableKind::Boolean(ScalarValue { size, initial_value: initial })
        }
        Some(DataKind::String) | None => {
            let initial = dt.initial().ok().map(|b| String::from_utf8_lossy(b).into_owned());
            VariableKind::String(ScalarValue { size, initial_value: initial })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_session() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("connector_test_session_{n}")
    }

    fn sample_io(id: u32, name: &str, causality: Causality, connect_id: &str, initial: f64) -> IoVar {
        let mut dt = DataType::scalar(DataKind::Real, 1);
        dt.allocate();
        dt.set_initial(&initial.to_le_bytes()).unwrap();
        let mut io = IoVar::new(id, name, causality, dt);
        io.connect_id = connect_id.to_string();
        io
    }

    fn clear_session_storage(session: &str, uid: u32, connect_id: &str) {
        NamedShm::clear_storage(&names::connector_shm_key(session, uid));
        NamedShm::clear_storage(&names::variable_shm_key(session, connect_id));
        crate::named_sem::NamedSem::clear_storage(&names::writer_wait_key(session, connect_id));
        crate::named_sem::NamedSem::clear_storage(&names::reader_wait_key(session, connect_id));
    }

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut connector = Connector::new(AppSettings::default());
        assert!(connector.create(None).is_err());
        connector.configure_new("demo").unwrap();
        assert_eq!(connector.state(), STATE_ENTRY);
    }

    #[test]
    fn check_requires_at_least_one_io() {
        let mut connector = Connector::new(AppSettings::default());
        connector.configure_new("demo").unwrap();
        assert!(connector.check().is_err());
    }

    #[test]
    fn full_lifecycle_writer_then_reader_round_trip() {
        let session = unique_session();

        let mut writer = Connector::new(AppSettings::default());
        writer.configure_new("writer").unwrap();
        writer.add_io(sample_io(1, "Token1W", Causality::Output, "Token1W", 1.0));
        writer.check().unwrap();
        clear_session_storage(&session, writer.uid(), "Token1W");
        writer.create(Some(&session)).unwrap();
        writer.connect(false).unwrap();

        let mut reader = Connector::new(AppSettings::default());
        reader.configure_new("reader").unwrap();
        reader.add_io(sample_io(1, "Token1R", Causality::Input, "Token1W", 0.0));
        reader.check().unwrap();
        reader.create(Some(&session)).unwrap();
        reader.connect(false).unwrap();

        writer.set_data(1, &2.0f64.to_le_bytes(), 0.1).unwrap();
        let (data, t) = reader.get_data(1).unwrap();
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 2.0);
        assert_eq!(t, 0.1);

        reader.disconnect().unwrap();
        writer.disconnect().unwrap();
    }

    #[test]
    fn listen_to_exit_session_stops_on_send_stop_session() {
        let session = unique_session();
        crate::named_sem::NamedSem::clear_storage(&names::session_stop_key(&session));

        let mut connector = Connector::new(AppSettings::default());
        connector.configure_new("listener").unwrap();
        connector.set_session(session.clone());
        connector.listen_to_exit_session().unwrap();

        connector.send_stop_session().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(connector.is_terminated());
    }

    #[test]
    fn viewer_connector_cannot_write() {
        let mut connector = Connector::new(AppSettings::default());
        connector.configure_new("viewer").unwrap();
        connector.viewer = true;
        connector.add_io(sample_io(1, "Token1W", Causality::Output, "Token1W", 1.0));
        connector.check().unwrap();
        assert!(connector.io_by_id(1).map(|io| io.causality == Causality::Input).unwrap_or(false));
        connector.create(None).unwrap();
        assert!(connector.set_data(1, &1.0f64.to_le_bytes(), 0.0).is_err());
    }
}
