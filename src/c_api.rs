// The C ABI surface consumed by every language binding.
//
// Opaque handles are `*mut Connector` boxes; identifiers cross the boundary
// as NUL-terminated UTF-8; every fallible call returns `0` on success and a
// negative value classifying the failure point. Functions returning a
// string hand back a pointer into a per-function thread-local arena so the
// caller never has to free anything — the next call to the same function
// from the same thread invalidates the previous pointer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::connector::Connector;
use crate::data_type::{kind_from_code, DataKind};
use crate::io_var::Causality;
use crate::names;
use crate::registry::Registry;
use crate::registry_shm::SlotView;
use crate::settings::AppSettings;
use crate::stop_bus;

thread_local! {
    static STRING_ARENA: RefCell<HashMap<&'static str, CString>> = RefCell::new(HashMap::new());
    static SIMS_REGISTRY: RefCell<Option<Registry>> = RefCell::new(None);
    static SIMS_CURRENT: RefCell<Option<SlotView>> = RefCell::new(None);
}

/// Stash `value` under `slot` and return a pointer valid until the next
/// call that reuses `slot` on this thread.
fn arena_str(slot: &'static str, value: String) -> *const c_char {
    STRING_ARENA.with(|arena| {
        let c_value = CString::new(value).unwrap_or_default();
        let ptr = c_value.as_ptr();
        arena.borrow_mut().insert(slot, c_value);
        ptr
    })
}

unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn connector<'a>(handle: *mut Connector) -> Option<&'a mut Connector> {
    handle.as_mut()
}

/// Exit codes/negative classifications shared by every fallible entry point.
pub mod status {
    pub const OK: i32 = 0;
    pub const NULL_HANDLE: i32 = -1;
    pub const BAD_UTF8: i32 = -2;
    pub const FAILED: i32 = -3;
    pub const PANIC: i32 = -4;
}

fn guard<F: FnOnce() -> i32>(f: F) -> i32 {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => code,
        Err(_) => status::PANIC,
    }
}

#[no_mangle]
pub extern "C" fn ISL_ConnectInit(_is_owner: i32) -> *mut Connector {
    let connector = Connector::new(AppSettings::default());
    Box::into_raw(Box::new(connector))
}

#[no_mangle]
pub extern "C" fn ISL_ConnectFree(handle: *mut Connector) -> i32 {
    guard(|| {
        if handle.is_null() {
            return status::NULL_HANDLE;
        }
        unsafe { drop(Box::from_raw(handle)) };
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectNew(handle: *mut Connector, name: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let Some(name) = borrow_str(name) else { return status::BAD_UTF8 };
        match c.configure_new(name) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectLoad(handle: *mut Connector, file_name: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let Some(file_name) = borrow_str(file_name) else { return status::BAD_UTF8 };
        match c.load(Path::new(file_name)) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectCheck(handle: *mut Connector) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.check() {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSave(handle: *mut Connector, file_name: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let Some(file_name) = borrow_str(file_name) else { return status::BAD_UTF8 };
        match c.save(Path::new(file_name)) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectCreate(handle: *mut Connector, session_id: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let session = if session_id.is_null() { None } else { borrow_str(session_id) };
        match c.create(session) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectConnect(handle: *mut Connector, wait: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.connect(wait != 0) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectDisconnect(handle: *mut Connector) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.disconnect() {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetName(handle: *mut Connector) -> *const c_char {
    let Some(c) = (unsafe { connector(handle) }) else { return std::ptr::null() };
    arena_str("ISL_ConnectGetName", c.name().to_string())
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetId(handle: *mut Connector) -> *const c_char {
    let Some(c) = (unsafe { connector(handle) }) else { return std::ptr::null() };
    arena_str("ISL_ConnectGetId", c.uuid().to_string())
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetUId(handle: *mut Connector) -> u32 {
    unsafe { connector(handle) }.map(|c| c.uid()).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSetSessionId(handle: *mut Connector, session_id: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let Some(session_id) = borrow_str(session_id) else { return status::BAD_UTF8 };
        c.set_session(session_id);
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetSessionId(handle: *mut Connector) -> *const c_char {
    let Some(c) = (unsafe { connector(handle) }) else { return std::ptr::null() };
    arena_str("ISL_ConnectGetSessionId", c.session().unwrap_or("").to_string())
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSetStartTime(handle: *mut Connector, value: f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let (_, end, step, tol) = (c.start_time(), c.end_time(), c.step_size(), c.step_tolerance());
        c.set_times(value, end, step, tol);
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetStartTime(handle: *mut Connector) -> f64 {
    unsafe { connector(handle) }.map(|c| c.start_time()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetEndTime(handle: *mut Connector) -> f64 {
    unsafe { connector(handle) }.map(|c| c.end_time()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetStepSize(handle: *mut Connector) -> f64 {
    unsafe { connector(handle) }.map(|c| c.step_size()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetStepTolerance(handle: *mut Connector) -> f64 {
    unsafe { connector(handle) }.map(|c| c.step_tolerance()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSetViewer(handle: *mut Connector, value: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        c.viewer = value != 0;
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectIsViewer(handle: *mut Connector) -> i32 {
    unsafe { connector(handle) }.map(|c| c.viewer as i32).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSetTerminated(handle: *mut Connector, value: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        c.set_terminated(value != 0);
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectIsTerminated(handle: *mut Connector) -> i32 {
    unsafe { connector(handle) }.map(|c| c.is_terminated() as i32).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetNbIOs(handle: *mut Connector) -> i32 {
    unsafe { connector(handle) }.map(|c| c.nb_ios() as i32).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetNbInputs(handle: *mut Connector) -> i32 {
    unsafe { connector(handle) }.map(|c| c.nb_inputs() as i32).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_ConnectGetNbOutputs(handle: *mut Connector) -> i32 {
    unsafe { connector(handle) }.map(|c| c.nb_outputs() as i32).unwrap_or(0)
}

/// Causality: `0 = Input, 1 = Output`. Type: per `data_type::kind_from_code`.
#[no_mangle]
pub extern "C" fn ISL_ConnectNewIO(handle: *mut Connector, id: u32, name: *const c_char, causality: i32, type_code: i32, size: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        let Some(name) = borrow_str(name) else { return status::BAD_UTF8 };
        let Ok(kind) = kind_from_code(type_code) else { return status::FAILED };
        let causality = if causality == 0 { Causality::Input } else { Causality::Output };
        let mut data_type = crate::data_type::DataType::scalar(kind, size.max(1) as usize);
        data_type.allocate();
        c.add_io(crate::io_var::IoVar::new(id, name, causality, data_type));
        status::OK
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectRemoveIO(handle: *mut Connector, id: u32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.remove_io(id) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOSetData(handle: *mut Connector, id: u32, value: *const u8, len: usize, time: f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if value.is_null() {
            return status::BAD_UTF8;
        }
        let bytes = std::slice::from_raw_parts(value, len);
        match c.set_data(id, bytes, time) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

/// Writes into `out` (must be at least as long as the variable's element
/// size); returns the number of bytes written, or a negative status.
#[no_mangle]
pub extern "C" fn ISL_IOGetData(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize, out_time: *mut f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.get_data(id) {
            Ok((data, time)) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                if !out_time.is_null() {
                    *out_time = time;
                }
                data.len() as i32
            }
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOGetDataAtTime(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize, in_time: f64, out_time: *mut f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.get_data_at(id, in_time) {
            Ok((data, time)) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                if !out_time.is_null() {
                    *out_time = time;
                }
                data.len() as i32
            }
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOSetDataAndNextStep(handle: *mut Connector, id: u32, value: *const u8, len: usize, time: f64, step: f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if value.is_null() {
            return status::BAD_UTF8;
        }
        let bytes = std::slice::from_raw_parts(value, len);
        match c.set_data_and_next_step(id, bytes, time, step) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

/// Time-unaware read (blocks on an empty FIFO); `original_source`'s
/// `ISL_IOGetLastData` is the 3-arg `CData::GetData` overload, the same one
/// `ISL_IOGetData` fronts with a target time added.
#[no_mangle]
pub extern "C" fn ISL_IOGetLastData(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize, out_time: *mut f64) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.get_data(id) {
            Ok((data, time)) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                if !out_time.is_null() {
                    *out_time = time;
                }
                status::OK
            }
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOSetEventData(handle: *mut Connector, id: u32, value: *const u8, len: usize) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if value.is_null() {
            return status::BAD_UTF8;
        }
        let bytes = std::slice::from_raw_parts(value, len);
        match c.set_event_data(id, bytes) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOGetEventData(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.get_event_data(id) {
            Ok(data) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                status::OK
            }
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOSetDataAt(handle: *mut Connector, id: u32, value: *const u8, len: usize, time: f64, index: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if value.is_null() || index < 0 {
            return status::BAD_UTF8;
        }
        let bytes = std::slice::from_raw_parts(value, len);
        match c.set_data_at(id, bytes, time, index as usize) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOGetDataAt(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize, out_time: *mut f64, index: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if index < 0 {
            return status::BAD_UTF8;
        }
        match c.get_data_at_index(id, index as usize) {
            Ok((data, time)) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                if !out_time.is_null() {
                    *out_time = time;
                }
                status::OK
            }
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_IOGetMemData(handle: *mut Connector, id: u32, out: *mut u8, out_len: usize, index: i32) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        if index < 0 {
            return status::BAD_UTF8;
        }
        match c.get_mem_data(id, index as usize) {
            Ok(data) => {
                if data.len() > out_len {
                    return status::FAILED;
                }
                std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
                status::OK
            }
            Err(_) => status::FAILED,
        }
    })
}

/// A no-op reserved for the future persistence layer (§9's open question).
#[no_mangle]
pub extern "C" fn ISL_IOStoreData(_handle: *mut Connector, _id: u32) -> i32 {
    status::OK
}

#[no_mangle]
pub extern "C" fn ISL_StartThreadListenToStop(handle: *mut Connector) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.start_thread_listen_to_stop() {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_SendStopRequest() -> i32 {
    guard(|| match stop_bus::send_stop_request() {
        Ok(()) => status::OK,
        Err(_) => status::FAILED,
    })
}

#[no_mangle]
pub extern "C" fn ISL_SendStopSession(session_id: *const c_char) -> i32 {
    guard(|| unsafe {
        let Some(session_id) = borrow_str(session_id) else { return status::BAD_UTF8 };
        match stop_bus::send_stop_session(session_id) {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectListenToExitSession(handle: *mut Connector) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.listen_to_exit_session() {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_ConnectSendStopSession(handle: *mut Connector) -> i32 {
    guard(|| unsafe {
        let Some(c) = connector(handle) else { return status::NULL_HANDLE };
        match c.send_stop_session() {
            Ok(()) => status::OK,
            Err(_) => status::FAILED,
        }
    })
}

/// Registry scan (§4.5, §6.1): `SimsGet(i)` loads slot `i` into a
/// thread-local cursor; the `SimsGet*` accessors below read off that cursor,
/// mirroring the original `ISLSims->Get(nInd)` + stateless getter pattern.
#[no_mangle]
pub extern "C" fn ISL_SimsGetMaxNb() -> i32 {
    with_sims_registry(|r| r.max_nb() as i32).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_SimsGet(index: i32) -> i32 {
    guard(|| {
        if index < 0 {
            return status::BAD_UTF8;
        }
        let slot = with_sims_registry(|r| r.get(index as usize).ok()).flatten();
        match slot {
            Some(view) if view.isl_id != 0 => {
                SIMS_CURRENT.with(|c| *c.borrow_mut() = Some(view));
                status::OK
            }
            _ => status::FAILED,
        }
    })
}

#[no_mangle]
pub extern "C" fn ISL_SimsClose() -> i32 {
    SIMS_REGISTRY.with(|c| *c.borrow_mut() = None);
    SIMS_CURRENT.with(|c| *c.borrow_mut() = None);
    status::OK
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetType() -> u32 {
    sims_current(|v| v.type_id).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetId() -> u32 {
    sims_current(|v| v.isl_id).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetPID() -> u64 {
    sims_current(|v| v.pid).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetNbIOs() -> i32 {
    sims_current(|v| v.nb_ios).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetUUID() -> *const c_char {
    arena_str("ISL_SimsGetUUID", sims_current(|v| v.uuid.clone()).unwrap_or_default())
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetName() -> *const c_char {
    arena_str("ISL_SimsGetName", sims_current(|v| v.name.clone()).unwrap_or_default())
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetFile() -> *const c_char {
    arena_str("ISL_SimsGetFile", sims_current(|v| v.file.clone()).unwrap_or_default())
}

#[no_mangle]
pub extern "C" fn ISL_SimsGetSessionId() -> *const c_char {
    arena_str("ISL_SimsGetSessionId", sims_current(|v| v.session.clone()).unwrap_or_default())
}

fn with_sims_registry<R>(f: impl FnOnce(&Registry) -> R) -> Option<R> {
    SIMS_REGISTRY.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let settings = AppSettings::default();
            *slot = Registry::open(&names::registry_key(), settings.max_nb_simulations).ok();
        }
        slot.as_ref().map(f)
    })
}

fn sims_current<R>(f: impl FnOnce(&SlotView) -> R) -> Option<R> {
    SIMS_CURRENT.with(|cell| cell.borrow().as_ref().map(f))
}

/// FMI master exit codes (§6.5).
pub mod exit_code {
    pub const NORMAL: i32 = 0;
    pub const BAD_ARGS: i32 = -1;
    pub const BAD_MODEL_LOAD: i32 = -2;
    pub const BAD_CHECK: i32 = -3;
    pub const BAD_CONNECT: i32 = -4;
    pub const KILLED_BY_STOP: i32 = -5;
    pub const FAILED_TO_START: i32 = 100;
}
