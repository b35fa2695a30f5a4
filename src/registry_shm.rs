// Fixed-capacity table of registered connectors, shared by every process on
// the host (§3.6). An empty slot is identified by `isl_id == 0`.

use std::mem::size_of;

pub const MAX_RUN_SIMS: usize = 256;
const MAX_STR: usize = 256;

#[derive(Debug, Clone, Copy)]
struct SlotLayout {
    off_isl_id: usize,
    off_pid: usize,
    off_name_len: usize,
    off_name: usize,
    off_session_len: usize,
    off_session: usize,
    size: usize,
}

impl SlotLayout {
    fn new() -> Self {
        let mut cur = 0usize;
        let off_isl_id = cur;
        cur += size_of::<u32>();
        let off_pid = cur;
        cur += size_of::<u64>();
        let off_name_len = cur;
        cur += size_of::<i32>();
        let off_name = cur;
        cur += MAX_STR;
        let off_session_len = cur;
        cur += size_of::<i32>();
        let off_session = cur;
        cur += MAX_STR;
        let size = cur;
        Self { off_isl_id, off_pid, off_name_len, off_name, off_session_len, off_session, size }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryShmLayout {
    slot: SlotLayout,
    capacity: usize,
    total_size: usize,
}

impl RegistryShmLayout {
    pub fn new(capacity: usize) -> Self {
        let slot = SlotLayout::new();
        Self { slot, capacity, total_size: slot.size * capacity }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RegistryShmLayout {
    fn default() -> Self {
        Self::new(MAX_RUN_SIMS)
    }
}

/// A snapshot of one registry slot. `type_id`/`nb_ios`/`uuid`/`file` are not
/// stored in `RegistryShm` itself — `Registry::get` (§4.5) attaches the
/// referenced connector's `ConnectorShm` as a side effect to fill them in,
/// leaving them at their defaults here.
#[derive(Debug, Clone, Default)]
pub struct SlotView {
    pub isl_id: u32,
    pub pid: u64,
    pub name: String,
    pub session: String,
    pub type_id: u32,
    pub nb_ios: i32,
    pub uuid: String,
    pub file: String,
}

pub struct RegistryShm {
    base: *mut u8,
    layout: RegistryShmLayout,
}

unsafe impl Send for RegistryShm {}
unsafe impl Sync for RegistryShm {}

impl RegistryShm {
    /// # Safety
    /// `base` must point to at least `layout.total_size()` bytes, held
    /// locked by the caller for the duration of any mutating call.
    pub unsafe fn new(base: *mut u8, layout: RegistryShmLayout) -> Self {
        Self { base, layout }
    }

    fn slot_ptr(&self, i: usize) -> *mut u8 {
        debug_assert!(i < self.layout.capacity);
        unsafe { self.base.add(i * self.layout.slot.size) }
    }

    unsafe fn read_u32(&self, p: *mut u8, off: usize) -> u32 {
        std::ptr::read_unaligned(p.add(off) as *const u32)
    }
    unsafe fn write_u32(&self, p: *mut u8, off: usize, v: u32) {
        std::ptr::write_unaligned(p.add(off) as *mut u32, v)
    }
    unsafe fn read_u64(&self, p: *mut u8, off: usize) -> u64 {
        std::ptr::read_unaligned(p.add(off) as *const u64)
    }
    unsafe fn write_u64(&self, p: *mut u8, off: usize, v: u64) {
        std::ptr::write_unaligned(p.add(off) as *mut u64, v)
    }
    unsafe fn read_i32(&self, p: *mut u8, off: usize) -> i32 {
        std::ptr::read_unaligned(p.add(off) as *const i32)
    }
    unsafe fn write_i32(&self, p: *mut u8, off: usize, v: i32) {
        std::ptr::write_unaligned(p.add(off) as *mut i32, v)
    }

    fn read_str(&self, p: *mut u8, len_off: usize, data_off: usize) -> String {
        let len = unsafe { self.read_i32(p, len_off) }.max(0) as usize;
        let len = len.min(MAX_STR);
        let slice = unsafe { std::slice::from_raw_parts(p.add(data_off), len) };
        String::from_utf8_lossy(slice).into_owned()
    }

    fn write_str(&self, p: *mut u8, len_off: usize, data_off: usize, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(MAX_STR);
        unsafe {
            self.write_i32(p, len_off, len as i32);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), p.add(data_off), len);
        }
    }

    /// Zero every slot (`isl_id = 0`), marking the whole table empty.
    pub fn initialize(&self) {
        for i in 0..self.layout.capacity {
            let p = self.slot_ptr(i);
            unsafe { self.write_u32(p, self.layout.slot.off_isl_id, 0) };
        }
    }

    /// Write `isl_id/pid/name/session` into the first empty slot. Returns
    /// the slot index, or `None` if the table is full.
    pub fn add(&self, isl_id: u32, pid: u64, name: &str, session: &str) -> Option<usize> {
        for i in 0..self.layout.capacity {
            let p = self.slot_ptr(i);
            if unsafe { self.read_u32(p, self.layout.slot.off_isl_id) } == 0 {
                unsafe { self.write_u32(p, self.layout.slot.off_isl_id, isl_id) };
                unsafe { self.write_u64(p, self.layout.slot.off_pid, pid) };
                self.write_str(p, self.layout.slot.off_name_len, self.layout.slot.off_name, name);
                self.write_str(p, self.layout.slot.off_session_len, self.layout.slot.off_session, session);
                return Some(i);
            }
        }
        None
    }

    /// Zero the slot holding `isl_id`, freeing it for reuse.
    pub fn remove(&self, isl_id: u32) -> bool {
        for i in 0..self.layout.capacity {
            let p = self.slot_ptr(i);
            if unsafe { self.read_u32(p, self.layout.slot.off_isl_id) } == isl_id {
                unsafe { self.write_u32(p, self.layout.slot.off_isl_id, 0) };
                return true;
            }
        }
        false
    }

    /// Copy slot `i` out; `isl_id == 0` means empty.
    pub fn get(&self, i: usize) -> SlotView {
        let p = self.slot_ptr(i);
        SlotView {
            isl_id: unsafe { self.read_u32(p, self.layout.slot.off_isl_id) },
            pid: unsafe { self.read_u64(p, self.layout.slot.off_pid) },
            name: self.read_str(p, self.layout.slot.off_name_len, self.layout.slot.off_name),
            session: self.read_str(p, self.layout.slot.off_session_len, self.layout.slot.off_session),
            ..Default::default()
        }
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backed(capacity: usize) -> (Vec<u8>, RegistryShmLayout) {
        let layout = RegistryShmLayout::new(capacity);
        (vec![0u8; layout.total_size()], layout)
    }

    #[test]
    fn add_fills_first_empty_slot() {
        let (mut mem, layout) = backed(4);
        let shm = unsafe { RegistryShm::new(mem.as_mut_ptr(), layout) };
        shm.initialize();
        let i = shm.add(7, 1000, "demo", "session-a").expect("slot");
        assert_eq!(i, 0);
        let view = shm.get(0);
        assert_eq!(view.isl_id, 7);
        assert_eq!(view.pid, 1000);
        assert_eq!(view.name, "demo");
        assert_eq!(view.session, "session-a");
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let (mut mem, layout) = backed(2);
        let shm = unsafe { RegistryShm::new(mem.as_mut_ptr(), layout) };
        shm.initialize();
        shm.add(1, 1, "a", "s").unwrap();
        shm.add(2, 2, "b", "s").unwrap();
        assert!(shm.add(3, 3, "c", "s").is_none());
        assert!(shm.remove(1));
        let i = shm.add(3, 3, "c", "s").expect("reused slot");
        assert_eq!(i, 0);
    }

    #[test]
    fn empty_slot_has_zero_isl_id() {
        let (mut mem, layout) = backed(2);
        let shm = unsafe { RegistryShm::new(mem.as_mut_ptr(), layout) };
        shm.initialize();
        assert_eq!(shm.get(1).isl_id, 0);
    }
}
