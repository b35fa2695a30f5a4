// Passive per-connector descriptor layout, mapped over a NamedShm region
// (§3.5). Carries just enough for another process to identify a connector
// without attaching its full config: type, uid, pid, uuid, name, config
// file path, and the declared I/O count.

use std::mem::size_of;

const MAX_STR: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct ConnectorShmLayout {
    off_ty: usize,
    off_id: usize,
    off_pid: usize,
    off_uuid_len: usize,
    off_uuid: usize,
    off_name_len: usize,
    off_name: usize,
    off_file_len: usize,
    off_file: usize,
    off_n_data: usize,
    total_size: usize,
}

impl ConnectorShmLayout {
    pub fn new() -> Self {
        let mut cur = 0usize;
        let off_ty = cur;
        cur += size_of::<u32>();
        let off_id = cur;
        cur += size_of::<u32>();
        let off_pid = cur;
        cur += size_of::<u64>();
        let off_uuid_len = cur;
        cur += size_of::<i32>();
        let off_uuid = cur;
        cur += MAX_STR;
        let off_name_len = cur;
        cur += size_of::<i32>();
        let off_name = cur;
        cur += MAX_STR;
        let off_file_len = cur;
        cur += size_of::<i32>();
        let off_file = cur;
        cur += MAX_STR;
        let off_n_data = cur;
        cur += size_of::<i32>();
        let total_size = cur;

        Self { off_ty, off_id, off_pid, off_uuid_len, off_uuid, off_name_len, off_name, off_file_len, off_file, off_n_data, total_size }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

impl Default for ConnectorShmLayout {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnectorShm {
    base: *mut u8,
    layout: ConnectorShmLayout,
}

unsafe impl Send for ConnectorShm {}
unsafe impl Sync for ConnectorShm {}

impl ConnectorShm {
    /// # Safety
    /// `base` must point to at least `layout.total_size()` bytes, held
    /// locked by the caller for the duration of any mutating call.
    pub unsafe fn new(base: *mut u8, layout: ConnectorShmLayout) -> Self {
        Self { base, layout }
    }

    unsafe fn read_u32(&self, off: usize) -> u32 {
        std::ptr::read_unaligned(self.base.add(off) as *const u32)
    }
    unsafe fn write_u32(&self, off: usize, v: u32) {
        std::ptr::write_unaligned(self.base.add(off) as *mut u32, v)
    }
    unsafe fn read_u64(&self, off: usize) -> u64 {
        std::ptr::read_unaligned(self.base.add(off) as *const u64)
    }
    unsafe fn write_u64(&self, off: usize, v: u64) {
        std::ptr::write_unaligned(self.base.add(off) as *mut u64, v)
    }
    unsafe fn read_i32(&self, off: usize) -> i32 {
        std::ptr::read_unaligned(self.base.add(off) as *const i32)
    }
    unsafe fn write_i32(&self, off: usize, v: i32) {
        std::ptr::write_unaligned(self.base.add(off) as *mut i32, v)
    }

    fn read_str(&self, len_off: usize, data_off: usize) -> String {
        let len = unsafe { self.read_i32(len_off) }.max(0) as usize;
        let len = len.min(MAX_STR);
        let slice = unsafe { std::slice::from_raw_parts(self.base.add(data_off), len) };
        String::from_utf8_lossy(slice).into_owned()
    }

    fn write_str(&self, len_off: usize, data_off: usize, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(MAX_STR);
        unsafe {
            self.write_i32(len_off, len as i32);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(data_off), len);
        }
    }

    pub fn type_id(&self) -> u32 {
        unsafe { self.read_u32(self.layout.off_ty) }
    }
    pub fn set_type_id(&self, v: u32) {
        unsafe { self.write_u32(self.layout.off_ty, v) }
    }

    pub fn id(&self) -> u32 {
        unsafe { self.read_u32(self.layout.off_id) }
    }
    pub fn set_id(&self, v: u32) {
        unsafe { self.write_u32(self.layout.off_id, v) }
    }

    pub fn pid(&self) -> u64 {
        unsafe { self.read_u64(self.layout.off_pid) }
    }
    pub fn set_pid(&self, v: u64) {
        unsafe { self.write_u64(self.layout.off_pid, v) }
    }

    pub fn uuid(&self) -> String {
        self.read_str(self.layout.off_uuid_len, self.layout.off_uuid)
    }
    pub fn set_uuid(&self, v: &str) {
        self.write_str(self.layout.off_uuid_len, self.layout.off_uuid, v)
    }

    pub fn name(&self) -> String {
        self.read_str(self.layout.off_name_len, self.layout.off_name)
    }
    pub fn set_name(&self, v: &str) {
        self.write_str(self.layout.off_name_len, self.layout.off_name, v)
    }

    pub fn file(&self) -> String {
        self.read_str(self.layout.off_file_len, self.layout.off_file)
    }
    pub fn set_file(&self, v: &str) {
        self.write_str(self.layout.off_file_len, self.layout.off_file, v)
    }

    pub fn n_data(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_n_data) }
    }
    pub fn set_n_data(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_n_data, v) }
    }

    pub fn initialize(&self, type_id: u32, id: u32, pid: u64, uuid: &str, name: &str, file: &str, n_data: i32) {
        self.set_type_id(type_id);
        self.set_id(id);
        self.set_pid(pid);
        self.set_uuid(uuid);
        self.set_name(name);
        self.set_file(file);
        self.set_n_data(n_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_fields() {
        let layout = ConnectorShmLayout::new();
        let mut mem = vec![0u8; layout.total_size()];
        let shm = unsafe { ConnectorShm::new(mem.as_mut_ptr(), layout) };
        shm.initialize(1, 7, 4242, "uuid-1", "demo", "demo.xml", 3);
        assert_eq!(shm.type_id(), 1);
        assert_eq!(shm.id(), 7);
        assert_eq!(shm.pid(), 4242);
        assert_eq!(shm.uuid(), "uuid-1");
        assert_eq!(shm.name(), "demo");
        assert_eq!(shm.file(), "demo.xml");
        assert_eq!(shm.n_data(), 3);
    }
}
