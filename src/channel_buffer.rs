// Typed ring buffer laid out inside a NamedShm region (§3.4).
//
// Field order is fixed and is computed into byte offsets once, at
// construction, from the configured `max_fifo`/`max_readers`/`max_str` and
// the variable's `size_of × size`. All reads/writes go through
// `read_unaligned`/`write_unaligned` since the sequential layout gives no
// alignment guarantee for the wider fields.

use std::mem::size_of;

#[derive(Debug, Clone, Copy)]
pub struct ChannelLayout {
    pub max_fifo: usize,
    pub max_readers: usize,
    pub max_str: usize,
    pub elem_size: usize,

    off_id: usize,
    off_name_len: usize,
    off_name: usize,
    off_type_id: usize,
    off_size_of: usize,
    off_size: usize,
    off_ind_write: usize,
    off_readers: usize,
    off_ind_reads: usize,
    off_reader_wait: usize,
    off_writer_wait: usize,
    off_terminated: usize,
    off_fifo_depth: usize,
    off_times: usize,
    off_steps: usize,
    off_values: usize,
    total_size: usize,
}

impl ChannelLayout {
    pub fn new(max_fifo: usize, max_readers: usize, max_str: usize, elem_size: usize) -> Self {
        let mut cur = 0usize;
        let off_id = cur;
        cur += size_of::<u32>();
        let off_name_len = cur;
        cur += size_of::<i32>();
        let off_name = cur;
        cur += max_str;
        let off_type_id = cur;
        cur += size_of::<i32>();
        let off_size_of = cur;
        cur += size_of::<i32>();
        let off_size = cur;
        cur += size_of::<i32>();
        let off_ind_write = cur;
        cur += size_of::<u16>();
        let off_readers = cur;
        cur += size_of::<i32>();
        let off_ind_reads = cur;
        cur += max_readers * size_of::<u16>();
        let off_reader_wait = cur;
        cur += size_of::<i32>();
        let off_writer_wait = cur;
        cur += size_of::<i32>();
        let off_terminated = cur;
        cur += size_of::<u8>();
        let off_fifo_depth = cur;
        cur += size_of::<u16>();
        let off_times = cur;
        cur += max_fifo * size_of::<f64>();
        let off_steps = cur;
        cur += max_fifo * size_of::<f64>();
        let off_values = cur;
        cur += max_fifo * elem_size;
        let total_size = cur;

        Self {
            max_fifo,
            max_readers,
            max_str,
            elem_size,
            off_id,
            off_name_len,
            off_name,
            off_type_id,
            off_size_of,
            off_size,
            off_ind_write,
            off_readers,
            off_ind_reads,
            off_reader_wait,
            off_writer_wait,
            off_terminated,
            off_fifo_depth,
            off_times,
            off_steps,
            off_values,
            total_size,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// Accessor over a mapped region following `ChannelLayout`. Does not own
/// the memory — callers hold the backing `NamedShm` separately.
pub struct ChannelBuffer {
    base: *mut u8,
    layout: ChannelLayout,
}

unsafe impl Send for ChannelBuffer {}
unsafe impl Sync for ChannelBuffer {}

impl ChannelBuffer {
    /// # Safety
    /// `base` must point to a region of at least `layout.total_size()` bytes
    /// that the caller holds locked for the duration of any mutating call.
    pub unsafe fn new(base: *mut u8, layout: ChannelLayout) -> Self {
        Self { base, layout }
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    unsafe fn read_u32(&self, off: usize) -> u32 {
        std::ptr::read_unaligned(self.base.add(off) as *const u32)
    }
    unsafe fn write_u32(&self, off: usize, v: u32) {
        std::ptr::write_unaligned(self.base.add(off) as *mut u32, v)
    }
    unsafe fn read_i32(&self, off: usize) -> i32 {
        std::ptr::read_unaligned(self.base.add(off) as *const i32)
    }
    unsafe fn write_i32(&self, off: usize, v: i32) {
        std::ptr::write_unaligned(self.base.add(off) as *mut i32, v)
    }
    unsafe fn read_u16(&self, off: usize) -> u16 {
        std::ptr::read_unaligned(self.base.add(off) as *const u16)
    }
    unsafe fn write_u16(&self, off: usize, v: u16) {
        std::ptr::write_unaligned(self.base.add(off) as *mut u16, v)
    }
    unsafe fn read_f64(&self, off: usize) -> f64 {
        std::ptr::read_unaligned(self.base.add(off) as *const f64)
    }
    unsafe fn write_f64(&self, off: usize, v: f64) {
        std::ptr::write_unaligned(self.base.add(off) as *mut f64, v)
    }

    pub fn id(&self) -> u32 {
        unsafe { self.read_u32(self.layout.off_id) }
    }
    pub fn set_id(&self, v: u32) {
        unsafe { self.write_u32(self.layout.off_id, v) }
    }

    pub fn name(&self) -> String {
        let len = unsafe { self.read_i32(self.layout.off_name_len) }.max(0) as usize;
        let len = len.min(self.layout.max_str);
        let slice = unsafe { std::slice::from_raw_parts(self.base.add(self.layout.off_name), len) };
        String::from_utf8_lossy(slice).into_owned()
    }

    pub fn set_name(&self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(self.layout.max_str);
        unsafe {
            self.write_i32(self.layout.off_name_len, len as i32);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(self.layout.off_name), len);
        }
    }

    pub fn type_id(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_type_id) }
    }
    pub fn set_type_id(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_type_id, v) }
    }

    pub fn size_of_elem(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_size_of) }
    }
    pub fn set_size_of_elem(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_size_of, v) }
    }

    pub fn size(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_size) }
    }
    pub fn set_size(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_size, v) }
    }

    pub fn ind_write(&self) -> u16 {
        unsafe { self.read_u16(self.layout.off_ind_write) }
    }
    fn set_ind_write(&self, v: u16) {
        unsafe { self.write_u16(self.layout.off_ind_write, v) }
    }

    pub fn readers(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_readers) }
    }
    pub fn set_readers(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_readers, v) }
    }

    pub fn ind_reads(&self, r: usize) -> u16 {
        debug_assert!(r < self.layout.max_readers);
        unsafe { self.read_u16(self.layout.off_ind_reads + r * size_of::<u16>()) }
    }
    fn set_ind_reads(&self, r: usize, v: u16) {
        debug_assert!(r < self.layout.max_readers);
        unsafe { self.write_u16(self.layout.off_ind_reads + r * size_of::<u16>(), v) }
    }

    pub fn reader_wait(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_reader_wait) }
    }
    pub fn set_reader_wait(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_reader_wait, v) }
    }

    pub fn writer_wait(&self) -> i32 {
        unsafe { self.read_i32(self.layout.off_writer_wait) }
    }
    pub fn set_writer_wait(&self, v: i32) {
        unsafe { self.write_i32(self.layout.off_writer_wait, v) }
    }

    pub fn terminated(&self) -> bool {
        unsafe { *self.base.add(self.layout.off_terminated) != 0 }
    }
    pub fn set_terminated(&self, v: bool) {
        unsafe { *self.base.add(self.layout.off_terminated) = v as u8 }
    }

    pub fn fifo_depth(&self) -> u16 {
        unsafe { self.read_u16(self.layout.off_fifo_depth) }
    }
    fn set_fifo_depth(&self, v: u16) {
        unsafe { self.write_u16(self.layout.off_fifo_depth, v) }
    }

    pub fn time(&self, i: usize) -> f64 {
        debug_assert!(i < self.layout.max_fifo);
        unsafe { self.read_f64(self.layout.off_times + i * size_of::<f64>()) }
    }
    pub fn set_time(&self, i: usize, v: f64) {
        debug_assert!(i < self.layout.max_fifo);
        unsafe { self.write_f64(self.layout.off_times + i * size_of::<f64>(), v) }
    }

    pub fn step(&self, i: usize) -> f64 {
        debug_assert!(i < self.layout.max_fifo);
        unsafe { self.read_f64(self.layout.off_steps + i * size_of::<f64>()) }
    }
    pub fn set_step(&self, i: usize, v: f64) {
        debug_assert!(i < self.layout.max_fifo);
        unsafe { self.write_f64(self.layout.off_steps + i * size_of::<f64>(), v) }
    }

    fn slot_ptr(&self, i: usize) -> *mut u8 {
        debug_assert!(i < self.layout.max_fifo);
        unsafe { self.base.add(self.layout.off_values + i * self.layout.elem_size) }
    }

    pub fn get_slot(&self, i: usize, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.layout.elem_size);
        unsafe { std::ptr::copy_nonoverlapping(self.slot_ptr(i), out.as_mut_ptr(), self.layout.elem_size) }
    }

    pub fn set_slot(&self, i: usize, data: &[u8]) {
        debug_assert_eq!(data.len(), self.layout.elem_size);
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.slot_ptr(i), self.layout.elem_size) }
    }

    /// Write the header and zero out the index arrays. Does not seed slot
    /// values — call `initialize` for that.
    pub fn init_header(&self, id: u32, name: &str, type_id: i32, size_of_elem: i32, size: i32, fifo_depth: u16) {
        self.set_id(id);
        self.set_name(name);
        self.set_type_id(type_id);
        self.set_size_of_elem(size_of_elem);
        self.set_size(size);
        self.set_ind_write(0);
        self.set_readers(0);
        for r in 0..self.layout.max_readers {
            self.set_ind_reads(r, 0);
        }
        self.set_reader_wait(0);
        self.set_writer_wait(0);
        self.set_terminated(false);
        self.set_fifo_depth(fifo_depth);
    }

    /// Seed every slot with `initial` and set every `times[i] = time_0`.
    pub fn initialize(&self, time_0: f64, initial: &[u8]) {
        let depth = self.fifo_depth() as usize;
        for i in 0..depth {
            self.set_slot(i, initial);
            self.set_time(i, time_0);
            self.set_step(i, 0.0);
        }
    }

    fn depth(&self) -> usize {
        self.fifo_depth() as usize
    }

    pub fn advance_writer(&self) -> u16 {
        let depth = self.depth() as u16;
        let next = (self.ind_write() + 1) % depth;
        self.set_ind_write(next);
        next
    }

    pub fn advance_reader(&self, r: usize) -> u16 {
        let depth = self.depth() as u16;
        let next = (self.ind_reads(r) + 1) % depth;
        self.set_ind_reads(r, next);
        next
    }

    pub fn register_reader(&self) -> usize {
        let r = self.readers() as usize;
        self.set_ind_reads(r, self.ind_write());
        self.set_readers(r as i32 + 1);
        r
    }

    /// "Full" for reader `r`: `(w - r) mod depth == depth - 1`.
    pub fn is_full_for_reader(&self, r: usize) -> bool {
        let depth = self.depth() as i64;
        let w = self.ind_write() as i64;
        let ri = self.ind_reads(r) as i64;
        ((w - ri).rem_euclid(depth)) == depth - 1
    }

    /// "Empty" for reader `r`: `w == reader_idx[r]`.
    pub fn is_empty_for_reader(&self, r: usize) -> bool {
        self.ind_write() == self.ind_reads(r)
    }

    /// Full with respect to any active reader (scans all registered readers).
    pub fn is_full(&self) -> bool {
        let readers = self.readers() as usize;
        (0..readers).any(|r| self.is_full_for_reader(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backed_buffer(max_fifo: usize, max_readers: usize, elem_size: usize) -> (Vec<u8>, ChannelLayout) {
        let layout = ChannelLayout::new(max_fifo, max_readers, 64, elem_size);
        (vec![0u8; layout.total_size()], layout)
    }

    #[test]
    fn layout_total_size_accounts_for_all_fields() {
        let layout = ChannelLayout::new(4, 2, 8, 8);
        // header bytes + index array + fifo arrays, loosely bounded.
        assert!(layout.total_size() > 4 * 16);
    }

    #[test]
    fn header_roundtrip() {
        let (mut mem, layout) = backed_buffer(4, 2, 8);
        let buf = unsafe { ChannelBuffer::new(mem.as_mut_ptr(), layout) };
        buf.init_header(7, "speed", 0, 8, 1, 4);
        assert_eq!(buf.id(), 7);
        assert_eq!(buf.name(), "speed");
        assert_eq!(buf.fifo_depth(), 4);
    }

    #[test]
    fn writer_advance_wraps_at_depth() {
        let (mut mem, layout) = backed_buffer(3, 2, 8);
        let buf = unsafe { ChannelBuffer::new(mem.as_mut_ptr(), layout) };
        buf.init_header(1, "x", 0, 8, 1, 3);
        assert_eq!(buf.advance_writer(), 1);
        assert_eq!(buf.advance_writer(), 2);
        assert_eq!(buf.advance_writer(), 0);
    }

    #[test]
    fn fullness_and_emptiness_for_reader() {
        let (mut mem, layout) = backed_buffer(3, 2, 8);
        let buf = unsafe { ChannelBuffer::new(mem.as_mut_ptr(), layout) };
        buf.init_header(1, "x", 0, 8, 1, 3);
        let r = buf.register_reader();
        assert!(buf.is_empty_for_reader(r));

        buf.advance_writer();
        buf.advance_writer();
        // writer is 2 slots ahead of reader on a depth-3 ring: full.
        assert!(buf.is_full_for_reader(r));
    }

    #[test]
    fn slot_roundtrip() {
        let (mut mem, layout) = backed_buffer(2, 1, 8);
        let buf = unsafe { ChannelBuffer::new(mem.as_mut_ptr(), layout) };
        buf.init_header(1, "x", 0, 8, 1, 2);
        let value = 3.5f64.to_le_bytes();
        buf.set_slot(0, &value);
        let mut out = [0u8; 8];
        buf.get_slot(0, &mut out);
        assert_eq!(out, value);
    }

    #[test]
    fn initialize_seeds_every_slot() {
        let (mut mem, layout) = backed_buffer(3, 1, 8);
        let buf = unsafe { ChannelBuffer::new(mem.as_mut_ptr(), layout) };
        buf.init_header(1, "x", 0, 8, 1, 3);
        let seed = 1.0f64.to_le_bytes();
        buf.initialize(0.0, &seed);
        for i in 0..3 {
            let mut out = [0u8; 8];
            buf.get_slot(i, &mut out);
            assert_eq!(out, seed);
            assert_eq!(buf.time(i), 0.0);
        }
    }
}
