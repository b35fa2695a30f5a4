// The time-indexed producer/consumer protocol (§4.4) — the heart of the
// core. A `Channel` pairs one `NamedShm`-backed `ChannelBuffer` with two
// `NamedSem`s: `writer_wait` (writer blocks here when the ring is full for
// some reader) and `reader_wait` (a reader blocks here when its window is
// empty). The lock is never held across a semaphore `acquire` — every path
// below follows lock -> test -> (unlock -> block -> lock -> recheck),
// spin-then-block around an explicit `NamedShm` lock plus `NamedSem` wait
// objects.

use crate::channel_buffer::{ChannelBuffer, ChannelLayout};
use crate::error::{ids, IslError, IslResult};
use crate::named_sem::NamedSem;
use crate::named_shm::NamedShm;
use crate::time::{is_event_time, tolerance, EVENT_TIME};

/// How many writers to wake when more readers are registered than the
/// recorded `reader_wait` counter reflects: release exactly `reader_wait`
/// (risking readers left asleep if the counter under-counts) or clamp up to
/// `readers` (risking a spurious wake). `Saturating` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Saturating,
    Exact,
}

impl Default for ReleaseMode {
    fn default() -> Self {
        ReleaseMode::Saturating
    }
}

enum Dispatch {
    Done(Vec<u8>, f64),
    Blocked,
    NoMatch,
}

pub struct Channel {
    shm: NamedShm,
    layout: ChannelLayout,
    writer_sem: NamedSem,
    reader_sem: NamedSem,
    step_tolerance: f64,
    release_mode: ReleaseMode,
}

impl Channel {
    /// Create a new channel's backing region and wait semaphores, then
    /// initialize the header and seed every slot with `initial` at
    /// `start_time`.
    pub fn create(
        shm_key: &str,
        writer_key: &str,
        reader_key: &str,
        layout: ChannelLayout,
        id: u32,
        name: &str,
        type_id: i32,
        size_of_elem: i32,
        size: i32,
        fifo_depth: u16,
        step_tolerance: f64,
        start_time: f64,
        initial: &[u8],
    ) -> IslResult<Self> {
        let shm = NamedShm::create(shm_key, layout.total_size())?;
        let writer_sem = NamedSem::open(writer_key, 0)?;
        let reader_sem = NamedSem::open(reader_key, 0)?;

        shm.lock()?;
        let buffer = unsafe { ChannelBuffer::new(shm.as_mut_ptr(), layout) };
        buffer.init_header(id, name, type_id, size_of_elem, size, fifo_depth);
        buffer.initialize(start_time, initial);
        shm.unlock()?;

        Ok(Self { shm, layout, writer_sem, reader_sem, step_tolerance, release_mode: ReleaseMode::default() })
    }

    /// Attach to an existing channel and register a new reader index.
    pub fn attach(shm_key: &str, writer_key: &str, reader_key: &str, layout: ChannelLayout, step_tolerance: f64) -> IslResult<(Self, usize)> {
        let shm = NamedShm::attach(shm_key, layout.total_size())?;
        let writer_sem = NamedSem::open(writer_key, 0)?;
        let reader_sem = NamedSem::open(reader_key, 0)?;

        let channel = Self { shm, layout, writer_sem, reader_sem, step_tolerance, release_mode: ReleaseMode::default() };
        channel.shm.lock()?;
        let buffer = channel.buffer();
        let r = buffer.register_reader();
        channel.shm.unlock()?;

        Ok((channel, r))
    }

    pub fn with_release_mode(mut self, mode: ReleaseMode) -> Self {
        self.release_mode = mode;
        self
    }

    fn buffer(&self) -> ChannelBuffer {
        unsafe { ChannelBuffer::new(self.shm.as_mut_ptr(), self.layout) }
    }

    fn elem_size(&self) -> usize {
        self.layout.elem_size
    }

    /// `set` path (writer): blocks while the ring is full for any reader.
    pub fn set(&self, data: &[u8], time: f64, step: f64) -> IslResult<()> {
        debug_assert_eq!(data.len(), self.elem_size());
        loop {
            self.shm.lock()?;
            let buffer = self.buffer();
            if buffer.is_full() {
                buffer.set_writer_wait(buffer.writer_wait() + 1);
                self.shm.unlock()?;
                self.writer_sem.acquire(None)?;
                if buffer.terminated() {
                    return Err(IslError::protocol(ids::TERMINATED, "channel terminated while writer waited"));
                }
                continue;
            }

            let w = buffer.ind_write() as usize;
            buffer.set_slot(w, data);
            buffer.set_time(w, time);
            buffer.set_step(w, step);
            buffer.advance_writer();

            let readers = buffer.readers();
            let reader_wait = buffer.reader_wait();
            let release_n = match self.release_mode {
                ReleaseMode::Saturating if reader_wait > 0 && reader_wait - readers < 0 => readers,
                _ => reader_wait,
            };
            buffer.set_reader_wait(0);
            if release_n > 0 {
                self.reader_sem.release(release_n as u32)?;
            }
            self.shm.unlock()?;
            return Ok(());
        }
    }

    /// Time-unaware `get` (reader `r`): blocks while `r`'s window is empty.
    pub fn get(&self, r: usize) -> IslResult<(Vec<u8>, f64)> {
        loop {
            self.shm.lock()?;
            let buffer = self.buffer();
            let was_full = buffer.is_full_for_reader(r);
            if buffer.is_empty_for_reader(r) {
                buffer.set_reader_wait(buffer.reader_wait() + 1);
                self.shm.unlock()?;
                self.reader_sem.acquire(None)?;
                if buffer.terminated() {
                    return Err(IslError::protocol(ids::TERMINATED, "channel terminated while reader waited"));
                }
                continue;
            }

            let idx = buffer.ind_reads(r) as usize;
            let mut out = vec![0u8; self.elem_size()];
            buffer.get_slot(idx, &mut out);
            let t = buffer.time(idx);
            buffer.advance_reader(r);
            self.release_writer_if(&buffer, was_full)?;
            self.shm.unlock()?;
            return Ok((out, t));
        }
    }

    /// Time-indexed `get` (reader `r`, target `in_time`): the full case
    /// Case A-G dispatch table for time-indexed delivery.
    pub fn get_at(&self, r: usize, in_time: f64) -> IslResult<(Vec<u8>, f64)> {
        loop {
            self.shm.lock()?;
            match self.dispatch_once(r, in_time) {
                Ok(Dispatch::Done(data, t)) => {
                    self.shm.unlock()?;
                    return Ok((data, t));
                }
                Ok(Dispatch::NoMatch) => {
                    self.shm.unlock()?;
                    return Err(IslError::lookup(ids::INDEX_OUT_OF_RANGE, "no sample covers the requested time"));
                }
                Ok(Dispatch::Blocked) => {
                    self.shm.unlock()?;
                    self.reader_sem.acquire(None)?;
                    let buffer = self.buffer();
                    if buffer.terminated() {
                        return Err(IslError::protocol(ids::TERMINATED, "channel terminated while reader waited"));
                    }
                    continue;
                }
                Err(e) => {
                    self.shm.unlock()?;
                    return Err(e);
                }
            }
        }
    }

    /// Runs the case table to completion, looping internally (case C) while
    /// the lock is held. Returns `Blocked` when the dispatch fell through to
    /// case G and `reader_wait` has already been incremented; the caller
    /// must unlock, block on `reader_sem`, and retry.
    fn dispatch_once(&self, r: usize, in_time: f64) -> IslResult<Dispatch> {
        let buffer = self.buffer();
        loop {
            let was_full = buffer.is_full_for_reader(r);
            let empty = buffer.is_empty_for_reader(r);
            let cur = buffer.ind_reads(r) as usize;
            let t = buffer.time(cur);
            let s = buffer.step(cur);
            let tol = tolerance(s, self.step_tolerance);
            let t_next = t + s;

            // Case A: event-style sample, time-unaware delivery.
            if !empty && is_event_time(t) {
                let mut out = vec![0u8; self.elem_size()];
                buffer.get_slot(cur, &mut out);
                buffer.advance_reader(r);
                self.release_writer_if(&buffer, was_full)?;
                let out_time = if is_event_time(in_time) { t } else { in_time };
                return Ok(Dispatch::Done(out, out_time));
            }

            // Case B: in_time falls within [t-tol, t+tol].
            if !empty && in_time >= t - tol && in_time <= t + tol {
                let mut out = vec![0u8; self.elem_size()];
                buffer.get_slot(cur, &mut out);
                buffer.advance_reader(r);
                self.release_writer_if(&buffer, was_full)?;
                return Ok(Dispatch::Done(out, t));
            }

            // Cases C/D: in_time is ahead of this sample's window.
            if !empty && in_time > t + tol {
                if s >= 0.0 && in_time >= t_next - tol {
                    // Case C: this sample is fully consumed by in_time; advance and retry.
                    buffer.advance_reader(r);
                    self.release_writer_if(&buffer, was_full)?;
                    continue;
                }
                // Case D: this sample's window covers in_time up to its end.
                let mut out = vec![0u8; self.elem_size()];
                buffer.get_slot(cur, &mut out);
                buffer.advance_reader(r);
                self.release_writer_if(&buffer, was_full)?;
                return Ok(Dispatch::Done(out, t));
            }

            // Case E: in_time is behind this sample; search the ring backwards.
            if !empty && in_time < t - tol {
                return match self.search_backward_interval(&buffer, cur, in_time, tol) {
                    Some(j) => {
                        let mut out = vec![0u8; self.elem_size()];
                        buffer.get_slot(j, &mut out);
                        let out_t = buffer.time(j);
                        if j == cur {
                            buffer.advance_reader(r);
                            self.release_writer_if(&buffer, was_full)?;
                        }
                        Ok(Dispatch::Done(out, out_t))
                    }
                    None => Ok(Dispatch::NoMatch),
                };
            }

            if empty {
                // Case F: no new data, but a past event sample may still satisfy in_time.
                if in_time >= t - tol {
                    if let Some(j) = self.search_backward_event(&buffer, cur, in_time, tol) {
                        let mut out = vec![0u8; self.elem_size()];
                        buffer.get_slot(j, &mut out);
                        let out_t = buffer.time(j);
                        return Ok(Dispatch::Done(out, out_t));
                    }
                }
                // Case G: block and retry on wake.
                self.release_writer_if(&buffer, was_full)?;
                buffer.set_reader_wait(buffer.reader_wait() + 1);
                return Ok(Dispatch::Blocked);
            }

            unreachable!("case table is exhaustive over (empty, in_time vs t +/- tol)");
        }
    }

    fn release_writer_if(&self, buffer: &ChannelBuffer, was_full: bool) -> IslResult<()> {
        if !was_full {
            return Ok(());
        }
        let ww = buffer.writer_wait();
        if ww > 0 {
            self.writer_sem.release(ww as u32)?;
            buffer.set_writer_wait(0);
        }
        Ok(())
    }

    /// Case E's backward search: the slot with the latest `times[j] <=
    /// in_time + tol` whose interval covers `in_time`, or is itself an
    /// event sample.
    fn search_backward_interval(&self, buffer: &ChannelBuffer, cur: usize, in_time: f64, tol: f64) -> Option<usize> {
        let depth = (buffer.fifo_depth() as usize).max(1);
        let mut best: Option<(usize, f64)> = None;
        for back in 0..depth.saturating_sub(1) {
            let j = (cur + depth - back) % depth;
            let t_j = buffer.time(j);
            let s_j = buffer.step(j);
            if t_j <= in_time + tol && (s_j <= 0.0 || t_j + s_j > in_time + tol) {
                if best.map_or(true, |(_, bt)| t_j > bt) {
                    best = Some((j, t_j));
                }
            }
        }
        best.map(|(j, _)| j)
    }

    /// Case F's backward search: the latest event-style sample
    /// (`steps[j] < 0`) with `times[j] <= in_time + tol`.
    fn search_backward_event(&self, buffer: &ChannelBuffer, cur: usize, in_time: f64, tol: f64) -> Option<usize> {
        let depth = buffer.fifo_depth() as usize;
        let depth = depth.max(1);
        let mut best: Option<(usize, f64)> = None;
        for back in 0..depth.saturating_sub(1) {
            let j = (cur + depth - back) % depth;
            let s_j = buffer.step(j);
            let t_j = buffer.time(j);
            if s_j < 0.0 && t_j <= in_time + tol && best.map_or(true, |(_, bt)| t_j > bt) {
                best = Some((j, t_j));
            }
        }
        best.map(|(j, _)| j)
    }

    /// Replicate the previous slot's value into the next one with a new
    /// time/step, without requiring the caller to resupply the value.
    pub fn set_last(&self, time: f64, step: f64) -> IslResult<()> {
        self.shm.lock()?;
        let buffer = self.buffer();
        let depth = buffer.fifo_depth() as usize;
        let w = buffer.ind_write() as usize;
        let prev = (w + depth - 1) % depth;
        let mut value = vec![0u8; self.elem_size()];
        buffer.get_slot(prev, &mut value);
        self.shm.unlock()?;
        self.set(&value, time, step)
    }

    pub fn set_event(&self, data: &[u8], step: f64) -> IslResult<()> {
        self.set(data, EVENT_TIME, step)
    }

    pub fn get_event(&self, r: usize) -> IslResult<Vec<u8>> {
        self.get_at(r, EVENT_TIME).map(|(data, _)| data)
    }

    /// Random-access write: bypasses synchronization and semaphore signaling.
    pub fn set_at(&self, index: usize, data: &[u8], time: f64, step: f64) -> IslResult<()> {
        self.shm.lock()?;
        let buffer = self.buffer();
        buffer.set_slot(index, data);
        buffer.set_time(index, time);
        buffer.set_step(index, step);
        self.shm.unlock()
    }

    /// Random-access read: bypasses synchronization; does not move any index.
    pub fn get_at_index(&self, index: usize) -> IslResult<(Vec<u8>, f64)> {
        self.shm.lock()?;
        let buffer = self.buffer();
        let mut out = vec![0u8; self.elem_size()];
        buffer.get_slot(index, &mut out);
        let t = buffer.time(index);
        self.shm.unlock()?;
        Ok((out, t))
    }

    /// Raw read of slot `index` with no index motion and no interpretation.
    pub fn get_mem(&self, index: usize) -> IslResult<Vec<u8>> {
        self.shm.lock()?;
        let buffer = self.buffer();
        let mut out = vec![0u8; self.elem_size()];
        buffer.get_slot(index, &mut out);
        self.shm.unlock()?;
        Ok(out)
    }

    /// Mark the channel terminated and wake every outstanding waiter so it
    /// can observe the flag and fail fast, per §5's cancellation semantics.
    pub fn disconnect(&self) -> IslResult<()> {
        self.shm.lock()?;
        let buffer = self.buffer();
        buffer.set_terminated(true);
        let ww = buffer.writer_wait();
        let rw = buffer.reader_wait();
        if ww > 0 {
            self.writer_sem.release(ww as u32)?;
            buffer.set_writer_wait(0);
        }
        if rw > 0 {
            self.reader_sem.release(rw as u32)?;
            buffer.set_reader_wait(0);
        }
        self.shm.unlock()?;
        std::thread::sleep(std::time::Duration::from_millis(200));
        Ok(())
    }

    pub fn fifo_depth(&self) -> u16 {
        self.buffer().fifo_depth()
    }

    pub fn readers(&self) -> i32 {
        self.buffer().readers()
    }

    pub fn ind_write(&self) -> u16 {
        self.buffer().ind_write()
    }

    pub fn ind_read(&self, r: usize) -> u16 {
        self.buffer().ind_reads(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique(prefix: &str) -> (String, String, String) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        (format!("{prefix}_shm_{n}"), format!("{prefix}_wr_{n}"), format!("{prefix}_rd_{n}"))
    }

    fn make_channel(depth: u16) -> Channel {
        let (shm_key, wr_key, rd_key) = unique("chan");
        NamedShm::clear_storage(&shm_key);
        NamedSem::clear_storage(&wr_key);
        NamedSem::clear_storage(&rd_key);
        let layout = ChannelLayout::new(depth as usize, 4, 32, 8);
        Channel::create(&shm_key, &wr_key, &rd_key, layout, 1, "x", 0, 8, 1, depth, 1e-6, 0.0, &0.0f64.to_le_bytes()).expect("create")
    }

    fn attach_reader(channel: &Channel) -> usize {
        let buffer = channel.buffer();
        buffer.register_reader()
    }

    #[test]
    fn set_then_get_roundtrip() {
        let channel = make_channel(4);
        let r = attach_reader(&channel);
        channel.set(&1.5f64.to_le_bytes(), 1.0, 0.1).expect("set");
        let (data, t) = channel.get(r).expect("get");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 1.5);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn get_at_case_b_matches_within_tolerance() {
        let channel = make_channel(4);
        let r = attach_reader(&channel);
        channel.set(&2.0f64.to_le_bytes(), 1.0, 0.5).expect("set");
        let (data, t) = channel.get_at(r, 1.0).expect("get_at");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 2.0);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn get_at_case_d_returns_sample_without_advancing_past_window_end() {
        let channel = make_channel(4);
        let r = attach_reader(&channel);
        // step = 0.5, window is [1.0, 1.5); request 1.4 still inside the window.
        channel.set(&3.0f64.to_le_bytes(), 1.0, 0.5).expect("set");
        let (data, t) = channel.get_at(r, 1.4).expect("get_at");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 3.0);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn get_at_case_c_advances_past_a_fully_elapsed_sample() {
        let channel = make_channel(4);
        let r = attach_reader(&channel);
        channel.set(&1.0f64.to_le_bytes(), 0.0, 0.1).expect("set");
        channel.set(&2.0f64.to_le_bytes(), 0.1, 0.1).expect("set");
        // in_time is past the first sample's window end, so it should be skipped.
        let (data, t) = channel.get_at(r, 0.2).expect("get_at");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 2.0);
        assert_eq!(t, 0.1);
    }

    #[test]
    fn event_sample_delegates_to_time_unaware_delivery() {
        let channel = make_channel(4);
        let r = attach_reader(&channel);
        channel.set_event(&9.0f64.to_le_bytes(), -1.0).expect("set_event");
        let data = channel.get_event(r).expect("get_event");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 9.0);
    }

    #[test]
    fn case_f_finds_a_past_event_sample_by_negative_step() {
        let channel = make_channel(4);
        attach_reader(&channel);
        channel.set_event(&7.0f64.to_le_bytes(), -1.0).expect("set_event");
        // A second reader attaching after the event was written sees an
        // empty FIFO for itself; case F must still locate the event slot.
        let r2 = attach_reader(&channel);
        let (data, _) = channel.get_at(r2, 5.0).expect("get_at case F");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 7.0);
    }

    #[test]
    fn random_access_bypasses_index_motion() {
        let channel = make_channel(4);
        channel.set_at(2, &5.0f64.to_le_bytes(), 3.0, 0.0).expect("set_at");
        let (data, t) = channel.get_at_index(2).expect("get_at_index");
        assert_eq!(f64::from_le_bytes(data.try_into().unwrap()), 5.0);
        assert_eq!(t, 3.0);
        // get_mem must not move any reader index.
        let raw = channel.get_mem(2).expect("get_mem");
        assert_eq!(raw, 5.0f64.to_le_bytes());
    }

    #[test]
    fn disconnect_marks_terminated_and_wakes_waiters() {
        let channel = make_channel(2);
        channel.disconnect().expect("disconnect");
        let buffer = channel.buffer();
        assert!(buffer.terminated());
    }
}
