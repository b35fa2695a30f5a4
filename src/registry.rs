// The process-visible table of running connectors (§4.5, §9).
//
// Modeled as an explicit object rather than a hidden singleton, per the
// design note against relying on static construction order: callers create
// one `Registry` (normally once per process, via `Registry::open`) and pass
// it wherever a connector needs to register or scan.

use crate::connector_shm::{ConnectorShm, ConnectorShmLayout};
use crate::error::IslResult;
use crate::named_shm::NamedShm;
use crate::names;
use crate::registry_shm::{RegistryShm, RegistryShmLayout, SlotView};

pub struct Registry {
    shm: NamedShm,
    layout: RegistryShmLayout,
}

impl Registry {
    /// Create the registry region if missing (zeroing every slot), or
    /// attach to the existing one.
    pub fn open(key: &str, capacity: usize) -> IslResult<Self> {
        let layout = RegistryShmLayout::new(capacity);
        let created = NamedShm::create(key, layout.total_size());
        let shm = match created {
            Ok(shm) => {
                shm.lock()?;
                let table = unsafe { RegistryShm::new(shm.as_mut_ptr(), layout) };
                table.initialize();
                shm.unlock()?;
                shm
            }
            Err(_) => NamedShm::attach(key, layout.total_size())?,
        };
        Ok(Self { shm, layout })
    }

    fn table(&self) -> RegistryShm {
        unsafe { RegistryShm::new(self.shm.as_mut_ptr(), self.layout) }
    }

    pub fn add(&self, isl_id: u32, pid: u64, name: &str, session: &str) -> IslResult<Option<usize>> {
        self.shm.lock()?;
        let slot = self.table().add(isl_id, pid, name, session);
        self.shm.unlock()?;
        Ok(slot)
    }

    pub fn remove(&self, isl_id: u32) -> IslResult<bool> {
        self.shm.lock()?;
        let removed = self.table().remove(isl_id);
        self.shm.unlock()?;
        Ok(removed)
    }

    /// Copy slot `i` out and, as a side effect, attach a read-only view of
    /// that connector's `ConnectorShm` to fill in `type_id`/`nb_ios`/`uuid`/
    /// `file` (§4.5). A connector that has since torn down its `ConnectorShm`
    /// (or was never fully created) just leaves those fields at default.
    pub fn get(&self, i: usize) -> IslResult<SlotView> {
        self.shm.lock()?;
        let mut view = self.table().get(i);
        self.shm.unlock()?;

        if view.isl_id != 0 {
            let shm_key = names::connector_shm_key(&view.session, view.isl_id);
            let layout = ConnectorShmLayout::new();
            if let Ok(connector_shm) = NamedShm::attach(&shm_key, layout.total_size()) {
                let _ = connector_shm.lock();
                let conn_view = unsafe { ConnectorShm::new(connector_shm.as_mut_ptr(), layout) };
                view.type_id = conn_view.type_id();
                view.nb_ios = conn_view.n_data();
                view.uuid = conn_view.uuid();
                view.file = conn_view.file();
                let _ = connector_shm.unlock();
            }
        }

        Ok(view)
    }

    pub fn max_nb(&self) -> usize {
        self.layout.capacity()
    }

    pub fn teardown(self) {
        drop(self);
    }

    pub fn clear_storage(key: &str) {
        NamedShm::clear_storage(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_key() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("registry_test_{n}")
    }

    #[test]
    fn add_then_get_round_trips() {
        let key = unique_key();
        Registry::clear_storage(&key);
        let registry = Registry::open(&key, 4).expect("open");
        let i = registry.add(1, 42, "demo", "demo-session").expect("add").expect("slot");
        let view = registry.get(i).expect("get");
        assert_eq!(view.isl_id, 1);
        assert_eq!(view.name, "demo");
        assert_eq!(view.session, "demo-session");
    }

    #[test]
    fn second_open_attaches_to_same_table() {
        let key = unique_key();
        Registry::clear_storage(&key);
        let owner = Registry::open(&key, 4).expect("open owner");
        owner.add(9, 1, "x", "s").expect("add").expect("slot");

        let attacher = Registry::open(&key, 4).expect("attach");
        let view = attacher.get(0).expect("get");
        assert_eq!(view.isl_id, 9);
    }

    #[test]
    fn get_attaches_connector_shm_side_fields() {
        let key = unique_key();
        let session = "demo-session-with-shm";
        let uid = 77u32;
        Registry::clear_storage(&key);
        let connector_shm_key = names::connector_shm_key(session, uid);
        NamedShm::clear_storage(&connector_shm_key);

        let layout = ConnectorShmLayout::new();
        let connector_shm = NamedShm::create(&connector_shm_key, layout.total_size()).expect("create connector shm");
        connector_shm.lock().unwrap();
        let view = unsafe { ConnectorShm::new(connector_shm.as_mut_ptr(), layout) };
        view.initialize(u32::from_be_bytes(*b"ISL\0"), uid, 1234, "uuid-77", "demo", "demo.xml", 2);
        connector_shm.unlock().unwrap();

        let registry = Registry::open(&key, 4).expect("open");
        let i = registry.add(uid, 1234, "demo", session).expect("add").expect("slot");
        let slot = registry.get(i).expect("get");
        assert_eq!(slot.type_id, u32::from_be_bytes(*b"ISL\0"));
        assert_eq!(slot.nb_ios, 2);
        assert_eq!(slot.uuid, "uuid-77");
        assert_eq!(slot.file, "demo.xml");

        NamedShm::clear_storage(&connector_shm_key);
    }

    #[test]
    fn max_run_sims_is_bounded() {
        let key = unique_key();
        Registry::clear_storage(&key);
        let registry = Registry::open(&key, 2).expect("open");
        registry.add(1, 1, "a", "s").unwrap();
        registry.add(2, 2, "b", "s").unwrap();
        assert!(registry.add(3, 3, "c", "s").unwrap().is_none());
    }
}
