use parking_lot::Mutex;
use std::sync::Arc;

use pcie_transport::Transport;

use crate::desc::{DescStatus, Descriptor};
use crate::engine::DmaEngine;
use crate::op_table::OpTag;
use crate::stats::StatsCollector;
use crate::EngineResult;

/// Cloneable, thread-safe handle to one engine.
///
/// Submitters on any thread share the engine behind a single mutex; the
/// counter bank stays reachable without taking the lock.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Mutex<DmaEngine>>,
    stats: Arc<StatsCollector>,
}

impl EngineHandle {
    pub fn new(engine: DmaEngine) -> Self {
        let stats = Arc::clone(engine.stats());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            stats,
        }
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut DmaEngine) -> R) -> R {
        let mut guard = self.engine.lock();
        f(&mut guard)
    }

    pub fn submit(&self, desc: Descriptor) -> EngineResult<Option<OpTag>> {
        self.engine.lock().submit(desc)
    }

    pub fn tick<T: Transport + ?Sized>(&self, link: &mut T) {
        self.engine.lock().tick(link);
    }

    pub fn pop_status(&self) -> Option<DescStatus> {
        self.engine.lock().pop_status()
    }

    pub fn is_idle(&self) -> bool {
        self.engine.lock().is_idle()
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }
}
