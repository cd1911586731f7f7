use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::config::DomainConfig;
use crate::hazard::HazardSlots;
use crate::retire::Orphans;
use crate::stats::Stats;
use crate::thread::Thread;
use crate::{Error, Result};

/// A hazard pointer registry.
///
/// Threads [`register`](Domain::register) to obtain a [`Thread`] handle holding one hazard slot
/// and a private retire list. A node retired through any handle of the domain is freed only once
/// no slot of the domain announces it.
#[derive(Debug)]
pub struct Domain {
    pub(crate) slots: HazardSlots,
    pub(crate) orphans: Orphans,
    pub(crate) stats: Stats,
    config: DomainConfig,
}

impl Domain {
    pub fn new(config: DomainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            slots: HazardSlots::new(config.max_concurrent_threads),
            orphans: Orphans::new(),
            stats: Stats::default(),
            config,
        })
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Registers the calling thread.
    ///
    /// Fails with [`Error::RegistryExhausted`] while `max_concurrent_threads` handles are alive.
    pub fn register(&self) -> Result<Thread<'_>> {
        match self.slots.acquire() {
            Some(slot) => {
                debug!("registered hazard slot {}", slot);
                Ok(Thread::new(self, slot))
            }
            None => {
                let capacity = self.slots.capacity();
                warn!("hazard registry exhausted ({} slots)", capacity);
                Err(Error::RegistryExhausted { capacity })
            }
        }
    }

    /// Deregisters a thread. Same as dropping the handle.
    pub fn deregister(&self, thread: Thread<'_>) {
        debug_assert!(core::ptr::eq(thread.domain(), self));
        drop(thread);
    }

    pub fn registered_threads(&self) -> usize {
        self.slots.in_use()
    }

    /// Whether some registered thread currently announces `ptr`.
    pub fn is_protected<T>(&self, ptr: *mut T) -> bool {
        self.slots.is_protected(ptr as *mut u8)
    }

    pub fn collect_guarded_ptrs(&self) -> FxHashSet<*mut u8> {
        self.slots.collect_guarded_ptrs()
    }

    /// Number of retired nodes not freed yet.
    pub fn garbage_count(&self) -> usize {
        self.stats.garbage()
    }

    /// Number of retired nodes freed so far.
    pub fn reclaimed_count(&self) -> usize {
        self.stats.reclaimed()
    }
}

impl Default for Domain {
    fn default() -> Self {
        let config = DomainConfig::default();
        Self {
            slots: HazardSlots::new(config.max_concurrent_threads),
            orphans: Orphans::new(),
            stats: Stats::default(),
            config,
        }
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        // No `Thread` borrows the domain anymore, so nothing can be protected.
        let orphans = self.orphans.pop_all();
        let count = orphans.len();
        for retired in orphans {
            unsafe { retired.reclaim() };
        }
        self.stats.decr_garb(count);
        if count > 0 {
            debug!("domain teardown freed {} orphaned nodes", count);
        }
    }
}
