//! A Treiber stack whose nodes are reclaimed with hazard pointers, plus the configuration of its
//! benchmark harness.

#[macro_use]
extern crate cfg_if;

pub mod config;
mod error;
pub mod stack;

pub use error::AllocError;
pub use hazard::{Domain, DomainConfig, Error, Thread};
pub use stack::LockFreeStack;

cfg_if! {
    if #[cfg(all(not(feature = "sanitize"), target_os = "linux"))] {
        extern crate tikv_jemalloc_ctl;

        /// Reads `stats.allocated` from jemalloc. Samples are zero if the mibs are unavailable.
        pub struct MemSampler {
            mibs: Option<(
                tikv_jemalloc_ctl::epoch_mib,
                tikv_jemalloc_ctl::stats::allocated_mib,
            )>,
        }

        impl MemSampler {
            pub fn new() -> Self {
                let mibs = tikv_jemalloc_ctl::epoch::mib()
                    .and_then(|epoch| Ok((epoch, tikv_jemalloc_ctl::stats::allocated::mib()?)));
                if let Err(e) = &mibs {
                    log::warn!("jemalloc stats are unavailable: {}", e);
                }
                MemSampler { mibs: mibs.ok() }
            }

            pub fn sample(&self) -> usize {
                let Some((epoch, allocated)) = &self.mibs else {
                    return 0;
                };
                epoch
                    .advance()
                    .and_then(|_| allocated.read())
                    .unwrap_or(0)
            }
        }
    } else {
        pub struct MemSampler {}

        impl MemSampler {
            pub fn new() -> Self {
                println!("NOTE: Memory usage benchmark is supported only for linux.");
                MemSampler {}
            }

            pub fn sample(&self) -> usize {
                0
            }
        }
    }
}

impl Default for MemSampler {
    fn default() -> Self {
        Self::new()
    }
}
