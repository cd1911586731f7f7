//! Hazard pointers with a fixed-capacity registry and ABA-safe tagged pointers.
//!
//! A [`Domain`] owns a table of hazard slots. Each thread that reads shared nodes registers once
//! and gets a [`Thread`] handle. Before dereferencing a node the thread announces it in its slot
//! and re-reads the source location ([`Thread::try_protect`]). Unlinked nodes are
//! [retired](Thread::retire) into the thread's private list and freed by
//! [`Thread::try_reclaim`] once no slot announces them.
//!
//! # Liveness
//!
//! A thread that stops making progress while announcing a node, or that vanishes without dropping
//! its handle, keeps that node alive until the [`Domain`] is dropped. Memory is never freed
//! while announced; it may stay unreclaimed indefinitely.

mod config;
mod domain;
mod error;
mod hazard;
mod retire;
mod stats;
mod tag;
mod thread;

pub use config::DomainConfig;
pub use domain::Domain;
pub use error::{Error, Result};
pub use tag::{AtomicTaggedPtr, TaggedPtr};
pub use thread::Thread;
