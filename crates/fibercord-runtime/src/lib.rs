//! # fibercord-runtime
//!
//! Platform-specific runtime for the fibercord fiber scheduler.
//!
//! This crate provides:
//! - Stack management (mmap with guard pages)
//! - Context switching (architecture-specific assembly)
//! - The per-cord cooperative scheduler, timers and ready queue
//! - Cross-thread wakeups and cord join
//! - Join, cancellation, gc leak detection and shutdown

pub mod config;
pub mod memory;
pub mod arch;
pub mod timer;
pub mod parking;
pub mod ready_queue;
pub mod fiber;
pub mod leak;
pub mod shutdown;

mod cord;
mod event;
mod join;
mod scheduler;
mod stack_pool;
mod tls;

// Re-exports
pub use config::{ConfigError, CordConfig};
pub use cord::{cord_start, run, run_with_config, Cord, CordHandle};
pub use event::CordShared;
pub use fiber::{Fiber, FiberInfo};
pub use tls::in_cord;
pub use parking::{CordParking, PlatformParking};
