//! # fibercord-core
//!
//! Core types for the fibercord cooperative fiber runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, context switching and the scheduler live in `fibercord-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber state and suspend reasons
//! - `flags` - Fiber flag bits
//! - `attr` - Fiber creation attributes
//! - `status` - Entry function return values
//! - `region` - Per-fiber scratch (gc) region
//! - `error` - Error types
//! - `kprint` - Leveled logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod flags;
pub mod attr;
pub mod status;
pub mod region;
pub mod error;
pub mod kprint;
pub mod env;

pub use id::FiberId;
pub use state::{FiberState, SuspendReason};
pub use flags::FiberFlags;
pub use attr::FiberAttr;
pub use status::IntoFiberStatus;
pub use region::{alloc_site_supported, AllocSite, Region};
pub use error::{FiberError, FiberResult, MemoryError};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_size, env_is_set};

/// Limits shared by every cord
pub mod constants {
    /// Longest fiber name in bytes; longer names are truncated.
    pub const FIBER_NAME_MAX: usize = 255;

    /// Stack alignment required by every supported ABI.
    pub const STACK_ALIGN: usize = 16;
}
