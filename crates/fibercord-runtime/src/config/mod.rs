//! Cord configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (runtime)
//! 3. User's config file named by `FIBERCORD_CONFIG_RS` (compile-time)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use fibercord_runtime::config::CordConfig;
//!
//! let config = CordConfig::from_env()
//!     .stack_size(256 * 1024)
//!     .pool_max(64);
//! ```

pub mod defaults;

use std::time::Duration;

use fibercord_core::env::{env_get, env_get_bool, env_get_size};
use fibercord_core::kinfo;

/// Per-cord configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct CordConfig {
    /// Stack size of fibers created without an explicit size
    pub stack_size: usize,
    /// Floor applied to every requested stack size
    pub stack_size_min: usize,
    /// Dead default-size fibers kept for reuse
    pub pool_max: usize,
    /// Longest idle park between timer and inbox checks
    pub park_timeout: Duration,
    /// Capture a backtrace at each fiber's first gc allocation
    pub leak_backtrace: bool,
    /// Abort the process when a gc leak is found
    pub abort_on_leak: bool,
}

impl Default for CordConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl CordConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FIBERCORD_STACK_SIZE` - Default fiber stack size, accepts `K`/`M` suffixes
    /// - `FIBERCORD_STACK_SIZE_MIN` - Minimum stack size
    /// - `FIBERCORD_POOL_MAX` - Pooled dead fibers per cord
    /// - `FIBERCORD_PARK_TIMEOUT_MS` - Idle park timeout in milliseconds
    /// - `FIBERCORD_LEAK_BACKTRACE` - Capture gc leak backtraces (0/1)
    /// - `FIBERCORD_ABORT_ON_LEAK` - Abort on gc leak (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            stack_size: env_get_size("FIBERCORD_STACK_SIZE", base.stack_size),
            stack_size_min: env_get_size("FIBERCORD_STACK_SIZE_MIN", base.stack_size_min),
            pool_max: env_get("FIBERCORD_POOL_MAX", base.pool_max),
            park_timeout: Duration::from_millis(env_get(
                "FIBERCORD_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            leak_backtrace: env_get_bool("FIBERCORD_LEAK_BACKTRACE", base.leak_backtrace),
            abort_on_leak: env_get_bool("FIBERCORD_ABORT_ON_LEAK", base.abort_on_leak),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            stack_size: defaults::DEFAULT_STACK_SIZE,
            stack_size_min: defaults::STACK_SIZE_MIN,
            pool_max: defaults::POOL_MAX,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            leak_backtrace: cfg!(debug_assertions),
            abort_on_leak: cfg!(feature = "abort-on-leak"),
        }
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn stack_size_min(mut self, size: usize) -> Self {
        self.stack_size_min = size;
        self
    }

    pub fn pool_max(mut self, n: usize) -> Self {
        self.pool_max = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn leak_backtrace(mut self, enable: bool) -> Self {
        self.leak_backtrace = enable;
        self
    }

    pub fn abort_on_leak(mut self, enable: bool) -> Self {
        self.abort_on_leak = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size_min < 4096 {
            return Err(ConfigError::InvalidValue("stack_size_min must be >= 4KB"));
        }
        if self.stack_size < self.stack_size_min {
            return Err(ConfigError::InvalidValue(
                "stack_size must be >= stack_size_min",
            ));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Log the configuration at info level.
    pub fn print(&self) {
        kinfo!("fibercord configuration:");
        kinfo!("  stack_size:      {}", self.stack_size);
        kinfo!("  stack_size_min:  {}", self.stack_size_min);
        kinfo!("  pool_max:        {}", self.pool_max);
        kinfo!("  park_timeout:    {:?}", self.park_timeout);
        kinfo!("  leak_backtrace:  {}", self.leak_backtrace);
        kinfo!("  abort_on_leak:   {}", self.abort_on_leak);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
