//! Worker thread pool
//!
//! A `ThreadPool` owns a fixed number of OS threads that all drive one shared
//! `Reactor`. The pool is controlled through an explicit run-state machine
//! (see [`state`]) so that pause, resume and shutdown never lose in-flight
//! handlers: a pause stops the reactor, lets running handlers complete, and
//! parks the workers until resumed.
//!
//! # Examples
//!
//! ```
//! use ctlchan::pool::{RunState, ThreadPool};
//! use ctlchan::reactor::IoService;
//!
//! let pool: ThreadPool<IoService> = ThreadPool::new(None, 2, false).unwrap();
//! assert_eq!(pool.run_state(), RunState::Run);
//! assert_eq!(pool.thread_count(), 2);
//!
//! pool.io_service().post(|| println!("hello from a worker"));
//!
//! pool.stop();
//! assert_eq!(pool.thread_count(), 0);
//! ```

pub mod state;
pub mod thread_pool;

pub use state::{AtomicRunState, RunState, Transition};
pub use thread_pool::{ThreadPool, PAUSED_WAIT_TIMEOUT};

use serde::Deserialize;

/// Result type for thread pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Thread pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unable to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Thread pool settings as found in the `multi-threading` configuration map
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolSettings {
    /// Number of worker threads
    pub thread_pool_size: usize,

    /// Construct without starting the workers
    #[serde(default)]
    pub defer_start: bool,

    /// Worker thread name prefix
    #[serde(default)]
    pub thread_name: Option<String>,
}

impl PoolSettings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PoolError::InvalidArgument(format!("bad thread pool settings: {}", e)))
    }
}
