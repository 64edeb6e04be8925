//! Reactor contract
//!
//! The thread pool never dispatches work itself. It only drives an event loop
//! through the `Reactor` trait: worker threads call `run()`, and the pool
//! controls them with `stop()` and `restart()`.
//!
//! `IoService` is the in-process implementation used by the transport layer:
//! handlers are posted to a queue and executed by whichever thread is inside
//! `run()` or `poll()`.
//!
//! # Examples
//!
//! ```
//! use ctlchan::reactor::{IoService, Reactor};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let io = IoService::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//! for _ in 0..3 {
//!     let hits = Arc::clone(&hits);
//!     io.post(move || {
//!         hits.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//! assert_eq!(io.poll(), 3);
//! assert_eq!(hits.load(Ordering::SeqCst), 3);
//! ```

pub mod io_service;

pub use io_service::{Handler, IoService};

/// Event loop driven by the thread pool
///
/// Implementations must be safe to drive from many threads at once.
pub trait Reactor: Send + Sync + 'static {
    /// Dispatch handlers until the reactor is stopped.
    ///
    /// Returns the number of handlers executed by this call.
    fn run(&self) -> usize;

    /// Dispatch the handlers that are ready now, without blocking.
    fn poll(&self) -> usize;

    /// Make every thread inside `run()` return as soon as its current handler completes.
    fn stop(&self);

    /// Whether `stop()` was called since the last `restart()`.
    fn stopped(&self) -> bool;

    /// Clear the stopped state so `run()` dispatches again.
    fn restart(&self);
}
