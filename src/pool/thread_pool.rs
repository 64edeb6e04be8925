//! Thread pool driving a shared reactor

use super::state::{AtomicRunState, RunState, Transition};
use super::{PoolError, PoolSettings, Result};
use crate::reactor::{IoService, Reactor};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on how long a paused worker sleeps before re-checking the run state
pub const PAUSED_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default worker thread name prefix
const DEFAULT_THREAD_NAME: &str = "pool-worker";

/// Bookkeeping protected by the pool mutex
#[derive(Default)]
struct Parking {
    /// Workers currently parked in the PAUSED wait
    parked: usize,
    /// Workers currently alive
    live: usize,
    /// Workers spawned by the last start, until the pool settles
    spawned: usize,
}

/// State shared between the pool handle and its workers
struct Shared<R> {
    reactor: Arc<R>,
    state: AtomicRunState,
    /// Serializes control transitions and guards the parking counters
    parking: Mutex<Parking>,
    /// Paused workers wait here for resume or shutdown
    resumed: Condvar,
    /// `wait_paused` callers wait here for workers to park
    parked: Condvar,
}

impl<R: Reactor> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, Parking> {
        self.parking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker thread body
    fn work(&self) {
        self.lock().live += 1;

        loop {
            match self.state.load() {
                RunState::Run => {
                    self.reactor.run();
                }
                RunState::Paused => self.park(),
                RunState::Shutdown => break,
                RunState::Stopped => {
                    error!("worker thread observed STOPPED run state, exiting");
                    break;
                }
            }
        }

        self.lock().live -= 1;
        self.parked.notify_all();
    }

    /// Sleep while paused, bounded by `PAUSED_WAIT_TIMEOUT`
    fn park(&self) {
        let mut parking = self.lock();
        if self.state.load() != RunState::Paused {
            return;
        }

        parking.parked += 1;
        self.parked.notify_all();

        let (mut parking, timeout) = self
            .resumed
            .wait_timeout(parking, PAUSED_WAIT_TIMEOUT)
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            debug!(state = %self.state.load(), "paused wait timed out, re-checking state");
        }

        parking.parked -= 1;
    }
}

/// Fixed-size pool of worker threads driving one reactor
///
/// Dropping a pool that is not STOPPED stops it.
pub struct ThreadPool<R: Reactor = IoService> {
    shared: Arc<Shared<R>>,
    pool_size: usize,
    thread_name: String,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: Reactor> ThreadPool<R> {
    /// Create a pool of `pool_size` workers.
    ///
    /// When `reactor` is `None` the pool creates its own. Unless
    /// `defer_start` is set the workers are started immediately.
    pub fn new(reactor: Option<Arc<R>>, pool_size: usize, defer_start: bool) -> Result<Self>
    where
        R: Default,
    {
        Self::build(reactor, pool_size, defer_start, DEFAULT_THREAD_NAME.to_string())
    }

    /// Create a pool from configuration settings
    pub fn from_settings(reactor: Option<Arc<R>>, settings: &PoolSettings) -> Result<Self>
    where
        R: Default,
    {
        let name = settings
            .thread_name
            .clone()
            .unwrap_or_else(|| DEFAULT_THREAD_NAME.to_string());
        Self::build(reactor, settings.thread_pool_size, settings.defer_start, name)
    }

    fn build(
        reactor: Option<Arc<R>>,
        pool_size: usize,
        defer_start: bool,
        thread_name: String,
    ) -> Result<Self>
    where
        R: Default,
    {
        if pool_size == 0 {
            return Err(PoolError::InvalidArgument(
                "thread pool size must be greater than zero".to_string(),
            ));
        }

        let reactor = reactor.unwrap_or_default();
        let pool = ThreadPool {
            shared: Arc::new(Shared {
                reactor,
                state: AtomicRunState::new(RunState::Stopped),
                parking: Mutex::new(Parking::default()),
                resumed: Condvar::new(),
                parked: Condvar::new(),
            }),
            pool_size,
            thread_name,
            threads: Mutex::new(Vec::with_capacity(pool_size)),
        };

        if !defer_start {
            pool.start()?;
        }

        Ok(pool)
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the worker threads.
    ///
    /// Only legal from STOPPED; any other state is reported as
    /// `PoolError::InvalidOperation` and left unchanged.
    pub fn start(&self) -> Result<()> {
        // Held until every handle is stored, so a racing stop() collects them all
        let mut threads = self.lock_threads();
        {
            let mut parking = self.shared.lock();
            if let Err(state) = self.shared.state.transition(Transition::Start) {
                return Err(PoolError::InvalidOperation(format!(
                    "thread pool cannot be started from state {}",
                    state
                )));
            }
            parking.spawned = self.pool_size;
            self.shared.reactor.restart();
        }

        for index in 0..self.pool_size {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.thread_name, index))
                .spawn(move || shared.work());

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    error!(error = %e, index, "failed to spawn worker thread");
                    drop(threads);
                    self.stop();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(pool_size = self.pool_size, "thread pool started");
        Ok(())
    }

    /// Stop dispatching and park the workers.
    ///
    /// Handlers already executing run to completion. Outside of RUN this is
    /// a logged no-op.
    pub fn pause(&self) {
        let _parking = self.shared.lock();
        match self.shared.state.transition(Transition::Pause) {
            Ok(_) => {
                self.shared.reactor.stop();
                debug!("thread pool paused");
            }
            Err(state) => debug!(%state, "pause ignored"),
        }
    }

    /// Restart the reactor and wake the parked workers.
    ///
    /// Outside of PAUSED this is a logged no-op.
    pub fn resume(&self) {
        let _parking = self.shared.lock();
        let state = self.shared.state.load();
        if state.apply(Transition::Resume).is_none() {
            debug!(%state, "resume ignored");
            return;
        }

        // The reactor runs again before any worker can observe RUN
        self.shared.reactor.restart();
        match self.shared.state.transition(Transition::Resume) {
            Ok(_) => {
                self.shared.resumed.notify_all();
                debug!("thread pool resumed");
            }
            Err(state) => {
                self.shared.reactor.stop();
                debug!(%state, "resume ignored");
            }
        }
    }

    /// Stop and join every worker, settling in STOPPED.
    ///
    /// Calling it on a stopped pool does nothing. It cannot be called from
    /// one of the pool's own workers, which would have to join itself.
    pub fn stop(&self) {
        if self.on_worker_thread() {
            error!("thread pool cannot be stopped from one of its own worker threads");
            return;
        }

        if !self.begin_shutdown() {
            return;
        }

        let threads = std::mem::take(&mut *self.lock_threads());
        for handle in threads {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "worker thread panicked");
            }
        }

        let mut parking = self.shared.lock();
        if let Err(state) = self.shared.state.transition(Transition::Settle) {
            error!(%state, "thread pool failed to settle after shutdown");
        }
        parking.spawned = 0;
        info!("thread pool stopped");
    }

    fn on_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.lock_threads()
            .iter()
            .any(|handle| handle.thread().id() == current)
    }

    /// Move to SHUTDOWN, stop the reactor and wake every waiter.
    ///
    /// Returns `false` when the pool is already stopped or stopping.
    fn begin_shutdown(&self) -> bool {
        let _parking = self.shared.lock();
        match self.shared.state.transition(Transition::Shutdown) {
            Ok(_) => {
                if !self.shared.reactor.stopped() {
                    self.shared.reactor.stop();
                }
                self.shared.resumed.notify_all();
                self.shared.parked.notify_all();
                true
            }
            Err(RunState::Stopped) => false,
            Err(state) => {
                debug!(%state, "stop already in progress");
                false
            }
        }
    }

    /// Wait until every worker is parked in the PAUSED state.
    ///
    /// Returns `false` on timeout, or when the pool leaves PAUSED meanwhile.
    pub fn wait_paused(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut parking = self.shared.lock();
        loop {
            if self.shared.state.load() != RunState::Paused {
                return false;
            }
            if parking.parked == parking.live && parking.live == parking.spawned {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            parking = self
                .shared
                .parked
                .wait_timeout(parking, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        self.shared.state.load()
    }

    /// The reactor driven by the workers
    pub fn io_service(&self) -> &Arc<R> {
        &self.shared.reactor
    }

    /// Configured number of workers
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of worker threads currently owned by the pool
    pub fn thread_count(&self) -> usize {
        self.lock_threads().len()
    }
}

impl<R: Reactor> Drop for ThreadPool<R> {
    fn drop(&mut self) {
        if self.run_state() == RunState::Stopped {
            return;
        }

        if !self.on_worker_thread() {
            self.stop();
            return;
        }

        // A worker cannot join itself: shut down and let the workers exit
        // on their own once their current handler returns.
        if self.begin_shutdown() {
            let detached = std::mem::take(&mut *self.lock_threads()).len();
            warn!(detached, "thread pool dropped on one of its workers, threads detached");
        }
    }
}
