//! Queue-based reactor

use super::Reactor;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Completion handler posted to an `IoService`
pub type Handler = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    handlers: VecDeque<Handler>,
    stopped: bool,
}

/// Handler queue shared by every thread that drives it
///
/// An idle `IoService` keeps its runners blocked waiting for work, so `run()`
/// only returns once `stop()` is called.
pub struct IoService {
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl IoService {
    /// Create a new, running service with an empty queue
    pub fn new() -> Self {
        IoService {
            queue: Mutex::new(Queue {
                handlers: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue a handler for execution by one of the running threads
    ///
    /// Handlers posted while the service is stopped stay queued until it is
    /// restarted and driven again.
    pub fn post<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().handlers.push_back(Box::new(handler));
        self.ready.notify_one();
    }

    /// Number of handlers waiting to be dispatched
    pub fn pending(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Run at most one ready handler without blocking
    ///
    /// Unlike `poll()`, handlers posted by the handler that ran are left
    /// queued, so a handler that re-posts itself cannot keep the caller busy.
    pub fn poll_one(&self) -> usize {
        match self.next(false) {
            Some(handler) => {
                handler();
                1
            }
            None => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next handler, optionally blocking while the queue is empty.
    ///
    /// Returns `None` once the service is stopped, or when not blocking and
    /// nothing is ready.
    fn next(&self, block: bool) -> Option<Handler> {
        let mut queue = self.lock();
        loop {
            if queue.stopped {
                return None;
            }
            if let Some(handler) = queue.handlers.pop_front() {
                return Some(handler);
            }
            if !block {
                return None;
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Default for IoService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.lock();
        f.debug_struct("IoService")
            .field("pending", &queue.handlers.len())
            .field("stopped", &queue.stopped)
            .finish()
    }
}

impl Reactor for IoService {
    fn run(&self) -> usize {
        let mut count = 0;
        while let Some(handler) = self.next(true) {
            handler();
            count += 1;
        }
        count
    }

    fn poll(&self) -> usize {
        let mut count = 0;
        while let Some(handler) = self.next(false) {
            handler();
            count += 1;
        }
        count
    }

    fn stop(&self) {
        self.lock().stopped = true;
        self.ready.notify_all();
    }

    fn stopped(&self) -> bool {
        self.lock().stopped
    }

    fn restart(&self) {
        self.lock().stopped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_poll_runs_ready_handlers() {
        let io = IoService::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let hits = Arc::clone(&hits);
            io.post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(io.pending(), 5);
        assert_eq!(io.poll(), 5);
        assert_eq!(io.pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 5);

        // Nothing ready: poll returns immediately
        assert_eq!(io.poll(), 0);
    }

    #[test]
    fn test_stopped_service_keeps_handlers_queued() {
        let io = IoService::new();
        io.stop();
        assert!(io.stopped());

        io.post(|| {});
        assert_eq!(io.poll(), 0);
        assert_eq!(io.run(), 0);
        assert_eq!(io.pending(), 1);

        io.restart();
        assert!(!io.stopped());
        assert_eq!(io.poll(), 1);
    }

    #[test]
    fn test_run_blocks_until_stopped() {
        let io = Arc::new(IoService::new());

        let runner = {
            let io = Arc::clone(&io);
            thread::spawn(move || io.run())
        };

        io.post(|| {});
        io.post(|| {});

        // Let the runner drain the queue, then release it
        thread::sleep(Duration::from_millis(100));
        assert!(!runner.is_finished());
        io.stop();

        assert_eq!(runner.join().unwrap(), 2);
    }

    #[test]
    fn test_handler_can_post_more_work() {
        let io = Arc::new(IoService::new());
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let inner_io = Arc::clone(&io);
            let hits = Arc::clone(&hits);
            io.post(move || {
                let hits = Arc::clone(&hits);
                inner_io.post(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(io.poll(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
