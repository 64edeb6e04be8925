//! Thread pool run-state machine
//!
//! The legal transitions are:
//!
//! ```text
//!             Start              Pause
//!   STOPPED ---------> RUN <-------------> PAUSED
//!      ^                |      Resume        |
//!      |                | Shutdown           | Shutdown
//!      |    Settle      v                    |
//!      +----------- SHUTDOWN <---------------+
//! ```
//!
//! `AtomicRunState` applies a transition with compare-and-swap, so when two
//! callers race the same transition exactly one of them wins.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Coarse lifecycle stage of the thread pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunState {
    /// No worker threads exist
    Stopped = 0,
    /// Workers are driving the reactor
    Run = 1,
    /// Workers are parked, the reactor is stopped
    Paused = 2,
    /// Workers are exiting and being joined
    Shutdown = 3,
}

/// Requested change of run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Shutdown,
    Settle,
}

impl RunState {
    /// Look up `transition` in the transition table.
    ///
    /// Returns `None` when the transition is not legal from this state.
    pub fn apply(self, transition: Transition) -> Option<RunState> {
        use RunState::*;
        match (self, transition) {
            (Stopped, Transition::Start) => Some(Run),
            (Run, Transition::Pause) => Some(Paused),
            (Paused, Transition::Resume) => Some(Run),
            (Run | Paused, Transition::Shutdown) => Some(Shutdown),
            (Shutdown, Transition::Settle) => Some(Stopped),
            _ => None,
        }
    }

    /// Whether worker threads may exist in this state
    pub fn has_threads(self) -> bool {
        !matches!(self, RunState::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Stopped => "STOPPED",
            RunState::Run => "RUN",
            RunState::Paused => "PAUSED",
            RunState::Shutdown => "SHUTDOWN",
        }
    }

    fn from_u8(value: u8) -> RunState {
        match value {
            0 => RunState::Stopped,
            1 => RunState::Run,
            2 => RunState::Paused,
            3 => RunState::Shutdown,
            _ => unreachable!("invalid run state {}", value),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state shared between the pool and its worker threads
#[derive(Debug)]
pub struct AtomicRunState {
    inner: AtomicU8,
}

impl AtomicRunState {
    pub fn new(state: RunState) -> Self {
        AtomicRunState {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> RunState {
        RunState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Apply `transition` atomically.
    ///
    /// On success returns `(from, to)`. When the transition is illegal from
    /// the state observed at the time of the attempt, returns that state and
    /// leaves it untouched.
    pub fn transition(&self, transition: Transition) -> Result<(RunState, RunState), RunState> {
        let mut current = self.load();
        loop {
            let next = current.apply(transition).ok_or(current)?;
            match self.inner.compare_exchange(
                current as u8,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok((current, next)),
                Err(actual) => current = RunState::from_u8(actual),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const ALL_STATES: [RunState; 4] = [
        RunState::Stopped,
        RunState::Run,
        RunState::Paused,
        RunState::Shutdown,
    ];

    const ALL_TRANSITIONS: [Transition; 5] = [
        Transition::Start,
        Transition::Pause,
        Transition::Resume,
        Transition::Shutdown,
        Transition::Settle,
    ];

    #[test]
    fn test_transition_table() {
        let legal = [
            (RunState::Stopped, Transition::Start, RunState::Run),
            (RunState::Run, Transition::Pause, RunState::Paused),
            (RunState::Paused, Transition::Resume, RunState::Run),
            (RunState::Run, Transition::Shutdown, RunState::Shutdown),
            (RunState::Paused, Transition::Shutdown, RunState::Shutdown),
            (RunState::Shutdown, Transition::Settle, RunState::Stopped),
        ];

        for state in ALL_STATES {
            for transition in ALL_TRANSITIONS {
                let expected = legal
                    .iter()
                    .find(|(from, t, _)| *from == state && *t == transition)
                    .map(|(_, _, to)| *to);
                assert_eq!(
                    state.apply(transition),
                    expected,
                    "{} --{:?}-->",
                    state,
                    transition
                );
            }
        }
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let state = AtomicRunState::new(RunState::Paused);
        assert_eq!(state.transition(Transition::Pause), Err(RunState::Paused));
        assert_eq!(state.transition(Transition::Start), Err(RunState::Paused));
        assert_eq!(state.load(), RunState::Paused);

        assert_eq!(
            state.transition(Transition::Resume),
            Ok((RunState::Paused, RunState::Run))
        );
        assert_eq!(state.load(), RunState::Run);
    }

    #[test]
    fn test_racing_start_has_one_winner() {
        let state = Arc::new(AtomicRunState::new(RunState::Stopped));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.transition(Transition::Start).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(state.load(), RunState::Run);
    }

    #[test]
    fn test_has_threads() {
        assert!(!RunState::Stopped.has_threads());
        assert!(RunState::Run.has_threads());
        assert!(RunState::Paused.has_threads());
        assert!(RunState::Shutdown.has_threads());
    }
}
