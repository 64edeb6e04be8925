//! Control channel transport
//!
//! Glue between a reactor, a TLS context and the code that serves a
//! connection. `TlsAcceptor` runs on the reactor of a `ThreadPool`: its accept
//! handler is re-posted after every round, so the pool workers take turns
//! accepting, handshaking and serving connections. `TlsConnector` is the
//! dialing side.
//!
//! What happens on an established connection is decided by the injected
//! `ConnectionHandler`.

pub mod acceptor;
pub mod connector;

pub use acceptor::TlsAcceptor;
pub use connector::TlsConnector;

use crate::tls::{TlsError, TlsErrorKind};
use std::io;
use std::net::SocketAddr;

/// Read/write timeout applied to sockets while the handshake runs
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl Error {
    /// Classification of the TLS failure, if this is one
    pub fn tls_kind(&self) -> Option<TlsErrorKind> {
        match self {
            Error::Tls(e) => Some(e.kind()),
            Error::Io(_) => None,
        }
    }
}

/// Serves one established connection
///
/// Called on a reactor thread; a long-running handler keeps that worker busy.
pub trait ConnectionHandler<S>: Send + Sync + 'static {
    fn handle(&self, stream: S, peer: SocketAddr);
}

impl<S, F> ConnectionHandler<S> for F
where
    F: Fn(S, SocketAddr) + Send + Sync + 'static,
{
    fn handle(&self, stream: S, peer: SocketAddr) {
        self(stream, peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = move |value: u32, _peer: SocketAddr| {
            counter.fetch_add(value as usize, Ordering::SeqCst);
        };

        let peer: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        handler.handle(2, peer);
        handler.handle(3, peer);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_error_kind() {
        let err = Error::from(TlsError::Programming("x".into()));
        assert_eq!(err.tls_kind(), Some(TlsErrorKind::Programming));
        assert_eq!(err.to_string(), "invalid use of TLS context: x");

        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.tls_kind().is_none());
    }
}
