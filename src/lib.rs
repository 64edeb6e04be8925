//! ctlchan - control channel core for DHCP agents and relays
//!
//! This crate provides the pieces an HTTP(S) command channel is built on:
//! a worker thread pool driving a shared reactor with pause/resume/shutdown,
//! a TLS context abstraction with an OpenSSL backend and a rustls backend,
//! and the acceptor/connector glue that ties a context to the reactor.

pub mod pool;
pub mod reactor;
pub mod tls;
pub mod transport;

pub use pool::{PoolError, RunState, ThreadPool};
pub use reactor::{IoService, Reactor};
pub use tls::{configure, DefaultTlsContext, TlsContext, TlsError, TlsRole};
pub use transport::{ConnectionHandler, TlsAcceptor, TlsConnector};
