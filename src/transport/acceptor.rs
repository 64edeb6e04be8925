//! TLS acceptor driven by a reactor

use super::{ConnectionHandler, Result, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use crate::reactor::IoService;
use crate::tls::{NativeContext, TlsContext, TlsError, TlsRole};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one accept round waits for a connection
const ACCEPT_POLL_MS: i32 = 100;

const LISTEN_BACKLOG: i32 = 128;

struct Inner<N: NativeContext> {
    reactor: Weak<IoService>,
    native: N,
    /// Released on close, so the port is free even if no accept round runs again
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    handler: Box<dyn ConnectionHandler<N::Stream>>,
    open: AtomicBool,
}

/// Accepts TLS connections on a reactor
///
/// The native context is captured when the acceptor is built, so it keeps
/// serving with it even if the `TlsContext` it came from is dropped.
pub struct TlsAcceptor<N: NativeContext> {
    inner: Arc<Inner<N>>,
}

impl<N: NativeContext> TlsAcceptor<N> {
    /// Create an acceptor for `listener`, which is switched to non-blocking
    /// mode. `context` must be a SERVER context.
    pub fn new<C, H>(
        reactor: &Arc<IoService>,
        context: &C,
        listener: TcpListener,
        handler: H,
    ) -> Result<Self>
    where
        C: TlsContext<Native = N>,
        H: ConnectionHandler<N::Stream>,
    {
        if context.role() != TlsRole::Server {
            return Err(TlsError::Programming(format!(
                "acceptor requires a server context, got a {} context",
                context.role()
            ))
            .into());
        }

        let native = context.context()?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        Ok(TlsAcceptor {
            inner: Arc::new(Inner {
                reactor: Arc::downgrade(reactor),
                native,
                listener: Mutex::new(Some(listener)),
                local_addr,
                handler: Box::new(handler),
                open: AtomicBool::new(false),
            }),
        })
    }

    /// Create a listening socket with SO_REUSEADDR set
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Post the accept handler on the reactor
    pub fn start(&self) {
        if self.inner.open.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(addr = %self.inner.local_addr, "accepting TLS connections");
        Inner::post_accept(&self.inner);
    }

    /// Stop accepting and release the listening socket.
    ///
    /// The pending accept round finishes and is not re-posted.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            info!(addr = %self.inner.local_addr, "acceptor closed");
        }
        if self.inner.lock_listener().take().is_some() {
            debug!(addr = %self.inner.local_addr, "listening socket released");
        }
    }
}

impl<N: NativeContext> Drop for TlsAcceptor<N> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<N: NativeContext> Inner<N> {
    fn lock_listener(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post_accept(this: &Arc<Self>) {
        let Some(reactor) = this.reactor.upgrade() else {
            debug!(addr = %this.local_addr, "reactor gone, acceptor idle");
            return;
        };
        let inner = Arc::clone(this);
        reactor.post(move || Inner::accept_round(inner));
    }

    fn accept_round(this: Arc<Self>) {
        if !this.open.load(Ordering::SeqCst) {
            return;
        }

        {
            let guard = this.lock_listener();
            let Some(listener) = guard.as_ref() else {
                return;
            };

            match wait_readable(listener) {
                Ok(true) => loop {
                    match listener.accept() {
                        Ok((sock, peer)) => this.dispatch(sock, peer),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!(addr = %this.local_addr, error = %e, "accept failed");
                            break;
                        }
                    }
                },
                Ok(false) => {}
                Err(e) => error!(addr = %this.local_addr, error = %e, "poll failed"),
            }
        }

        Inner::post_accept(&this);
    }

    /// Hand an accepted socket to another reactor thread
    fn dispatch(self: &Arc<Self>, sock: TcpStream, peer: SocketAddr) {
        let Some(reactor) = self.reactor.upgrade() else {
            return;
        };
        let inner = Arc::clone(self);
        reactor.post(move || inner.serve(sock, peer));
    }

    fn serve(&self, sock: TcpStream, peer: SocketAddr) {
        if let Err(e) = prepare(&sock) {
            warn!(%peer, error = %e, "unable to configure accepted socket");
            return;
        }

        match self.native.accept(sock) {
            Ok(stream) => {
                debug!(%peer, "TLS handshake complete");
                self.handler.handle(stream, peer);
            }
            Err(e) => warn!(%peer, error = %e, "TLS handshake failed, dropping connection"),
        }
    }
}

/// Wait up to ACCEPT_POLL_MS for a pending connection
fn wait_readable(listener: &TcpListener) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN};

    let mut pfd = pollfd {
        fd: listener.as_raw_fd(),
        events: POLLIN,
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, ACCEPT_POLL_MS) };
    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(result > 0)
}

/// Switch an accepted socket to blocking mode with handshake timeouts
pub(crate) fn prepare(sock: &TcpStream) -> io::Result<()> {
    let timeout = Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS));
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(timeout)?;
    sock.set_write_timeout(timeout)?;
    sock.set_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::openssl_backend::OpenSslStream;
    use crate::tls::{OpenSslTlsContext, TlsErrorKind};
    use openssl::ssl::SslContext;
    use std::sync::Mutex;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener =
            TlsAcceptor::<SslContext>::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_client_context_rejected() {
        let io = Arc::new(IoService::new());
        let ctx = OpenSslTlsContext::new(TlsRole::Client).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        let result = TlsAcceptor::new(&io, &ctx, listener, |_s: OpenSslStream, _p: SocketAddr| {});
        let err = result.err().unwrap();
        assert_eq!(err.tls_kind(), Some(TlsErrorKind::Programming));
    }

    #[test]
    fn test_plain_tcp_peer_is_dropped() {
        let io = Arc::new(IoService::new());
        let ctx = OpenSslTlsContext::new(TlsRole::Server).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let served = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&served);

        let acceptor = TlsAcceptor::new(&io, &ctx, listener, move |_s: OpenSslStream, _p: SocketAddr| {
            *counter.lock().unwrap() += 1;
        })
        .unwrap();
        acceptor.start();
        assert!(acceptor.is_open());

        // Peer connects and hangs up without speaking TLS
        drop(TcpStream::connect(acceptor.local_addr()).unwrap());

        // accept round, then the handshake attempt
        assert_eq!(io.poll_one(), 1);
        assert_eq!(io.pending(), 2);
        assert_eq!(io.poll_one(), 1);
        assert_eq!(*served.lock().unwrap(), 0);

        acceptor.close();
        assert!(!acceptor.is_open());
        assert_eq!(io.poll_one(), 1);
        assert_eq!(io.pending(), 0);
    }

    #[test]
    fn test_close_releases_port_while_reactor_idle() {
        let io = Arc::new(IoService::new());
        let ctx = OpenSslTlsContext::new(TlsRole::Server).unwrap();
        let listener = TlsAcceptor::<SslContext>::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let acceptor =
            TlsAcceptor::new(&io, &ctx, listener, |_s: OpenSslStream, _p: SocketAddr| {}).unwrap();
        let addr = acceptor.local_addr();
        acceptor.start();

        // Nothing drives the reactor, so the accept round stays queued
        acceptor.close();
        drop(acceptor);
        assert_eq!(io.pending(), 1);
        assert!(TcpStream::connect(addr).is_err());

        // The port can be bound again right away
        let rebound = TlsAcceptor::<SslContext>::bind(addr).unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);

        // The stale round finds no listener and is not re-posted
        assert_eq!(io.poll_one(), 1);
        assert_eq!(io.pending(), 0);
    }
}
