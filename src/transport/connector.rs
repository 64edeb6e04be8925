//! Dialing side of the control channel

use super::{Result, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use crate::tls::{NativeContext, TlsContext, TlsError, TlsRole};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

/// Opens TLS connections with a CLIENT context
#[derive(Clone)]
pub struct TlsConnector<N: NativeContext> {
    native: N,
    timeout: Duration,
}

impl<N: NativeContext> TlsConnector<N> {
    pub fn new<C>(context: &C) -> Result<Self>
    where
        C: TlsContext<Native = N>,
    {
        if context.role() != TlsRole::Client {
            return Err(TlsError::Programming(format!(
                "connector requires a client context, got a {} context",
                context.role()
            ))
            .into());
        }

        Ok(TlsConnector {
            native: context.context()?,
            timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        })
    }

    /// Set the connect and handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dial `addr` and complete the handshake
    pub fn connect(&self, addr: SocketAddr) -> Result<N::Stream> {
        let sock = TcpStream::connect_timeout(&addr, self.timeout)?;
        sock.set_read_timeout(Some(self.timeout))?;
        sock.set_write_timeout(Some(self.timeout))?;
        sock.set_nodelay(true)?;

        let stream = self.native.connect(sock)?;
        debug!(%addr, "TLS connection established");
        Ok(stream)
    }
}
