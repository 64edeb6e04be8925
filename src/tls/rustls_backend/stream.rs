//! rustls handshakes and streams

use super::RustlsContext;
use crate::tls::cert::CertInfo;
use crate::tls::{NativeContext, PeerIdentity, Result, TlsError};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, ServerConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// Established rustls stream
pub enum RustlsStream {
    Server(StreamOwned<ServerConnection, TcpStream>),
    Client(StreamOwned<ClientConnection, TcpStream>),
}

impl RustlsStream {
    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        match self {
            RustlsStream::Server(s) => s.get_ref(),
            RustlsStream::Client(s) => s.get_ref(),
        }
    }

    /// Send close_notify and shut the socket down
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            RustlsStream::Server(s) => {
                s.conn.send_close_notify();
                let _ = s.conn.complete_io(&mut s.sock);
                s.sock.shutdown(Shutdown::Both)
            }
            RustlsStream::Client(s) => {
                s.conn.send_close_notify();
                let _ = s.conn.complete_io(&mut s.sock);
                s.sock.shutdown(Shutdown::Both)
            }
        }
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            RustlsStream::Server(s) => s.conn.peer_certificates(),
            RustlsStream::Client(s) => s.conn.peer_certificates(),
        }
    }
}

impl Read for RustlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RustlsStream::Server(s) => s.read(buf),
            RustlsStream::Client(s) => s.read(buf),
        }
    }
}

impl Write for RustlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RustlsStream::Server(s) => s.write(buf),
            RustlsStream::Client(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RustlsStream::Server(s) => s.flush(),
            RustlsStream::Client(s) => s.flush(),
        }
    }
}

impl PeerIdentity for RustlsStream {
    fn peer_cert_chain(&self) -> Vec<CertInfo> {
        self.peer_certificates()
            .map(|certs| {
                certs
                    .iter()
                    .filter_map(|cert| CertInfo::from_der(cert.as_ref()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn handshake_error(e: io::Error) -> TlsError {
    TlsError::HandshakeFailed(e.to_string())
}

impl NativeContext for RustlsContext {
    type Stream = RustlsStream;

    fn accept(&self, mut sock: TcpStream) -> Result<RustlsStream> {
        let config = match self {
            RustlsContext::Server(config) => config.clone(),
            RustlsContext::Client(_) => {
                return Err(TlsError::Programming(
                    "client context used to accept a connection".to_string(),
                ))
            }
        };

        let mut conn = ServerConnection::new(config)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).map_err(handshake_error)?;
        }
        Ok(RustlsStream::Server(StreamOwned::new(conn, sock)))
    }

    fn connect(&self, mut sock: TcpStream) -> Result<RustlsStream> {
        let config = match self {
            RustlsContext::Client(config) => config.clone(),
            RustlsContext::Server(_) => {
                return Err(TlsError::Programming(
                    "server context used to open a connection".to_string(),
                ))
            }
        };

        let peer = sock.peer_addr().map_err(handshake_error)?;
        let mut conn = ClientConnection::new(config, ServerName::from(peer.ip()))?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).map_err(handshake_error)?;
        }
        Ok(RustlsStream::Client(StreamOwned::new(conn, sock)))
    }
}
