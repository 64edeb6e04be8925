//! OpenSSL handshakes and streams

use crate::tls::cert::CertInfo;
use crate::tls::{NativeContext, PeerIdentity, Result, TlsError};
use openssl::ssl::{Ssl, SslContext, SslStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// Established OpenSSL stream
pub struct OpenSslStream {
    stream: SslStream<TcpStream>,
}

impl OpenSslStream {
    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    /// Negotiated protocol version (e.g. "TLSv1.3")
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Send close_notify and shut the socket down
    pub fn close(&mut self) -> io::Result<()> {
        let _ = self.stream.shutdown();
        self.stream.get_mut().shutdown(Shutdown::Both)
    }
}

impl Read for OpenSslStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for OpenSslStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl PeerIdentity for OpenSslStream {
    fn peer_cert_chain(&self) -> Vec<CertInfo> {
        let ssl = self.stream.ssl();
        let mut chain = Vec::new();

        let leaf = ssl.peer_certificate();
        let leaf_der = leaf.as_ref().and_then(|cert| cert.to_der().ok());
        if let Some(cert) = &leaf {
            chain.push(CertInfo::from_x509(cert));
        }

        // On the client side the peer chain already starts with the leaf
        if let Some(stack) = ssl.peer_cert_chain() {
            for cert in stack {
                if leaf_der.is_some() && cert.to_der().ok() == leaf_der {
                    continue;
                }
                chain.push(CertInfo::from_x509(cert));
            }
        }

        chain
    }
}

impl NativeContext for SslContext {
    type Stream = OpenSslStream;

    fn accept(&self, stream: TcpStream) -> Result<OpenSslStream> {
        let ssl = Ssl::new(self)?;
        let stream = ssl
            .accept(stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("accept failed: {}", e)))?;
        Ok(OpenSslStream { stream })
    }

    fn connect(&self, stream: TcpStream) -> Result<OpenSslStream> {
        let ssl = Ssl::new(self)?;
        let stream = ssl
            .connect(stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("connect failed: {}", e)))?;
        Ok(OpenSslStream { stream })
    }
}
