//! TLS contexts for the control channel
//!
//! A TLS context holds one endpoint's configuration (client or server):
//! whether the peer must present a certificate, the trust anchor, the
//! certificate chain and the private key. It is written once against the
//! `TlsContext` interface and implemented by two backends:
//!
//! - `OpenSslTlsContext` wraps a native OpenSSL `SslContext` and supports
//!   directory trust stores.
//! - `RustlsTlsContext` is composed of a credentials manager, a crypto
//!   provider (the random number generator), a no-cache session manager and
//!   a signature policy. It only supports single-file trust stores.
//!
//! Contexts are configured single-threaded before service starts. After that
//! the native handle returned by `context()` is shared read-only by every
//! connection-handling thread.
//!
//! # Examples
//!
//! ```no_run
//! use ctlchan::tls::{configure, OpenSslTlsContext, TlsContext, TlsRole};
//!
//! let ctx: OpenSslTlsContext = configure(
//!     TlsRole::Server,
//!     "kea-ca.crt",
//!     "kea-server.crt",
//!     "kea-server.key",
//!     true,
//! )
//! .unwrap();
//! let native = ctx.context().unwrap();
//! ```

pub mod cert;
pub mod openssl_backend;
pub mod rustls_backend;
pub mod settings;

pub use cert::CertInfo;
pub use openssl_backend::OpenSslTlsContext;
pub use rustls_backend::RustlsTlsContext;
pub use settings::TlsSettings;

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Context type selected at build time
#[cfg(not(feature = "rustls-default"))]
pub type DefaultTlsContext = OpenSslTlsContext;

/// Context type selected at build time
#[cfg(feature = "rustls-default")]
pub type DefaultTlsContext = RustlsTlsContext;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Side of the connection a context is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsRole {
    Client,
    Server,
}

impl TlsRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsRole::Client => "client",
            TlsRole::Server => "server",
        }
    }
}

impl fmt::Display for TlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Family of an installed private key, used to order signature algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ecdsa,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("unable to read '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS material: {0}")]
    InvalidContent(String),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("invalid use of TLS context: {0}")]
    Programming(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Failure category of a `TlsError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    /// Bad file or bad content
    Config,
    /// The backend lacks the requested feature
    NotImplemented,
    /// A setting was given a value the role does not allow
    BadValue,
    /// The context was used in a way its role or material does not support
    Programming,
    /// The peer could not be authenticated or the exchange failed
    Handshake,
}

impl TlsError {
    pub fn kind(&self) -> TlsErrorKind {
        match self {
            TlsError::Io { .. }
            | TlsError::InvalidContent(_)
            | TlsError::OpenSsl(_)
            | TlsError::Rustls(_) => TlsErrorKind::Config,
            TlsError::NotImplemented(_) => TlsErrorKind::NotImplemented,
            TlsError::BadValue(_) => TlsErrorKind::BadValue,
            TlsError::Programming(_) => TlsErrorKind::Programming,
            TlsError::HandshakeFailed(_) => TlsErrorKind::Handshake,
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        TlsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read a whole file, attaching the path to any failure
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| TlsError::io(path, e))
}

/// Identity of the remote end of an established TLS stream
pub trait PeerIdentity {
    /// Certificates presented by the peer, end-entity first
    fn peer_cert_chain(&self) -> Vec<CertInfo>;

    /// commonName of the peer's certificate subject
    fn peer_subject(&self) -> Option<String> {
        self.peer_cert_chain().into_iter().next().map(|c| c.subject)
    }

    /// commonName of the peer's certificate issuer
    fn peer_issuer(&self) -> Option<String> {
        self.peer_cert_chain().into_iter().next().map(|c| c.issuer)
    }
}

/// Backend-native context consumed by the transport layer
///
/// Handles are cheap to clone and keep the native state alive independently
/// of the `TlsContext` that produced them.
pub trait NativeContext: Clone + Send + Sync + 'static {
    /// Established TLS stream
    type Stream: Read + Write + PeerIdentity + Send + 'static;

    /// Run the server side of a handshake on an accepted socket
    fn accept(&self, stream: TcpStream) -> Result<Self::Stream>;

    /// Run the client side of a handshake on a connected socket
    fn connect(&self, stream: TcpStream) -> Result<Self::Stream>;
}

/// One TLS endpoint's configuration, independent of the crypto backend
pub trait TlsContext: Send + Sync + Sized {
    type Native: NativeContext;

    /// Create an unconfigured context for `role`
    fn new(role: TlsRole) -> Result<Self>;

    /// Role fixed at construction
    fn role(&self) -> TlsRole;

    /// Require (or not) a certificate from the peer.
    ///
    /// A client must always authenticate the server it dials, so disabling
    /// this on a CLIENT context fails with `TlsError::BadValue`.
    fn set_cert_required(&mut self, required: bool) -> Result<()>;

    /// Last value accepted by `set_cert_required` (true by default)
    fn cert_required(&self) -> bool;

    /// Install a trust anchor from a file holding one or more certificates
    fn load_ca_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()>;

    /// Install a directory-based trust store
    fn load_ca_path<P: AsRef<Path>>(&mut self, dir: P) -> Result<()>;

    /// Install the end-entity certificate, followed by any chain certificates
    fn load_cert_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()>;

    /// Install the private key
    fn load_key_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()>;

    /// Backend-native context reflecting the material loaded so far.
    ///
    /// Incomplete material is not rejected here: the handshake fails later.
    fn context(&self) -> Result<Self::Native>;
}

pub(crate) fn reject_client_without_verification(role: TlsRole, required: bool) -> Result<()> {
    if !required && role == TlsRole::Client {
        return Err(TlsError::BadValue(
            "'cert-required' must be true for a TLS client".to_string(),
        ));
    }
    Ok(())
}

/// Build a fully configured context in one call.
///
/// A trust anchor naming a directory is installed with `load_ca_path`,
/// anything else with `load_ca_file`. On any failure the partially built
/// context is dropped and the error returned.
pub fn configure<C, A, P, K>(
    role: TlsRole,
    trust_anchor: A,
    cert_file: P,
    key_file: K,
    cert_required: bool,
) -> Result<C>
where
    C: TlsContext,
    A: AsRef<Path>,
    P: AsRef<Path>,
    K: AsRef<Path>,
{
    let trust_anchor = trust_anchor.as_ref();
    let mut ctx = C::new(role)?;

    if trust_anchor.is_dir() {
        ctx.load_ca_path(trust_anchor)?;
    } else {
        ctx.load_ca_file(trust_anchor)?;
    }
    ctx.load_cert_file(cert_file)?;
    ctx.load_key_file(key_file)?;
    ctx.set_cert_required(cert_required)?;

    debug!(%role, trust_anchor = %trust_anchor.display(), cert_required, "TLS context configured");
    Ok(ctx)
}

/// Build a context from parsed settings
pub fn configure_from<C: TlsContext>(role: TlsRole, settings: &TlsSettings) -> Result<C> {
    let (ca, cert, key) = settings.paths()?;
    configure(role, ca, cert, key, settings.cert_required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let io = TlsError::io(
            Path::new("/no-such-file"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert_eq!(io.kind(), TlsErrorKind::Config);
        assert!(io.to_string().contains("/no-such-file"));

        assert_eq!(
            TlsError::InvalidContent("x".into()).kind(),
            TlsErrorKind::Config
        );
        assert_eq!(
            TlsError::NotImplemented("x".into()).kind(),
            TlsErrorKind::NotImplemented
        );
        assert_eq!(TlsError::BadValue("x".into()).kind(), TlsErrorKind::BadValue);
        assert_eq!(
            TlsError::Programming("x".into()).kind(),
            TlsErrorKind::Programming
        );
    }

    #[test]
    fn test_client_verification_policy() {
        assert!(reject_client_without_verification(TlsRole::Client, true).is_ok());
        assert!(reject_client_without_verification(TlsRole::Server, false).is_ok());
        assert!(matches!(
            reject_client_without_verification(TlsRole::Client, false),
            Err(TlsError::BadValue(_))
        ));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(TlsRole::Client.to_string(), "client");
        assert_eq!(TlsRole::Server.to_string(), "server");
    }
}
