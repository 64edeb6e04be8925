//! rustls-backed TLS context
//!
//! The context is composed rather than wrapped: a crypto provider supplies
//! the random number generator and algorithms, a `CredentialsManager` holds
//! the trust store, chain and key, `NoSessionCache` turns session resumption
//! off and a `Policy` orders the signature schemes. The native configuration
//! is built on first use of `context()` and cached. Later loads still take
//! effect because the credentials and policy are consulted at handshake time.
//!
//! Directory trust stores are not supported by this backend.

pub mod credentials;
pub mod policy;
pub mod stream;
mod verifier;

use super::{read_file, reject_client_without_verification, Result, TlsContext, TlsError, TlsRole};
use credentials::CredentialsManager;
use policy::{KeyFamily, Policy};
use rustls::client::Resumption;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::NoServerSessionStorage;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureAlgorithm};
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;
use verifier::PeerVerifier;

pub use stream::RustlsStream;

/// Native configuration produced by `RustlsTlsContext::context()`
#[derive(Clone)]
pub enum RustlsContext {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>),
}

/// Session manager that never stores or resumes a session
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionCache;

impl NoSessionCache {
    fn apply_server(&self, config: &mut ServerConfig) {
        config.session_storage = Arc::new(NoServerSessionStorage {});
        config.send_tls13_tickets = 0;
    }

    fn apply_client(&self, config: &mut ClientConfig) {
        config.resumption = Resumption::disabled();
    }
}

/// TLS context built from rustls components
pub struct RustlsTlsContext {
    role: TlsRole,
    cert_required: bool,
    provider: Arc<CryptoProvider>,
    credentials: Arc<CredentialsManager>,
    sessions: NoSessionCache,
    policy: Arc<RwLock<Policy>>,
    context: OnceLock<RustlsContext>,
}

fn key_family(algorithm: SignatureAlgorithm) -> Option<KeyFamily> {
    match algorithm {
        SignatureAlgorithm::RSA => Some(KeyFamily::Rsa),
        SignatureAlgorithm::ECDSA => Some(KeyFamily::Ecdsa),
        _ => None,
    }
}

/// Parse every certificate of a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            TlsError::InvalidContent(format!("unable to parse '{}': {}", path.display(), e))
        })?;
    if certs.is_empty() {
        return Err(TlsError::InvalidContent(format!(
            "no certificate found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

impl RustlsTlsContext {
    pub fn credentials(&self) -> &Arc<CredentialsManager> {
        &self.credentials
    }

    pub fn policy(&self) -> Policy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn verifier(&self) -> Arc<PeerVerifier> {
        Arc::new(PeerVerifier::new(
            Arc::clone(&self.credentials),
            Arc::clone(&self.policy),
            Arc::clone(&self.provider),
        ))
    }

    fn build(&self) -> Result<RustlsContext> {
        let provider = Arc::clone(&self.provider);
        match self.role {
            TlsRole::Server => {
                let mut config = ServerConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()?
                    .with_client_cert_verifier(self.verifier())
                    .with_cert_resolver(self.credentials.clone());
                self.sessions.apply_server(&mut config);
                Ok(RustlsContext::Server(Arc::new(config)))
            }
            TlsRole::Client => {
                let mut config = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()?
                    .dangerous()
                    .with_custom_certificate_verifier(self.verifier())
                    .with_client_cert_resolver(self.credentials.clone());
                self.sessions.apply_client(&mut config);
                Ok(RustlsContext::Client(Arc::new(config)))
            }
        }
    }
}

impl TlsContext for RustlsTlsContext {
    type Native = RustlsContext;

    fn new(role: TlsRole) -> Result<Self> {
        Ok(RustlsTlsContext {
            role,
            cert_required: true,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            credentials: Arc::new(CredentialsManager::new()),
            sessions: NoSessionCache,
            policy: Arc::new(RwLock::new(Policy::new())),
            context: OnceLock::new(),
        })
    }

    fn role(&self) -> TlsRole {
        self.role
    }

    fn set_cert_required(&mut self, required: bool) -> Result<()> {
        reject_client_without_verification(self.role, required)?;
        self.cert_required = required;
        self.credentials.set_cert_required(required);
        Ok(())
    }

    fn cert_required(&self) -> bool {
        self.cert_required
    }

    fn load_ca_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let certs = load_certs(path)?;

        let mut store = RootCertStore::empty();
        for cert in certs {
            store.add(cert).map_err(|e| {
                TlsError::InvalidContent(format!(
                    "unusable trust anchor in '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        let count = store.len();
        self.credentials.set_trust_store(store);
        debug!(role = %self.role, path = %path.display(), count, "loaded CA file");
        Ok(())
    }

    fn load_ca_path<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        Err(TlsError::NotImplemented(format!(
            "CA path '{}': directory trust stores are not supported by the rustls backend",
            dir.as_ref().display()
        )))
    }

    fn load_cert_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let chain = load_certs(path)?;
        let count = chain.len();
        self.credentials.set_chain(chain);
        debug!(role = %self.role, path = %path.display(), chain = count, "loaded certificate");
        Ok(())
    }

    fn load_key_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let pem = read_file(path)?;
        let der = rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
            .map_err(|e| {
                TlsError::InvalidContent(format!("unable to parse '{}': {}", path.display(), e))
            })?
            .ok_or_else(|| {
                TlsError::InvalidContent(format!("no private key found in '{}'", path.display()))
            })?;
        let key = self.provider.key_provider.load_private_key(der)?;

        let family = key_family(key.algorithm());
        if let Some(family) = family {
            self.policy
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .prefer(family);
        }
        self.credentials.set_key(key);
        debug!(role = %self.role, path = %path.display(), ?family, "loaded private key");
        Ok(())
    }

    fn context(&self) -> Result<RustlsContext> {
        if let Some(ctx) = self.context.get() {
            return Ok(ctx.clone());
        }
        let built = self.build()?;
        Ok(self.context.get_or_init(|| built).clone())
    }
}
