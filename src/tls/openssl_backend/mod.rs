//! OpenSSL-backed TLS context
//!
//! The loaded material is recorded and the native `SslContext` is rebuilt
//! after every successful change, so the handle returned by `context()` always
//! reflects the latest material and is only a reference-count bump to hand
//! out. A failed change leaves both the material and the native context as
//! they were.

pub mod stream;

use super::{
    read_file, reject_client_without_verification, KeyFamily, Result, TlsContext, TlsError,
    TlsRole,
};
use openssl::pkey::{Id, PKey, Private};
use openssl::ssl::{SslContext, SslContextBuilder, SslFiletype, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::store::X509Lookup;
use openssl::x509::X509;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use stream::OpenSslStream;

/// Material installed so far
#[derive(Clone, Default)]
struct Material {
    ca_certs: Vec<X509>,
    ca_path: Option<PathBuf>,
    chain: Vec<X509>,
    key: Option<PKey<Private>>,
}

/// TLS context backed by a native OpenSSL context
pub struct OpenSslTlsContext {
    role: TlsRole,
    cert_required: bool,
    material: Material,
    ctx: SslContext,
}

const RSA_FIRST_SIGALGS: &str = "rsa_pss_rsae_sha256:rsa_pss_rsae_sha384:rsa_pss_rsae_sha512:\
rsa_pkcs1_sha256:rsa_pkcs1_sha384:rsa_pkcs1_sha512:\
ecdsa_secp256r1_sha256:ecdsa_secp384r1_sha384:ecdsa_secp521r1_sha512:ed25519";

const ECDSA_FIRST_SIGALGS: &str = "ecdsa_secp256r1_sha256:ecdsa_secp384r1_sha384:ecdsa_secp521r1_sha512:\
rsa_pss_rsae_sha256:rsa_pss_rsae_sha384:rsa_pss_rsae_sha512:\
rsa_pkcs1_sha256:rsa_pkcs1_sha384:rsa_pkcs1_sha512:ed25519";

fn key_family(key: &PKey<Private>) -> Option<KeyFamily> {
    let id = key.id();
    if id == Id::RSA {
        Some(KeyFamily::Rsa)
    } else if id == Id::EC {
        Some(KeyFamily::Ecdsa)
    } else {
        None
    }
}

/// Signature algorithms with the key's family first
fn sigalgs(family: KeyFamily) -> &'static str {
    match family {
        KeyFamily::Rsa => RSA_FIRST_SIGALGS,
        KeyFamily::Ecdsa => ECDSA_FIRST_SIGALGS,
    }
}

/// Peer verification flags for a role
fn verify_mode(role: TlsRole, cert_required: bool) -> SslVerifyMode {
    match (role, cert_required) {
        (TlsRole::Server, true) => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        (TlsRole::Server, false) => SslVerifyMode::NONE,
        (TlsRole::Client, _) => SslVerifyMode::PEER,
    }
}

fn build(role: TlsRole, cert_required: bool, material: &Material) -> Result<SslContext> {
    let method = match role {
        TlsRole::Client => SslMethod::tls_client(),
        TlsRole::Server => SslMethod::tls_server(),
    };

    let mut builder = SslContextBuilder::new(method)?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_verify(verify_mode(role, cert_required));

    for ca in &material.ca_certs {
        builder.cert_store_mut().add_cert(ca.clone())?;
    }

    if let Some(dir) = &material.ca_path {
        let dir = dir.to_str().ok_or_else(|| {
            TlsError::InvalidContent(format!("CA path '{}' is not valid UTF-8", dir.display()))
        })?;
        builder
            .cert_store_mut()
            .add_lookup(X509Lookup::hash_dir())?
            .add_dir(dir, SslFiletype::PEM)?;
    }

    if let Some((leaf, rest)) = material.chain.split_first() {
        builder.set_certificate(leaf)?;
        for cert in rest {
            builder.add_extra_chain_cert(cert.clone())?;
        }
    }

    if let Some(key) = &material.key {
        builder.set_private_key(key)?;
        if let Some(family) = key_family(key) {
            builder.set_sigalgs_list(sigalgs(family))?;
        }
    }

    Ok(builder.build())
}

/// Parse every certificate of a PEM file
fn load_certs(path: &Path) -> Result<Vec<X509>> {
    let pem = read_file(path)?;
    let certs = X509::stack_from_pem(&pem).map_err(|e| {
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

impl OpenSslTlsContext {
    /// Family of the loaded private key, which the signature algorithms prefer
    pub fn key_family(&self) -> Option<KeyFamily> {
        self.material.key.as_ref().and_then(key_family)
    }

    /// Apply `change` to a copy of the material and rebuild the native context.
    ///
    /// Nothing is committed unless the rebuild succeeds.
    fn update<F>(&mut self, cert_required: bool, change: F) -> Result<()>
    where
        F: FnOnce(&mut Material),
    {
        let mut material = self.material.clone();
        change(&mut material);
        self.ctx = build(self.role, cert_required, &material)?;
        self.material = material;
        self.cert_required = cert_required;
        Ok(())
    }
}

impl TlsContext for OpenSslTlsContext {
    type Native = SslContext;

    fn new(role: TlsRole) -> Result<Self> {
        let material = Material::default();
        let ctx = build(role, true, &material)?;
        Ok(OpenSslTlsContext {
            role,
            cert_required: true,
            material,
            ctx,
        })
    }

    fn role(&self) -> TlsRole {
        self.role
    }

    fn set_cert_required(&mut self, required: bool) -> Result<()> {
        reject_client_without_verification(self.role, required)?;
        if required == self.cert_required {
            return Ok(());
        }
        self.update(required, |_| {})
    }

    fn cert_required(&self) -> bool {
        self.cert_required
    }

    fn load_ca_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let certs = load_certs(path)?;
        let count = certs.len();
        self.update(self.cert_required, |m| m.ca_certs = certs)?;
        debug!(role = %self.role, path = %path.display(), count, "loaded CA file");
        Ok(())
    }

    fn load_ca_path<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let meta = std::fs::metadata(dir).map_err(|e| TlsError::io(dir, e))?;
        if !meta.is_dir() {
            return Err(TlsError::InvalidContent(format!(
                "'{}' is not a directory",
                dir.display()
            )));
        }
        self.update(self.cert_required, |m| m.ca_path = Some(dir.to_path_buf()))?;
        debug!(role = %self.role, path = %dir.display(), "loaded CA path");
        Ok(())
    }

    fn load_cert_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let chain = load_certs(path)?;
        let count = chain.len();
        self.update(self.cert_required, |m| m.chain = chain)?;
        debug!(role = %self.role, path = %path.display(), chain = count, "loaded certificate");
        Ok(())
    }

    fn load_key_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let pem = read_file(path)?;
        let key = PKey::private_key_from_pem(&pem).map_err(|e| {
            TlsError::InvalidContent(format!(
                "no private key found in '{}': {}",
                path.display(),
                e
            ))
        })?;
        let family = key_family(&key);
        self.update(self.cert_required, |m| m.key = Some(key))?;
        debug!(role = %self.role, path = %path.display(), ?family, "loaded private key");
        Ok(())
    }

    fn context(&self) -> Result<SslContext> {
        Ok(self.ctx.clone())
    }
}
