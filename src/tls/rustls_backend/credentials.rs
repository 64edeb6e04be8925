//! Credentials manager
//!
//! Holds the trust store, certificate chain and private key of a rustls
//! context. rustls consults it during every handshake, so material installed
//! after the configuration was built is still picked up.

use rustls::pki_types::CertificateDer;
use rustls::server::ClientHello;
use rustls::sign::{CertifiedKey, SigningKey};
use rustls::{RootCertStore, SignatureScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// What a trust store is consulted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Verifying the certificate of a server we dialled
    ServerAuth,
    /// Verifying the certificate of a client that connected to us
    ClientAuth,
}

#[derive(Debug)]
pub struct CredentialsManager {
    trust_store: RwLock<Option<Arc<RootCertStore>>>,
    chain: RwLock<Vec<CertificateDer<'static>>>,
    key: RwLock<Option<Arc<dyn SigningKey>>>,
    certified: RwLock<Option<Arc<CertifiedKey>>>,
    cert_required: AtomicBool,
}

impl CredentialsManager {
    pub fn new() -> Self {
        CredentialsManager {
            trust_store: RwLock::new(None),
            chain: RwLock::new(Vec::new()),
            key: RwLock::new(None),
            certified: RwLock::new(None),
            cert_required: AtomicBool::new(true),
        }
    }

    /// Trust store to verify a peer with, or `None` when verification is disabled
    pub fn trusted_certificate_authorities(&self, purpose: Purpose) -> Option<Arc<RootCertStore>> {
        if purpose == Purpose::ClientAuth && !self.cert_required() {
            return None;
        }
        self.trust_store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cert_chain(&self) -> Vec<CertificateDer<'static>> {
        self.chain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn private_key_for(&self) -> Option<Arc<dyn SigningKey>> {
        self.key.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cert_required(&self) -> bool {
        self.cert_required.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cert_required(&self, required: bool) {
        self.cert_required.store(required, Ordering::SeqCst);
    }

    pub(crate) fn set_trust_store(&self, store: RootCertStore) {
        *self.trust_store.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(store));
    }

    pub(crate) fn set_chain(&self, chain: Vec<CertificateDer<'static>>) {
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = chain;
        self.refresh_certified();
    }

    pub(crate) fn set_key(&self, key: Arc<dyn SigningKey>) {
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
        self.refresh_certified();
    }

    /// Pair the chain with the key once both are present
    fn refresh_certified(&self) {
        let chain = self.cert_chain();
        let certified = match self.private_key_for() {
            Some(key) if !chain.is_empty() => Some(Arc::new(CertifiedKey::new(chain, key))),
            _ => None,
        };
        *self.certified.write().unwrap_or_else(PoisonError::into_inner) = certified;
    }

    fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        self.certified
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for CredentialsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl rustls::server::ResolvesServerCert for CredentialsManager {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }
}

impl rustls::client::ResolvesClientCert for CredentialsManager {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }

    fn has_certs(&self) -> bool {
        self.certified_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_manager() {
        let creds = CredentialsManager::new();
        assert!(creds.cert_required());
        assert!(creds.trusted_certificate_authorities(Purpose::ServerAuth).is_none());
        assert!(creds.cert_chain().is_empty());
        assert!(creds.private_key_for().is_none());
        assert!(creds.certified_key().is_none());
    }

    #[test]
    fn test_trust_store_hidden_when_verification_disabled() {
        let creds = CredentialsManager::new();
        creds.set_trust_store(RootCertStore::empty());
        assert!(creds.trusted_certificate_authorities(Purpose::ClientAuth).is_some());

        creds.set_cert_required(false);
        assert!(creds.trusted_certificate_authorities(Purpose::ClientAuth).is_none());
        assert!(creds.trusted_certificate_authorities(Purpose::ServerAuth).is_some());
    }

    #[test]
    fn test_chain_without_key_is_not_certified() {
        let creds = CredentialsManager::new();
        creds.set_chain(vec![CertificateDer::from(vec![0x30, 0x00])]);
        assert_eq!(creds.cert_chain().len(), 1);
        assert!(creds.certified_key().is_none());
    }
}
