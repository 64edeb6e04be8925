//! Signature and revocation policy

use rustls::SignatureScheme;

pub use crate::tls::KeyFamily;

const RSA_SCHEMES: [SignatureScheme; 6] = [
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA512,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
];

const ECDSA_SCHEMES: [SignatureScheme; 3] = [
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ECDSA_NISTP521_SHA512,
];

/// Handshake policy of the rustls backend
///
/// Signature schemes are advertised with the family of the loaded key first.
/// Revocation status is never checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    preferred: KeyFamily,
}

impl Policy {
    pub fn new() -> Self {
        Policy {
            preferred: KeyFamily::Rsa,
        }
    }

    pub fn preferred(&self) -> KeyFamily {
        self.preferred
    }

    pub fn prefer(&mut self, family: KeyFamily) {
        self.preferred = family;
    }

    /// Allowed signature schemes, most preferred first
    pub fn allowed_signature_schemes(&self) -> Vec<SignatureScheme> {
        let (first, second): (&[SignatureScheme], &[SignatureScheme]) = match self.preferred {
            KeyFamily::Rsa => (&RSA_SCHEMES, &ECDSA_SCHEMES),
            KeyFamily::Ecdsa => (&ECDSA_SCHEMES, &RSA_SCHEMES),
        };
        first
            .iter()
            .chain(second)
            .copied()
            .chain(std::iter::once(SignatureScheme::ED25519))
            .collect()
    }

    /// Restrict `supported` to the allowed schemes, in policy order
    pub fn order(&self, supported: &[SignatureScheme]) -> Vec<SignatureScheme> {
        self.allowed_signature_schemes()
            .into_iter()
            .filter(|scheme| supported.contains(scheme))
            .collect()
    }

    pub fn require_revocation_check(&self) -> bool {
        false
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa_preferred_by_default() {
        let policy = Policy::default();
        let schemes = policy.allowed_signature_schemes();
        assert_eq!(schemes[0], SignatureScheme::RSA_PSS_SHA256);
        assert_eq!(schemes.last(), Some(&SignatureScheme::ED25519));
        assert_eq!(schemes.len(), 10);
    }

    #[test]
    fn test_ecdsa_preference() {
        let mut policy = Policy::new();
        policy.prefer(KeyFamily::Ecdsa);
        let schemes = policy.allowed_signature_schemes();
        assert_eq!(schemes[0], SignatureScheme::ECDSA_NISTP256_SHA256);
        assert_eq!(schemes[3], SignatureScheme::RSA_PSS_SHA256);
    }

    #[test]
    fn test_order_filters_unsupported() {
        let mut policy = Policy::new();
        policy.prefer(KeyFamily::Ecdsa);
        let supported = [
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED448,
        ];
        assert_eq!(
            policy.order(&supported),
            vec![
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PKCS1_SHA256
            ]
        );
    }

    #[test]
    fn test_no_revocation_check() {
        assert!(!Policy::new().require_revocation_check());
    }
}
