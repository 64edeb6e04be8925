//! Peer certificate inspection
//!
//! Extracts the commonName of the subject and issuer, and the subject
//! alternative names, from certificates seen during a handshake. OpenSSL
//! certificates are read natively; DER certificates from the rustls backend
//! are parsed with `x509-parser`.

use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate, X509Name};

/// Placeholder for a missing name
pub const UNDEFINED: &str = "<undef>";

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Subject commonName
    pub subject: String,
    /// Issuer commonName
    pub issuer: String,
    /// Subject Alternative Names (`DNS:` and `IP:` entries)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an OpenSSL certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        let subject_alt_names = cert
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| {
                        if let Some(dns) = name.dnsname() {
                            Some(format!("DNS:{}", dns))
                        } else {
                            name.ipaddress().and_then(format_ip)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        CertInfo {
            subject: openssl_cn(cert.subject_name()),
            issuer: openssl_cn(cert.issuer_name()),
            subject_alt_names,
        }
    }

    /// Extract certificate information from a DER encoded certificate.
    ///
    /// Returns `None` when the bytes are not a certificate.
    pub fn from_der(der: &[u8]) -> Option<Self> {
        let (_, cert) = X509Certificate::from_der(der).ok()?;

        let mut subject_alt_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => subject_alt_names.push(format!("DNS:{}", dns)),
                    GeneralName::IPAddress(ip) => subject_alt_names.extend(format_ip(ip)),
                    _ => {}
                }
            }
        }

        Some(CertInfo {
            subject: der_cn(cert.subject()),
            issuer: der_cn(cert.issuer()),
            subject_alt_names,
        })
    }
}

fn openssl_cn(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| UNDEFINED.to_string())
}

fn der_cn(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| UNDEFINED.to_string())
}

fn format_ip(bytes: &[u8]) -> Option<String> {
    let ip = match bytes.len() {
        4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(bytes).ok()?)),
        16 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(bytes).ok()?)),
        _ => return None,
    };
    Some(format!("IP:{}", ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::x509::X509;

    const SERVER_CERT: &[u8] = include_bytes!("../../tests/data/kea-server.crt");
    const CLIENT_CERT: &[u8] = include_bytes!("../../tests/data/kea-client.crt");

    #[test]
    fn test_cert_info_from_x509() {
        let cert = X509::from_pem(SERVER_CERT).unwrap();
        let info = CertInfo::from_x509(&cert);

        assert_eq!(info.subject, "kea-server");
        assert_eq!(info.issuer, "kea-ca");
        assert!(info.subject_alt_names.contains(&"DNS:localhost".to_string()));
        assert!(info.subject_alt_names.contains(&"IP:127.0.0.1".to_string()));
    }

    #[test]
    fn test_cert_info_from_der_matches_openssl() {
        for pem in [SERVER_CERT, CLIENT_CERT] {
            let cert = X509::from_pem(pem).unwrap();
            let der = cert.to_der().unwrap();
            assert_eq!(CertInfo::from_der(&der), Some(CertInfo::from_x509(&cert)));
        }
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        assert_eq!(CertInfo::from_der(b"not a certificate"), None);
    }

    #[test]
    fn test_format_ip() {
        assert_eq!(format_ip(&[10, 0, 0, 1]), Some("IP:10.0.0.1".to_string()));
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(format_ip(&v6), Some("IP:::1".to_string()));
        assert_eq!(format_ip(&[1, 2, 3]), None);
    }
}
