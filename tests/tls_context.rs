//! TLS context integration tests
//!
//! Every behaviour shared by the two backends is checked against both:
//! - loading the kea test material
//! - error classification of bad files
//! - cert-required handling per role
//! - one-call configuration from arguments and from settings

use ctlchan::tls::{
    configure, configure_from, OpenSslTlsContext, RustlsTlsContext, TlsContext, TlsError,
    TlsErrorKind, TlsRole, TlsSettings,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn load_server_material<C: TlsContext>() {
    let mut ctx = C::new(TlsRole::Server).unwrap();
    ctx.load_ca_file(data("kea-ca.crt")).unwrap();
    ctx.load_cert_file(data("kea-server.crt")).unwrap();
    ctx.load_key_file(data("kea-server.key")).unwrap();
    assert!(ctx.context().is_ok());
    assert!(ctx.cert_required());
}

fn missing_ca_file<C: TlsContext>() {
    let mut ctx = C::new(TlsRole::Client).unwrap();
    let err = ctx.load_ca_file("/no-such-file").unwrap_err();
    assert_eq!(err.kind(), TlsErrorKind::Config);
    assert!(matches!(err, TlsError::Io { .. }));
    let message = err.to_string();
    assert!(message.contains("/no-such-file"), "{}", message);
    assert!(message.contains("No such file"), "{}", message);

    // The context is still usable
    ctx.load_ca_file(data("kea-ca.crt")).unwrap();
    assert!(ctx.context().is_ok());
}

fn cert_required_round_trip<C: TlsContext>() {
    let mut ctx = C::new(TlsRole::Server).unwrap();
    ctx.load_ca_file(data("kea-ca.crt")).unwrap();
    ctx.load_cert_file(data("kea-server.crt")).unwrap();
    ctx.load_key_file(data("kea-server.key")).unwrap();

    for required in [false, true, false] {
        ctx.set_cert_required(required).unwrap();
        assert!(ctx.context().is_ok());
        assert_eq!(ctx.cert_required(), required);
    }
}

fn client_requires_verification<C: TlsContext>() {
    let mut ctx = C::new(TlsRole::Client).unwrap();
    assert_eq!(ctx.role(), TlsRole::Client);
    let err = ctx.set_cert_required(false).unwrap_err();
    assert_eq!(err.kind(), TlsErrorKind::BadValue);
    assert!(ctx.cert_required());
    ctx.set_cert_required(true).unwrap();
}

fn rejects_bad_material<C: TlsContext>() {
    let mut ctx = C::new(TlsRole::Server).unwrap();

    let err = ctx.load_cert_file(data("kea-server.csr")).unwrap_err();
    assert_eq!(err.kind(), TlsErrorKind::Config);

    let err = ctx.load_key_file(data("kea-ca.crt")).unwrap_err();
    assert_eq!(err.kind(), TlsErrorKind::Config);

    let mut garbage = NamedTempFile::new().unwrap();
    garbage.write_all(b"-----BEGIN CERTIFICATE-----\nnot base64\n").unwrap();
    garbage.flush().unwrap();
    let err = ctx.load_ca_file(garbage.path()).unwrap_err();
    assert_eq!(err.kind(), TlsErrorKind::Config);
}

fn configure_both_roles<C: TlsContext>() {
    let server: C = configure(
        TlsRole::Server,
        data("kea-ca.crt"),
        data("kea-server.crt"),
        data("kea-server.key"),
        false,
    )
    .unwrap();
    assert_eq!(server.role(), TlsRole::Server);
    assert!(!server.cert_required());

    let client: C = configure(
        TlsRole::Client,
        data("kea-ca.crt"),
        data("kea-client.crt"),
        data("kea-client.key"),
        true,
    )
    .unwrap();
    assert_eq!(client.role(), TlsRole::Client);
    assert!(client.cert_required());
}

fn configure_failures<C: TlsContext>() {
    let result: Result<C, _> = configure(
        TlsRole::Server,
        data("kea-ca.crt"),
        data("no-such.crt"),
        data("kea-server.key"),
        true,
    );
    assert_eq!(result.err().unwrap().kind(), TlsErrorKind::Config);

    let result: Result<C, _> = configure(
        TlsRole::Client,
        data("kea-ca.crt"),
        data("kea-client.crt"),
        data("kea-client.key"),
        false,
    );
    assert_eq!(result.err().unwrap().kind(), TlsErrorKind::BadValue);
}

fn configure_from_settings<C: TlsContext>() {
    let json = format!(
        r#"{{
            "trust-anchor": "{}",
            "cert-file": "{}",
            "key-file": "{}"
        }}"#,
        data("kea-ca.crt").display(),
        data("kea-server.crt").display(),
        data("kea-server.key").display()
    );
    let settings = TlsSettings::from_json(&json).unwrap();
    let ctx: C = configure_from(TlsRole::Server, &settings).unwrap();
    assert!(ctx.cert_required());

    let partial = TlsSettings::from_json(r#"{ "cert-file": "/etc/kea/server.crt" }"#).unwrap();
    let result: Result<C, _> = configure_from(TlsRole::Server, &partial);
    assert_eq!(result.err().unwrap().kind(), TlsErrorKind::BadValue);
}

macro_rules! backend_tests {
    ($module:ident, $ctx:ty) => {
        mod $module {
            use super::*;

            #[test]
            fn test_load_server_material() {
                load_server_material::<$ctx>();
            }

            #[test]
            fn test_missing_ca_file() {
                missing_ca_file::<$ctx>();
            }

            #[test]
            fn test_cert_required_round_trip() {
                cert_required_round_trip::<$ctx>();
            }

            #[test]
            fn test_client_requires_verification() {
                client_requires_verification::<$ctx>();
            }

            #[test]
            fn test_rejects_bad_material() {
                rejects_bad_material::<$ctx>();
            }

            #[test]
            fn test_configure_both_roles() {
                configure_both_roles::<$ctx>();
            }

            #[test]
            fn test_configure_failures() {
                configure_failures::<$ctx>();
            }

            #[test]
            fn test_configure_from_settings() {
                configure_from_settings::<$ctx>();
            }
        }
    };
}

backend_tests!(openssl, OpenSslTlsContext);
backend_tests!(rustls, RustlsTlsContext);

#[test]
fn test_openssl_ca_directory() {
    let ctx: OpenSslTlsContext = configure(
        TlsRole::Client,
        data("ca-dir"),
        data("kea-client.crt"),
        data("kea-client.key"),
        true,
    )
    .unwrap();
    assert!(ctx.context().is_ok());
}

#[test]
fn test_rustls_ca_directory_not_implemented() {
    let mut ctx = RustlsTlsContext::new(TlsRole::Client).unwrap();
    for _ in 0..2 {
        let err = ctx.load_ca_path(data("ca-dir")).unwrap_err();
        assert_eq!(err.kind(), TlsErrorKind::NotImplemented);
    }
    assert!(ctx.cert_required());
    assert!(ctx.credentials().cert_chain().is_empty());

    let result: Result<RustlsTlsContext, _> = configure(
        TlsRole::Client,
        data("ca-dir"),
        data("kea-client.crt"),
        data("kea-client.key"),
        true,
    );
    assert_eq!(result.err().unwrap().kind(), TlsErrorKind::NotImplemented);
}
