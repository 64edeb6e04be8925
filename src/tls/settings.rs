//! TLS settings as they appear in a control-socket configuration

use super::{Result, TlsError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// TLS parameters of a control socket or a peer
///
/// The three paths are given together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsSettings {
    /// CA file or directory
    #[serde(default)]
    pub trust_anchor: Option<PathBuf>,

    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,

    #[serde(default = "default_cert_required")]
    pub cert_required: bool,
}

fn default_cert_required() -> bool {
    true
}

impl Default for TlsSettings {
    fn default() -> Self {
        TlsSettings {
            trust_anchor: None,
            cert_file: None,
            key_file: None,
            cert_required: true,
        }
    }
}

impl TlsSettings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TlsError::BadValue(format!("bad TLS settings: {}", e)))
    }

    /// Whether any TLS parameter was given
    pub fn is_enabled(&self) -> bool {
        self.trust_anchor.is_some() || self.cert_file.is_some() || self.key_file.is_some()
    }

    /// The trust anchor, certificate and key paths, all of which must be set
    pub fn paths(&self) -> Result<(&Path, &Path, &Path)> {
        match (&self.trust_anchor, &self.cert_file, &self.key_file) {
            (Some(ca), Some(cert), Some(key)) => Ok((ca, cert, key)),
            _ => {
                let missing: Vec<&str> = [
                    ("trust-anchor", self.trust_anchor.is_none()),
                    ("cert-file", self.cert_file.is_none()),
                    ("key-file", self.key_file.is_none()),
                ]
                .iter()
                .filter(|(_, missing)| *missing)
                .map(|(name, _)| *name)
                .collect();
                Err(TlsError::BadValue(format!(
                    "missing TLS parameters: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}
