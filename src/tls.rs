//! Client certificate loading for mutual TLS.

use std::path::Path;

use anyhow::Context;
use reqwest::Identity;

/// Loads a client identity from PEM files.
///
/// The certificate file may already contain the private key (any block whose
/// type ends in `CERTIFICATE` provides the chain, any block ending in
/// `PRIVATE KEY` the key); a separate key file is concatenated when given.
pub fn load_client_identity(cert: &Path, key: Option<&Path>) -> anyhow::Result<Identity> {
    let mut pem = std::fs::read(cert)
        .with_context(|| format!("failed to read client certificate file {}", cert.display()))?;
    if let Some(key) = key {
        let key_pem = std::fs::read(key)
            .with_context(|| format!("failed to read client key file {}", key.display()))?;
        pem.extend_from_slice(&key_pem);
    }
    Identity::from_pem(&pem).context("unable to load client cert and key pair")
}
