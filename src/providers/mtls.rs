// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! mTLS HTTP client for the AIS provider.
//!
//! The client presents the QWAC certificate on every handshake, trusts the
//! platform's native root store and refuses anything below TLS 1.2.

use std::{fs, path::Path, sync::Arc, time::Duration};

use reqwest::Client;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};

/// Overall request timeout, independent of per-call deadlines.
pub const MTLS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum MtlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {path}: {reason}")]
    Pem { path: String, reason: String },

    #[error("no CERTIFICATE block found in {0}")]
    NoCertificate(String),

    #[error("no supported private key block found in {0}")]
    NoPrivateKey(String),

    #[error("certificate/key pair rejected: {0}")]
    KeyPair(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Build an HTTP client that authenticates with the given client
/// certificate/key pair.
pub fn build_mtls_client(cert_path: &Path, key_path: &Path) -> Result<Client, MtlsError> {
    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;

    let roots = native_root_store();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| MtlsError::Client(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| MtlsError::KeyPair(e.to_string()))?;

    let client = Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(MTLS_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MtlsError::Client(e.to_string()))?;

    info!(
        cert_path = %cert_path.display(),
        "mTLS client ready"
    );
    Ok(client)
}

fn read_pem_blocks(path: &Path) -> Result<Vec<pem::Pem>, MtlsError> {
    let display = path.display().to_string();
    let bytes = fs::read(path).map_err(|source| MtlsError::Read {
        path: display.clone(),
        source,
    })?;
    pem::parse_many(&bytes).map_err(|e| MtlsError::Pem {
        path: display,
        reason: e.to_string(),
    })
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, MtlsError> {
    let certs: Vec<CertificateDer<'static>> = read_pem_blocks(path)?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(MtlsError::NoCertificate(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, MtlsError> {
    read_pem_blocks(path)?
        .into_iter()
        .find_map(private_key_from_block)
        .ok_or_else(|| MtlsError::NoPrivateKey(path.display().to_string()))
}

fn private_key_from_block(block: pem::Pem) -> Option<PrivateKeyDer<'static>> {
    match block.tag() {
        "RSA PRIVATE KEY" => Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
            block.into_contents(),
        ))),
        "PRIVATE KEY" => Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            block.into_contents(),
        ))),
        "EC PRIVATE KEY" => Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
            block.into_contents(),
        ))),
        _ => None,
    }
}

/// Platform trust store. Individual load failures are skipped; an empty
/// store is tolerated so sandbox setups without a CA bundle still start.
fn native_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        debug!("skipped native cert (load error): {error}");
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "native root certificates loaded");
    if roots.is_empty() {
        warn!("no native root certificates available; server verification will fail");
    }
    roots
}
