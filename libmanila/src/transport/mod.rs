//! QUIC transport layer for CSI messages.
//!
//! This module provides [`client::CsiClient`] and [`server::CsiServer`] that
//! communicate [`CsiMessage`](crate::message::CsiMessage) values over QUIC
//! bi-directional streams using `quinn`.

pub mod client;
pub mod server;

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::CsiError;

/// Upper bound on a single serialized message (16 MiB).
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Build a server TLS config from a PEM certificate chain and private key.
///
/// The ring provider is selected explicitly so the config does not depend
/// on a process-wide default being installed.
pub fn server_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<rustls::ServerConfig, CsiError> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            CsiError::TransportError(format!("read certificates {}: {e}", cert_path.display()))
        })?;
    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
        CsiError::TransportError(format!("read private key {}: {e}", key_path.display()))
    })?;

    rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| CsiError::TransportError(format!("unsupported TLS versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CsiError::TransportError(format!("invalid certificate or key: {e}")))
}
