//! TLS client configuration for mid-stream transport upgrades.
//!
//! Probed services often present self-signed certificates (RDP always does),
//! so three trust modes exist:
//! - **Native roots**: verify against the platform store
//! - **Pinned**: accept only a certificate whose SHA-256 matches
//! - **Insecure**: accept anything (diagnostics only)

use crate::config::TransportConfig;
use crate::error::{ProbeError, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an upgrade decides whether to trust the server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    NativeRoots,
    Pinned,
    Insecure,
}

/// Trust settings applied when a session upgrades its transport.
///
/// Built per upgrade from the probe's [`TransportConfig`]. A pin takes
/// precedence over insecure mode.
#[derive(Debug, Clone, Default)]
pub struct TlsUpgradeConfig {
    insecure: bool,
    /// Expected SHA-256 fingerprint of the end-entity certificate
    pinned_cert_hash: Option<Vec<u8>>,
}

impl TlsUpgradeConfig {
    /// Verify against native roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the transport section of a probe config
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let mut tls = Self::new();
        if config.tls_insecure {
            tls = tls.insecure();
        }
        if let Some(ref pin) = config.tls_pinned_sha256 {
            let hash = hex::decode(pin)
                .map_err(|e| ProbeError::ConfigError(format!("Invalid pinned hash: {e}")))?;
            tls = tls.with_pinned_cert_hash(hash);
        }
        Ok(tls)
    }

    /// Skip certificate verification entirely
    pub fn insecure(mut self) -> Self {
        warn!("INSECURE MODE ENABLED: TLS certificate verification is disabled for upgrades");
        self.insecure = true;
        self
    }

    /// Pin a certificate by its SHA-256 fingerprint
    pub fn with_pinned_cert_hash(mut self, hash: Vec<u8>) -> Self {
        if hash.len() != 32 {
            warn!(
                "Certificate hash has unexpected length: {} (expected 32 bytes for SHA-256)",
                hash.len()
            );
        }
        self.pinned_cert_hash = Some(hash);
        self
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn trust_mode(&self) -> TrustMode {
        match (&self.pinned_cert_hash, self.insecure) {
            (Some(_), _) => TrustMode::Pinned,
            (None, true) => TrustMode::Insecure,
            (None, false) => TrustMode::NativeRoots,
        }
    }

    /// SHA-256 fingerprint of a DER certificate, the form pins are written in
    pub fn calculate_cert_hash(cert: &Certificate) -> Vec<u8> {
        Sha256::digest(&cert.0).to_vec()
    }

    /// Parse a server name for SNI and certificate matching
    pub fn server_name(name: &str) -> Result<ServerName> {
        ServerName::try_from(name)
            .map_err(|_| ProbeError::TlsError(format!("Invalid TLS server name: {name}")))
    }

    /// Verifier replacing webpki chain validation, if the trust mode needs one
    fn custom_verifier(&self) -> Option<Arc<dyn ServerCertVerifier>> {
        match self.trust_mode() {
            TrustMode::Pinned => Some(Arc::new(PinnedCertVerifier {
                fingerprint: self.pinned_cert_hash.clone().unwrap_or_default(),
            })),
            TrustMode::Insecure => Some(Arc::new(AcceptAnyServerCert)),
            TrustMode::NativeRoots => None,
        }
    }

    /// Build the rustls client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();

        if let Some(verifier) = self.custom_verifier() {
            debug!(mode = ?self.trust_mode(), "TLS upgrade using custom verifier");
            return Ok(builder
                .with_custom_certificate_verifier(verifier)
                .with_no_client_auth());
        }

        let mut root_store = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs()
            .map_err(|e| ProbeError::TlsError(format!("Failed to load native certs: {e}")))?;

        for cert in native_certs {
            root_store.add(&Certificate(cert.0)).map_err(|e| {
                ProbeError::TlsError(format!("Failed to add cert to root store: {e}"))
            })?;
        }

        Ok(builder
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }
}

struct PinnedCertVerifier {
    fingerprint: Vec<u8>,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if Sha256::digest(&end_entity.0).as_slice() == self.fingerprint.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "Pinned certificate hash mismatch".into(),
            ))
        }
    }
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
