//! Server identity and client trust anchor.
//!
//! Loaded once at startup and shared read-only by every connection. The
//! trust policy (chain to a configured authority, validity window covers
//! now, no revocation checks) lives in one verifier that serves both the
//! TLS handshake and the listener's explicit post-handshake check.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::ClientCertVerifier;
use rustls::sign::Signer;
use rustls::{RootCertStore, SignatureScheme};
use tracing::{debug, info};
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::constants::{ALPN, DEFAULT_SERVER_NAME};
use crate::error::{Error, Result};

/// Server identity plus the client-certificate trust anchor.
pub struct CredentialStore {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    verifier: Arc<dyn ClientCertVerifier>,
    provider: Arc<CryptoProvider>,
    anchor_count: usize,
}

impl CredentialStore {
    /// Load credentials from PEM files.
    ///
    /// Without `cert_path` a self-signed certificate is generated for the
    /// identity key.
    pub fn load(key_path: &Path, cert_path: Option<&Path>, trust_anchor_path: &Path) -> Result<Self> {
        let key_pem = read_pem(key_path, "identity key")?;
        let cert_pem = cert_path
            .map(|path| read_pem(path, "identity certificate"))
            .transpose()?;
        let ca_pem = read_pem(trust_anchor_path, "trust anchor")?;

        let store = Self::from_pem(&key_pem, cert_pem.as_deref(), &ca_pem)?;
        info!(
            key = %key_path.display(),
            cert = ?cert_path.map(|p| p.display().to_string()),
            trust_anchor = %trust_anchor_path.display(),
            anchors = store.anchor_count,
            "Credentials loaded"
        );
        Ok(store)
    }

    /// Build credentials from in-memory PEM data.
    pub fn from_pem(key_pem: &[u8], cert_pem: Option<&[u8]>, ca_pem: &[u8]) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let key = parse_private_key(key_pem)?;
        let cert_chain = match cert_pem {
            Some(pem) => parse_certs(pem, "identity certificate")?,
            None => vec![self_signed_identity(&key, &provider)?],
        };

        let anchors: Vec<_> = parse_certs(ca_pem, "trust anchor")?
            .into_iter()
            .filter(|cert| {
                let authority = is_authority(cert);
                if !authority {
                    debug!(fingerprint = %cert_fingerprint(cert), "Skipping trust anchor entry without CA basic constraints");
                }
                authority
            })
            .collect();
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(anchors);
        if added == 0 {
            return Err(Error::config(
                "trust anchor contains no valid certificate-authority entries",
            ));
        }
        if ignored > 0 {
            debug!(ignored, "Skipped unusable trust anchor entries");
        }

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            // The listener rejects certificate-less peers itself
            .allow_unauthenticated()
            .build()
            .map_err(|e| Error::config(format!("failed to build client verifier: {}", e)))?;

        Ok(Self {
            cert_chain,
            key,
            verifier,
            provider,
            anchor_count: added,
        })
    }

    /// Server certificate chain and private key for the handshake layer.
    pub fn identity(&self) -> (&[CertificateDer<'static>], &PrivateKeyDer<'static>) {
        (&self.cert_chain, &self.key)
    }

    /// Number of usable trust anchor entries.
    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    /// Check a presented chain (end-entity first) against the trust anchor.
    pub fn verify(&self, chain: &[CertificateDer<'_>]) -> Result<()> {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return Err(Error::AuthRejected {
                reason: "no client certificate presented".to_string(),
            });
        };

        self.verifier
            .verify_client_cert(end_entity, intermediates, UnixTime::now())
            .map(|_| ())
            .map_err(|e| Error::AuthRejected {
                reason: e.to_string(),
            })
    }

    /// True if the chain is issued by a configured authority and valid now.
    pub fn is_trusted(&self, chain: &[CertificateDer<'_>]) -> bool {
        self.verify(chain).is_ok()
    }

    /// The trust policy as a rustls client verifier.
    pub fn client_verifier(&self) -> Arc<dyn ClientCertVerifier> {
        Arc::clone(&self.verifier)
    }

    /// TLS 1.3 server configuration with client authentication attached.
    pub fn server_crypto_config(&self) -> Result<rustls::ServerConfig> {
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| Error::config(format!("unsupported TLS configuration: {}", e)))?
            .with_client_cert_verifier(self.client_verifier())
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(|e| Error::config(format!("invalid server identity: {}", e)))?;

        config.alpn_protocols = vec![ALPN.to_vec()];
        Ok(config)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cert_chain_len", &self.cert_chain.len())
            .field("anchor_count", &self.anchor_count)
            .finish_non_exhaustive()
    }
}

/// Hex SHA-256 fingerprint of a DER certificate.
pub fn cert_fingerprint(cert_der: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    Sha256::digest(cert_der)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::config(format!("failed to read {} {}: {}", what, path.display(), e)))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::config(format!("malformed identity key: {}", e)))?
        .ok_or_else(|| Error::config("no private key found in identity key file"))
}

fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("malformed {}: {}", what, e)))?;

    if certs.is_empty() {
        return Err(Error::config(format!("no certificates found in {}", what)));
    }
    Ok(certs)
}

/// True if the certificate carries `basicConstraints` with `cA` set.
fn is_authority(cert: &CertificateDer<'_>) -> bool {
    let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert) else {
        return false;
    };
    matches!(parsed.basic_constraints(), Ok(Some(ext)) if ext.value.ca)
}

fn self_signed_identity(key: &PrivateKeyDer<'_>, provider: &CryptoProvider) -> Result<CertificateDer<'static>> {
    let key_pair = match key {
        PrivateKeyDer::Pkcs8(pkcs8) => rcgen::KeyPair::try_from(pkcs8),
        other => rcgen::KeyPair::from_remote(Box::new(IdentitySigner::load(other, provider)?)),
    }
    .map_err(|e| Error::config(format!("cannot self-sign with identity key: {}", e)))?;

    let cert = rcgen::CertificateParams::new(vec![DEFAULT_SERVER_NAME.to_string()])
        .and_then(|params| params.self_signed(&key_pair))
        .map_err(|e| Error::config(format!("failed to generate identity certificate: {}", e)))?;

    debug!("Generated self-signed identity certificate");
    Ok(cert.der().clone())
}

/// Certificate signing through the rustls key loader, which also accepts
/// SEC1 and PKCS#1 keys.
struct IdentitySigner {
    signer: Box<dyn Signer>,
    public_key: Vec<u8>,
    algorithm: &'static rcgen::SignatureAlgorithm,
}

impl IdentitySigner {
    fn load(key: &PrivateKeyDer<'_>, provider: &CryptoProvider) -> Result<Self> {
        let signing_key = provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| Error::config(format!("unsupported identity key: {}", e)))?;

        let spki = signing_key
            .public_key()
            .ok_or_else(|| Error::config("identity key does not expose its public key"))?;
        let (_, parsed) = SubjectPublicKeyInfo::from_der(spki.as_ref())
            .map_err(|e| Error::config(format!("malformed identity public key: {}", e)))?;
        let public_key = parsed.subject_public_key.data.to_vec();

        let schemes: [(SignatureScheme, &'static rcgen::SignatureAlgorithm); 3] = [
            (SignatureScheme::ECDSA_NISTP256_SHA256, &rcgen::PKCS_ECDSA_P256_SHA256),
            (SignatureScheme::ECDSA_NISTP384_SHA384, &rcgen::PKCS_ECDSA_P384_SHA384),
            (SignatureScheme::RSA_PKCS1_SHA256, &rcgen::PKCS_RSA_SHA256),
        ];
        let (signer, algorithm) = schemes
            .into_iter()
            .find_map(|(scheme, algorithm)| signing_key.choose_scheme(&[scheme]).map(|signer| (signer, algorithm)))
            .ok_or_else(|| Error::config("identity key type cannot sign certificates"))?;

        Ok(Self {
            signer,
            public_key,
            algorithm,
        })
    }
}

impl rcgen::RemoteKeyPair for IdentitySigner {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        self.signer.sign(msg).map_err(|_| rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.algorithm
    }
}
