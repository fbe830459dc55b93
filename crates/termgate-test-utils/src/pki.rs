//! Generated certificate material for tests.
//!
//! Every `TestPki` is a fresh authority, so tests never share trust.

use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use termgate_core::CredentialStore;

/// A client certificate chain and its private key.
#[derive(Debug)]
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

/// Paths of credential files written by `TestPki::write_files`.
#[derive(Debug, Clone)]
pub struct PemFiles {
    pub key: PathBuf,
    pub ca: PathBuf,
}

/// A test certificate authority with a server identity key.
pub struct TestPki {
    ca_cert: Certificate,
    ca_key: KeyPair,
    server_key: KeyPair,
}

impl TestPki {
    /// Generate a new authority and server key.
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("generate CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.distinguished_name.push(DnType::CommonName, "termgate test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let ca_cert = params.self_signed(&ca_key).expect("self-sign CA");

        Self {
            ca_cert,
            ca_key,
            server_key: KeyPair::generate().expect("generate server key"),
        }
    }

    /// The authority certificate, PEM encoded.
    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// The server identity key, PEM encoded.
    pub fn server_key_pem(&self) -> String {
        self.server_key.serialize_pem()
    }

    /// Credential store trusting this authority, with a self-signed server
    /// certificate.
    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::from_pem(self.server_key_pem().as_bytes(), None, self.ca_pem().as_bytes())
            .expect("build credential store")
    }

    /// A client certificate issued by this authority.
    pub fn trusted_client(&self, name: &str) -> ClientIdentity {
        let key = KeyPair::generate().expect("generate client key");
        let cert = client_params(name)
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .expect("sign client certificate");
        identity(cert, key)
    }

    /// A client certificate issued by this authority that has expired.
    pub fn expired_client(&self, name: &str) -> ClientIdentity {
        let key = KeyPair::generate().expect("generate client key");
        let mut params = client_params(name);
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        let cert = params
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .expect("sign client certificate");
        identity(cert, key)
    }

    /// A self-signed client certificate no authority vouches for.
    pub fn rogue_client(name: &str) -> ClientIdentity {
        let key = KeyPair::generate().expect("generate client key");
        let cert = client_params(name).self_signed(&key).expect("self-sign client certificate");
        identity(cert, key)
    }

    /// Write the server key and authority certificate into `dir`.
    pub fn write_files(&self, dir: &Path) -> PemFiles {
        let files = PemFiles {
            key: dir.join("ssh_host_key"),
            ca: dir.join("ssh_user_ca"),
        };
        std::fs::write(&files.key, self.server_key_pem()).expect("write server key");
        std::fs::write(&files.ca, self.ca_pem()).expect("write CA certificate");
        files
    }
}

fn client_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(vec![format!("{}.client.test", name)]).expect("client params");
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params
}

fn identity(cert: Certificate, key: KeyPair) -> ClientIdentity {
    ClientIdentity {
        chain: vec![cert.der().clone()],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
    }
}
