//! Long-lived device credentials: the private signing key and the
//! device certificate chain.
//!
//! Keys are PEM encoded. RSA keys (PKCS#1 or PKCS#8) sign with RS256;
//! P-256 EC keys (PKCS#8) sign with ES256.

use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, CredentialResult};

/// JWT claims presented to the broker as the connection password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Audience: the cloud project id.
    pub aud: String,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Private signing key plus optional certificate chain for one device.
#[derive(Clone)]
pub struct Credentials {
    key: EncodingKey,
    algorithm: Algorithm,
    certificates: Vec<Vec<u8>>,
}

impl Credentials {
    /// Build credentials from a PEM private key, without a certificate.
    pub fn from_key_pem(key_pem: &[u8]) -> CredentialResult<Self> {
        let (key, algorithm) = parse_private_key(key_pem)?;
        Ok(Self {
            key,
            algorithm,
            certificates: Vec::new(),
        })
    }

    /// Build credentials from a PEM certificate chain and a PEM private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> CredentialResult<Self> {
        let certificates = parse_certificates(cert_pem)?;
        let mut credentials = Self::from_key_pem(key_pem)?;
        credentials.certificates = certificates;
        Ok(credentials)
    }

    /// Signing algorithm selected from the key type.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// DER-encoded certificates, leaf first. Empty when loaded without one.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// Sign `claims` into a compact JWT.
    pub fn sign(&self, claims: &Claims) -> CredentialResult<String> {
        sign_with(&self.key, self.algorithm, claims)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("algorithm", &self.algorithm)
            .field("certificates", &self.certificates.len())
            .finish_non_exhaustive()
    }
}

/// Load device credentials from a certificate file and a private key file.
///
/// Both files must be readable PEM. The key is test-signed before returning
/// so a malformed key fails here rather than on the first connect.
pub fn load_credentials(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> CredentialResult<Credentials> {
    let cert_pem = read_file(cert_path.as_ref())?;
    let key_pem = read_file(key_path.as_ref())?;
    let credentials = Credentials::from_pem(&cert_pem, &key_pem)?;

    tracing::debug!(
        algorithm = ?credentials.algorithm(),
        certificates = credentials.certificates().len(),
        "device credentials loaded"
    );
    Ok(credentials)
}

fn read_file(path: &Path) -> CredentialResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CredentialError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn parse_certificates(pem: &[u8]) -> CredentialResult<Vec<Vec<u8>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .map_err(|e| CredentialError::InvalidCertificate(e.to_string()))?;
    if certs.is_empty() {
        return Err(CredentialError::InvalidCertificate(
            "no PEM certificate found".into(),
        ));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> CredentialResult<(EncodingKey, Algorithm)> {
    let mut failures = Vec::new();

    for algorithm in [Algorithm::RS256, Algorithm::ES256] {
        let parsed = match algorithm {
            Algorithm::RS256 => EncodingKey::from_rsa_pem(pem),
            _ => EncodingKey::from_ec_pem(pem),
        };
        let checked = parsed
            .map_err(|e| e.to_string())
            .and_then(|key| match probe(&key, algorithm) {
                Ok(()) => Ok(key),
                Err(e) => Err(e.to_string()),
            });
        match checked {
            Ok(key) => return Ok((key, algorithm)),
            Err(e) => failures.push(format!("{algorithm:?}: {e}")),
        }
    }

    Err(CredentialError::InvalidKey(failures.join("; ")))
}

fn probe(key: &EncodingKey, algorithm: Algorithm) -> CredentialResult<()> {
    let claims = Claims {
        aud: "probe".into(),
        iat: 0,
        exp: 0,
    };
    sign_with(key, algorithm, &claims).map(|_| ())
}

fn sign_with(key: &EncodingKey, algorithm: Algorithm, claims: &Claims) -> CredentialResult<String> {
    jsonwebtoken::encode(&Header::new(algorithm), claims, key)
        .map_err(|e| CredentialError::Signing(e.to_string()))
}
