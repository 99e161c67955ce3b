//! SPKI fingerprints - the pinned credential type
//!
//! A pin is a SHA-256 digest of a certificate's SubjectPublicKeyInfo,
//! tagged with the digest algorithm. Pinning the public key rather than
//! the whole certificate keeps pins stable across certificate renewal
//! with an unchanged key; raw-certificate-byte matching is deliberately
//! not supported.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use x509_parser::prelude::{FromDer, X509Certificate};

/// SHA-256 digest length in bytes
pub const SHA256_DIGEST_LEN: usize = 32;

/// Fingerprint errors
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("pin is missing an algorithm tag (expected \"sha256:<base64>\"): {0}")]
    MissingAlgorithmTag(String),

    #[error("unsupported fingerprint algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("pin digest is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("pin digest must be {expected} bytes, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("failed to parse certificate: {0}")]
    CertParseFailed(String),
}

/// Digest algorithm used for a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintAlgorithm {
    /// SHA-256 over the DER-encoded SubjectPublicKeyInfo
    Sha256,
}

impl FingerprintAlgorithm {
    /// Tag used in pin literals and display output
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// An algorithm-tagged public-key fingerprint
///
/// Two fingerprints are equal iff the algorithm and the full digest bytes
/// match exactly. There is no prefix or partial comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: FingerprintAlgorithm,
    digest: [u8; SHA256_DIGEST_LEN],
}

impl Fingerprint {
    /// Create a fingerprint from a raw SHA-256 digest
    pub fn from_sha256(digest: [u8; SHA256_DIGEST_LEN]) -> Self {
        Self {
            algorithm: FingerprintAlgorithm::Sha256,
            digest,
        }
    }

    /// Parse a pin literal of the form `sha256:<base64 digest>`
    pub fn parse(pin: &str) -> Result<Self, FingerprintError> {
        let (tag, encoded) = pin
            .split_once(':')
            .ok_or_else(|| FingerprintError::MissingAlgorithmTag(pin.to_string()))?;

        if tag != FingerprintAlgorithm::Sha256.tag() {
            return Err(FingerprintError::UnsupportedAlgorithm(tag.to_string()));
        }

        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| FingerprintError::InvalidBase64(e.to_string()))?;

        let digest: [u8; SHA256_DIGEST_LEN] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| FingerprintError::InvalidDigestLength {
                    expected: SHA256_DIGEST_LEN,
                    actual: v.len(),
                })?;

        Ok(Self::from_sha256(digest))
    }

    /// Compute the SPKI fingerprint of a DER-encoded certificate
    ///
    /// The digest covers the full DER encoding of the certificate's
    /// SubjectPublicKeyInfo, matching what pin literals are expected to
    /// encode.
    pub fn of_cert_der(der: &[u8]) -> Result<Self, FingerprintError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| FingerprintError::CertParseFailed(e.to_string()))?;

        let spki = cert.tbs_certificate.subject_pki.raw;
        Ok(Self::from_sha256(Sha256::digest(spki).into()))
    }

    /// Digest algorithm
    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    /// Full digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.tag(), BASE64.encode(self.digest))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}
