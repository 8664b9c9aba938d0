//! Content digest computation and validation
//!
//! Digests use the canonical OCI form `sha256:<64 lowercase hex chars>`.
//! Everything here is pure; no I/O and no registry state.

use std::fmt;

use sha2::{Digest as _, Sha256};

/// The only digest algorithm the registry produces or accepts.
const ALGORITHM: &str = "sha256";

/// A validated content digest in `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

/// Error returned when a digest string does not match the canonical form.
#[derive(Debug, thiserror::Error)]
#[error("invalid digest: {0}")]
pub struct InvalidDigest(pub String);

impl Digest {
    /// Compute the digest of a byte payload.
    pub fn compute(data: &[u8]) -> Self {
        Self(format!("{ALGORITHM}:{}", hex::encode(Sha256::digest(data))))
    }

    /// Parse and validate a digest reference string.
    pub fn parse(value: &str) -> Result<Self, InvalidDigest> {
        let Some((algorithm, encoded)) = value.split_once(':') else {
            return Err(InvalidDigest(value.to_string()));
        };
        if algorithm != ALGORITHM {
            return Err(InvalidDigest(value.to_string()));
        }
        // Digests are lowercase by definition; an uppercase spelling would
        // address different content than its canonical form.
        if encoded.len() != 64 || !encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(InvalidDigest(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// The canonical `sha256:<hex>` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex portion of the digest, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0[ALGORITHM.len() + 1..]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a manifest reference string addresses by digest rather than tag.
pub fn is_digest_reference(reference: &str) -> bool {
    reference.starts_with("sha256:")
}
