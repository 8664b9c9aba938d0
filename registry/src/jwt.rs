//! Bearer token signing and verification
//!
//! Tokens are RS256 JWTs signed with a process-local RSA key generated at
//! startup. The key never leaves the process and is never persisted, so
//! tokens do not survive a restart; clients simply re-authenticate.

use chrono::{Duration, Utc};
use jaws::claims::{Claims, RegisteredClaims};
use jaws::crypto::rsa;
use jaws::token::{Token, Unverified};
use jaws::Compact;
use rsa::sha2::Sha256;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Custom claims carried by registry tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryClaims {
    /// Role names of the subject.
    #[serde(default)]
    pub groups: Vec<String>,
    /// The scope the token was issued for, verbatim.
    #[serde(default)]
    pub scope: Option<String>,
    /// Actions granted within the scope (`pull`, `push`).
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Signs and verifies registry bearer tokens.
pub struct TokenSigner {
    key: rsa::RsaPrivateKey,
    issuer: String,
    expiry: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl TokenSigner {
    /// Generate a fresh signing key. Key generation is slow; call once at
    /// wiring time.
    pub fn generate(bits: usize, issuer: impl Into<String>, expiry: Duration) -> RegistryResult<Self> {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|err| RegistryError::Internal(format!("generating signing key: {err}")))?;
        Ok(Self {
            key,
            issuer: issuer.into(),
            expiry,
        })
    }

    /// Sign a token for `subject` with the given claims.
    pub fn sign(&self, subject: &str, claims: RegistryClaims) -> RegistryResult<String> {
        let now = Utc::now();
        let claims: Claims<RegistryClaims, String> = Claims {
            registered: RegisteredClaims {
                issuer: Some(self.issuer.clone()),
                subject: Some(subject.to_string()),
                issued_at: Some(now),
                expiration: Some(now + self.expiry),
                ..Default::default()
            },
            claims,
        };

        let token = Token::compact((), claims);
        let algorithm: rsa::pkcs1v15::SigningKey<Sha256> =
            rsa::pkcs1v15::SigningKey::new(self.key.clone());
        let signed = token
            .sign::<rsa::pkcs1v15::SigningKey<Sha256>, rsa::pkcs1v15::Signature>(&algorithm)
            .map_err(|err| RegistryError::Internal(format!("signing token: {err}")))?;
        signed
            .rendered()
            .map_err(|err| RegistryError::Internal(format!("rendering token: {err}")))
    }

    /// Verify a rendered token and return its subject and claims.
    ///
    /// Any parse, signature, or expiry failure maps to an unauthorized
    /// error; the caller attaches the challenge.
    pub fn verify(&self, raw: &str) -> RegistryResult<(String, RegistryClaims)> {
        let token: Token<Claims<RegistryClaims, String>, Unverified<()>, Compact> = raw
            .parse()
            .map_err(|_| RegistryError::Unauthorized { challenge: None })?;

        let verifying: rsa::pkcs1v15::VerifyingKey<Sha256> =
            rsa::pkcs1v15::VerifyingKey::new(self.key.to_public_key());
        let verified = token
            .verify::<rsa::pkcs1v15::VerifyingKey<Sha256>, rsa::pkcs1v15::Signature>(&verifying)
            .map_err(|_| RegistryError::Unauthorized { challenge: None })?;

        let claims = verified
            .payload()
            .ok_or(RegistryError::Unauthorized { challenge: None })?;
        let expired = claims
            .registered
            .expiration
            .is_none_or(|expiration| expiration < Utc::now());
        if expired {
            return Err(RegistryError::Unauthorized { challenge: None });
        }

        let subject = claims.registered.subject.clone().unwrap_or_default();
        Ok((subject, claims.claims.clone()))
    }
}

/// Parse a `repository:{name}:{actions}` scope into its name and actions.
pub fn parse_scope(scope: &str) -> Option<(&str, Vec<&str>)> {
    let rest = scope.strip_prefix("repository:")?;
    let (name, actions) = rest.rsplit_once(':')?;
    if name.is_empty() {
        return None;
    }
    Some((name, actions.split(',').filter(|a| !a.is_empty()).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(expiry: Duration) -> TokenSigner {
        // 2048 bits is the floor accepted in configuration; tests pay the
        // generation cost once per case.
        TokenSigner::generate(2048, "test-registry", expiry).unwrap()
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = signer(Duration::minutes(5));
        let token = signer
            .sign(
                "alice",
                RegistryClaims {
                    groups: vec!["ADMIN".into()],
                    scope: Some("repository:ns/app:pull,push".into()),
                    actions: vec!["pull".into(), "push".into()],
                },
            )
            .unwrap();

        let (subject, claims) = signer.verify(&token).unwrap();
        assert_eq!(subject, "alice");
        assert_eq!(claims.groups, vec!["ADMIN"]);
        assert_eq!(claims.actions, vec!["pull", "push"]);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let signer = signer(Duration::minutes(-5));
        let token = signer.sign("alice", RegistryClaims::default()).unwrap();
        assert!(matches!(
            signer.verify(&token),
            Err(RegistryError::Unauthorized { .. })
        ));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let signer = signer(Duration::minutes(5));
        let token = signer.sign("alice", RegistryClaims::default()).unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        assert!(signer.verify(&tampered).is_err());
        assert!(signer.verify("not-a-token").is_err());
    }

    #[test]
    fn scope_parsing() {
        assert_eq!(
            parse_scope("repository:ns/app:pull,push"),
            Some(("ns/app", vec!["pull", "push"]))
        );
        assert_eq!(
            parse_scope("repository:app:pull"),
            Some(("app", vec!["pull"]))
        );
        assert_eq!(parse_scope("repository::pull"), None);
        assert_eq!(parse_scope("registry:catalog:*"), None);
        assert_eq!(parse_scope("garbage"), None);
    }
}
