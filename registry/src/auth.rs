//! Bearer authentication and per-repository permission enforcement
//!
//! Every `/v2` request except the token endpoint passes through
//! [`authenticate`]. Requests present a bearer token from the token
//! endpoint; missing or invalid credentials get a 401 carrying a
//! `WWW-Authenticate` challenge that names the realm, service, and the
//! repository scope the request needs.

use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Duration;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{RegistryError, RegistryResult};
use crate::jwt::{parse_scope, RegistryClaims, TokenSigner};
use crate::models::ADMIN_ROLE;
use crate::routes::repository_scope;

/// Subjects issued to unauthenticated clients carry this prefix.
pub const ANONYMOUS_PREFIX: &str = "anonymous:";

const KEY_BITS_MIN: usize = 2048;
const KEY_BITS_MAX: usize = 4096;

fn default_enabled() -> bool {
    true
}

fn default_realm() -> String {
    "/v2/token".to_string()
}

fn default_service() -> String {
    "registry".to_string()
}

fn default_issuer() -> String {
    "registry".to_string()
}

fn default_expiry_seconds() -> i64 {
    3600
}

fn default_key_bits() -> usize {
    KEY_BITS_MIN
}

/// Authentication settings, deserialized from the process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Whether authentication is enforced at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether anonymous clients may pull.
    #[serde(default)]
    pub anonymous_pull: bool,
    /// Realm advertised in challenges; where clients fetch tokens.
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Service name advertised in challenges.
    #[serde(default = "default_service")]
    pub service: String,
    /// Issuer claim stamped into tokens.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Token lifetime in seconds.
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: i64,
    /// RSA signing key size; clamped to a sane range.
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous_pull: false,
            realm: default_realm(),
            service: default_service(),
            issuer: default_issuer(),
            expiry_seconds: default_expiry_seconds(),
            key_bits: default_key_bits(),
        }
    }
}

impl AuthConfig {
    /// Build the authenticator, or `None` when authentication is disabled.
    ///
    /// Generates the process-local signing key, so this is slow.
    pub fn build(self) -> RegistryResult<Option<Authenticator>> {
        if !self.enabled {
            return Ok(None);
        }
        let bits = self.key_bits.clamp(KEY_BITS_MIN, KEY_BITS_MAX);
        let signer = TokenSigner::generate(
            bits,
            self.issuer,
            Duration::seconds(self.expiry_seconds),
        )?;
        Ok(Some(Authenticator {
            signer,
            realm: self.realm,
            service: self.service,
            anonymous_pull: self.anonymous_pull,
            expiry_seconds: self.expiry_seconds,
        }))
    }
}

/// Verifies bearer tokens and builds challenges.
#[derive(Debug)]
pub struct Authenticator {
    pub(crate) signer: TokenSigner,
    realm: String,
    service: String,
    pub(crate) anonymous_pull: bool,
    pub(crate) expiry_seconds: i64,
}

impl Authenticator {
    /// The `WWW-Authenticate` challenge for a request, optionally scoped to
    /// the repository it touches.
    pub fn challenge(&self, repository: Option<&str>) -> String {
        let mut challenge = format!(
            "Bearer realm=\"{}\",service=\"{}\"",
            self.realm, self.service
        );
        if let Some(repository) = repository {
            challenge.push_str(&format!(",scope=\"repository:{repository}:pull,push\""));
        }
        challenge
    }

    /// The `WWW-Authenticate` challenge the token endpoint sends when
    /// Basic credentials are required.
    pub fn basic_challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.service)
    }

    fn unauthorized(&self, repository: Option<&str>) -> RegistryError {
        RegistryError::Unauthorized {
            challenge: Some(self.challenge(repository)),
        }
    }
}

/// The verified identity behind a request.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Token subject; a username, or an `anonymous:` id.
    pub subject: String,
    /// Claims carried by the token.
    pub claims: RegistryClaims,
}

impl Identity {
    /// Whether the identity carries the admin role.
    pub fn is_admin(&self) -> bool {
        self.claims.groups.iter().any(|group| group == ADMIN_ROLE)
    }

    /// Whether the identity is an anonymous client.
    pub fn is_anonymous(&self) -> bool {
        self.subject.starts_with(ANONYMOUS_PREFIX)
    }
}

fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

/// Extract the bearer token from an Authorization header value.
fn bearer_token(value: &header::HeaderValue) -> Option<&str> {
    value.to_str().ok()?.strip_prefix("Bearer ")
}

/// Authentication middleware over every `/v2` route.
pub async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RegistryError> {
    let Some(auth) = state.auth.clone() else {
        return Ok(next.run(request).await);
    };

    let tail = request
        .uri()
        .path()
        .strip_prefix("/v2")
        .unwrap_or(request.uri().path())
        .trim_start_matches('/');
    if tail == "token" {
        return Ok(next.run(request).await);
    }

    let repository = repository_scope(tail).map(str::to_string);
    let repository = repository.as_deref();

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(bearer_token)
        .ok_or_else(|| auth.unauthorized(repository))?;
    let (subject, claims) = auth
        .signer
        .verify(token)
        .map_err(|_| auth.unauthorized(repository))?;
    let identity = Identity { subject, claims };

    enforce(&state, &auth, &identity, repository, request.method()).await?;

    Ok(next.run(request).await)
}

/// Decide whether `identity` may perform this request.
async fn enforce(
    state: &AppState,
    auth: &Authenticator,
    identity: &Identity,
    repository: Option<&str>,
    method: &Method,
) -> RegistryResult<()> {
    let read = is_read(method);

    if identity.is_anonymous() {
        // Anonymous tokens are pull-only; pushes require a login.
        if read && auth.anonymous_pull {
            return Ok(());
        }
        return Err(auth.unauthorized(repository));
    }

    // Token claims are not enough on their own; the subject must still
    // resolve to an enabled account at request time.
    let user = match state.metadata.find_user(&identity.subject).await? {
        Some(user) if user.enabled => user,
        _ => {
            tracing::debug!(subject = identity.subject, "subject unknown or disabled");
            return Err(auth.unauthorized(repository));
        }
    };

    if user.is_admin() {
        return Ok(());
    }

    let Some(repository) = repository else {
        // Registry-wide surfaces: listings are open to any authenticated
        // user, mutations fall back to the token's granted actions.
        if read || identity.claims.actions.iter().any(|action| action == "push") {
            return Ok(());
        }
        tracing::debug!(subject = identity.subject, "denied registry-wide write");
        return Err(RegistryError::Denied);
    };

    // A scoped token must have been granted the action it now exercises.
    if let Some((scope_repository, _)) = identity
        .claims
        .scope
        .as_deref()
        .and_then(parse_scope)
    {
        if scope_repository == repository {
            let needed = if read { "pull" } else { "push" };
            if !identity.claims.actions.iter().any(|action| action == needed) {
                return Err(RegistryError::Denied);
            }
        }
    }

    // An explicit grant is authoritative; otherwise fall back to the
    // user's repository allow-list.
    if let Some(grant) = state
        .metadata
        .find_permission(&identity.subject, repository)
        .await?
    {
        let allowed = if read { grant.can_pull } else { grant.can_push };
        if allowed {
            return Ok(());
        }
        return Err(RegistryError::Denied);
    }

    if user.has_access_to_repository(repository) {
        Ok(())
    } else {
        Err(RegistryError::Denied)
    }
}
