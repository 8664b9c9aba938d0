//! Token endpoint
//!
//! Exchanges Basic credentials (or nothing, when anonymous pulls are
//! enabled) for a bearer token scoped to the repository the client asked
//! for. Passwords are verified against stored bcrypt hashes.

use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{Authenticator, ANONYMOUS_PREFIX};
use crate::error::{RegistryError, RegistryResult};
use crate::jwt::{parse_scope, RegistryClaims};
use crate::models::User;

/// Token endpoint response shape, per the Docker token protocol. Both
/// token fields carry the same value; clients differ in which they read.
#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

/// Decode `Basic` credentials from an Authorization header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The actions to grant a user for a requested scope, or `None` when the
/// user may not touch the repository at all.
///
/// An explicit permission grant caps the requested actions; without one
/// the user's repository allow-list decides, and admins get everything
/// they ask for.
async fn granted_actions(
    state: &AppState,
    user: &User,
    repository: &str,
    requested: &[&str],
) -> RegistryResult<Option<Vec<String>>> {
    let requested: Vec<&str> = if requested.is_empty() {
        vec!["pull", "push"]
    } else {
        requested.to_vec()
    };

    if user.is_admin() {
        return Ok(Some(requested.into_iter().map(String::from).collect()));
    }

    if let Some(grant) = state
        .metadata
        .find_permission(&user.username, repository)
        .await?
    {
        let granted: Vec<String> = requested
            .into_iter()
            .filter(|action| match *action {
                "pull" => grant.can_pull,
                "push" => grant.can_push,
                _ => false,
            })
            .map(String::from)
            .collect();
        if granted.is_empty() {
            return Ok(None);
        }
        return Ok(Some(granted));
    }

    if user.has_access_to_repository(repository) {
        return Ok(Some(requested.into_iter().map(String::from).collect()));
    }
    Ok(None)
}

fn respond(auth: &Authenticator, token: String) -> Response {
    Json(TokenResponse {
        access_token: token.clone(),
        token,
        token_type: "Bearer",
        expires_in: auth.expiry_seconds,
    })
    .into_response()
}

/// `GET`/`POST /v2/token?scope=repository:{name}:{actions}`
pub async fn issue_token(
    state: &AppState,
    headers: &HeaderMap,
    scope: Option<&str>,
) -> RegistryResult<Response> {
    let Some(auth) = state.auth.as_deref() else {
        return Err(RegistryError::RouteNotFound);
    };
    let parsed_scope = scope.and_then(parse_scope);
    let scope_name: Option<&str> = parsed_scope.as_ref().map(|(name, _)| *name);

    let Some((username, password)) = basic_credentials(headers) else {
        // No credentials: issue a pull-only anonymous token when the
        // registry allows it, otherwise ask for Basic credentials.
        if !auth.anonymous_pull {
            return Err(RegistryError::Unauthorized {
                challenge: Some(auth.basic_challenge()),
            });
        }
        let subject = format!("{ANONYMOUS_PREFIX}{}", Uuid::new_v4());
        let token = auth.signer.sign(
            &subject,
            RegistryClaims {
                groups: vec![],
                scope: scope.map(String::from),
                actions: vec!["pull".to_string()],
            },
        )?;
        tracing::debug!(subject, "issued anonymous token");
        return Ok(respond(auth, token));
    };

    let unauthorized = || RegistryError::Unauthorized {
        challenge: Some(auth.challenge(scope_name)),
    };

    let user = state
        .metadata
        .find_user(&username)
        .await?
        .filter(|user| user.enabled)
        .ok_or_else(unauthorized)?;
    if !bcrypt::verify(&password, &user.password_hash).unwrap_or(false) {
        tracing::debug!(username, "password verification failed");
        return Err(unauthorized());
    }

    // A scope the user may not touch denies the token outright.
    let actions = match &parsed_scope {
        Some((repository, requested)) => granted_actions(state, &user, repository, requested)
            .await?
            .ok_or_else(unauthorized)?,
        None => vec![],
    };

    let token = auth.signer.sign(
        &user.username,
        RegistryClaims {
            groups: user.roles.clone(),
            scope: scope.map(String::from),
            actions,
        },
    )?;
    tracing::debug!(username = user.username, scope, "issued token");
    Ok(respond(auth, token))
}
