use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    repository::RepositoryState,
};

/// Role strings as stored in `users.role`.
pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

/// Claims
///
/// The payload expected inside a JSON Web Token issued by the external
/// identity provider. The subject is the username; markers are owned by
/// username, so no extra mapping step is needed after validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the username of the authenticated user.
    pub sub: String,
    /// Expiration Time (exp): timestamp after which the JWT must be rejected.
    pub exp: usize,
    /// Issued At (iat): timestamp when the JWT was issued.
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request: the pair the core needs
/// for every ownership and role check. Produced by the extractor below; how
/// the credential was minted is outside this service.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    /// 'user' or 'admin'; read fresh from the database on every request so a
    /// role change takes effect without waiting for token expiry.
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making AuthUser usable as a
/// function argument in any authenticated handler and keeping credential
/// resolution out of business logic.
///
/// Resolution order:
/// 1. Local bypass: in `Env::Local`, an `x-user-name` header naming an
///    existing user authenticates directly. Guarded by the Env check.
/// 2. Bearer token: standard Authorization header, JWT decoded and validated
///    against the configured secret.
/// 3. Database lookup: the subject must still exist; its current role is
///    attached to the identity.
///
/// Rejection: 401 for any credential failure, 500 if the user lookup itself
/// fails at the storage layer.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // Local development bypass. Falls through to JWT validation when the
        // header is absent, malformed, or names an unknown user.
        if config.env == Env::Local {
            if let Some(user_header) = parts.headers.get("x-user-name") {
                if let Ok(username) = user_header.to_str() {
                    let user = repo
                        .get_user_by_username(username)
                        .await
                        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                    if let Some(user) = user {
                        return Ok(AuthUser {
                            username: user.username,
                            role: user.role,
                        });
                    }
                }
            }
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                return match e.kind() {
                    // Expired tokens are the common case for valid-but-old
                    // credentials; everything else (bad signature, malformed
                    // token) rejects identically.
                    ErrorKind::ExpiredSignature => Err(StatusCode::UNAUTHORIZED),
                    _ => Err(StatusCode::UNAUTHORIZED),
                };
            }
        };

        // The token may outlive the account. The row is the source of truth
        // for both existence and the current role.
        let user = repo
            .get_user_by_username(&token_data.claims.sub)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            username: user.username,
            role: user.role,
        })
    }
}
