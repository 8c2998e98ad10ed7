//! Authentication middleware and JWT verification.
//!
//! Token issuance belongs to the external auth layer; this boundary only
//! verifies signatures and attaches the verified account id.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// JWT claims from the auth layer's token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account id)
    pub sub: Uuid,
    /// Audience
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    /// Role
    #[serde(default)]
    pub role: Option<String>,
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken);
    }

    let header_b64 = parts[0];
    let payload_b64 = parts[1];
    let signature_b64 = parts[2];

    // Verify signature (HMAC-SHA256)
    let message = format!("{}.{}", header_b64, payload_b64);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(message.as_bytes());

    let expected_signature = mac.finalize().into_bytes();
    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    if expected_signature.as_slice() != provided_signature.as_slice() {
        return Err(AuthError::InvalidToken);
    }

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    // Check expiration
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| AuthError::InvalidToken)?
        .as_secs();

    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticated account extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;

    let claims = verify_jwt(token, &state.config.auth_jwt_secret)?;

    let auth_user = AuthenticatedUser {
        account_id: claims.sub,
        claims,
    };

    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn forge_token(secret: &str, claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let message = format!("{}.{}", header, payload);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", message, signature)
    }

    #[test]
    fn valid_token_verifies() {
        let secret = "test-secret";
        let sub = Uuid::new_v4();
        let token = forge_token(
            secret,
            &serde_json::json!({
                "sub": sub,
                "exp": u64::MAX,
                "iat": 0,
            }),
        );

        let claims = verify_jwt(&token, secret).expect("valid token");
        assert_eq!(claims.sub, sub);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = forge_token(
            "right-secret",
            &serde_json::json!({ "sub": Uuid::new_v4(), "exp": u64::MAX }),
        );
        assert!(matches!(
            verify_jwt(&token, "wrong-secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = "test-secret";
        let token = forge_token(
            secret,
            &serde_json::json!({ "sub": Uuid::new_v4(), "exp": 1u64 }),
        );
        assert!(matches!(
            verify_jwt(&token, secret),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(verify_jwt("not-a-jwt", "secret").is_err());
        assert!(verify_jwt("a.b", "secret").is_err());
    }
}
