//! Subscriber token verification
//!
//! The hub only needs one thing from a token: the tenant it is bound to.
//! How tokens are issued and checked is up to the `TokenVerifier`.

use async_trait::async_trait;
use tracing::debug;

use super::jwt::{verify_token, JwtConfig};
use crate::support::errors::AuthError;

/// Identity a subscriber connection is accepted with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSubscriber {
    pub tenant_id: String,
    pub user_id: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and extract its tenant claim.
    async fn verify(&self, token: &str) -> Result<VerifiedSubscriber, AuthError>;
}

/// Verifies HS256 JWTs signed with the configured secret
pub struct JwtTenantVerifier {
    config: JwtConfig,
}

impl JwtTenantVerifier {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenVerifier for JwtTenantVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSubscriber, AuthError> {
        let claims = verify_token(token, &self.config).map_err(|e| {
            debug!(error = %e, "Subscriber token rejected");
            AuthError::InvalidToken(e.to_string())
        })?;
        let tenant_id = claims.tenant().ok_or(AuthError::MissingTenant)?.to_string();
        Ok(VerifiedSubscriber {
            tenant_id,
            user_id: Some(claims.sub),
        })
    }
}

/// Extract token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
