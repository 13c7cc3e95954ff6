//! Subscriber authentication
//!
//! JWT handling plus the `TokenVerifier` seam the hub authenticates
//! inbound subscriber connections through.

pub mod jwt;
pub mod verifier;

pub use jwt::{create_token, verify_token, Claims, JwtConfig};
pub use verifier::{extract_bearer, JwtTenantVerifier, TokenVerifier, VerifiedSubscriber};
