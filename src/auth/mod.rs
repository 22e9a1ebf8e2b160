//! Authentication
//!
//! The upgrade endpoint only needs a verified identity from a bearer token;
//! how that token is checked sits behind the [`Authenticator`] trait.

mod jwt;

pub use jwt::*;

use thiserror::Error;

use crate::hub::Identity;

/// Errors that can occur while verifying a credential
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid user id: {0}")]
    InvalidIdentity(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Verifies a bearer credential and yields the identity it was issued to
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> AuthResult<Identity>;
}
