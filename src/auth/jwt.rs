//! HS256 JWT verification
//!
//! Tokens carry the user's document id in a `user_id` claim and an `exp`
//! expiry, signed with a secret shared with the service that issues them.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};

use super::{AuthError, AuthResult, Authenticator};
use crate::hub::Identity;

/// Length of a hex-encoded document id
const USER_ID_LENGTH: usize = 24;

/// Claims carried by a hub token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Document id of the user
    pub user_id: String,
    /// Expiration (Unix timestamp)
    pub exp: u64,
}

/// Verifies (and, for tooling, issues) HS256 tokens
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Mint a token for `user_id` valid for `ttl`
    pub fn issue(&self, user_id: &str, ttl: Duration) -> AuthResult<String> {
        validate_user_id(user_id)?;
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: get_current_timestamp() + ttl.as_secs(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with this authenticator's secret
    pub fn sign(&self, claims: &Claims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> AuthResult<Identity> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            },
        )?;

        validate_user_id(&data.claims.user_id)?;
        Ok(Identity::new(data.claims.user_id))
    }
}

/// User ids are 24-character hex document ids
pub fn validate_user_id(user_id: &str) -> AuthResult<()> {
    if user_id.len() == USER_ID_LENGTH && user_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(AuthError::InvalidIdentity(user_id.to_string()))
    }
}
