//! Session tokens
//!
//! HS256 JWTs issued by the login flow. The token is the whole session:
//! nothing is looked up server-side.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, SessionContext};

/// Session claims shared with the issuing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,

    /// Chain address linked to the user
    #[serde(default)]
    pub address: Option<String>,

    /// Issuing application
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_name: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl From<SessionClaims> for SessionContext {
    fn from(claims: SessionClaims) -> Self {
        Self {
            session_user_id: claims.user_id,
            user_address: claims.address,
            client_id: claims.client_id,
            client_name: claims.client_name,
        }
    }
}

/// Session token validator and issuer
pub struct SessionValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token; used by the login flow and tests
    pub fn issue(
        &self,
        user_id: &str,
        address: Option<&str>,
        client_id: Option<&str>,
        client_name: Option<&str>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            address: address.map(str::to_string),
            client_id: client_id.map(str::to_string),
            client_name: client_name.map(str::to_string),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidSession(e.to_string()))
    }

    /// Verify signature and expiry, returning the decoded claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let token_data =
            decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::SessionExpired,
                    _ => AuthError::InvalidSession(e.to_string()),
                }
            })?;

        if token_data.claims.user_id.is_empty() {
            return Err(AuthError::InvalidSession("empty userId".to_string()));
        }

        Ok(token_data.claims)
    }
}
