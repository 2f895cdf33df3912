use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{JwtConfig, MAX_TOKEN_TTL_HOURS};

/// Identity claims carried by a gateway bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub_id")]
    pub subject_id: String,
    pub role: String,
    pub iat: i64, // Issued at
    pub exp: i64, // Expiration time
}

/// Issues and verifies HS256 tokens with a single shared secret.
/// No server-side session state: a token is valid iff its signature and
/// expiry check out.
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_hours: i64,
}

impl AuthManager {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.trim().is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&config.token_ttl_hours) {
            anyhow::bail!(
                "JWT token lifetime must be between 1 and {} hours",
                MAX_TOKEN_TTL_HOURS
            );
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            token_ttl_hours: config.token_ttl_hours,
        })
    }

    /// Create a token for `subject_id` with `role`, expiring after the
    /// configured lifetime (72h by default)
    pub fn create_token(&self, subject_id: &str, role: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_ttl_hours);

        self.sign(&Claims {
            subject_id: subject_id.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("Failed to encode JWT token")
    }

    /// Verify signature and expiry, returning the embedded claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}
