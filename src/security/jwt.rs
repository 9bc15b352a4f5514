//! JWT handler.
//!
//! Creates and validates HS256-signed tokens carrying
//! `{user_id, role, iat, exp}`. Refuses construction with an empty
//! secret.

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::permissions::Role;

const DEFAULT_EXPIRY_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtHandler {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(AppError::Config("JWT secret key must not be empty".to_string()));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// `generateToken(userId, role, expiryHours)` — requires a
    /// non-empty `user_id`; `expiry_hours == 0` defaults to 24h.
    pub fn generate_token(&self, user_id: &str, role: Role, expiry_hours: i64) -> Result<String> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidParam("user_id must not be empty".to_string()));
        }
        if expiry_hours < 0 {
            return Err(AppError::InvalidParam("expiry hours must not be negative".to_string()));
        }
        let hours = if expiry_hours == 0 { DEFAULT_EXPIRY_HOURS } else { expiry_hours };

        let now = Utc::now();
        let exp = now + ChronoDuration::hours(hours);
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("signing token: {e}")))
    }

    /// Rejects empty/whitespace input, signature mismatches, and
    /// expired tokens.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        if token.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }
        let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AppError::Unauthorized)?;
        Ok(data.claims)
    }

    /// Answers the expiry check without mutating any state.
    pub fn is_token_expired(&self, token: &str) -> bool {
        match self.decode_ignoring_expiry(token) {
            Some(claims) => claims.exp <= Utc::now().timestamp(),
            None => true,
        }
    }

    fn decode_ignoring_expiry(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .ok()
            .map(|d| d.claims)
    }
}
