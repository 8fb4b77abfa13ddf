//! Join credentials.
//!
//! The conferencing backend only needs a signed, short-lived token naming
//! the room and the identity; `CredentialIssuer` is the seam it plugs into.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppErr, AppResult};

/// A minted join credential.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub trait CredentialIssuer: Send + Sync {
    /// Mint a credential that lets `identity` join `room_id` only.
    fn issue(&self, room_id: &str, identity: &str) -> AppResult<Credential>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grants {
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub room: String,
    pub grants: Grants,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 issuer.
pub struct JwtIssuer {
    secret: String,
    ttl: Duration,
}

impl JwtIssuer {
    pub fn new(secret: impl Into<String>, ttl_seconds: i64) -> Self {
        Self { secret: secret.into(), ttl: Duration::seconds(ttl_seconds) }
    }

    pub fn sign(&self, room_id: &str, identity: &str, now: DateTime<Utc>) -> AppResult<Credential> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: identity.into(),
            room: room_id.into(),
            grants: Grants { room_join: true, can_publish: true, can_subscribe: true },
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppErr::Credential(e.to_string()))?;
        Ok(Credential { token, expires_at })
    }

    /// Decode and check signature and expiry.
    ///
    /// This server only issues credentials; the conferencing service that
    /// shares `JWT_SECRET` is the one that checks them, with this logic.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|d| d.claims)
        .ok()
    }
}

impl CredentialIssuer for JwtIssuer {
    fn issue(&self, room_id: &str, identity: &str) -> AppResult<Credential> {
        self.sign(room_id, identity, Utc::now())
    }
}
