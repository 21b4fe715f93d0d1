use std::fmt;
use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

/// Longest lifetime any signer accepts: ten years.
pub const MAX_LIFETIME_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Which operation a token may be presented to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    Session,
    ResetPassword,
    Verify,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Session => "usergate:auth",
            Audience::ResetPassword => "usergate:reset",
            Audience::Verify => "usergate:verify",
        }
    }
}

/// JWT payload. Recomputed on every request, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub aud: String, // audience tag
    pub iat: i64,    // issued at (unix timestamp)
    pub exp: i64,    // expires at (unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>, // verification tokens only
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed or badly signed token")]
    Invalid,
    #[error("token issued for another audience")]
    WrongAudience,
    #[error("token expired")]
    Expired,
}

/// HS256 signer bound to one audience, one secret and one lifetime.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    audience: Audience,
    lifetime: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], audience: Audience, lifetime_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            audience,
            lifetime: Duration::from_secs(lifetime_seconds),
        }
    }

    pub fn audience(&self) -> Audience {
        self.audience
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, user_id: Uuid, email: Option<&str>) -> anyhow::Result<String> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let iat = now.unix_timestamp();
        let exp = i64::try_from(self.lifetime.as_secs())
            .ok()
            .and_then(|lifetime| iat.checked_add(lifetime))
            .ok_or_else(|| anyhow::anyhow!("token lifetime {:?} overflows", self.lifetime))?;
        let claims = Claims {
            sub: user_id,
            aud: self.audience.as_str().to_string(),
            iat,
            exp,
            email: email.map(str::to_string),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, audience = self.audience.as_str(), "token signed");
        Ok(token)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_at(token, OffsetDateTime::now_utc())
    }

    /// Expired means `now >= exp`: a token is dead at exactly its expiry second.
    pub fn decode_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked below without leeway
        validation.validate_exp = false;
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidAudience => TokenError::WrongAudience,
                _ => TokenError::Invalid,
            }
        })?;
        if now.unix_timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(user_id = %data.claims.sub, audience = self.audience.as_str(), "token verified");
        Ok(data.claims)
    }
}
