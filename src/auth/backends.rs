//! Transport strategies for session tokens.

use std::fmt;
use std::str::FromStr;

use axum::{
    async_trait,
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use super::tokens::{Audience, TokenSigner};
use crate::error::{AuthError, AuthResult};
use crate::users::manager::UserManager;
use crate::users::model::User;

/// What a successful login hands back to the client.
#[derive(Debug, Clone)]
pub enum Credential {
    Bearer { access_token: String },
    Cookie { set_cookie: HeaderValue },
}

#[derive(Debug, Serialize)]
struct BearerResponse<'a> {
    access_token: &'a str,
    token_type: &'static str,
}

impl IntoResponse for Credential {
    fn into_response(self) -> Response {
        match self {
            Credential::Bearer { access_token } => Json(BearerResponse {
                access_token: &access_token,
                token_type: "bearer",
            })
            .into_response(),
            Credential::Cookie { set_cookie } => {
                (StatusCode::NO_CONTENT, [(SET_COOKIE, set_cookie)]).into_response()
            }
        }
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn signer(&self) -> &TokenSigner;

    fn login(&self, user: &User) -> AuthResult<Credential>;

    fn logout(&self) -> Response;

    /// Raw token carried by the request for this transport, if any.
    fn read_token(&self, parts: &Parts) -> Option<String>;

    /// Resolves the request's user. Any failure reads as "no user".
    async fn extract_user(&self, parts: &Parts, manager: &UserManager) -> Option<User> {
        let token = self.read_token(parts)?;
        let claims = match self.signer().decode(&token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(backend = self.name(), error = %e, "session token rejected");
                return None;
            }
        };
        match manager.get(claims.sub).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(backend = self.name(), user_id = %claims.sub, error = %e, "session user lookup failed");
                None
            }
        }
    }
}

/// `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct BearerBackend {
    signer: TokenSigner,
}

impl BearerBackend {
    pub const NAME: &'static str = "jwt";
    pub const DEFAULT_LIFETIME: u64 = 15 * 60;

    pub fn new(secret: &[u8], lifetime_seconds: u64) -> Self {
        Self {
            signer: TokenSigner::new(secret, Audience::Session, lifetime_seconds),
        }
    }
}

#[async_trait]
impl AuthBackend for BearerBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    fn login(&self, user: &User) -> AuthResult<Credential> {
        let access_token = self
            .signer
            .issue(user.id, None)
            .map_err(AuthError::internal)?;
        Ok(Credential::Bearer { access_token })
    }

    fn logout(&self) -> Response {
        // tokens are not stored, so there is nothing to revoke
        StatusCode::NO_CONTENT.into_response()
    }

    fn read_token(&self, parts: &Parts) -> Option<String> {
        let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?
            .trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        })
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lax" => Ok(SameSite::Lax),
            "strict" => Ok(SameSite::Strict),
            "none" => Ok(SameSite::None),
            other => Err(format!("expected lax, strict or none, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "usergate_auth".into(),
            path: "/".into(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

/// Session token in a cookie; same token semantics as [`BearerBackend`].
#[derive(Debug, Clone)]
pub struct CookieBackend {
    signer: TokenSigner,
    cookie: CookieSettings,
}

impl CookieBackend {
    pub const NAME: &'static str = "cookie";
    pub const DEFAULT_LIFETIME: u64 = 30 * 24 * 60 * 60;

    pub fn new(secret: &[u8], lifetime_seconds: u64, cookie: CookieSettings) -> Self {
        Self {
            signer: TokenSigner::new(secret, Audience::Session, lifetime_seconds),
            cookie,
        }
    }

    fn cookie_header(&self, value: &str, max_age: u64) -> String {
        let c = &self.cookie;
        let mut cookie = format!("{}={}; Path={}", c.name, value, c.path);
        if let Some(domain) = &c.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if c.http_only {
            cookie.push_str("; HttpOnly");
        }
        if c.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}; Max-Age={max_age}", c.same_site));
        cookie
    }
}

#[async_trait]
impl AuthBackend for CookieBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    fn login(&self, user: &User) -> AuthResult<Credential> {
        let token = self
            .signer
            .issue(user.id, None)
            .map_err(AuthError::internal)?;
        let set_cookie =
            HeaderValue::from_str(&self.cookie_header(&token, self.signer.lifetime().as_secs()))
                .map_err(AuthError::internal)?;
        Ok(Credential::Cookie { set_cookie })
    }

    fn logout(&self) -> Response {
        match HeaderValue::from_str(&self.cookie_header("", 0)) {
            Ok(clear) => (StatusCode::NO_CONTENT, [(SET_COOKIE, clear)]).into_response(),
            Err(e) => AuthError::internal(e).into_response(),
        }
    }

    fn read_token(&self, parts: &Parts) -> Option<String> {
        parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key.trim() == self.cookie.name && !value.trim().is_empty())
                    .then(|| value.trim().to_string())
            })
    }
}
