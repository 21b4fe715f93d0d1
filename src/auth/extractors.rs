use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::backends::AuthBackend;
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;
use crate::users::manager::UserManager;
use crate::users::model::User;

/// Flags the current user must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserRequirement {
    pub active: bool,
    pub verified: bool,
    pub superuser: bool,
}

impl UserRequirement {
    pub const ANY: Self = Self {
        active: false,
        verified: false,
        superuser: false,
    };
    pub const ACTIVE: Self = Self {
        active: true,
        verified: false,
        superuser: false,
    };
    pub const VERIFIED: Self = Self {
        active: true,
        verified: true,
        superuser: false,
    };
    pub const SUPERUSER: Self = Self {
        active: true,
        verified: false,
        superuser: true,
    };

    pub fn check(&self, user: &User) -> AuthResult<()> {
        if self.active && !user.is_active {
            return Err(AuthError::Inactive);
        }
        if self.verified && !user.is_verified {
            return Err(AuthError::Unverified);
        }
        if self.superuser && !user.is_superuser {
            return Err(AuthError::Forbidden);
        }
        Ok(())
    }
}

/// Enabled backends, tried in order until one yields a user.
#[derive(Clone)]
pub struct Authenticator {
    backends: Vec<Arc<dyn AuthBackend>>,
}

impl Authenticator {
    pub fn new(backends: Vec<Arc<dyn AuthBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn current_user(
        &self,
        parts: &Parts,
        manager: &UserManager,
        requirement: UserRequirement,
    ) -> AuthResult<User> {
        let mut found = None;
        for backend in &self.backends {
            if let Some(user) = backend.extract_user(parts, manager).await {
                found = Some(user);
                break;
            }
        }
        let user = found.ok_or(AuthError::Unauthenticated)?;
        requirement.check(&user).map_err(|e| {
            warn!(user_id = %user.id, error = %e, "current user rejected");
            e
        })?;
        Ok(user)
    }
}

/// Active user behind the request's bearer token or cookie.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let user = state
            .auth
            .current_user(parts, &state.manager, UserRequirement::ACTIVE)
            .await?;
        Ok(CurrentUser(user))
    }
}

/// Active superuser.
pub struct Superuser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Superuser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let user = state
            .auth
            .current_user(parts, &state.manager, UserRequirement::SUPERUSER)
            .await?;
        Ok(Superuser(user))
    }
}

/// Route-group guard: rejects the request unless the current user meets
/// the requirement.
pub async fn require_user(
    State((state, requirement)): State<(AppState, UserRequirement)>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    if let Err(e) = state
        .auth
        .current_user(&parts, &state.manager, requirement)
        .await
    {
        return e.into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
