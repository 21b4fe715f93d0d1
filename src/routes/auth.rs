use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{request::Parts, Method},
    response::Response,
    routing::post,
    Json,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::Endpoint;
use crate::auth::backends::{AuthBackend, Credential};
use crate::auth::extractors::{CurrentUser, UserRequirement};
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub(crate) fn bearer_endpoints(enable_refresh: bool) -> Vec<Endpoint> {
    let mut endpoints = vec![
        Endpoint::new("/login", &[Method::POST], post(bearer_login)),
        Endpoint::new("/logout", &[Method::POST], post(bearer_logout)),
    ];
    if enable_refresh {
        endpoints.push(Endpoint::new("/refresh", &[Method::POST], post(bearer_refresh)));
    }
    endpoints
}

pub(crate) fn cookie_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("/login", &[Method::POST], post(cookie_login)),
        Endpoint::new("/logout", &[Method::POST], post(cookie_logout)),
    ]
}

async fn login(
    backend: &dyn AuthBackend,
    state: &AppState,
    payload: LoginRequest,
) -> AuthResult<Credential> {
    let user = state
        .manager
        .authenticate(&payload.email, &payload.password)
        .await?;
    let credential = backend.login(&user)?;
    info!(user_id = %user.id, backend = backend.name(), "user logged in");
    Ok(credential)
}

/// Logging out needs a live credential for the same backend.
async fn logout(backend: &dyn AuthBackend, state: &AppState, parts: &Parts) -> AuthResult<Response> {
    let Some(user) = backend.extract_user(parts, &state.manager).await else {
        warn!(backend = backend.name(), "logout without a valid credential");
        return Err(AuthError::Unauthenticated);
    };
    UserRequirement::ACTIVE.check(&user)?;
    info!(user_id = %user.id, backend = backend.name(), "user logged out");
    Ok(backend.logout())
}

#[instrument(skip(state, payload))]
async fn bearer_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AuthResult<Credential> {
    let Json(payload) = payload?;
    login(state.bearer.as_ref(), &state, payload).await
}

#[instrument(skip(state, request))]
async fn bearer_logout(State(state): State<AppState>, request: Request) -> AuthResult<Response> {
    let (parts, _) = request.into_parts();
    logout(state.bearer.as_ref(), &state, &parts).await
}

/// Fresh bearer token for a user authenticated by any backend.
#[instrument(skip(state, user))]
async fn bearer_refresh(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AuthResult<Credential> {
    let credential = state.bearer.login(&user)?;
    info!(user_id = %user.id, "bearer token refreshed");
    Ok(credential)
}

#[instrument(skip(state, payload))]
async fn cookie_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AuthResult<Credential> {
    let Json(payload) = payload?;
    login(state.cookie.as_ref(), &state, payload).await
}

#[instrument(skip(state, request))]
async fn cookie_logout(State(state): State<AppState>, request: Request) -> AuthResult<Response> {
    let (parts, _) = request.into_parts();
    logout(state.cookie.as_ref(), &state, &parts).await
}
