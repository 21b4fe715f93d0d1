use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    routing::post,
    Json,
};
use serde::Deserialize;
use tracing::{error, instrument};

use super::Endpoint;
use crate::error::AuthResult;
use crate::state::AppState;
use crate::users::model::UserRead;

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

pub(crate) fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("/forgot-password", &[Method::POST], post(forgot_password)),
        Endpoint::new("/reset-password", &[Method::POST], post(reset_password)),
    ]
}

/// Always 202 for a well-formed body so the response says nothing about which emails exist.
#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> AuthResult<StatusCode> {
    let Json(payload) = payload?;
    if let Err(e) = state.manager.forgot_password(&payload.email).await {
        error!(error = %e, "forgot password failed");
    }
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AuthResult<Json<UserRead>> {
    let Json(payload) = payload?;
    let user = state
        .manager
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(Json(UserRead::from(user)))
}
