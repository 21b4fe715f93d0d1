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
pub struct RequestVerifyRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

pub(crate) fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("/request-verify-token", &[Method::POST], post(request_verify_token)),
        Endpoint::new("/verify", &[Method::POST], post(verify)),
    ]
}

#[instrument(skip(state, payload))]
async fn request_verify_token(
    State(state): State<AppState>,
    payload: Result<Json<RequestVerifyRequest>, JsonRejection>,
) -> AuthResult<StatusCode> {
    let Json(payload) = payload?;
    if let Err(e) = state.manager.request_verification(&payload.email).await {
        error!(error = %e, "verification request failed");
    }
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> AuthResult<Json<UserRead>> {
    let Json(payload) = payload?;
    let user = state.manager.verify(&payload.token).await?;
    Ok(Json(UserRead::from(user)))
}
