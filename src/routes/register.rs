use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    routing::post,
    Json,
};
use tracing::instrument;

use super::Endpoint;
use crate::error::AuthResult;
use crate::state::AppState;
use crate::users::model::{FieldSet, UserCreateRequest, UserRead};

pub(crate) fn endpoints() -> Vec<Endpoint> {
    vec![Endpoint::new("/register", &[Method::POST], post(register))]
}

/// Privileged flags in the body are ignored.
#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    payload: Result<Json<UserCreateRequest>, JsonRejection>,
) -> AuthResult<(StatusCode, Json<UserRead>)> {
    let Json(payload) = payload?;
    let create = state.manager.schema().create(payload, FieldSet::NONE)?;
    let user = state.manager.register(create).await?;
    Ok((StatusCode::CREATED, Json(UserRead::from(user))))
}
