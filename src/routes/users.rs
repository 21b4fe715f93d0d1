use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{Method, StatusCode},
    routing::get,
    Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::Endpoint;
use crate::auth::extractors::{CurrentUser, Superuser};
use crate::error::AuthResult;
use crate::state::AppState;
use crate::users::model::{FieldSet, UserRead, UserUpdateRequest};

pub(crate) fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new(
            "/me",
            &[Method::GET, Method::PATCH],
            get(get_me).patch(update_me),
        ),
        Endpoint::new(
            "/:id",
            &[Method::GET, Method::PATCH, Method::DELETE],
            get(get_user).patch(update_user).delete(delete_user),
        ),
    ]
}

#[instrument(skip(user), fields(user_id = %user.id))]
async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserRead> {
    Json(UserRead::from(user))
}

/// Self-service update; privileged flags are dropped.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> AuthResult<Json<UserRead>> {
    let Json(payload) = payload?;
    let update = state.manager.schema().update(payload, FieldSet::NONE)?;
    let user = state.manager.update(user.id, update).await?;
    Ok(Json(UserRead::from(user)))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
async fn get_user(
    State(state): State<AppState>,
    Superuser(admin): Superuser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AuthResult<Json<UserRead>> {
    let Path(id) = id?;
    let user = state.manager.get(id).await?;
    Ok(Json(UserRead::from(user)))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.id))]
async fn update_user(
    State(state): State<AppState>,
    Superuser(admin): Superuser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> AuthResult<Json<UserRead>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let update = state.manager.schema().update(payload, FieldSet::ALL)?;
    let user = state.manager.update(id, update).await?;
    Ok(Json(UserRead::from(user)))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
async fn delete_user(
    State(state): State<AppState>,
    Superuser(admin): Superuser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AuthResult<StatusCode> {
    let Path(id) = id?;
    state.manager.delete(id).await?;
    info!(user_id = %id, admin_id = %admin.id, "user deleted by superuser");
    Ok(StatusCode::NO_CONTENT)
}
