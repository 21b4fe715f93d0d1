use axum::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::{OAuthAccount, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("storage backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub(crate) fn backend(e: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(e.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Columns an update writes; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_verified: Option<bool>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.hashed_password.is_none()
            && self.is_active.is_none()
            && self.is_superuser.is_none()
            && self.is_verified.is_none()
    }
}

/// User storage. Every call acquires its own connection and releases it
/// before returning; every write is a single statement.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<User>;
    /// `email` must already be normalized.
    async fn get_by_email(&self, email: &str) -> StoreResult<User>;
    async fn get_by_oauth_account(&self, oauth_name: &str, account_id: &str) -> StoreResult<User>;
    async fn insert(&self, user: &User) -> StoreResult<User>;
    /// Writes only the columns set in `changes`, in one statement.
    async fn update(&self, id: Uuid, changes: &UserChanges) -> StoreResult<User>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn add_oauth_account(&self, account: &OAuthAccount) -> StoreResult<OAuthAccount>;
}
