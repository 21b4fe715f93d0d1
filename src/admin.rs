//! Operator tooling that works straight on the database, without the HTTP
//! layer. Every call opens the store, does its work and closes it again.

use tracing::info;

use crate::bootstrap::build_manager;
use crate::config::Settings;
use crate::db::with_repository;
use crate::error::{AuthError, AuthResult};
use crate::users::hooks::Hooks;
use crate::users::manager::UserManager;
use crate::users::model::{FieldSet, UserCreateRequest, UserRead, UserUpdateRequest};

pub struct AdminTools {
    settings: Settings,
    hooks: Hooks,
}

impl AdminTools {
    pub fn new(settings: Settings) -> AuthResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            hooks: Hooks::new(),
        })
    }

    /// Hooks fire for admin operations too.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    async fn run<T, F, Fut>(&self, f: F) -> AuthResult<T>
    where
        F: FnOnce(UserManager) -> Fut,
        Fut: std::future::Future<Output = AuthResult<T>>,
    {
        with_repository(&self.settings.database, |repo| {
            f(build_manager(&self.settings, repo, self.hooks.clone()))
        })
        .await
    }

    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
        superuser: bool,
    ) -> AuthResult<UserRead> {
        let req = UserCreateRequest {
            is_superuser: Some(superuser),
            ..UserCreateRequest::new(email, password)
        };
        let user = self
            .run(|manager| async move {
                let create = manager.schema().create(req, FieldSet::ALL)?;
                manager.register(create).await
            })
            .await?;
        info!(user_id = %user.id, superuser, "user registered by operator");
        Ok(user.into())
    }

    pub async fn get_user(&self, email: &str) -> AuthResult<UserRead> {
        let user = self
            .run(|manager| async move { manager.get_by_email(email).await })
            .await?;
        Ok(user.into())
    }

    pub async fn update_user(
        &self,
        email: &str,
        changes: UserUpdateRequest,
    ) -> AuthResult<UserRead> {
        let user = self
            .run(|manager| async move {
                let user = manager.get_by_email(email).await?;
                let update = manager.schema().update(changes, FieldSet::ALL)?;
                manager.update(user.id, update).await
            })
            .await?;
        info!(user_id = %user.id, "user updated by operator");
        Ok(user.into())
    }

    pub async fn delete_user(&self, email: &str) -> AuthResult<()> {
        self.run(|manager| async move {
            let user = manager.get_by_email(email).await?;
            manager.delete(user.id).await?;
            info!(user_id = %user.id, "user deleted by operator");
            Ok(())
        })
        .await
    }

    /// Goes through the reset-token flow so the password policy and the
    /// reset hooks apply.
    pub async fn reset_user_password(&self, email: &str, password: &str) -> AuthResult<UserRead> {
        let user = self
            .run(|manager| async move {
                let user = manager.get_by_email(email).await?;
                if !user.is_active {
                    return Err(AuthError::Inactive);
                }
                let token = manager.reset_token_for(&user)?;
                manager.reset_password(&token, password).await
            })
            .await?;
        info!(user_id = %user.id, "password reset by operator");
        Ok(user.into())
    }
}
