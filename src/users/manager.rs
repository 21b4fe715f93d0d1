use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::hooks::{HookContext, HookWarning, Hooks};
use super::model::{User, UserCreate, UserSchema, UserUpdate};
use super::repo::{StoreError, UserChanges, UserRepository};
use super::validation::normalize_email;
use crate::auth::password::{hash_password_async, verify_password_async};
use crate::auth::tokens::{Audience, TokenSigner};
use crate::error::{AuthError, AuthResult};

const WARNING_BUFFER: usize = 64;

/// Business rules for the user lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct UserManager {
    repo: Arc<dyn UserRepository>,
    schema: UserSchema,
    reset: TokenSigner,
    verify: TokenSigner,
    hooks: Hooks,
    warnings: broadcast::Sender<HookWarning>,
}

impl UserManager {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        schema: UserSchema,
        reset: TokenSigner,
        verify: TokenSigner,
        hooks: Hooks,
    ) -> Self {
        debug_assert_eq!(reset.audience(), Audience::ResetPassword);
        debug_assert_eq!(verify.audience(), Audience::Verify);
        let (warnings, _) = broadcast::channel(WARNING_BUFFER);
        Self {
            repo,
            schema,
            reset,
            verify,
            hooks,
            warnings,
        }
    }

    pub fn schema(&self) -> &UserSchema {
        &self.schema
    }

    /// Hook failures published after this call.
    pub fn warnings(&self) -> broadcast::Receiver<HookWarning> {
        self.warnings.subscribe()
    }

    fn fire(&self, user: &User, ctx: HookContext) {
        self.hooks.fire(user, &ctx, &self.warnings);
    }

    pub async fn get(&self, id: Uuid) -> AuthResult<User> {
        Ok(self.repo.get_by_id(id).await?)
    }

    pub async fn get_by_email(&self, email: &str) -> AuthResult<User> {
        Ok(self.repo.get_by_email(&normalize_email(email)).await?)
    }

    #[instrument(skip(self, create), fields(email = %create.email()))]
    pub async fn register(&self, create: UserCreate) -> AuthResult<User> {
        match self.repo.get_by_email(create.email()).await {
            Ok(_) => {
                warn!("email already registered");
                return Err(AuthError::DuplicateEmail);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let hash = hash_password_async(create.password().to_string())
            .await
            .map_err(AuthError::internal)?;
        // the UNIQUE constraint settles a racing registration
        let user = self.repo.insert(&User::from_create(&create, hash)).await?;

        info!(user_id = %user.id, "user registered");
        self.fire(&user, HookContext::Register);
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);
        let user = match self.repo.get_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                // burn a hash so unknown emails cost the same as wrong passwords
                let _ = hash_password_async(password.to_string()).await;
                warn!("login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        let ok = verify_password_async(password.to_string(), user.hashed_password.clone())
            .await
            .map_err(AuthError::internal)?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            warn!(user_id = %user.id, "login inactive user");
            return Err(AuthError::InvalidCredentials);
        }

        debug!(user_id = %user.id, "user authenticated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn request_verification(&self, email: &str) -> AuthResult<()> {
        let user = match self.get_by_email(email).await {
            Ok(user) => user,
            Err(AuthError::NotFound) => {
                debug!("verification requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !user.is_active || user.is_verified {
            debug!(user_id = %user.id, "verification request ignored");
            return Ok(());
        }

        let token = self
            .verify
            .issue(user.id, Some(&user.email))
            .map_err(AuthError::internal)?;
        info!(user_id = %user.id, "verification requested");
        self.fire(&user, HookContext::RequestVerify { token });
        Ok(())
    }

    #[instrument(skip(self, token))]
    pub async fn verify(&self, token: &str) -> AuthResult<User> {
        let claims = self.verify.decode(token).map_err(|e| {
            warn!(error = %e, "verification token rejected");
            AuthError::InvalidToken
        })?;
        let user = self.user_for_token(claims.sub).await?;
        if claims.email.as_deref() != Some(user.email.as_str()) {
            warn!(user_id = %user.id, "verification token for a previous email");
            return Err(AuthError::InvalidToken);
        }
        if user.is_verified {
            return Err(AuthError::AlreadyVerified);
        }

        let changes = UserChanges {
            is_verified: Some(true),
            ..Default::default()
        };
        let user = self.repo.update(user.id, &changes).await?;
        info!(user_id = %user.id, "user verified");
        self.fire(&user, HookContext::Verify);
        Ok(user)
    }

    /// Succeeds for unknown and inactive accounts too; only those that can
    /// actually reset get a token.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let user = match self.get_by_email(email).await {
            Ok(user) => user,
            Err(AuthError::NotFound) => {
                debug!("password reset requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !user.is_active {
            debug!(user_id = %user.id, "password reset requested for inactive user");
            return Ok(());
        }

        let token = self.reset_token_for(&user)?;
        info!(user_id = %user.id, "password reset requested");
        self.fire(&user, HookContext::ForgotPassword { token });
        Ok(())
    }

    pub(crate) fn reset_token_for(&self, user: &User) -> AuthResult<String> {
        self.reset
            .issue(user.id, None)
            .map_err(AuthError::internal)
    }

    #[instrument(skip(self, token, password))]
    pub async fn reset_password(&self, token: &str, password: &str) -> AuthResult<User> {
        let claims = self.reset.decode(token).map_err(|e| {
            warn!(error = %e, "reset token rejected");
            AuthError::InvalidToken
        })?;
        let user = self.user_for_token(claims.sub).await?;
        if !user.is_active {
            warn!(user_id = %user.id, "reset for inactive user");
            return Err(AuthError::InvalidToken);
        }
        self.schema.policy.validate(password, Some(&user.email))?;

        let hashed_password = hash_password_async(password.to_string())
            .await
            .map_err(AuthError::internal)?;
        let changes = UserChanges {
            hashed_password: Some(hashed_password),
            ..Default::default()
        };
        let user = self.repo.update(user.id, &changes).await?;
        info!(user_id = %user.id, "password reset");
        self.fire(&user, HookContext::ResetPassword);
        Ok(user)
    }

    async fn user_for_token(&self, id: Uuid) -> AuthResult<User> {
        match self.repo.get_by_id(id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => {
                warn!(user_id = %id, "token for unknown user");
                Err(AuthError::InvalidToken)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes only the fields whose value differs from the stored row.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: Uuid, update: UserUpdate) -> AuthResult<User> {
        let current = self.repo.get_by_id(id).await?;
        let mut changes = UserChanges::default();
        let mut changed = Vec::new();

        let email = match update.email() {
            Some(email) if email != current.email => {
                match self.repo.get_by_email(email).await {
                    Ok(_) => return Err(AuthError::DuplicateEmail),
                    Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
                changes.email = Some(email.to_string());
                changed.push("email");
                email
            }
            _ => current.email.as_str(),
        };
        if let Some(password) = update.password() {
            // checked against the address the account ends up with
            self.schema.policy.validate(password, Some(email))?;
            changes.hashed_password = Some(
                hash_password_async(password.to_string())
                    .await
                    .map_err(AuthError::internal)?,
            );
            changed.push("password");
        }

        let is_active = update.is_active().unwrap_or(current.is_active);
        if is_active != current.is_active {
            changes.is_active = Some(is_active);
            changed.push("is_active");
        }
        let is_superuser = update.is_superuser().unwrap_or(current.is_superuser);
        if is_superuser != current.is_superuser {
            changes.is_superuser = Some(is_superuser);
            changed.push("is_superuser");
        }
        // an explicit value wins over the reset caused by an email change
        let is_verified = match (update.is_verified(), changes.email.is_some()) {
            (Some(verified), _) => verified,
            (None, true) => false,
            (None, false) => current.is_verified,
        };
        if is_verified != current.is_verified {
            changes.is_verified = Some(is_verified);
            changed.push("is_verified");
        }

        if changes.is_empty() {
            debug!(user_id = %id, "update changed nothing");
            return Ok(current);
        }

        let user = self.repo.update(id, &changes).await?;
        info!(user_id = %user.id, changed = ?changed, "user updated");
        self.fire(&user, HookContext::Update { changed });
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> AuthResult<()> {
        let user = self.repo.get_by_id(id).await?;
        self.repo.delete(id).await?;
        info!(user_id = %id, "user deleted");
        self.fire(&user, HookContext::Delete);
        Ok(())
    }
}
