use std::sync::{Arc, OnceLock};

use axum::{http::request::Parts, Router};
use secrecy::ExposeSecret;
use tracing::info;

use crate::auth::backends::{BearerBackend, CookieBackend};
use crate::auth::extractors::UserRequirement;
use crate::auth::tokens::{Audience, TokenSigner};
use crate::config::Settings;
use crate::db::CredentialStore;
use crate::error::{AuthResult, ConfigError};
use crate::routes::{self, RouteTable};
use crate::state::AppState;
use crate::users::hooks::Hooks;
use crate::users::manager::UserManager;
use crate::users::model::{User, UserSchema};
use crate::users::repo::UserRepository;

static GLOBAL: OnceLock<UsersApi> = OnceLock::new();

/// Manager wired from settings, for any repository.
pub(crate) fn build_manager(
    settings: &Settings,
    repo: Arc<dyn UserRepository>,
    hooks: Hooks,
) -> UserManager {
    let reset = TokenSigner::new(
        settings.secrets.reset_password.expose_secret().as_bytes(),
        Audience::ResetPassword,
        settings.lifetimes.reset_password,
    );
    let verify = TokenSigner::new(
        settings.secrets.verification.expose_secret().as_bytes(),
        Audience::Verify,
        settings.lifetimes.verification,
    );
    UserManager::new(
        repo,
        UserSchema::new(settings.password.clone()),
        reset,
        verify,
        hooks,
    )
}

/// Everything wired together: store, manager, backends and mounted routes.
pub struct UsersApi {
    settings: Arc<Settings>,
    store: CredentialStore,
    state: AppState,
    router: Router,
    routes: RouteTable,
}

impl UsersApi {
    /// Validates settings, opens the store and assembles the routes.
    /// Nothing is mounted if any step fails.
    pub async fn connect(settings: Settings, hooks: Hooks) -> AuthResult<Self> {
        settings.validate()?;
        let store = CredentialStore::connect(&settings.database).await?;
        Self::wire(settings, store, hooks)
    }

    /// Like [`UsersApi::connect`] over an already open store.
    pub fn from_store(settings: Settings, store: CredentialStore, hooks: Hooks) -> AuthResult<Self> {
        settings.validate()?;
        Self::wire(settings, store, hooks)
    }

    fn wire(settings: Settings, store: CredentialStore, hooks: Hooks) -> AuthResult<Self> {
        let manager = build_manager(&settings, store.repository(), hooks);
        let bearer = BearerBackend::new(
            settings.secrets.jwt.expose_secret().as_bytes(),
            settings.lifetimes.jwt,
        );
        let cookie = CookieBackend::new(
            settings.secrets.cookie.expose_secret().as_bytes(),
            settings.lifetimes.cookie,
            settings.cookie.clone(),
        );
        let state = AppState::new(manager, bearer, cookie);

        let (router, routes) = routes::assemble(state.clone(), &settings.routes)?;
        let router = router.with_state(state.clone());
        info!(
            routes = routes.len(),
            backends = ?state.auth.backend_names(),
            "users api ready"
        );

        Ok(Self {
            settings: Arc::new(settings),
            store,
            state,
            router,
            routes,
        })
    }

    /// Makes this instance reachable through [`UsersApi::global`].
    pub fn install(self) -> Result<&'static UsersApi, ConfigError> {
        GLOBAL.set(self).map_err(|_| ConfigError::AlreadyInstalled)?;
        GLOBAL.get().ok_or(ConfigError::AlreadyInstalled)
    }

    pub fn global() -> Option<&'static UsersApi> {
        GLOBAL.get()
    }

    /// Routes to merge into the host router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn manager(&self) -> &UserManager {
        &self.state.manager
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The active user behind the request, for host handlers.
    pub async fn current_user(&self, parts: &Parts) -> AuthResult<User> {
        self.current_user_with(parts, UserRequirement::ACTIVE).await
    }

    pub async fn current_user_with(
        &self,
        parts: &Parts,
        requirement: UserRequirement,
    ) -> AuthResult<User> {
        self.state
            .auth
            .current_user(parts, &self.state.manager, requirement)
            .await
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::routes::RouteGroup;
    use crate::auth::backends::{AuthBackend, Credential};
    use crate::test_support::sqlite_settings;
    use crate::users::model::{FieldSet, UserCreateRequest};
    use axum::http::{header::AUTHORIZATION, Method, Request};
    use secrecy::SecretString;

    #[tokio::test]
    async fn weak_secret_aborts_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = sqlite_settings(&dir);
        settings.secrets.jwt = SecretString::from("short".to_string());
        let err = UsersApi::connect(settings, Hooks::new()).await.err().unwrap();
        assert!(matches!(err, AuthError::Configuration(ConfigError::WeakSecret { .. })));
        assert!(!dir.path().join("users.db").exists());
    }

    #[tokio::test]
    async fn connect_mounts_routes_and_resolves_current_user() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = sqlite_settings(&dir);
        settings.routes = settings.routes.clone().disable(RouteGroup::Verify);
        let api = UsersApi::connect(settings, Hooks::new()).await.unwrap();
        assert!(api.routes().contains(&Method::POST, "/register"));
        assert!(!api.routes().contains(&Method::POST, "/verify"));

        let create = api
            .manager()
            .schema()
            .create(UserCreateRequest::new("me@example.com", "Str0ngPW!"), FieldSet::NONE)
            .unwrap();
        let user = api.manager().register(create).await.unwrap();
        let Credential::Bearer { access_token } = api.state().bearer.login(&user).unwrap() else {
            panic!("bearer credential expected");
        };

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(api.current_user(&parts).await.unwrap().id, user.id);
        assert!(matches!(
            api.current_user_with(&parts, UserRequirement::SUPERUSER).await,
            Err(AuthError::Forbidden)
        ));
        api.shutdown().await;
    }
}
