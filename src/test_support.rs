use secrecy::SecretString;
use tempfile::TempDir;
use uuid::Uuid;

use crate::auth::backends::{BearerBackend, CookieBackend, CookieSettings};
use crate::bootstrap::build_manager;
use crate::config::{Secrets, Settings};
use crate::db::{CredentialStore, DatabaseConfig};
use crate::state::AppState;
use crate::users::hooks::Hooks;
use crate::users::manager::UserManager;
use crate::users::model::User;

/// 32 distinct characters, about 160 bits by the entropy estimate.
pub(crate) const TEST_SECRET: &str = "Yq3!vN8#pL2@wK7$zR5^tB1&mX9*cH4%";

pub(crate) fn sample_user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        hashed_password: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNo".into(),
        is_active: true,
        is_superuser: false,
        is_verified: false,
    }
}

fn secret(tag: &str) -> SecretString {
    // distinct per audience so cross-use fails on the signature too
    SecretString::from(format!("{TEST_SECRET}{tag}"))
}

pub(crate) fn sqlite_settings(dir: &TempDir) -> Settings {
    let db = DatabaseConfig::sqlite(dir.path().join("users.db").to_string_lossy());
    Settings::new(
        db,
        Secrets {
            jwt: secret("jwt"),
            cookie: secret("cookie"),
            reset_password: secret("reset"),
            verification: secret("verify"),
        },
    )
}

pub(crate) async fn sqlite_manager_with(hooks: Hooks) -> (TempDir, UserManager) {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = sqlite_settings(&dir);
    let store = CredentialStore::connect(&settings.database)
        .await
        .expect("open sqlite store");
    let manager = build_manager(&settings, store.repository(), hooks);
    (dir, manager)
}

pub(crate) async fn sqlite_manager() -> (TempDir, UserManager) {
    sqlite_manager_with(Hooks::new()).await
}

pub(crate) async fn sqlite_state() -> (TempDir, AppState) {
    let (dir, manager) = sqlite_manager().await;
    let bearer = BearerBackend::new(TEST_SECRET.as_bytes(), BearerBackend::DEFAULT_LIFETIME);
    let cookie = CookieBackend::new(
        TEST_SECRET.as_bytes(),
        CookieBackend::DEFAULT_LIFETIME,
        CookieSettings::default(),
    );
    (dir, AppState::new(manager, bearer, cookie))
}
