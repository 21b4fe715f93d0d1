use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, info};

use crate::users::postgres::PgUserRepository;
use crate::users::repo::{StoreError, UserRepository};
use crate::users::sqlite::{self, SqlitePool, SqliteUserRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// Non-blocking engine.
    Postgres,
    /// Blocking engine, offloaded to the blocking thread pool.
    Sqlite,
}

impl FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            other => Err(format!("unsupported driver {other:?}")),
        }
    }
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Database name, or the file path for SQLite.
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: SecretString::from(String::new()),
            name: path.into(),
            max_connections: 4,
        }
    }
}

/// Owns the connection pool for whichever engine is configured.
#[derive(Clone)]
pub enum CredentialStore {
    Postgres(sqlx::PgPool),
    Sqlite(SqlitePool),
}

impl CredentialStore {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        match cfg.driver {
            Driver::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&cfg.host)
                    .port(cfg.port)
                    .username(&cfg.user)
                    .password(cfg.password.expose_secret())
                    .database(&cfg.name);
                let db = PgPoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(options)
                    .await
                    .context("connect to database")
                    .map_err(StoreError::Backend)?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")
                    .map_err(StoreError::Backend)?;
                info!(host = %cfg.host, database = %cfg.name, "postgres credential store ready");
                Ok(CredentialStore::Postgres(db))
            }
            Driver::Sqlite => {
                let path = cfg.name.clone();
                let max = cfg.max_connections;
                let pool = tokio::task::spawn_blocking(move || sqlite::open_pool(&path, max))
                    .await
                    .map_err(StoreError::backend)??;
                info!(path = %cfg.name, "sqlite credential store ready");
                Ok(CredentialStore::Sqlite(pool))
            }
        }
    }

    pub fn repository(&self) -> Arc<dyn UserRepository> {
        match self {
            CredentialStore::Postgres(db) => Arc::new(PgUserRepository::new(db.clone())),
            CredentialStore::Sqlite(pool) => Arc::new(SqliteUserRepository::new(pool.clone())),
        }
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        match self {
            CredentialStore::Postgres(db) => db.close().await,
            // r2d2 closes idle connections when the last pool handle drops
            CredentialStore::Sqlite(_) => {}
        }
        debug!("credential store closed");
    }
}

/// Opens a store for `cfg`, hands its repository to `f`, and closes the store
/// whatever `f` returns. Dropping the future mid-flight releases pooled
/// connections through their destructors.
pub async fn with_repository<F, Fut, T, E>(cfg: &DatabaseConfig, f: F) -> Result<T, E>
where
    F: FnOnce(Arc<dyn UserRepository>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    let store = CredentialStore::connect(cfg).await?;
    let result = f(store.repository()).await;
    store.close().await;
    result
}
