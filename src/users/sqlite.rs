//! Blocking engine: rusqlite behind an r2d2 pool.
//!
//! Every repository call checks a connection out on the blocking thread pool
//! and returns it when the closure ends, so async callers never stall the
//! runtime on SQLite I/O.

use axum::async_trait;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use super::model::{OAuthAccount, User};
use super::repo::{StoreError, StoreResult, UserChanges, UserRepository};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    hashed_password TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_superuser INTEGER NOT NULL DEFAULT 0,
    is_verified INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS oauth_accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    oauth_name TEXT NOT NULL,
    account_id TEXT NOT NULL,
    account_email TEXT NOT NULL,
    UNIQUE (oauth_name, account_id)
);
CREATE INDEX IF NOT EXISTS idx_oauth_accounts_user ON oauth_accounts(user_id);
";

const USER_COLUMNS: &str = "id, email, hashed_password, is_active, is_superuser, is_verified";

/// Opens the pool and creates the schema. Blocking; call off the runtime.
pub(crate) fn open_pool(path: &str, max_connections: u32) -> StoreResult<SqlitePool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        // WAL for concurrent readers; busy_timeout serializes writers
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = r2d2::Pool::builder()
        .max_size(max_connections.max(1))
        .build(manager)
        .map_err(StoreError::backend)?;
    pool.get()
        .map_err(StoreError::backend)?
        .execute_batch(SCHEMA)
        .map_err(map_err)?;
    Ok(pool)
}

fn map_err(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::DuplicateEmail
        }
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            StoreError::NotFound
        }
        other => StoreError::backend(other),
    }
}

fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(0, row.get(0)?)?,
        email: row.get(1)?,
        hashed_password: row.get(2)?,
        is_active: row.get(3)?,
        is_superuser: row.get(4)?,
        is_verified: row.get(5)?,
    })
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<OAuthAccount> {
    Ok(OAuthAccount {
        id: parse_uuid(0, row.get(0)?)?,
        user_id: parse_uuid(1, row.get(1)?)?,
        oauth_name: row.get(2)?,
        account_id: row.get(3)?,
        account_email: row.get(4)?,
    })
}

#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(StoreError::backend)?;
            f(&conn).map_err(map_err)
        })
        .await
        .map_err(StoreError::backend)?
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        let email = email.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
        })
        .await
    }

    async fn get_by_oauth_account(&self, oauth_name: &str, account_id: &str) -> StoreResult<User> {
        let (oauth_name, account_id) = (oauth_name.to_string(), account_id.to_string());
        self.run(move |conn| {
            conn.query_row(
                "SELECT u.id, u.email, u.hashed_password, u.is_active, u.is_superuser, u.is_verified
                   FROM users u
                   JOIN oauth_accounts o ON o.user_id = u.id
                  WHERE o.oauth_name = ?1 AND o.account_id = ?2",
                params![oauth_name, account_id],
                row_to_user,
            )
        })
        .await
    }

    async fn insert(&self, user: &User) -> StoreResult<User> {
        let user = user.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     RETURNING {USER_COLUMNS}"
                ),
                params![
                    user.id.to_string(),
                    user.email,
                    user.hashed_password,
                    user.is_active,
                    user.is_superuser,
                    user.is_verified
                ],
                row_to_user,
            )
        })
        .await
    }

    async fn update(&self, id: Uuid, changes: &UserChanges) -> StoreResult<User> {
        let changes = changes.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE users
                        SET email = COALESCE(?2, email),
                            hashed_password = COALESCE(?3, hashed_password),
                            is_active = COALESCE(?4, is_active),
                            is_superuser = COALESCE(?5, is_superuser),
                            is_verified = COALESCE(?6, is_verified)
                      WHERE id = ?1
                     RETURNING {USER_COLUMNS}"
                ),
                params![
                    id.to_string(),
                    changes.email,
                    changes.hashed_password,
                    changes.is_active,
                    changes.is_superuser,
                    changes.is_verified
                ],
                row_to_user,
            )
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let affected = self
            .run(move |conn| conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()]))
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_oauth_account(&self, account: &OAuthAccount) -> StoreResult<OAuthAccount> {
        let account = account.clone();
        let linked = self
            .run(move |conn| {
                conn.query_row(
                    "INSERT INTO oauth_accounts (id, user_id, oauth_name, account_id, account_email)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (oauth_name, account_id) DO NOTHING
                     RETURNING id, user_id, oauth_name, account_id, account_email",
                    params![
                        account.id.to_string(),
                        account.user_id.to_string(),
                        account.oauth_name,
                        account.account_id,
                        account.account_email
                    ],
                    row_to_account,
                )
                .optional()
            })
            .await?;
        linked.ok_or_else(|| StoreError::backend(anyhow::anyhow!("oauth account already linked")))
    }
}
