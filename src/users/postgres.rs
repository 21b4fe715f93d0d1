use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{OAuthAccount, User};
use super::repo::{StoreError, StoreResult, UserChanges, UserRepository};

/// Non-blocking engine over a sqlx Postgres pool.
#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        other => StoreError::backend(other),
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, hashed_password, is_active, is_superuser, is_verified
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, hashed_password, is_active, is_superuser, is_verified
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)
    }

    async fn get_by_oauth_account(&self, oauth_name: &str, account_id: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.hashed_password, u.is_active, u.is_superuser, u.is_verified
              FROM users u
              JOIN oauth_accounts o ON o.user_id = u.id
             WHERE o.oauth_name = $1 AND o.account_id = $2
            "#,
        )
        .bind(oauth_name)
        .bind(account_id)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)
    }

    async fn insert(&self, user: &User) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, hashed_password, is_active, is_superuser, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, hashed_password, is_active, is_superuser, is_verified
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.is_verified)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)
    }

    async fn update(&self, id: Uuid, changes: &UserChanges) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET email = COALESCE($2, email),
                   hashed_password = COALESCE($3, hashed_password),
                   is_active = COALESCE($4, is_active),
                   is_superuser = COALESCE($5, is_superuser),
                   is_verified = COALESCE($6, is_verified)
             WHERE id = $1
            RETURNING id, email, hashed_password, is_active, is_superuser, is_verified
            "#,
        )
        .bind(id)
        .bind(&changes.email)
        .bind(&changes.hashed_password)
        .bind(changes.is_active)
        .bind(changes.is_superuser)
        .bind(changes.is_verified)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_err)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_oauth_account(&self, account: &OAuthAccount) -> StoreResult<OAuthAccount> {
        sqlx::query_as::<_, OAuthAccount>(
            r#"
            INSERT INTO oauth_accounts (id, user_id, oauth_name, account_id, account_email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, oauth_name, account_id, account_email
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.oauth_name)
        .bind(&account.account_id)
        .bind(&account.account_email)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            // user_id must reference an existing row
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::backend(anyhow::anyhow!("oauth account already linked"))
            }
            other => map_err(other),
        })
    }
}
