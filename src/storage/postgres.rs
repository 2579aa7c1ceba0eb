//! Postgres-backed stores for server deployments.
//!
//! Plain bound queries; the schema lives in `db/sql/01_gardi.sql`. The
//! failed-login counter is advanced in a single `UPDATE ... RETURNING`
//! statement so concurrent attempts cannot lose an increment, and
//! `replace_for_user` runs inside one transaction to keep migration
//! batches all-or-nothing.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::source::SourceKind;
use crate::secret::{EncryptedSecret, SecretStore};
use crate::users::{LockoutStatus, UserAccount, UserStore};

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &PgRow) -> Result<UserAccount> {
    let auth_source: String = row.try_get("auth_source")?;
    let login_attempts: i32 = row.try_get("login_attempts")?;
    Ok(UserAccount {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        auth_source: auth_source
            .parse::<SourceKind>()
            .map_err(|e| anyhow!(e))?,
        login_attempts: u32::try_from(login_attempts).unwrap_or(0),
        locked: row.try_get("locked")?,
        password_hash: row.try_get("password_hash")?,
        masterpass_check: row.try_get("masterpass_check")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let query = "SELECT id, username, auth_source, login_attempts, locked, \
                     password_hash, masterpass_check FROM user_accounts WHERE username = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by username")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let query = "SELECT id, username, auth_source, login_attempts, locked, \
                     password_hash, masterpass_check FROM user_accounts WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by id")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn commit(&self, account: &UserAccount) -> Result<()> {
        let query = r"
            INSERT INTO user_accounts
                (id, username, auth_source, login_attempts, locked, password_hash, masterpass_check)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                auth_source = EXCLUDED.auth_source,
                login_attempts = EXCLUDED.login_attempts,
                locked = EXCLUDED.locked,
                password_hash = EXCLUDED.password_hash,
                masterpass_check = EXCLUDED.masterpass_check
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account.id)
            .bind(&account.username)
            .bind(account.auth_source.as_str())
            .bind(i32::try_from(account.login_attempts).unwrap_or(i32::MAX))
            .bind(account.locked)
            .bind(&account.password_hash)
            .bind(&account.masterpass_check)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to commit account")?;
        Ok(())
    }

    async fn record_login_failure(&self, id: Uuid, max_attempts: i32) -> Result<LockoutStatus> {
        // Single-statement read-modify-write: the row lock makes the
        // increment and the lock re-evaluation atomic.
        let query = r"
            UPDATE user_accounts
               SET login_attempts = login_attempts + 1,
                   locked = ($2 > 0 AND login_attempts + 1 >= $2)
             WHERE id = $1
            RETURNING login_attempts, locked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(max_attempts)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login failure")?
            .ok_or_else(|| anyhow!("no such account: {id}"))?;

        let login_attempts: i32 = row.try_get("login_attempts")?;
        Ok(LockoutStatus {
            login_attempts: u32::try_from(login_attempts).unwrap_or(0),
            locked: row.try_get("locked")?,
        })
    }

    async fn record_login_success(&self, id: Uuid) -> Result<()> {
        let query = "UPDATE user_accounts SET login_attempts = 0 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset login attempts")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn secret_from_row(row: &PgRow) -> Result<EncryptedSecret> {
    let key_generation: i32 = row.try_get("key_generation")?;
    Ok(EncryptedSecret {
        user_id: row.try_get("user_id")?,
        server_id: row.try_get("server_id")?,
        ciphertext: row.try_get("ciphertext")?,
        key_generation: u32::try_from(key_generation).unwrap_or(0),
        saved_at: row.try_get("saved_at")?,
    })
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<EncryptedSecret>> {
        let query = "SELECT user_id, server_id, ciphertext, key_generation, saved_at \
                     FROM saved_passwords WHERE user_id = $1 ORDER BY saved_at";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list saved passwords")?;

        rows.iter().map(secret_from_row).collect()
    }

    async fn get(&self, user_id: Uuid, server_id: Uuid) -> Result<Option<EncryptedSecret>> {
        let query = "SELECT user_id, server_id, ciphertext, key_generation, saved_at \
                     FROM saved_passwords WHERE user_id = $1 AND server_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch saved password")?;

        row.as_ref().map(secret_from_row).transpose()
    }

    async fn upsert(&self, secret: &EncryptedSecret) -> Result<()> {
        let query = r"
            INSERT INTO saved_passwords (user_id, server_id, ciphertext, key_generation, saved_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, server_id) DO UPDATE SET
                ciphertext = EXCLUDED.ciphertext,
                key_generation = EXCLUDED.key_generation,
                saved_at = EXCLUDED.saved_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(secret.user_id)
            .bind(secret.server_id)
            .bind(&secret.ciphertext)
            .bind(i32::try_from(secret.key_generation).unwrap_or(i32::MAX))
            .bind(secret.saved_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save password")?;
        Ok(())
    }

    async fn remove(&self, user_id: Uuid, server_id: Uuid) -> Result<()> {
        let query = "DELETE FROM saved_passwords WHERE user_id = $1 AND server_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(server_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove saved password")?;
        Ok(())
    }

    async fn remove_by_user(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM saved_passwords WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove saved passwords")?;
        Ok(())
    }

    async fn replace_for_user(&self, user_id: Uuid, secrets: Vec<EncryptedSecret>) -> Result<()> {
        // Transaction keeps the swap all-or-nothing; a failure mid-batch
        // rolls back to the old generation.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin migration transaction")?;

        sqlx::query("DELETE FROM saved_passwords WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear saved passwords")?;

        for secret in &secrets {
            sqlx::query(
                r"
                INSERT INTO saved_passwords (user_id, server_id, ciphertext, key_generation, saved_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(secret.user_id)
            .bind(secret.server_id)
            .bind(&secret.ciphertext)
            .bind(i32::try_from(secret.key_generation).unwrap_or(i32::MAX))
            .bind(secret.saved_at)
            .execute(&mut *tx)
            .await
            .context("failed to write migrated password")?;
        }

        tx.commit()
            .await
            .context("failed to commit migration transaction")?;
        Ok(())
    }
}
