//! Refresh session storage.
//!
//! Only refresh tokens are tracked server-side; access tokens are stateless.
//! A session row is never reactivated: `revoked_at` is only ever set, and only
//! when it is still NULL.

use sqlx::sqlite::SqlitePool;

use crate::clock::unix_now;

/// Device metadata recorded with a session for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Why a session was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeReason {
    Logout,
    Rotated,
    RevokedByUser,
    RevokedByAdmin,
    AccountDisabled,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Logout => "logout",
            RevokeReason::Rotated => "rotated",
            RevokeReason::RevokedByUser => "revoked_by_user",
            RevokeReason::RevokedByAdmin => "revoked_by_admin",
            RevokeReason::AccountDisabled => "account_disabled",
        }
    }
}

/// A stored refresh session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshSession {
    pub token_id: String,
    pub user_id: i64,
    pub issued_at: i64,
    pub expires_at: i64,
    pub revoked_at: Option<i64>,
    pub revoked_reason: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshSession {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at <= now as i64
    }
}

/// Fields for inserting a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub token_id: String,
    pub user_id: i64,
    pub issued_at: u64,
    pub expires_at: u64,
    pub fingerprint: Fingerprint,
}

/// Result of [`SessionStore::rotate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// New session stored, old session revoked
    Rotated,
    /// The old session was already revoked (or never existed); nothing was written
    Superseded,
}

const SESSION_COLUMNS: &str = "token_id, user_id, issued_at, expires_at, revoked_at, \
                               revoked_reason, user_agent, ip_address";

/// Store for refresh sessions.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new active session.
    pub async fn save(&self, session: &NewSession) -> Result<(), sqlx::Error> {
        insert_session(&self.pool, session).await
    }

    /// Look up a session by token ID. Absence is `Ok(None)`.
    pub async fn find(&self, token_id: &str) -> Result<Option<RefreshSession>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM refresh_sessions WHERE token_id = ?"
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Revoke a session. Returns false if it does not exist or was already revoked.
    pub async fn revoke(&self, token_id: &str, reason: RevokeReason) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = ?, revoked_reason = ?
             WHERE token_id = ? AND revoked_at IS NULL",
        )
        .bind(unix_now() as i64)
        .bind(reason.as_str())
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace `old_token_id` with `new` in one transaction.
    ///
    /// The new row is inserted before the old one is revoked. If the old row is
    /// no longer active when the revoke runs, the transaction is rolled back, so
    /// a given token can be rotated at most once.
    pub async fn rotate(
        &self,
        old_token_id: &str,
        new: &NewSession,
    ) -> Result<RotateOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        insert_session(&mut *tx, new).await?;

        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = ?, revoked_reason = ?
             WHERE token_id = ? AND revoked_at IS NULL",
        )
        .bind(unix_now() as i64)
        .bind(RevokeReason::Rotated.as_str())
        .bind(old_token_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(RotateOutcome::Superseded);
        }

        tx.commit().await?;
        Ok(RotateOutcome::Rotated)
    }

    /// List the active (not revoked, not expired) sessions of a user, newest first.
    pub async fn list_active_by_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<RefreshSession>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM refresh_sessions
             WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ?
             ORDER BY issued_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .bind(unix_now() as i64)
        .fetch_all(&self.pool)
        .await
    }

    /// Revoke every active session of a user (logout everywhere).
    pub async fn revoke_all_by_user(
        &self,
        user_id: i64,
        reason: RevokeReason,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = ?, revoked_reason = ?
             WHERE user_id = ? AND revoked_at IS NULL",
        )
        .bind(unix_now() as i64)
        .bind(reason.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete sessions that expired more than `retention_secs` ago.
    pub async fn purge_expired(&self, retention_secs: u64) -> Result<u64, sqlx::Error> {
        let cutoff = unix_now().saturating_sub(retention_secs) as i64;
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE expires_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_session<'e, E>(executor: E, session: &NewSession) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO refresh_sessions (token_id, user_id, issued_at, expires_at, user_agent, ip_address)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&session.token_id)
    .bind(session.user_id)
    .bind(session.issued_at as i64)
    .bind(session.expires_at as i64)
    .bind(session.fingerprint.user_agent.as_deref())
    .bind(session.fingerprint.ip_address.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}
