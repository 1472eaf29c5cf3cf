//! Scheduled cleanup of dead refresh sessions.

use crate::db::Database;
use std::time::Duration;
use tracing::{error, info};

/// How long an expired session is kept for audit before it is deleted.
pub const EXPIRED_SESSION_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once. Returns the number of sessions deleted.
pub async fn run_cleanup(db: &Database) -> u64 {
    match db
        .sessions()
        .purge_expired(EXPIRED_SESSION_RETENTION_SECS)
        .await
    {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired refresh sessions", count);
            }
            count
        }
        Err(e) => {
            error!("Failed to clean up expired refresh sessions: {}", e);
            0
        }
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        // The first tick fires immediately; startup already ran a pass
        interval.tick().await;

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
        }
    })
}
