use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::stats::{StatsSnapshot, StatsStore};

/// Periodic log line with the current player totals.
pub struct Heartbeat {
    inner: JobScheduler,
}

impl Heartbeat {
    /// Schedule the heartbeat on `cron_expr` and start the scheduler.
    pub async fn start(cron_expr: &str, stats: StatsStore) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        inner
            .add(heartbeat_job(cron_expr, stats)?)
            .await
            .context("Failed to add heartbeat job")?;
        inner
            .start()
            .await
            .context("Failed to start scheduler")?;

        info!("Stats heartbeat scheduled with cron: {}", cron_expr);
        Ok(Self { inner })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

fn heartbeat_job(cron_expr: &str, stats: StatsStore) -> Result<Job> {
    Job::new_async(cron_expr, move |_uuid, _lock| {
        let stats = stats.clone();
        Box::pin(async move {
            let snapshot = stats.snapshot(1).await;
            info!("Heartbeat: {}", summary(&snapshot));
        })
    })
    .with_context(|| format!("Invalid heartbeat cron expression: {}", cron_expr))
}

fn summary(snapshot: &StatsSnapshot) -> String {
    let last = snapshot
        .recent_activity
        .first()
        .map(|a| format!(", last seen {} at {}", a.username, a.timestamp))
        .unwrap_or_default();
    format!(
        "{} players, {} cards, {} points{}",
        snapshot.total_users, snapshot.total_cards, snapshot.total_points, last
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        assert!(heartbeat_job("every tuesday", StatsStore::new()).is_err());
    }

    #[tokio::test]
    async fn test_valid_cron_accepted() {
        assert!(heartbeat_job("0 0 * * * *", StatsStore::new()).is_ok());
    }

    #[tokio::test]
    async fn test_summary() {
        let stats = StatsStore::new();
        assert_eq!(
            summary(&stats.snapshot(1).await),
            "0 players, 0 cards, 0 points"
        );

        stats.record_message("1", "alice", "/start", 100).await;
        stats.record_message("2", "bob", "/start", 200).await;
        assert_eq!(
            summary(&stats.snapshot(1).await),
            "2 players, 0 cards, 0 points, last seen bob at 200"
        );
    }
}
