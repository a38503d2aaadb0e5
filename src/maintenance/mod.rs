//! Periodic purge of expired classification cache rows.
//!
//! Lookups already ignore and delete stale rows; the sweeper only keeps the
//! table from growing with entries nobody asks for again.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{db::Database, engine::Clock};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Default)]
pub struct CacheSweeper {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CacheSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, db: Database, clock: Arc<dyn Clock>, every: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("cache sweeper already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sweep_loop(db, clock, every, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        match self.handle.take() {
            Some(handle) => handle.await.context("cache sweeper task failed to join"),
            None => Ok(()),
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

async fn sweep_loop(
    db: Database,
    clock: Arc<dyn Clock>,
    every: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match db.purge_expired_classifications(clock.now()).await {
                    Ok(0) => {}
                    Ok(purged) => log_info!("purged {purged} expired classifications"),
                    Err(err) => log_error!("classification sweep failed: {err:?}"),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("cache sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{db::models::classification_ttl, engine::ManualClock};

    #[tokio::test]
    async fn sweeps_expired_rows_until_stopped() {
        let db = Database::in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        db.cache_classification("old", true, "fine", clock.now())
            .await
            .unwrap();
        clock.advance(classification_ttl() + chrono::Duration::minutes(1));
        db.cache_classification("new", false, "nope", clock.now())
            .await
            .unwrap();

        let mut sweeper = CacheSweeper::new();
        sweeper
            .start(db.clone(), clock.clone(), Duration::from_millis(10))
            .unwrap();
        assert!(sweeper.start(db.clone(), clock.clone(), Duration::from_millis(10)).is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.stop().await.unwrap();
        assert!(!sweeper.is_running());

        // The sweeper already removed the stale row, so nothing is left to purge.
        assert_eq!(db.purge_expired_classifications(clock.now()).await.unwrap(), 0);
        assert!(db
            .get_cached_classification("new", clock.now())
            .await
            .unwrap()
            .is_some());
    }
}
