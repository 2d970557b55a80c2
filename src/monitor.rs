//! Live session monitoring
//!
//! [`LiveSessionMonitor`] answers the live-session queries from the
//! [`SessionWindower`] cache and only goes back to storage once the cached view is
//! older than the refresh interval. [`LiveSessionMonitor::watch`] drives periodic
//! refreshes until Ctrl-C.

use crate::error::UsageError;
use crate::models::{BurnRate, SessionBlock};
use crate::query::{LiveSessionQuery, StatsQuery};
use crate::session::{SessionWindower, WindowSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// What a live view renders on each tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub active: Option<SessionBlock>,
    pub token_limit: Option<u64>,
    pub token_usage_percent: Option<f64>,
}

impl LiveStatus {
    pub fn to_json(&self) -> serde_json::Value {
        match &self.active {
            Some(block) => serde_json::json!({
                "status": "active",
                "session": block,
                "tokens": {
                    "current": block.total_tokens(),
                    "limit": self.token_limit,
                    "percentage": self.token_usage_percent,
                },
            }),
            None => serde_json::json!({
                "status": "inactive",
                "message": "No active session",
                "tokens": { "limit": self.token_limit },
            }),
        }
    }
}

pub struct LiveSessionMonitor<S: StatsQuery> {
    source: Arc<S>,
    windower: SessionWindower,
    refresh_interval: Duration,
    token_limit: Option<u64>,
    last_refresh: Mutex<Option<Instant>>,
}

impl<S: StatsQuery> LiveSessionMonitor<S> {
    pub fn new(source: Arc<S>, windower: SessionWindower, refresh_interval: Duration) -> Self {
        Self {
            source,
            windower,
            refresh_interval,
            token_limit: None,
            last_refresh: Mutex::new(None),
        }
    }

    /// Use a fixed token budget instead of the one derived from past blocks
    pub fn with_token_limit(mut self, limit: Option<u64>) -> Self {
        self.token_limit = limit;
        self
    }

    pub fn windower(&self) -> &SessionWindower {
        &self.windower
    }

    /// Rescan if the cached blocks are older than the refresh interval
    pub async fn ensure_fresh(&self) -> Result<(), UsageError> {
        // Held across the reload so concurrent callers wait for one rescan
        let mut last = self.last_refresh.lock().await;
        let stale = last.map_or(true, |at| at.elapsed() >= self.refresh_interval);
        if stale {
            self.reload().await?;
            *last = Some(Instant::now());
        }
        Ok(())
    }

    /// Rescan now regardless of staleness
    pub async fn force_refresh(&self) -> Result<(), UsageError> {
        let mut last = self.last_refresh.lock().await;
        self.reload().await?;
        *last = Some(Instant::now());
        Ok(())
    }

    async fn reload(&self) -> Result<(), UsageError> {
        let entries = self.source.load_entries().await?;
        let blocks = self.windower.refresh(entries, Utc::now()).await?;
        debug!(blocks, "Live session view refreshed");
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<WindowSnapshot, UsageError> {
        self.ensure_fresh().await?;
        Ok(self.windower.snapshot().await?)
    }

    pub async fn status(&self) -> Result<LiveStatus, UsageError> {
        let active = self.get_active_session().await?;
        let token_limit = self.get_auto_token_limit().await?;
        let token_usage_percent = match (&active, token_limit) {
            (Some(block), Some(limit)) if limit > 0 => Some(block.total_tokens() as f64 * 100.0 / limit as f64),
            _ => None,
        };
        Ok(LiveStatus {
            active,
            token_limit,
            token_usage_percent,
        })
    }

    /// Call `on_update` with a fresh status every `every` until Ctrl-C
    pub async fn watch<F>(&self, every: Duration, mut on_update: F) -> Result<(), UsageError>
    where
        F: FnMut(&LiveStatus),
    {
        let mut interval = time::interval(every);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Monitoring stopped");
                    break;
                }
                _ = interval.tick() => {
                    let status = self.status().await?;
                    on_update(&status);
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<S: StatsQuery> LiveSessionQuery for LiveSessionMonitor<S> {
    async fn get_active_session(&self) -> Result<Option<SessionBlock>, UsageError> {
        self.ensure_fresh().await?;
        Ok(self.windower.active_session().await?)
    }

    async fn get_burn_rate(&self) -> Result<Option<BurnRate>, UsageError> {
        self.ensure_fresh().await?;
        Ok(self.windower.burn_rate().await?)
    }

    async fn get_auto_token_limit(&self) -> Result<Option<u64>, UsageError> {
        if self.token_limit.is_some() {
            return Ok(self.token_limit);
        }
        self.ensure_fresh().await?;
        Ok(self.windower.auto_token_limit().await?)
    }
}
