//! Query interfaces consumed by presentation layers

use crate::error::UsageError;
use crate::models::{BurnRate, SessionBlock, UsageEntry, UsageStats};
use crate::repository::DateFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Historical usage
#[async_trait]
pub trait StatsQuery: Send + Sync {
    async fn load_stats(&self) -> Result<UsageStats, UsageError>;

    async fn load_stats_filtered(&self, filter: DateFilter) -> Result<UsageStats, UsageError>;

    /// Deduplicated entries, oldest first
    async fn load_entries(&self) -> Result<Vec<UsageEntry>, UsageError>;

    async fn get_date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, UsageError>;
}

/// The current session window
#[async_trait]
pub trait LiveSessionQuery: Send + Sync {
    async fn get_active_session(&self) -> Result<Option<SessionBlock>, UsageError>;

    async fn get_burn_rate(&self) -> Result<Option<BurnRate>, UsageError>;

    /// Token budget for the session: the configured limit, else the largest past block
    async fn get_auto_token_limit(&self) -> Result<Option<u64>, UsageError>;
}
