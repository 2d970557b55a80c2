//! Core Data Models
//!
//! This module defines the data structures that flow through the usage pipeline, from
//! individual parsed log records up to aggregated statistics and live session blocks.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`UsageEntry`] - one billable event parsed from a JSONL line
//! 2. **Aggregation**: [`UsageStats`] with [`DailyUsage`], [`ModelUsage`] and
//!    [`ProjectUsage`] breakdowns
//! 3. **Live View**: [`SessionBlock`] with [`BurnRate`] and [`ProjectedUsage`]
//!
//! All public types serialize with camelCase field names so the presentation layer can
//! consume them as JSON directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single billable usage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub project: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
}

impl UsageEntry {
    pub fn total_tokens(&self) -> u64 {
        self.token_counts().total()
    }

    /// UTC calendar date of the event, used as the daily grouping key
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn date_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn token_counts(&self) -> TokenCounts {
        TokenCounts {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_creation_input_tokens: self.cache_creation_tokens,
            cache_read_input_tokens: self.cache_read_tokens,
        }
    }
}

/// Token counts split by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenCounts {
    /// Sum of all kinds, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }

    pub fn add(&mut self, other: &TokenCounts) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self.cache_read_input_tokens.saturating_add(other.cache_read_input_tokens);
    }
}

/// Per-day rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub tokens: TokenCounts,
    pub models_used: BTreeSet<String>,
    pub entry_count: usize,
}

/// Per-model rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub tokens: TokenCounts,
    pub session_count: usize,
    pub entry_count: usize,
}

/// Per-project rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsage {
    pub project_path: String,
    pub display_name: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub session_count: usize,
    pub entry_count: usize,
    pub last_used: Option<DateTime<Utc>>,
}

/// Top-level aggregate over a deduplicated entry set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub tokens: TokenCounts,
    pub total_sessions: usize,
    pub total_entries: usize,
    pub by_model: Vec<ModelUsage>,
    pub by_date: Vec<DailyUsage>,
    pub by_project: Vec<ProjectUsage>,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
}

impl UsageStats {
    pub fn is_empty(&self) -> bool {
        self.total_entries == 0
    }

    /// Days whose spend went above `threshold`
    pub fn days_over_threshold(&self, threshold: f64) -> Vec<&DailyUsage> {
        self.by_date
            .iter()
            .filter(|day| day.total_cost > threshold)
            .collect()
    }

    pub fn average_daily_cost(&self) -> f64 {
        if self.by_date.is_empty() {
            0.0
        } else {
            self.total_cost / self.by_date.len() as f64
        }
    }
}

/// Consumption rate inside the active session block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

/// Linear extrapolation of a block's usage to its nominal end
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedUsage {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub remaining_minutes: f64,
}

/// A bounded, contiguous window of usage activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub actual_end_time: DateTime<Utc>,
    pub is_active: bool,
    pub token_counts: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub entry_count: usize,
    pub models: BTreeSet<String>,
    pub burn_rate: Option<BurnRate>,
    pub projected_usage: Option<ProjectedUsage>,
}

impl SessionBlock {
    pub fn total_tokens(&self) -> u64 {
        self.token_counts.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> UsageEntry {
        UsageEntry {
            project: "/work/app".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 0).unwrap(),
            model: "claude-sonnet-4".to_string(),
            input_tokens: 10,
            output_tokens: 20,
            cache_creation_tokens: 30,
            cache_read_tokens: 40,
            cost: 0.5,
            session_id: None,
            message_id: None,
            request_id: None,
        }
    }

    #[test]
    fn test_total_tokens_sums_all_kinds() {
        assert_eq!(entry().total_tokens(), 100);
        assert_eq!(entry().token_counts().total(), 100);
    }

    #[test]
    fn test_date_key_is_utc_date() {
        assert_eq!(entry().date_key(), "2025-01-01");
    }

    #[test]
    fn test_session_block_serializes_cost_usd() {
        let block = SessionBlock {
            id: "b".to_string(),
            start_time: entry().timestamp,
            end_time: entry().timestamp,
            actual_end_time: entry().timestamp,
            is_active: false,
            token_counts: TokenCounts::default(),
            cost_usd: 1.25,
            entry_count: 0,
            models: BTreeSet::new(),
            burn_rate: None,
            projected_usage: None,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["costUSD"], 1.25);
        assert_eq!(json["isActive"], false);
    }
}
