//! Usage aggregation
//!
//! A single pass over deduplicated entries producing grand totals and the per-date,
//! per-model and per-project rollups. The fold is pure: same entries, same stats.

use crate::models::{DailyUsage, ModelUsage, ProjectUsage, TokenCounts, UsageEntry, UsageStats};
use crate::path_decoder;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Default)]
struct Bucket<'a> {
    cost: f64,
    tokens: TokenCounts,
    entries: usize,
    sessions: HashSet<&'a str>,
    models: BTreeSet<String>,
    last_used: Option<DateTime<Utc>>,
}

impl<'a> Bucket<'a> {
    fn add(&mut self, entry: &'a UsageEntry) {
        self.cost += entry.cost;
        self.tokens.add(&entry.token_counts());
        self.entries += 1;
        if let Some(session) = entry.session_id.as_deref() {
            self.sessions.insert(session);
        }
        self.last_used = self.last_used.max(Some(entry.timestamp));
    }
}

fn by_cost_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Fold entries into [`UsageStats`]; `session_count` becomes `total_sessions`
pub fn aggregate(entries: &[UsageEntry], session_count: usize) -> UsageStats {
    let mut totals = TokenCounts::default();
    let mut total_cost = 0.0;
    let mut first_entry: Option<DateTime<Utc>> = None;
    let mut last_entry: Option<DateTime<Utc>> = None;

    let mut dates: BTreeMap<String, Bucket> = BTreeMap::new();
    let mut models: HashMap<&str, Bucket> = HashMap::new();
    let mut projects: HashMap<&str, Bucket> = HashMap::new();

    for entry in entries {
        total_cost += entry.cost;
        totals.add(&entry.token_counts());
        first_entry = Some(first_entry.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
        last_entry = Some(last_entry.map_or(entry.timestamp, |t| t.max(entry.timestamp)));

        let day = dates.entry(entry.date_key()).or_default();
        day.add(entry);
        day.models.insert(entry.model.clone());

        models.entry(entry.model.as_str()).or_default().add(entry);
        projects.entry(entry.project.as_str()).or_default().add(entry);
    }

    let by_date = dates
        .into_iter()
        .map(|(date, bucket)| DailyUsage {
            date,
            total_cost: bucket.cost,
            total_tokens: bucket.tokens.total(),
            tokens: bucket.tokens,
            models_used: bucket.models,
            entry_count: bucket.entries,
        })
        .collect();

    let mut by_model: Vec<ModelUsage> = models
        .into_iter()
        .map(|(model, bucket)| ModelUsage {
            model: model.to_string(),
            total_cost: bucket.cost,
            total_tokens: bucket.tokens.total(),
            tokens: bucket.tokens,
            session_count: bucket.sessions.len(),
            entry_count: bucket.entries,
        })
        .collect();
    by_model.sort_by(|a, b| by_cost_desc(a.total_cost, b.total_cost).then_with(|| a.model.cmp(&b.model)));

    let mut by_project: Vec<ProjectUsage> = projects
        .into_iter()
        .map(|(project, bucket)| ProjectUsage {
            project_path: project.to_string(),
            display_name: project_display_name(project),
            total_cost: bucket.cost,
            total_tokens: bucket.tokens.total(),
            session_count: bucket.sessions.len(),
            entry_count: bucket.entries,
            last_used: bucket.last_used,
        })
        .collect();
    by_project.sort_by(|a, b| {
        by_cost_desc(a.total_cost, b.total_cost).then_with(|| a.project_path.cmp(&b.project_path))
    });

    UsageStats {
        total_cost,
        total_tokens: totals.total(),
        tokens: totals,
        total_sessions: session_count,
        total_entries: entries.len(),
        by_model,
        by_date,
        by_project,
        first_entry,
        last_entry,
    }
}

/// Distinct session ids across entries
pub fn count_sessions(entries: &[UsageEntry]) -> usize {
    entries
        .iter()
        .filter_map(|e| e.session_id.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

fn project_display_name(project: &str) -> String {
    std::path::Path::new(project)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_decoder::display_name(project))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(project: &str, model: &str, day: u32, hour: u32, tokens: u64, cost: f64, session: &str) -> UsageEntry {
        UsageEntry {
            project: project.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap(),
            model: model.to_string(),
            input_tokens: tokens,
            output_tokens: tokens / 2,
            cache_creation_tokens: 0,
            cache_read_tokens: 1,
            cost,
            session_id: Some(session.to_string()),
            message_id: None,
            request_id: None,
        }
    }

    fn sample() -> Vec<UsageEntry> {
        vec![
            entry("/work/api", "claude-sonnet-4", 1, 9, 100, 0.10, "s1"),
            entry("/work/api", "claude-opus-4", 1, 23, 200, 1.50, "s1"),
            entry("/work/web", "claude-sonnet-4", 2, 0, 300, 0.30, "s2"),
            entry("/work/web", "claude-sonnet-4", 4, 12, 50, 0.05, "s3"),
        ]
    }

    #[test]
    fn test_breakdowns_sum_to_totals() {
        let entries = sample();
        let stats = aggregate(&entries, count_sessions(&entries));

        let eps = 1e-9;
        let by_date: f64 = stats.by_date.iter().map(|d| d.total_cost).sum();
        let by_model: f64 = stats.by_model.iter().map(|m| m.total_cost).sum();
        let by_project: f64 = stats.by_project.iter().map(|p| p.total_cost).sum();
        assert!((stats.total_cost - 1.95).abs() < eps);
        assert!((by_date - stats.total_cost).abs() < eps);
        assert!((by_model - stats.total_cost).abs() < eps);
        assert!((by_project - stats.total_cost).abs() < eps);

        let tokens: u64 = stats.by_date.iter().map(|d| d.total_tokens).sum();
        assert_eq!(tokens, stats.total_tokens);
        assert_eq!(stats.total_tokens, entries.iter().map(UsageEntry::total_tokens).sum::<u64>());
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.total_entries, 4);
    }

    #[test]
    fn test_ordering() {
        let stats = aggregate(&sample(), 3);
        let dates: Vec<&str> = stats.by_date.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-03-02", "2025-03-04"]);
        assert_eq!(stats.by_model[0].model, "claude-opus-4");
        assert_eq!(stats.by_project[0].project_path, "/work/api");
        assert_eq!(stats.by_project[0].display_name, "api");
    }

    #[test]
    fn test_daily_models_and_sessions() {
        let stats = aggregate(&sample(), 3);
        let first_day = &stats.by_date[0];
        assert_eq!(first_day.entry_count, 2);
        assert!(first_day.models_used.contains("claude-opus-4"));
        assert!(first_day.models_used.contains("claude-sonnet-4"));

        let sonnet = stats.by_model.iter().find(|m| m.model == "claude-sonnet-4").unwrap();
        assert_eq!(sonnet.session_count, 3);
        assert_eq!(sonnet.entry_count, 3);

        let web = stats.by_project.iter().find(|p| p.project_path == "/work/web").unwrap();
        assert_eq!(web.last_used, Some(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_threshold_and_range() {
        let stats = aggregate(&sample(), 3);
        let over = stats.days_over_threshold(1.0);
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].date, "2025-03-01");
        assert_eq!(stats.first_entry, Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        assert_eq!(stats.last_entry, Some(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_token_totals_saturate() {
        let entries = vec![
            entry("/work/api", "claude-sonnet-4", 1, 9, u64::MAX - 1, 0.0, "s1"),
            entry("/work/api", "claude-sonnet-4", 1, 10, 5, 0.0, "s1"),
        ];
        let stats = aggregate(&entries, 1);
        assert_eq!(stats.total_tokens, u64::MAX);
        assert_eq!(stats.tokens.input_tokens, u64::MAX);
        assert_eq!(stats.by_date[0].total_tokens, u64::MAX);
        assert_eq!(stats.by_model[0].total_tokens, u64::MAX);
    }

    #[test]
    fn test_empty_input() {
        let stats = aggregate(&[], 0);
        assert!(stats.is_empty());
        assert_eq!(stats.total_cost, 0.0);
        assert!(stats.by_date.is_empty());
        assert_eq!(stats.average_daily_cost(), 0.0);
    }
}
