//! Usage repository
//!
//! Orchestrates one pass over the log tree:
//!
//! 1. **Discovery**: `<base>/projects/<encoded project>/*.jsonl`, ordered by the
//!    timestamp of each file's first line, then by path
//! 2. **Loading**: files are read concurrently (bounded by `parallel_files`) with
//!    results kept in discovery order
//! 3. **Parsing**: every line becomes an entry or a counted skip
//! 4. **Deduplication**: sequential, in file order, with a deduplicator created for
//!    this call only
//! 5. **Aggregation**: entries sorted by timestamp and folded into [`UsageStats`]
//!
//! A file that cannot be read is recorded in the [`ScanReport`] and skipped; only when
//! every file fails does the scan itself fail.

use crate::aggregator;
use crate::config::Config;
use crate::dedup::DedupMode;
use crate::error::{FileSystemError, GatewayError, RepositoryError, UsageError};
use crate::gateway::FileGateway;
use crate::metrics::MetricsRecorder;
use crate::models::{UsageEntry, UsageStats};
use crate::parser::{LineParser, ParsedContent, RawLine, SkipReason};
use crate::path_decoder;
use crate::query::StatsQuery;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Inclusive UTC date bounds applied to entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateFilter {
    pub fn new(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self { since, until }
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    pub fn contains(&self, entry: &UsageEntry) -> bool {
        let date = entry.date();
        self.since.map_or(true, |since| date >= since) && self.until.map_or(true, |until| date <= until)
    }
}

/// A file that was skipped during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct FileError {
    pub path: PathBuf,
    pub error: RepositoryError,
}

/// Everything one scan produced, including what it had to leave out
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scan_id: String,
    /// Deduplicated, chronological
    pub entries: Vec<UsageEntry>,
    pub errors: Vec<FileError>,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub lines_skipped: usize,
    pub duplicates_skipped: usize,
    pub skipped_by_reason: HashMap<SkipReason, usize>,
}

impl ScanReport {
    pub fn session_count(&self) -> usize {
        aggregator::count_sessions(&self.entries)
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub parallel_files: usize,
    pub max_file_size_bytes: u64,
    pub dedup: DedupMode,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        let config = Config::default();
        Self::from_config(&config)
    }
}

impl RepositoryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallel_files: config.processing.parallel_files.max(1),
            max_file_size_bytes: config.processing.max_file_size_bytes(),
            dedup: DedupMode::from_enabled(config.dedup.enabled),
        }
    }
}

#[derive(Debug, Clone)]
struct UsageFile {
    path: PathBuf,
    project: String,
    session: String,
}

pub struct UsageRepository<G: FileGateway> {
    gateway: G,
    base_path: PathBuf,
    parser: LineParser,
    options: RepositoryOptions,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<G: FileGateway> UsageRepository<G> {
    pub fn new(gateway: G, base_path: impl Into<PathBuf>, parser: LineParser, options: RepositoryOptions) -> Self {
        Self {
            gateway,
            base_path: base_path.into(),
            parser,
            options,
            metrics: None,
        }
    }

    pub fn from_config(gateway: G, config: &Config) -> Self {
        Self::new(
            gateway,
            config.paths.claude_home.clone(),
            LineParser::new(Arc::new(config.pricing.clone())),
            RepositoryOptions::from_config(config),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run the full pipeline and report what was loaded and what was skipped
    pub async fn scan(&self) -> Result<ScanReport, RepositoryError> {
        let scan_id = Uuid::new_v4().to_string();
        let base = self.base_path.display().to_string();
        let span = info_span!("scan", scan_id = %scan_id, base = %base);
        let fut = self.scan_inner(scan_id.clone()).instrument(span);

        match &self.metrics {
            Some(metrics) => {
                let metadata = [("scan_id", scan_id.as_str()), ("base", base.as_str())];
                metrics.record("repository.scan", &metadata, fut).await
            }
            None => fut.await,
        }
    }

    /// Deduplicated entries in chronological order
    pub async fn get_usage_entries(&self) -> Result<Vec<UsageEntry>, RepositoryError> {
        Ok(self.scan().await?.entries)
    }

    pub async fn get_usage_stats(&self) -> Result<UsageStats, RepositoryError> {
        self.get_usage_stats_filtered(DateFilter::default()).await
    }

    pub async fn get_usage_stats_filtered(&self, filter: DateFilter) -> Result<UsageStats, RepositoryError> {
        let report = self.scan().await?;
        let entries: Vec<UsageEntry> = if filter.is_unbounded() {
            report.entries
        } else {
            report.entries.into_iter().filter(|e| filter.contains(e)).collect()
        };

        let sessions = aggregator::count_sessions(&entries);
        let stats = match &self.metrics {
            Some(metrics) => {
                let result: Result<UsageStats, RepositoryError> =
                    metrics.record_sync("aggregate", || Ok(aggregator::aggregate(&entries, sessions)));
                result?
            }
            None => aggregator::aggregate(&entries, sessions),
        };
        Ok(stats)
    }

    /// Timestamps of the earliest and latest entries
    pub async fn get_date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, RepositoryError> {
        let entries = self.get_usage_entries().await?;
        Ok(match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        })
    }

    async fn scan_inner(&self, scan_id: String) -> Result<ScanReport, RepositoryError> {
        let mut report = ScanReport {
            scan_id,
            ..ScanReport::default()
        };

        if !self.gateway.exists(&self.base_path).await? {
            return Err(RepositoryError::InvalidPath {
                path: self.base_path.clone(),
            });
        }

        let projects_dir = self.base_path.join("projects");
        if !self.gateway.exists(&projects_dir).await? {
            info!("No projects directory yet, nothing to load");
            return Ok(report);
        }

        let files = self.discover_files(&projects_dir, &mut report).await?;
        let files = self.order_files(files).await;
        report.files_scanned = files.len();
        debug!(files = files.len(), "Discovered usage files");

        let loads: Vec<_> = files.iter().map(|file| self.load_file(file)).collect();
        let loaded: Vec<Result<ParsedContent, RepositoryError>> = stream::iter(loads)
            .buffered(self.options.parallel_files)
            .collect()
            .await;

        let dedup = self.options.dedup.create();
        for (file, result) in files.iter().zip(loaded) {
            match result {
                Ok(parsed) => {
                    for (reason, count) in parsed.skipped {
                        if reason != SkipReason::Blank {
                            report.lines_skipped += count;
                        }
                        *report.skipped_by_reason.entry(reason).or_insert(0) += count;
                    }
                    for entry in parsed.entries {
                        if dedup.should_include_entry(&entry) {
                            report.entries.push(entry);
                        } else {
                            report.duplicates_skipped += 1;
                        }
                    }
                }
                Err(error) => {
                    warn!(path = %file.path.display(), error = %error, "Skipping unreadable usage file");
                    report.files_failed += 1;
                    report.errors.push(FileError {
                        path: file.path.clone(),
                        error,
                    });
                }
            }
        }

        if report.files_scanned > 0 && report.files_failed == report.files_scanned {
            return Err(RepositoryError::BatchProcessingFailed {
                failed: report.files_failed,
                total: report.files_scanned,
            });
        }

        report.entries.sort_by_key(|e| e.timestamp);

        info!(
            files = report.files_scanned,
            failed = report.files_failed,
            entries = report.entries.len(),
            duplicates = report.duplicates_skipped,
            skipped_lines = report.lines_skipped,
            "Scan complete"
        );

        Ok(report)
    }

    async fn discover_files(&self, projects_dir: &Path, report: &mut ScanReport) -> Result<Vec<UsageFile>, RepositoryError> {
        let mut files = Vec::new();

        for project in self.gateway.list_directory(projects_dir).await? {
            if project.starts_with('.') {
                continue;
            }
            let project_dir = projects_dir.join(&project);

            let names = match self.gateway.list_directory(&project_dir).await {
                Ok(names) => names,
                // Removed between listings
                Err(GatewayError::FileSystem(FileSystemError::NotFound { .. })) => continue,
                Err(GatewayError::FileSystem(FileSystemError::ReadFailed { .. })) if project.ends_with(".jsonl") => {
                    continue
                }
                Err(err) => {
                    warn!(project = %project, error = %err, "Failed to list project directory");
                    report.errors.push(FileError {
                        path: project_dir,
                        error: err.into(),
                    });
                    continue;
                }
            };

            let decoded = path_decoder::decode_to_string(&project);
            for name in names {
                let Some(stem) = name.strip_suffix(".jsonl") else {
                    continue;
                };
                files.push(UsageFile {
                    path: project_dir.join(&name),
                    project: decoded.clone(),
                    session: stem.to_string(),
                });
            }
        }

        Ok(files)
    }

    // Files whose first line carries no timestamp go last
    async fn order_files(&self, files: Vec<UsageFile>) -> Vec<UsageFile> {
        let reads: Vec<_> = files.iter().map(|file| self.first_timestamp(&file.path)).collect();
        let first_timestamps: Vec<Option<DateTime<Utc>>> = stream::iter(reads)
            .buffered(self.options.parallel_files)
            .collect()
            .await;

        let mut keyed: Vec<(Option<DateTime<Utc>>, UsageFile)> = first_timestamps.into_iter().zip(files).collect();
        keyed.sort_by(|(ta, a), (tb, b)| {
            ta.is_none()
                .cmp(&tb.is_none())
                .then_with(|| ta.cmp(tb))
                .then_with(|| a.path.cmp(&b.path))
        });
        keyed.into_iter().map(|(_, file)| file).collect()
    }

    async fn first_timestamp(&self, path: &Path) -> Option<DateTime<Utc>> {
        match self.gateway.read_first_line(path).await {
            Ok(Some(line)) => RawLine::parse(&line).ok().and_then(|raw| raw.timestamp()),
            _ => None,
        }
    }

    async fn load_file(&self, file: &UsageFile) -> Result<ParsedContent, RepositoryError> {
        let size = self.gateway.file_size(&file.path).await?;
        if size > self.options.max_file_size_bytes {
            return Err(RepositoryError::QuotaExceeded {
                path: file.path.clone(),
                limit_bytes: self.options.max_file_size_bytes,
                actual_bytes: size,
            });
        }

        let content = self.gateway.read_file(&file.path).await?;
        Ok(self.parser.parse_content(&content, &file.project, Some(&file.session)))
    }
}

#[async_trait]
impl<G: FileGateway> StatsQuery for UsageRepository<G> {
    async fn load_stats(&self) -> Result<UsageStats, UsageError> {
        Ok(self.get_usage_stats().await?)
    }

    async fn load_stats_filtered(&self, filter: DateFilter) -> Result<UsageStats, UsageError> {
        Ok(self.get_usage_stats_filtered(filter).await?)
    }

    async fn load_entries(&self) -> Result<Vec<UsageEntry>, UsageError> {
        Ok(self.get_usage_entries().await?)
    }

    async fn get_date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, UsageError> {
        Ok(UsageRepository::get_date_range(self).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LocalFileGateway;
    use tempfile::TempDir;

    fn line(id: &str, ts: &str, input: u64) -> String {
        format!(
            r#"{{"message":{{"id":"{id}","model":"claude-sonnet-4","usage":{{"input_tokens":{input},"output_tokens":10}}}},"requestId":"req-{id}","timestamp":"{ts}"}}"#
        )
    }

    fn write(dir: &Path, project: &str, file: &str, lines: &[String]) {
        let project_dir = dir.join("projects").join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join(file), lines.join("\n")).unwrap();
    }

    fn repo(base: &Path) -> UsageRepository<LocalFileGateway> {
        UsageRepository::new(LocalFileGateway::new(), base, LineParser::default(), RepositoryOptions::default())
    }

    #[test]
    fn test_date_filter_is_inclusive() {
        let filter = DateFilter::new(NaiveDate::from_ymd_opt(2025, 1, 2), NaiveDate::from_ymd_opt(2025, 1, 3));
        let parser = LineParser::default();
        let inside = parser.parse_entry(&line("a", "2025-01-03T23:59:59Z", 1), "/p").unwrap();
        let outside = parser.parse_entry(&line("b", "2025-01-04T00:00:00Z", 1), "/p").unwrap();
        assert!(filter.contains(&inside));
        assert!(!filter.contains(&outside));
    }

    #[tokio::test]
    async fn test_scan_dedups_across_files_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "-work-api",
            "s1.jsonl",
            &[line("m2", "2025-01-01T12:00:00Z", 200), line("m1", "2025-01-01T10:00:00Z", 100)],
        );
        write(
            dir.path(),
            "-work-web",
            "s2.jsonl",
            &[line("m1", "2025-01-01T10:00:00Z", 100), "garbage".to_string()],
        );

        let report = repo(dir.path()).scan().await.unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.lines_skipped, 1);
        assert!(report.entries[0].timestamp < report.entries[1].timestamp);
        // s2 starts earlier, so its copy of m1 is the one kept
        assert_eq!(report.entries[0].project, "/work/web");
        assert_eq!(report.entries[0].session_id.as_deref(), Some("s2"));
        assert_eq!(report.entries[1].project, "/work/api");
        assert!(!report.scan_id.is_empty());
    }

    #[tokio::test]
    async fn test_missing_base_is_invalid_path() {
        let dir = TempDir::new().unwrap();
        let err = repo(&dir.path().join("absent")).scan().await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_base_without_projects_is_empty() {
        let dir = TempDir::new().unwrap();
        let stats = repo(dir.path()).get_usage_stats().await.unwrap();
        assert!(stats.is_empty());
        assert_eq!(repo(dir.path()).get_date_range().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_file_is_recorded_and_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "-small", "a.jsonl", &[line("m1", "2025-01-01T10:00:00Z", 1)]);
        write(
            dir.path(),
            "-large",
            "b.jsonl",
            &[line("m2", "2025-01-01T11:00:00Z", 1), "x".repeat(4096)],
        );

        let options = RepositoryOptions {
            max_file_size_bytes: 1024,
            ..RepositoryOptions::default()
        };
        let repo = UsageRepository::new(LocalFileGateway::new(), dir.path(), LineParser::default(), options);
        let report = repo.scan().await.unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.files_failed, 1);
        assert!(matches!(report.errors[0].error, RepositoryError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn test_all_files_failing_is_batch_failure() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "-big", "a.jsonl", &["x".repeat(2048)]);

        let options = RepositoryOptions {
            max_file_size_bytes: 10,
            ..RepositoryOptions::default()
        };
        let repo = UsageRepository::new(LocalFileGateway::new(), dir.path(), LineParser::default(), options);
        let err = repo.scan().await.unwrap_err();
        assert_eq!(err, RepositoryError::BatchProcessingFailed { failed: 1, total: 1 });
    }
}
