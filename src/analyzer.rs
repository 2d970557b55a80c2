//! Usage Analyzer
//!
//! The composition root: builds the gateway stack, repository, session windower and
//! live monitor from a [`Config`] and drives the CLI commands against them.
//!
//! ```text
//! LocalFileGateway -> CircuitBreakerGateway -> UsageRepository -> LiveSessionMonitor
//!                                                    |                   |
//!                                             MetricsRecorder     SessionWindower
//! ```
//!
//! Loads go through [`execute_with_recovery`] with the configured retry policy, so a
//! transient read failure or an open circuit is retried before the command gives up.

use crate::config::Config;
use crate::display::DisplayManager;
use crate::gateway::{CircuitBreaker, CircuitBreakerGateway, LocalFileGateway};
use crate::metrics::MetricsRecorder;
use crate::monitor::LiveSessionMonitor;
use crate::recovery::{execute_with_recovery, RecoveryStrategy};
use crate::repository::{DateFilter, UsageRepository};
use crate::session::SessionWindower;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub type LocalRepository = UsageRepository<CircuitBreakerGateway<LocalFileGateway>>;

pub struct UsageAnalyzer {
    config: Config,
    repository: Arc<LocalRepository>,
    monitor: LiveSessionMonitor<LocalRepository>,
    metrics: Arc<MetricsRecorder>,
    breaker: Arc<CircuitBreaker>,
    display: DisplayManager,
}

impl UsageAnalyzer {
    /// Wire every component from `config`; must be called inside a tokio runtime
    pub fn from_config(config: Config) -> Self {
        let gateway = CircuitBreakerGateway::new(LocalFileGateway::new(), config.circuit_breaker_config());
        let breaker = gateway.breaker().clone();
        let metrics = Arc::new(MetricsRecorder::from_config(&config.metrics));

        let repository = Arc::new(UsageRepository::from_config(gateway, &config).with_metrics(metrics.clone()));

        let windower = SessionWindower::spawn(config.session_duration());
        let monitor = LiveSessionMonitor::new(repository.clone(), windower, config.refresh_interval())
            .with_token_limit(config.session.token_limit);

        let display = DisplayManager::new(config.session.daily_cost_threshold);

        info!(
            claude_home = %config.paths.claude_home.display(),
            parallel_files = config.processing.parallel_files,
            dedup = config.dedup.enabled,
            "Usage analyzer initialized"
        );

        Self {
            config,
            repository,
            monitor,
            metrics,
            breaker,
            display,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Arc<LocalRepository> {
        &self.repository
    }

    pub fn monitor(&self) -> &LiveSessionMonitor<LocalRepository> {
        &self.monitor
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn retry_strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::Retry(self.config.retry_policy())
    }

    pub async fn run_stats(&self, json_output: bool, filter: DateFilter) -> Result<()> {
        let repository = self.repository.as_ref();
        let stats = execute_with_recovery("load_stats", &self.retry_strategy(), move || {
            repository.get_usage_stats_filtered(filter)
        })
        .await?
        .unwrap_or_default();

        if stats.is_empty() {
            self.display.display_no_data(json_output);
            return Ok(());
        }

        let over = stats.days_over_threshold(self.config.session.daily_cost_threshold);
        if !over.is_empty() {
            info!(
                days = over.len(),
                threshold = self.config.session.daily_cost_threshold,
                "Daily cost threshold exceeded"
            );
        }

        self.display.display_stats(&stats, json_output);
        Ok(())
    }

    /// Print the `limit` most recent entries, all of them when `None`
    pub async fn run_entries(&self, json_output: bool, limit: Option<usize>) -> Result<()> {
        let repository = self.repository.as_ref();
        let mut entries = execute_with_recovery("load_entries", &self.retry_strategy(), move || {
            repository.get_usage_entries()
        })
        .await?
        .unwrap_or_default();

        if entries.is_empty() {
            self.display.display_no_data(json_output);
            return Ok(());
        }

        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }

        self.display.display_entries(&entries, json_output);
        Ok(())
    }

    pub async fn run_session(&self, json_output: bool, watch: bool) -> Result<()> {
        if !watch {
            let status = self.monitor.status().await?;
            self.display.display_session(&status, json_output);
            return Ok(());
        }

        info!(
            every_secs = self.config.session.refresh_interval_secs,
            "Watching live session, Ctrl-C to stop"
        );
        let display = &self.display;
        self.monitor
            .watch(self.config.refresh_interval(), |status| {
                if !json_output {
                    // Clear screen and home the cursor
                    print!("\x1B[2J\x1B[1;1H");
                }
                display.display_session(status, json_output);
            })
            .await?;
        Ok(())
    }

    /// Scan once and report operation timings and breaker counters for that scan
    pub async fn run_metrics(&self, json_output: bool) -> Result<()> {
        if !self.metrics.is_enabled() {
            anyhow::bail!("Metrics are disabled (metrics.enabled = false)");
        }

        let report = self.repository.scan().await?;
        info!(
            scan_id = %report.scan_id,
            files = report.files_scanned,
            entries = report.entries.len(),
            "Scan finished for metrics"
        );

        self.display.display_metrics(
            &self.metrics.all_stats(),
            &self.metrics.generate_report(),
            &self.breaker.stats(),
            json_output,
        );
        Ok(())
    }
}
