//! Usage Monitor Library
//!
//! Reads the JSONL usage logs a Claude CLI writes under `<claude home>/projects/` and
//! turns them into deduplicated, priced usage statistics and a live view of the current
//! session window.
//!
//! ## Core Features
//!
//! - **Resilient storage access**: every file system call goes through a
//!   [`gateway::FileGateway`] guarded by a circuit breaker with per-call timeouts
//! - **Lenient parsing**: malformed lines are skipped and counted, never fatal
//! - **Deduplication**: repeated `(message id, request id)` pairs are counted once
//!   across all files of a scan
//! - **Live sessions**: fixed-length session blocks with burn rate and projections,
//!   served from an actor that owns the cache
//! - **Operation metrics**: timing percentiles for scans and aggregation
//!
//! ## Architecture Overview
//!
//! - [`gateway`] - File access trait, local implementation and circuit breaker wrapper
//! - [`parser`] - JSONL line parsing and cost derivation
//! - [`dedup`] - Duplicate suppression strategies
//! - [`repository`] - Discovery, bounded-concurrency loading and the scan pipeline
//! - [`aggregator`] - Daily, model and project rollups
//! - [`session`] - Session block identification and the [`session::SessionWindower`] actor
//! - [`monitor`] - Live session queries with refresh-interval caching
//! - [`recovery`] - Retry, skip and fallback strategies
//! - [`metrics`] - Operation timing
//! - [`config`] / [`logging`] - Startup configuration and tracing setup
//!
//! ## Main Entry Point
//!
//! ```rust,no_run
//! use usage_monitor::{Config, UsageAnalyzer};
//! use usage_monitor::repository::DateFilter;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let analyzer = UsageAnalyzer::from_config(Config::load()?);
//! analyzer.run_stats(false, DateFilter::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod dedup;
pub mod display;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod path_decoder;
pub mod pricing;
pub mod query;
pub mod recovery;
pub mod repository;
pub mod session;
pub mod timestamp_parser;

pub use analyzer::UsageAnalyzer;
pub use config::Config;
pub use error::{GatewayError, Recoverable, RepositoryError, SessionError, UsageError};
pub use models::*;
pub use query::{LiveSessionQuery, StatsQuery};
