//! Session windowing
//!
//! Usage is grouped into session blocks of a fixed nominal length. The pure functions
//! here build blocks and derive burn rate and projections from them; the
//! [`SessionWindower`] actor owns the most recent result so that concurrent readers
//! see one consistent cache.
//!
//! ## Block rules
//!
//! Over chronologically sorted entries a new block starts:
//! - at the first entry
//! - when the gap since the previous entry exceeds the session duration
//! - when an entry falls at or after the current block's nominal end
//!
//! A block is active while less than one session duration has passed since its last
//! entry.

use crate::error::SessionError;
use crate::models::{BurnRate, ProjectedUsage, SessionBlock, TokenCounts, UsageEntry};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

fn new_block(start: DateTime<Utc>, duration: Duration) -> SessionBlock {
    SessionBlock {
        id: start.to_rfc3339(),
        start_time: start,
        end_time: start + duration,
        actual_end_time: start,
        is_active: false,
        token_counts: TokenCounts::default(),
        cost_usd: 0.0,
        entry_count: 0,
        models: BTreeSet::new(),
        burn_rate: None,
        projected_usage: None,
    }
}

fn add_to_block(block: &mut SessionBlock, entry: &UsageEntry) {
    block.token_counts.add(&entry.token_counts());
    block.cost_usd += entry.cost;
    block.entry_count += 1;
    block.models.insert(entry.model.clone());
    block.actual_end_time = entry.timestamp;
}

fn finish_block(mut block: SessionBlock, duration: Duration, now: DateTime<Utc>) -> SessionBlock {
    block.is_active = now - block.actual_end_time < duration;
    if block.is_active {
        let rate = calculate_burn_rate(&block, now);
        block.projected_usage = Some(project_usage(&block, &rate, now));
        block.burn_rate = Some(rate);
    }
    block
}

/// Group chronologically sorted entries into session blocks
pub fn identify_blocks(entries: &[UsageEntry], duration: Duration, now: DateTime<Utc>) -> Vec<SessionBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<SessionBlock> = None;

    for entry in entries {
        let starts_new = match &current {
            None => true,
            Some(block) => {
                entry.timestamp - block.actual_end_time > duration || entry.timestamp >= block.end_time
            }
        };

        if starts_new {
            if let Some(done) = current.take() {
                blocks.push(finish_block(done, duration, now));
            }
            current = Some(new_block(entry.timestamp, duration));
        }
        if let Some(block) = current.as_mut() {
            add_to_block(block, entry);
        }
    }

    if let Some(done) = current {
        blocks.push(finish_block(done, duration, now));
    }

    blocks
}

/// Rates since the block started, with at least one minute elapsed
pub fn calculate_burn_rate(block: &SessionBlock, now: DateTime<Utc>) -> BurnRate {
    let elapsed_minutes = ((now - block.start_time).num_milliseconds() as f64 / 60_000.0).max(1.0);
    BurnRate {
        tokens_per_minute: block.total_tokens() as f64 / elapsed_minutes,
        cost_per_hour: block.cost_usd / elapsed_minutes * 60.0,
    }
}

/// Extrapolate the current rate to the block's nominal end
pub fn project_usage(block: &SessionBlock, burn_rate: &BurnRate, now: DateTime<Utc>) -> ProjectedUsage {
    let remaining_minutes = ((block.end_time - now).num_milliseconds() as f64 / 60_000.0).max(0.0);
    let projected_tokens = block.total_tokens() as f64 + burn_rate.tokens_per_minute * remaining_minutes;
    ProjectedUsage {
        total_tokens: projected_tokens.round() as u64,
        total_cost: block.cost_usd + burn_rate.cost_per_hour / 60.0 * remaining_minutes,
        remaining_minutes,
    }
}

/// Largest token total over closed blocks
pub fn auto_token_limit(blocks: &[SessionBlock]) -> Option<u64> {
    blocks
        .iter()
        .filter(|b| !b.is_active)
        .map(SessionBlock::total_tokens)
        .max()
}

/// Everything the windower currently holds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub blocks: Vec<SessionBlock>,
    pub active: Option<SessionBlock>,
    pub auto_token_limit: Option<u64>,
    pub last_refresh: Option<DateTime<Utc>>,
}

enum Command {
    Refresh {
        entries: Vec<UsageEntry>,
        now: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    ActiveSession {
        reply: oneshot::Sender<Option<SessionBlock>>,
    },
    BurnRate {
        reply: oneshot::Sender<Option<BurnRate>>,
    },
    AutoTokenLimit {
        reply: oneshot::Sender<Option<u64>>,
    },
    Blocks {
        reply: oneshot::Sender<Vec<SessionBlock>>,
    },
    Snapshot {
        reply: oneshot::Sender<WindowSnapshot>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

struct WindowerState {
    duration: Duration,
    blocks: Vec<SessionBlock>,
    last_refresh: Option<DateTime<Utc>>,
}

impl WindowerState {
    fn active(&self) -> Option<&SessionBlock> {
        self.blocks.iter().rev().find(|b| b.is_active)
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver only means the caller went away
        match command {
            Command::Refresh { mut entries, now, reply } => {
                entries.sort_by_key(|e| e.timestamp);
                self.blocks = identify_blocks(&entries, self.duration, now);
                self.last_refresh = Some(now);
                debug!(blocks = self.blocks.len(), entries = entries.len(), "Session blocks rebuilt");
                let _ = reply.send(self.blocks.len());
            }
            Command::ActiveSession { reply } => {
                let _ = reply.send(self.active().cloned());
            }
            Command::BurnRate { reply } => {
                let _ = reply.send(self.active().and_then(|b| b.burn_rate));
            }
            Command::AutoTokenLimit { reply } => {
                let _ = reply.send(auto_token_limit(&self.blocks));
            }
            Command::Blocks { reply } => {
                let _ = reply.send(self.blocks.clone());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(WindowSnapshot {
                    blocks: self.blocks.clone(),
                    active: self.active().cloned(),
                    auto_token_limit: auto_token_limit(&self.blocks),
                    last_refresh: self.last_refresh,
                });
            }
            Command::Clear { reply } => {
                self.blocks.clear();
                self.last_refresh = None;
                let _ = reply.send(());
            }
        }
    }
}

/// Handle to the task owning the session cache; cheap to clone
#[derive(Debug, Clone)]
pub struct SessionWindower {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Refresh { .. } => "Refresh",
            Self::ActiveSession { .. } => "ActiveSession",
            Self::BurnRate { .. } => "BurnRate",
            Self::AutoTokenLimit { .. } => "AutoTokenLimit",
            Self::Blocks { .. } => "Blocks",
            Self::Snapshot { .. } => "Snapshot",
            Self::Clear { .. } => "Clear",
        };
        f.write_str(name)
    }
}

impl SessionWindower {
    /// Start the windower on the current tokio runtime; it stops when every handle is dropped
    pub fn spawn(duration: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(32);
        let mut state = WindowerState {
            duration,
            blocks: Vec::new(),
            last_refresh: None,
        };

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                state.handle(command);
            }
            info!("Session windower stopped");
        });

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| SessionError::Unavailable)?;
        rx.await.map_err(|_| SessionError::Unavailable)
    }

    /// Rebuild blocks from `entries` as of `now`; returns the number of blocks
    pub async fn refresh(&self, entries: Vec<UsageEntry>, now: DateTime<Utc>) -> Result<usize, SessionError> {
        self.request(|reply| Command::Refresh { entries, now, reply }).await
    }

    pub async fn active_session(&self) -> Result<Option<SessionBlock>, SessionError> {
        self.request(|reply| Command::ActiveSession { reply }).await
    }

    pub async fn burn_rate(&self) -> Result<Option<BurnRate>, SessionError> {
        self.request(|reply| Command::BurnRate { reply }).await
    }

    pub async fn auto_token_limit(&self) -> Result<Option<u64>, SessionError> {
        self.request(|reply| Command::AutoTokenLimit { reply }).await
    }

    pub async fn blocks(&self) -> Result<Vec<SessionBlock>, SessionError> {
        self.request(|reply| Command::Blocks { reply }).await
    }

    pub async fn snapshot(&self) -> Result<WindowSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn clear_cache(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Clear { reply }).await
    }
}
