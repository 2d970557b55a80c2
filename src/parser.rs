//! JSONL line parsing
//!
//! Usage logs are shared by several producers and are appended while we read them, so
//! any line may be truncated, belong to a different message shape, or carry no usage
//! at all. [`LineParser::parse`] therefore never fails: every line turns into either a
//! [`UsageEntry`] or a [`SkipReason`].

use crate::models::{TokenCounts, UsageEntry};
use crate::pricing::PricingTable;
use crate::timestamp_parser::TimestampParser;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Why a line did not produce an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    Blank,
    InvalidJson,
    NotAnObject,
    MissingUsage,
    NoBillableTokens,
    InvalidTimestamp,
}

/// Result of parsing one line
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Skip(SkipReason),
    Entry(UsageEntry),
}

impl ParseOutcome {
    pub fn into_entry(self) -> Option<UsageEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Skip(_) => None,
        }
    }
}

/// A syntactically valid JSON object line, before any usage interpretation
#[derive(Debug, Clone)]
pub struct RawLine {
    fields: Map<String, Value>,
}

impl RawLine {
    pub fn parse(line: &str) -> Result<Self, SkipReason> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SkipReason::Blank);
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(SkipReason::NotAnObject),
            Err(_) => Err(SkipReason::InvalidJson),
        }
    }

    fn message(&self) -> Option<&Map<String, Value>> {
        self.fields.get("message").and_then(Value::as_object)
    }

    fn usage(&self) -> Option<&Map<String, Value>> {
        self.message()
            .and_then(|m| m.get("usage"))
            .and_then(Value::as_object)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.fields
            .get("requestId")
            .or_else(|| self.fields.get("request_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.fields
            .get("sessionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn raw_timestamp(&self) -> Option<&str> {
        self.fields.get("timestamp").and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.raw_timestamp().and_then(TimestampParser::parse)
    }

    pub fn model(&self) -> Option<&str> {
        self.message()
            .and_then(|m| m.get("model"))
            .and_then(Value::as_str)
            .filter(|model| !model.is_empty())
    }

    /// Pre-computed cost, ignored unless it is a finite non-negative number
    pub fn cost_usd(&self) -> Option<f64> {
        self.fields
            .get("costUSD")
            .and_then(Value::as_f64)
            .filter(|cost| cost.is_finite() && *cost >= 0.0)
    }

    fn token_counts(&self) -> Option<TokenCounts> {
        let usage = self.usage()?;
        Some(TokenCounts {
            input_tokens: token_field(usage, "input_tokens"),
            output_tokens: token_field(usage, "output_tokens"),
            cache_creation_input_tokens: token_field(usage, "cache_creation_input_tokens"),
            cache_read_input_tokens: token_field(usage, "cache_read_input_tokens"),
        })
    }
}

fn token_field(usage: &Map<String, Value>, key: &str) -> u64 {
    match usage.get(key) {
        Some(value) => value.as_u64().unwrap_or_else(|| {
            value
                .as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
                .unwrap_or(0)
        }),
        None => 0,
    }
}

/// Entries and skip counts for one file's content
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub entries: Vec<UsageEntry>,
    pub skipped: HashMap<SkipReason, usize>,
}

impl ParsedContent {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Turns raw lines into usage entries, costing them with the configured pricing
#[derive(Debug, Clone)]
pub struct LineParser {
    pricing: Arc<PricingTable>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(Arc::new(PricingTable::default()))
    }
}

impl LineParser {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn parse(&self, line: &str, project: &str) -> ParseOutcome {
        match RawLine::parse(line) {
            Ok(raw) => self.parse_raw(&raw, project),
            Err(reason) => ParseOutcome::Skip(reason),
        }
    }

    pub fn parse_entry(&self, line: &str, project: &str) -> Option<UsageEntry> {
        self.parse(line, project).into_entry()
    }

    pub fn parse_raw(&self, raw: &RawLine, project: &str) -> ParseOutcome {
        let Some(tokens) = raw.token_counts() else {
            return ParseOutcome::Skip(SkipReason::MissingUsage);
        };
        if tokens.total() == 0 {
            return ParseOutcome::Skip(SkipReason::NoBillableTokens);
        }
        let Some(timestamp) = raw.timestamp() else {
            return ParseOutcome::Skip(SkipReason::InvalidTimestamp);
        };

        let model = raw.model().unwrap_or("unknown").to_string();
        let cost = raw
            .cost_usd()
            .unwrap_or_else(|| self.pricing.cost_for(&model, &tokens));

        ParseOutcome::Entry(UsageEntry {
            project: project.to_string(),
            timestamp,
            model,
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            cache_creation_tokens: tokens.cache_creation_input_tokens,
            cache_read_tokens: tokens.cache_read_input_tokens,
            cost,
            session_id: raw.session_id().map(str::to_string),
            message_id: raw.message_id().map(str::to_string),
            request_id: raw.request_id().map(str::to_string),
        })
    }

    /// Parse a whole file body; lines without a `sessionId` take `fallback_session`
    pub fn parse_content(&self, content: &str, project: &str, fallback_session: Option<&str>) -> ParsedContent {
        let mut parsed = ParsedContent::default();

        for (index, line) in content.lines().enumerate() {
            match self.parse(line, project) {
                ParseOutcome::Entry(mut entry) => {
                    if entry.session_id.is_none() {
                        entry.session_id = fallback_session.map(str::to_string);
                    }
                    parsed.entries.push(entry);
                }
                ParseOutcome::Skip(reason) => {
                    if reason != SkipReason::Blank {
                        trace!(line = index + 1, reason = ?reason, "Skipping line");
                    }
                    *parsed.skipped.entry(reason).or_insert(0) += 1;
                }
            }
        }

        parsed
    }
}
