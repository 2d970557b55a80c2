//! Terminal and JSON output
//!
//! [`DisplayManager`] renders the query results for the CLI. Every view has a JSON
//! form printed as a single pretty document on stdout, and a colored human form.

use crate::gateway::{CircuitState, CircuitStats};
use crate::metrics::MetricStats;
use crate::models::{UsageEntry, UsageStats};
use crate::monitor::LiveStatus;
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

const RULE_WIDTH: usize = 80;
const BAR_WIDTH: usize = 40;

/// `1234567` -> `1.2M`, `45300` -> `45.3K`
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

/// Local wall-clock time of a UTC timestamp
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// `[#####.....]` filled to `percent`, clamped to the bar
pub fn progress_bar(percent: f64, width: usize) -> String {
    let ratio = (percent / 100.0).clamp(0.0, 1.0);
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output to JSON: {}", e),
    }
}

fn header(title: &str) {
    println!("\n{}", "=".repeat(RULE_WIDTH).bright_cyan());
    println!("{}", title.bright_white().bold());
    println!("{}", "=".repeat(RULE_WIDTH).bright_cyan());
}

fn cost(value: f64) -> String {
    format!("${:.2}", value)
}

pub struct DisplayManager {
    daily_cost_threshold: f64,
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl DisplayManager {
    pub fn new(daily_cost_threshold: f64) -> Self {
        Self { daily_cost_threshold }
    }

    pub fn display_no_data(&self, json_output: bool) {
        if json_output {
            print_json(&serde_json::json!({ "message": "No usage data found" }));
        } else {
            println!("{}", "No usage data found".bright_yellow());
        }
    }

    pub fn display_stats(&self, stats: &UsageStats, json_output: bool) {
        if json_output {
            print_json(stats);
            return;
        }

        header("Usage Report - Daily with Model and Project Breakdown");

        println!(
            "\n{} {} days • {} sessions • {} entries • {} tokens • {} total\n",
            "📊".bright_yellow(),
            stats.by_date.len().to_string().bright_white().bold(),
            stats.total_sessions.to_string().bright_white().bold(),
            stats.total_entries.to_string().bright_white().bold(),
            format_tokens(stats.total_tokens).bright_white().bold(),
            cost(stats.total_cost).bright_green().bold()
        );

        for day in &stats.by_date {
            let over = day.total_cost > self.daily_cost_threshold;
            let day_cost = if over {
                cost(day.total_cost).bright_red().bold()
            } else {
                cost(day.total_cost).bright_green().bold()
            };
            println!(
                "{} {} — {} ({} tokens, {} entries){}",
                "📅".bright_blue(),
                day.date.bright_white().bold(),
                day_cost,
                format_tokens(day.total_tokens).bright_white(),
                day.entry_count.to_string().bright_white(),
                if over { "  ⚠ over daily threshold".bright_red().to_string() } else { String::new() }
            );
            let models: Vec<&str> = day.models_used.iter().map(String::as_str).collect();
            println!("   {}", models.join(", ").dimmed());
        }

        if !stats.by_model.is_empty() {
            println!("\n{}", "Models".bright_white().bold());
            for model in &stats.by_model {
                let share = if stats.total_cost > 0.0 {
                    model.total_cost / stats.total_cost * 100.0
                } else {
                    0.0
                };
                println!(
                    "   {}: {} ({}%, {} tokens, {} sessions)",
                    model.model.bright_cyan(),
                    cost(model.total_cost).bright_green(),
                    format!("{:.0}", share).bright_yellow(),
                    format_tokens(model.total_tokens).bright_white(),
                    model.session_count.to_string().bright_white()
                );
            }
        }

        if !stats.by_project.is_empty() {
            println!("\n{}", "Projects".bright_white().bold());
            for project in &stats.by_project {
                let last_used = project
                    .last_used
                    .map(format_time)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "   {}: {} ({} sessions, last used {})",
                    project.display_name.bright_cyan(),
                    cost(project.total_cost).bright_green(),
                    project.session_count.to_string().bright_white(),
                    last_used.dimmed()
                );
            }
        }

        println!(
            "\n{} {}",
            "Average per day:".bright_white(),
            cost(stats.average_daily_cost()).bright_green()
        );
    }

    /// Most recent entries, oldest of them first
    pub fn display_entries(&self, entries: &[UsageEntry], json_output: bool) {
        if json_output {
            print_json(&serde_json::json!({ "entries": entries }));
            return;
        }

        header("Usage Entries");
        println!(
            "{:<17} {:<28} {:<20} {:>10} {:>10}",
            "Time", "Model", "Project", "Tokens", "Cost"
        );
        for entry in entries {
            let project = Path::new(&entry.project)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.project.clone());
            println!(
                "{:<17} {:<28} {:<20} {:>10} {:>10}",
                format_time(entry.timestamp),
                entry.model.bright_cyan(),
                project,
                format_tokens(entry.total_tokens()),
                cost(entry.cost).bright_green()
            );
        }
        println!("\n{} entries shown", entries.len().to_string().bright_white().bold());
    }

    pub fn display_session(&self, status: &LiveStatus, json_output: bool) {
        if json_output {
            print_json(&status.to_json());
            return;
        }

        header("Live Session");

        let Some(block) = &status.active else {
            println!("{}", "No active session".bright_yellow());
            if let Some(limit) = status.token_limit {
                println!("Token limit: {}", format_tokens(limit).bright_white());
            }
            return;
        };

        println!(
            "{} {} → {} (last activity {})",
            "⏱".bright_blue(),
            format_time(block.start_time).bright_white().bold(),
            format_time(block.end_time).bright_white().bold(),
            format_time(block.actual_end_time).dimmed()
        );
        println!(
            "Tokens: {} • Cost: {} • Entries: {}",
            format_tokens(block.total_tokens()).bright_white().bold(),
            cost(block.cost_usd).bright_green().bold(),
            block.entry_count.to_string().bright_white()
        );
        let models: Vec<&str> = block.models.iter().map(String::as_str).collect();
        println!("Models: {}", models.join(", ").bright_cyan());

        if let (Some(limit), Some(percent)) = (status.token_limit, status.token_usage_percent) {
            let bar = progress_bar(percent, BAR_WIDTH);
            let bar = if percent >= 90.0 {
                bar.bright_red()
            } else if percent >= 70.0 {
                bar.bright_yellow()
            } else {
                bar.bright_green()
            };
            println!(
                "{} {:.1}% of {}",
                bar,
                percent,
                format_tokens(limit)
            );
        }

        if let Some(rate) = &block.burn_rate {
            println!(
                "Burn rate: {} tokens/min • {}/hour",
                format!("{:.0}", rate.tokens_per_minute).bright_yellow(),
                cost(rate.cost_per_hour).bright_green()
            );
        }
        if let Some(projection) = &block.projected_usage {
            println!(
                "Projected: {} tokens • {} ({:.0} min remaining)",
                format_tokens(projection.total_tokens).bright_white(),
                cost(projection.total_cost).bright_green(),
                projection.remaining_minutes
            );
        }
    }

    pub fn display_metrics(&self, stats: &[MetricStats], report: &str, breaker: &CircuitStats, json_output: bool) {
        if json_output {
            print_json(&serde_json::json!({
                "operations": stats,
                "circuitBreaker": breaker,
            }));
            return;
        }

        header("Operation Metrics");
        print!("{}", report);

        let state = breaker.state.to_string();
        let state = match breaker.state {
            CircuitState::Closed => state.bright_green(),
            CircuitState::HalfOpen => state.bright_yellow(),
            CircuitState::Open => state.bright_red(),
        };
        println!(
            "\nCircuit breaker: {} • {} calls • {} failures ({:.1}%) • {} rejected",
            state.bold(),
            breaker.total_calls,
            breaker.total_failures,
            breaker.failure_rate() * 100.0,
            breaker.rejected_calls
        );
    }
}
