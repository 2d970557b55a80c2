use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::process;
use usage_monitor::logging::init_logging;
use usage_monitor::repository::DateFilter;
use usage_monitor::{Config, UsageAnalyzer};

#[derive(Parser)]
#[command(name = "usage-monitor")]
#[command(about = "Usage statistics and live session tracking for Claude usage logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show totals with daily, model and project breakdowns
    Stats {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Start date filter (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// End date filter (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
    },
    /// List individual usage entries
    Entries {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Show the last N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the active session window
    Session {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Keep refreshing until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Scan once and report operation timings
    Metrics {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Self::Stats { json, .. }
            | Self::Entries { json, .. }
            | Self::Session { json, .. }
            | Self::Metrics { json } => *json,
        }
    }
}

fn parse_date(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("Invalid {} date format: {}. Use YYYY-MM-DD", flag, s))
        })
        .transpose()
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let analyzer = UsageAnalyzer::from_config(config);

    match command {
        Commands::Stats { json, since, until } => {
            let filter = DateFilter::new(
                parse_date(since.as_deref(), "since")?,
                parse_date(until.as_deref(), "until")?,
            );
            analyzer.run_stats(json, filter).await
        }
        Commands::Entries { json, limit } => analyzer.run_entries(json, limit).await,
        Commands::Session { json, watch } => analyzer.run_session(json, watch).await,
        Commands::Metrics { json } => analyzer.run_metrics(json).await,
    }
}

fn handle_error(e: anyhow::Error, json: bool) -> ! {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    } else {
        eprintln!("Error: {:#}", e);
    }
    process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Stats {
        json: false,
        since: None,
        until: None,
    });
    let json = command.json();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => handle_error(e, json),
    };

    // Flushes buffered file logs on drop
    let guard = init_logging(&config);

    if let Err(e) = run(command, config).await {
        drop(guard);
        handle_error(e, json);
    }
}
