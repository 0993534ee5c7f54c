//! Hindsight CLI

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use hindsight_core::{
    AdvisorySynthesizer, CompletionSignal, ExecutionRecord, FailureSignal, HindsightConfig,
    LearningExtractor, LoopbackSignal, PatternAggregator, RatingSignal, SignalLog, SignalStore,
    StoreSnapshot, StoreSummary, BASE_DIR_ENV, DEFAULT_BASE_DIR,
};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Initialize logging with the specified verbosity level.
/// Logs go to stderr so stdout can be piped.
fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("hindsight={}", level).parse()?)
        .add_directive(format!("hindsight_core={}", level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_file(verbose >= 3)
        .with_line_number(verbose >= 3);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "hindsight")]
#[command(about = "Learn from finished tasks and advise on the next one")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage root for signals, learnings and state
    #[arg(long, env = BASE_DIR_ENV, default_value = DEFAULT_BASE_DIR, global = true)]
    base_dir: String,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output logs as JSON (for machine parsing)
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract learnings from a finished execution record
    Capture {
        /// Execution record JSON (defaults to the current execution)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Record a failed verification criterion
    Failure {
        #[arg(long)]
        work_item: String,
        #[arg(long, default_value = "")]
        phase: String,
        #[arg(long)]
        criterion: String,
        #[arg(long, default_value = "")]
        expected: String,
        #[arg(long, default_value = "")]
        observed: String,
        #[arg(long)]
        root_cause: Option<String>,
        #[arg(long)]
        capability: Option<String>,
    },
    /// Record a return to an earlier phase
    Loopback {
        #[arg(long)]
        work_item: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, default_value = "1")]
        iteration: u32,
    },
    /// Record a 1-5 rating (out-of-range scores are clamped)
    Rating {
        #[arg(long)]
        work_item: String,
        #[arg(long, allow_negative_numbers = true)]
        score: i64,
        #[arg(long)]
        feedback: Option<String>,
        /// Rating was inferred rather than given
        #[arg(long)]
        implicit: bool,
    },
    /// Record a finished task
    Complete {
        #[arg(long, default_value = "1")]
        iterations: u32,
        /// The task did not succeed
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        work_item: Option<String>,
    },
    /// Detect recurring failures and loopbacks
    Analyze {
        #[arg(long)]
        json: bool,
    },
    /// Show stats, streak and pattern summary
    #[command(alias = "stats")]
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Pre-flight advice for a request
    Check {
        /// What is about to be worked on
        request: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the newest records of one signal log
    Signals {
        #[arg(value_enum)]
        log: LogArg,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogArg {
    Failures,
    Loopbacks,
    Ratings,
    Completions,
}

impl From<LogArg> for SignalLog {
    fn from(arg: LogArg) -> Self {
        match arg {
            LogArg::Failures => SignalLog::Failures,
            LogArg::Loopbacks => SignalLog::Loopbacks,
            LogArg::Ratings => SignalLog::Ratings,
            LogArg::Completions => SignalLog::Completions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet, cli.log_json)?;

    // Expand home directory
    let base_dir = PathBuf::from(shellexpand::tilde(&cli.base_dir).to_string());
    let store = SignalStore::new(base_dir.clone());

    match cli.command {
        Commands::Check { request, json } => {
            // A broken or missing config never stops advice
            let config = HindsightConfig::load(&base_dir).await.unwrap_or_else(|e| {
                warn!(error = %e, "using default configuration");
                HindsightConfig::default()
            });
            let synthesizer = AdvisorySynthesizer::with_config(config);
            let report = match synthesizer.advise(&store, &request).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "could not read history; advising from an empty store");
                    synthesizer.synthesize(&request, &StoreSnapshot::default(), Utc::now())
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
        }

        Commands::Capture { file } => {
            let config = HindsightConfig::load(&base_dir).await?;
            let path = file.unwrap_or_else(|| store.current_execution_path());
            let record = ExecutionRecord::load(&path).await?;

            let outcome = LearningExtractor::with_config(config.extraction)
                .capture(&store, &record)
                .await?;

            print!("{}", outcome.summary);
            println!(
                "\nWrote {} learning(s); session summary at {}",
                outcome.learnings.len(),
                outcome.summary_path.display()
            );
            if !outcome.mirrored_patterns.is_empty() {
                println!("Recorded {} new pattern(s)", outcome.mirrored_patterns.len());
            }
        }

        Commands::Failure {
            work_item,
            phase,
            criterion,
            expected,
            observed,
            root_cause,
            capability,
        } => {
            let mut signal = FailureSignal::new(work_item, phase, criterion)
                .with_expected(expected)
                .with_observed(observed);
            if let Some(root_cause) = root_cause {
                signal = signal.with_root_cause(root_cause);
            }
            if let Some(capability) = capability {
                signal = signal.with_capability(capability);
            }

            store.record_failure(&signal).await?;
            println!("Recorded failure for {}: {}", signal.work_item, signal.criterion);
        }

        Commands::Loopback {
            work_item,
            from,
            to,
            reason,
            iteration,
        } => {
            let signal = LoopbackSignal::new(work_item, from, to)
                .with_reason(reason)
                .with_iteration(iteration);

            store.record_loopback(&signal).await?;
            println!(
                "Recorded loopback for {}: {} -> {}",
                signal.work_item, signal.from_phase, signal.to_phase
            );
        }

        Commands::Rating {
            work_item,
            score,
            feedback,
            implicit,
        } => {
            let mut signal = RatingSignal::new(work_item, score);
            if let Some(feedback) = feedback {
                signal = signal.with_feedback(feedback);
            }
            if implicit {
                signal = signal.implicit();
            }

            let stored = store.record_rating(&signal).await?;
            let streak = store.read_streak().await?;
            println!(
                "Recorded rating {} for {} (streak: {})",
                stored.score, stored.work_item, streak.current
            );
        }

        Commands::Complete {
            iterations,
            failed,
            work_item,
        } => {
            let mut signal = CompletionSignal::new(iterations, !failed);
            if let Some(work_item) = work_item {
                signal = signal.with_work_item(work_item);
            }

            store.record_completion(&signal).await?;
            let stats = store.read_stats().await?;
            println!(
                "Recorded {} completion in {} iteration(s) ({}/{} tasks succeeded)",
                if signal.success { "successful" } else { "failed" },
                signal.iterations,
                stats.completed_tasks,
                stats.total_tasks
            );
        }

        Commands::Analyze { json } => {
            let config = HindsightConfig::load(&base_dir).await?;
            let written = PatternAggregator::with_config(config.aggregation)
                .analyze(&store)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&written)?);
            } else if written.is_empty() {
                println!("No new patterns detected");
            } else {
                println!("Detected {} new pattern(s):", written.len());
                for pattern in written {
                    println!(
                        "  {:>3}x [{}] {}",
                        pattern.frequency, pattern.pattern_type, pattern.pattern
                    );
                    println!("        {}", pattern.recommendation);
                }
            }
        }

        Commands::Report { json } => {
            let summary = StoreSummary::load(&store).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
        }

        Commands::Signals { log, limit } => {
            let log = SignalLog::from(log);
            let records: Vec<serde_json::Value> = store
                .read_log(log)
                .await
                .with_context(|| format!("Failed to read {}", log.file_name()))?;

            if records.is_empty() {
                println!("No records in {}", log.file_name());
                return Ok(());
            }

            info!(total = records.len(), "listing signals");
            for record in records.iter().rev().take(limit) {
                println!("{}", serde_json::to_string(record)?);
            }
        }
    }

    Ok(())
}
