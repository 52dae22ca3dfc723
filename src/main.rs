use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flowpilot::driver::web::{BrowserType, PlaywrightLauncher};
use flowpilot::runner::{self, ConsoleEventListener, EventEmitter, RunOptions};
use flowpilot::utils::config::{Config, Overrides};
use flowpilot::{parser, report, smoke};

#[derive(Parser)]
#[command(name = "flowpilot")]
#[command(version = "0.1.0")]
#[command(about = "Declarative UI-flow test runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run flow file(s) or a directory of flows
    Run {
        /// Path to a flow file or directory
        path: PathBuf,

        /// Number of flows to run at once, each in its own browser
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Filter flows by tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Output directory for reports
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Write JSON and JUnit reports
        #[arg(long, default_value = "false")]
        report: bool,

        /// Run the browser headless (true/false)
        #[arg(long)]
        headless: Option<bool>,

        /// Browser engine (chromium, firefox, webkit)
        #[arg(short, long)]
        browser: Option<String>,

        /// Base URL for relative navigation
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Parse flow file(s) without launching a browser
    Validate {
        /// Path to a flow file or directory
        path: PathBuf,
    },

    /// HTTP smoke checks against the application's routes
    Smoke {
        #[arg(long, default_value = "http://localhost:5173")]
        base_url: String,

        /// Per-request timeout
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Generate report from stored results
    Report {
        /// Path to results.json
        results: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "junit")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            path,
            jobs,
            tags,
            output,
            report,
            headless,
            browser,
            base_url,
        } => {
            let browser = match browser {
                Some(name) => Some(
                    BrowserType::from_name(&name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown browser: {}", name))?,
                ),
                None => None,
            };
            let config = Config::from_env()?.with_overrides(Overrides {
                headless,
                browser,
                base_url,
            });

            println!(
                "{} Running flows from: {}",
                "▶".green().bold(),
                path.display()
            );
            println!("  Browser: {}", config.browser.as_str().cyan());
            if let Some(ref url) = config.base_url {
                println!("  Base URL: {}", url.cyan());
            }
            if jobs > 1 {
                println!("  Jobs: {}", jobs.to_string().yellow());
            }
            if let Some(ref tags_list) = tags {
                println!("  Tags: {}", tags_list.join(", ").yellow());
            }
            if report {
                println!("  Reports: {}", output.display().to_string().cyan());
            }

            let files = runner::collect_flow_files(&path)?;
            if files.is_empty() {
                println!("{} No flow files found.", "ℹ".blue());
                return Ok(());
            }
            let flows = runner::load_flows(&files)?;

            let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            ctrlc::set_handler(move || {
                println!("\n{} Cancelling, tearing sessions down...", "⏹".yellow());
                let _ = cancel_tx.send(true);
            })?;

            let (emitter, receiver) = EventEmitter::new();
            let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

            let run_report = runner::run_flows(
                flows,
                Arc::new(PlaywrightLauncher),
                config,
                RunOptions {
                    jobs,
                    tags: tags.unwrap_or_default(),
                },
                emitter,
                cancel_rx,
            )
            .await?;
            listener.await.ok();

            if report {
                report::write_reports(&run_report, &output)?;
            }

            if !run_report.all_passed() {
                std::process::exit(1);
            }
        }

        Commands::Validate { path } => {
            let files = runner::collect_flow_files(&path)?;
            let mut invalid = 0;
            for file in &files {
                match parser::parse_flow_file(file) {
                    Ok(flow) => println!(
                        "  {} {} ({} steps, {} assertions)",
                        "✓".green(),
                        flow.name,
                        flow.steps.len(),
                        flow.assertions.len()
                    ),
                    Err(e) => {
                        invalid += 1;
                        println!("  {} {}: {:#}", "✗".red(), file.display(), e);
                    }
                }
            }
            println!("{} flow(s), {} invalid", files.len(), invalid);
            if invalid > 0 {
                std::process::exit(1);
            }
        }

        Commands::Smoke {
            base_url,
            timeout_secs,
        } => {
            println!(
                "{} Smoke checking {}",
                "🔍".to_string().blue(),
                base_url.cyan()
            );
            let results = smoke::run_checks(
                &base_url,
                &smoke::default_checks(),
                Duration::from_secs(timeout_secs),
            )
            .await?;

            let mut failed = 0;
            for r in &results {
                let status = r
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                if r.passed {
                    println!("  {} {} [{}] {}ms", "✓".green(), r.path, status, r.elapsed_ms);
                } else {
                    failed += 1;
                    println!(
                        "  {} {} [{}] {}",
                        "✗".red(),
                        r.path,
                        status,
                        r.detail.red()
                    );
                }
            }
            println!(
                "  {} passed, {} failed",
                (results.len() - failed).to_string().green(),
                failed.to_string().red()
            );
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                results.display()
            );
            report::generate_report(&results, &format, output.as_deref())?;
        }
    }

    Ok(())
}
