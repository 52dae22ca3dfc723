pub mod assertions;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod flow;
pub mod resolver;
pub mod state;

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::driver::traits::BrowserLauncher;
use crate::parser::types::FlowDefinition;
use crate::parser::yaml::parse_flow_file;
use crate::report::types::RunReport;
use crate::utils::config::Config;

pub use error::{FlowError, LocatorNotFound, StepCause};
pub use events::*;
pub use flow::FlowRunner;
pub use state::*;

/// Batch options for `run_flows`
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of flows running at once, each with its own session
    pub jobs: usize,
    /// Only flows carrying all of these tags run
    pub tags: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            tags: Vec::new(),
        }
    }
}

/// Collect flow files from a file or directory, sorted by path
pub fn collect_flow_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map_or(false, |ext| ext == "yaml" || ext == "yml")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    Ok(files)
}

/// Parse every file; the first schema error aborts
pub fn load_flows(files: &[PathBuf]) -> Result<Vec<(PathBuf, FlowDefinition)>> {
    files
        .iter()
        .map(|f| {
            parse_flow_file(f)
                .with_context(|| format!("Invalid flow file: {}", f.display()))
                .map(|flow| (f.clone(), flow))
        })
        .collect()
}

/// Resolves once `cancel` carries `true`; never if the sender goes away
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Run flows in `jobs` parallel chunks and aggregate a report.
/// Results keep the input order.
pub async fn run_flows(
    flows: Vec<(PathBuf, FlowDefinition)>,
    launcher: Arc<dyn BrowserLauncher>,
    config: Config,
    options: RunOptions,
    emitter: EventEmitter,
    cancel: watch::Receiver<bool>,
) -> Result<RunReport> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    let total = flows.len();
    let selected: Vec<(usize, PathBuf, FlowDefinition)> = flows
        .into_iter()
        .filter(|(_, flow)| flow.has_tags(&options.tags))
        .enumerate()
        .map(|(i, (path, flow))| (i, path, flow))
        .collect();
    if selected.len() < total {
        emitter.emit(RunEvent::Log {
            flow_name: "-".to_string(),
            message: format!(
                "{} flow(s) skipped by tag filter {:?}",
                total - selected.len(),
                options.tags
            ),
        });
    }

    emitter.emit(RunEvent::SessionStarted {
        session_id: session_id.clone(),
        flow_count: selected.len(),
    });

    let runner = Arc::new(FlowRunner::new(launcher, config).with_emitter(emitter.clone()));
    let mut indexed: Vec<(usize, RunResult)> = Vec::with_capacity(selected.len());

    if !selected.is_empty() {
        let jobs = options.jobs.max(1).min(selected.len());
        let chunk_size = (selected.len() as f64 / jobs as f64).ceil() as usize;
        info!("Running {} flows in {} job(s)", selected.len(), jobs);

        let mut handles = Vec::new();
        for chunk in selected.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let runner = runner.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let mut results = Vec::with_capacity(chunk.len());
                for (index, path, flow) in chunk {
                    let mut result = runner.run_until(&flow, cancelled(cancel.clone())).await;
                    result.flow_path = Some(path.display().to_string());
                    results.push((index, result));
                }
                results
            }));
        }

        for handle in handles {
            indexed.extend(handle.await.context("Flow task failed")?);
        }
    }

    indexed.sort_by_key(|(i, _)| *i);
    let results: Vec<RunResult> = indexed.into_iter().map(|(_, r)| r).collect();

    let summary = RunSummary::from_results(
        &session_id,
        &results,
        started.elapsed().as_millis() as u64,
    );
    emitter.emit(RunEvent::SessionFinished {
        summary: summary.clone(),
    });

    Ok(RunReport {
        session_id,
        flows: results.iter().map(|r| r.to_report()).collect(),
        summary,
        generated_at: chrono::Local::now().to_rfc3339(),
    })
}
