use super::state::{Phase, RunSummary};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Run events for real-time updates
#[derive(Debug, Clone)]
pub enum RunEvent {
    // Session events
    SessionStarted {
        session_id: String,
        flow_count: usize,
    },
    SessionFinished {
        summary: RunSummary,
    },

    // Flow events
    FlowStarted {
        flow_name: String,
        step_count: usize,
        assertion_count: usize,
    },
    FlowFinished {
        flow_name: String,
        passed: bool,
        error: Option<String>,
        duration_ms: u64,
    },

    // Step and assertion events
    StepStarted {
        flow_name: String,
        phase: Phase,
        index: usize,
        display: String,
    },
    StepPassed {
        flow_name: String,
        phase: Phase,
        index: usize,
        duration_ms: u64,
    },
    StepDegraded {
        flow_name: String,
        phase: Phase,
        index: usize,
        note: String,
        duration_ms: u64,
    },
    StepFailed {
        flow_name: String,
        phase: Phase,
        index: usize,
        error: String,
        duration_ms: u64,
    },

    Log {
        flow_name: String,
        message: String,
    },
}

/// Event emitter for broadcasting run events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        // Flows may run concurrently, so spinners are keyed by flow
        let mut spinners: HashMap<String, (ProgressBar, String)> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Console listener skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::SessionStarted {
                    session_id,
                    flow_count,
                } => {
                    multi
                        .println(format!(
                            "\n{} Run started: {} ({} flows)",
                            "▶".green().bold(),
                            session_id.cyan(),
                            flow_count
                        ))
                        .ok();
                }

                RunEvent::SessionFinished { summary } => {
                    for (_, (pb, _)) in spinners.drain() {
                        pb.finish();
                    }

                    println!("\n{} Run finished", "■".blue().bold());
                    println!("  Total flows: {}", summary.total_flows);
                    println!("  Total steps: {}", summary.total_steps);
                    println!(
                        "  {} passed, {} failed",
                        summary.passed.to_string().green(),
                        summary.failed.to_string().red()
                    );
                    if let Some(duration) = summary.total_duration_ms {
                        println!("  Duration: {}ms", duration);
                    }
                }

                RunEvent::FlowStarted {
                    flow_name,
                    step_count,
                    assertion_count,
                } => {
                    multi
                        .println(format!(
                            "\n  {} Flow: {} ({} steps, {} assertions)",
                            "→".blue(),
                            flow_name.white().bold(),
                            step_count,
                            assertion_count
                        ))
                        .ok();
                }

                RunEvent::FlowFinished {
                    flow_name,
                    passed,
                    error,
                    duration_ms,
                } => {
                    if let Some((pb, _)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                    }
                    let status = if passed {
                        "PASSED".green().bold()
                    } else {
                        "FAILED".red().bold()
                    };
                    multi
                        .println(format!(
                            "  {} Flow {} [{}] {}ms",
                            "←".blue(),
                            flow_name,
                            status,
                            duration_ms
                        ))
                        .ok();
                    if let Some(err) = error {
                        multi.println(format!("      {}", err.red())).ok();
                    }
                }

                RunEvent::StepStarted {
                    flow_name,
                    phase,
                    index,
                    display,
                } => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    let body = format!("[{}{}] {}... ", prefix(phase), index, display.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));

                    if let Some((old, _)) = spinners.insert(flow_name, (pb, body)) {
                        old.finish_and_clear();
                    }
                }

                RunEvent::StepPassed {
                    flow_name,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {}({}ms)", "✓".green(), body, duration_ms))
                            .ok();
                    }
                }

                RunEvent::StepDegraded {
                    flow_name,
                    note,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                        multi
                            .println(format!(
                                "    {} {}({}ms, {})",
                                "!".yellow(),
                                body,
                                duration_ms,
                                note.dimmed()
                            ))
                            .ok();
                    }
                }

                RunEvent::StepFailed {
                    flow_name,
                    phase,
                    index,
                    duration_ms,
                    ..
                } => {
                    let body = match spinners.remove(&flow_name) {
                        Some((pb, body)) => {
                            pb.finish_and_clear();
                            body
                        }
                        None => format!("[{}{}] ", prefix(phase), index),
                    };
                    multi
                        .println(format!("    {} {}({}ms)", "✗".red(), body, duration_ms))
                        .ok();
                }

                RunEvent::Log { flow_name, message } => {
                    multi
                        .println(format!("      {} {}", flow_name.dimmed(), message))
                        .ok();
                }
            }
        }
    }
}

fn prefix(phase: Phase) -> &'static str {
    match phase {
        Phase::Session => "session ",
        Phase::Step => "",
        Phase::Assertion => "assert ",
    }
}
