use super::types::RunReport;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate JSON report
pub fn generate(report: &RunReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(path) = output {
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("JSON report saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

/// Write `results.json` into `output_dir`
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<()> {
    generate(report, Some(&output_dir.join("results.json")))
}

/// Load a report written by `write_report`
pub fn load(path: &Path) -> Result<RunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Not a flowpilot results file: {}", path.display()))
}
