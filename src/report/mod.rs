pub mod json;
pub mod junit;
pub mod types;

use anyhow::Result;
use std::path::Path;

/// Regenerate a report from stored results
pub fn generate_report(results_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let report = json::load(results_path)?;

    match format {
        "json" => json::generate(&report, output),
        "junit" | "xml" => junit::generate(&report, output),
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}

/// Write every report format into `output_dir`
pub fn write_reports(report: &types::RunReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    json::write_report(report, output_dir)?;
    junit::write_report(report, output_dir)?;
    Ok(())
}
