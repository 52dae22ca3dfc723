use super::types::RunReport;
use crate::runner::state::{FlowReport, FlowStatus, StepStatus};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

fn seconds(ms: u64) -> String {
    (ms as f64 / 1000.0).to_string()
}

/// Generate JUnit XML from a run report: one testcase per flow
pub fn generate_junit_xml(report: &RunReport) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let total_tests = report.flows.len().to_string();
    let failures = report
        .flows
        .iter()
        .filter(|f| f.status == FlowStatus::Failed)
        .count()
        .to_string();
    let total_duration: u64 = report
        .flows
        .iter()
        .map(|f| f.total_duration_ms.unwrap_or(0))
        .sum();

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "flowpilot-run"));
    suites_start.push_attribute(("tests", total_tests.as_str()));
    suites_start.push_attribute(("failures", failures.as_str()));
    suites_start.push_attribute(("time", seconds(total_duration).as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", "flows"));
    suite_start.push_attribute(("tests", total_tests.as_str()));
    suite_start.push_attribute(("failures", failures.as_str()));
    suite_start.push_attribute(("id", report.session_id.as_str()));
    suite_start.push_attribute(("time", seconds(total_duration).as_str()));
    suite_start.push_attribute(("timestamp", report.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for flow in &report.flows {
        write_test_case(&mut writer, flow)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, flow: &FlowReport) -> Result<()> {
    let classname = flow
        .flow_path
        .trim_end_matches(".yaml")
        .trim_end_matches(".yml")
        .replace(['/', '\\'], ".");

    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", flow.flow_name.as_str()));
    case_start.push_attribute(("classname", classname.as_str()));
    case_start.push_attribute((
        "time",
        seconds(flow.total_duration_ms.unwrap_or(0)).as_str(),
    ));
    writer.write_event(Event::Start(case_start))?;

    if flow.status == FlowStatus::Failed {
        let message = flow.error.as_deref().unwrap_or("Unknown error");
        let mut fail_start = BytesStart::new("failure");
        fail_start.push_attribute(("message", message));
        fail_start.push_attribute(("type", flow.error_kind.as_deref().unwrap_or("Failure")));
        writer.write_event(Event::Start(fail_start))?;
        writer.write_event(Event::Text(BytesText::new(&failure_body(flow))))?;
        writer.write_event(Event::End(BytesEnd::new("failure")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Step trail up to the failure
fn failure_body(flow: &FlowReport) -> String {
    let mut lines = Vec::new();
    for record in flow.steps.iter().chain(flow.assertions.iter()) {
        let mark = match record.status {
            StepStatus::Passed => "ok",
            StepStatus::Degraded { .. } => "degraded",
            StepStatus::Failed { .. } => "FAILED",
            StepStatus::Skipped { .. } => "skipped",
            StepStatus::Pending | StepStatus::Running => "not run",
        };
        lines.push(format!("[{}] {}", mark, record.display));
    }
    if let Some(ref err) = flow.error {
        lines.push(err.clone());
    }
    lines.join("\n")
}

/// Generate JUnit report to a file or stdout
pub fn generate(report: &RunReport, output: Option<&Path>) -> Result<()> {
    let xml = generate_junit_xml(report)?;
    if let Some(path) = output {
        std::fs::write(path, xml)?;
        println!("JUnit report saved to: {}", path.display());
    } else {
        println!("{}", xml);
    }
    Ok(())
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<()> {
    generate(report, Some(&output_dir.join("junit.xml")))
}
