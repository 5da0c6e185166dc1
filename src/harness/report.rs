//! Suite report generation
//!
//! Renders scenario outcomes as:
//! - Text (human-readable console output)
//! - JSON (machine-readable)

use super::assertions::AssertionResult;
use super::error::HarnessError;
use super::scenario::Phase;
use serde::Serialize;
use std::io::Write;

/// One recorded action inside a scenario
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub phase: Phase,
    pub action: String,
    pub ok: bool,
    /// Milliseconds since the scenario started
    pub elapsed_ms: u64,
}

/// Outcome of a single scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,

    /// Error that ended the scenario, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,

    /// Phase trail
    pub steps: Vec<StepRecord>,

    pub assertions: Vec<AssertionResult>,
}

impl ScenarioReport {
    /// Phase trail with consecutive repeats collapsed; a phase entered again
    /// later appears again
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        for step in &self.steps {
            if phases.last() != Some(&step.phase) {
                phases.push(step.phase);
            }
        }
        phases
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_assertions: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
}

/// Complete run report
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub run_id: String,
    pub backend: String,

    /// Start time (RFC 3339)
    pub start_time: String,

    /// End time (RFC 3339), set by [`finish`](Self::finish)
    pub end_time: String,

    pub duration_ms: u64,
    pub summary: SuiteSummary,
    pub scenarios: Vec<ScenarioReport>,

    #[serde(skip)]
    started: chrono::DateTime<chrono::Utc>,
}

impl SuiteReport {
    pub fn new(run_id: &str, backend: &str) -> Self {
        let started = chrono::Utc::now();
        Self {
            run_id: run_id.to_string(),
            backend: backend.to_string(),
            start_time: started.to_rfc3339(),
            end_time: String::new(),
            duration_ms: 0,
            summary: SuiteSummary::default(),
            scenarios: Vec::new(),
            started,
        }
    }

    /// Stamp the end time and compute the summary
    pub fn finish(&mut self) {
        let end = chrono::Utc::now();
        self.end_time = end.to_rfc3339();
        self.duration_ms = (end - self.started).num_milliseconds().max(0) as u64;

        let total_assertions: usize = self.scenarios.iter().map(|s| s.assertions.len()).sum();
        let passed_assertions = self
            .scenarios
            .iter()
            .flat_map(|s| &s.assertions)
            .filter(|a| a.passed)
            .count();
        let passed = self.scenarios.iter().filter(|s| s.passed).count();

        self.summary = SuiteSummary {
            total: self.scenarios.len(),
            passed,
            failed: self.scenarios.len() - passed,
            total_assertions,
            passed_assertions,
            failed_assertions: total_assertions - passed_assertions,
        };
    }

    pub fn all_passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(HarnessError::config(format!("Unknown output format: {}", s))),
        }
    }
}

/// Write report to output
pub fn write_report(
    report: &SuiteReport,
    format: OutputFormat,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Text => write_text_report(report, writer),
        OutputFormat::Json => write_json_report(report, writer),
    }
}

fn write_text_report(report: &SuiteReport, writer: &mut dyn Write) -> std::io::Result<()> {
    writeln!(writer, "\nKerberized HDFS Harness Report")?;
    writeln!(writer, "==============================")?;
    writeln!(writer, "Run ID: {}", report.run_id)?;
    writeln!(writer, "Backend: {}", report.backend)?;
    writeln!(writer, "Duration: {}ms", report.duration_ms)?;
    writeln!(writer)?;

    writeln!(
        writer,
        "Scenarios: {} total, {} passed, {} failed",
        report.summary.total, report.summary.passed, report.summary.failed
    )?;
    writeln!(
        writer,
        "Assertions: {} total, {} passed, {} failed",
        report.summary.total_assertions,
        report.summary.passed_assertions,
        report.summary.failed_assertions
    )?;

    for scenario in &report.scenarios {
        let status = if scenario.passed { "PASS" } else { "FAIL" };
        writeln!(
            writer,
            "\n[{}] {} ({}ms)",
            status, scenario.name, scenario.duration_ms
        )?;

        let trail: Vec<String> = scenario.phases().iter().map(|p| p.to_string()).collect();
        writeln!(writer, "   phases: {}", trail.join(" -> "))?;

        if let Some(ref error) = scenario.error {
            writeln!(writer, "   ERROR: {}", error)?;
        }

        for assertion in &scenario.assertions {
            let icon = if assertion.passed { "+" } else { "x" };
            writeln!(writer, "   {} {}", icon, assertion.message)?;

            if !assertion.passed {
                if let (Some(expected), Some(actual)) = (&assertion.expected, &assertion.actual) {
                    writeln!(writer, "      Expected: {:?}", expected)?;
                    writeln!(writer, "      Actual:   {:?}", actual)?;
                }
            }
        }
    }

    writeln!(writer)?;
    if report.all_passed() {
        writeln!(writer, "ALL SCENARIOS PASSED")?;
    } else {
        writeln!(writer, "{} scenario(s) failed", report.summary.failed)?;
    }
    Ok(())
}

fn write_json_report(report: &SuiteReport, writer: &mut dyn Write) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    writeln!(writer, "{}", json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(name: &str, passed: bool) -> ScenarioReport {
        let assertion = if passed {
            AssertionResult::pass("exact", "select matches (14 bytes)")
        } else {
            AssertionResult::fail("exact", "select mismatch", "1\tMark\t72.53\n", "")
        };
        ScenarioReport {
            name: name.to_string(),
            passed,
            error: (!passed).then(|| "assertion failed".to_string()),
            started_at: chrono::Utc::now(),
            duration_ms: 3,
            steps: vec![
                StepRecord {
                    phase: Phase::Setup,
                    action: "query: CREATE TABLE".to_string(),
                    ok: true,
                    elapsed_ms: 0,
                },
                StepRecord {
                    phase: Phase::Verify,
                    action: "check exact".to_string(),
                    ok: passed,
                    elapsed_ms: 1,
                },
                StepRecord {
                    phase: Phase::Teardown,
                    action: "unpause leftover: hdfskerberos".to_string(),
                    ok: true,
                    elapsed_ms: 2,
                },
            ],
            assertions: vec![assertion],
        }
    }

    #[test]
    fn test_summary() {
        let mut report = SuiteReport::new("kdfs-1", "sim");
        report.scenarios.push(scenario("read_table", true));
        report.scenarios.push(scenario("prohibited", false));
        report.finish();

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed_assertions, 1);
        assert!(!report.all_passed());
        assert!(!report.end_time.is_empty());
    }

    #[test]
    fn test_phase_trail() {
        let report = scenario("read_table", true);
        assert_eq!(
            report.phases(),
            vec![Phase::Setup, Phase::Verify, Phase::Teardown]
        );
    }

    #[test]
    fn test_text_report() {
        let mut report = SuiteReport::new("kdfs-1", "sim");
        report.scenarios.push(scenario("prohibited", false));
        report.finish();

        let mut out = Vec::new();
        write_report(&report, OutputFormat::Text, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[FAIL] prohibited"));
        assert!(text.contains("phases: SETUP -> VERIFY -> TEARDOWN"));
        assert!(text.contains("Expected: \"1\\tMark\\t72.53\\n\""));
    }

    #[test]
    fn test_json_report() {
        let mut report = SuiteReport::new("kdfs-1", "sim");
        report.scenarios.push(scenario("read_table", true));
        report.finish();

        let mut out = Vec::new();
        write_report(&report, OutputFormat::Json, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["backend"], "sim");
        assert_eq!(value["scenarios"][0]["steps"][0]["phase"], "setup");
        assert!(value.get("started").is_none());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("junit".parse::<OutputFormat>().is_err());
    }
}
