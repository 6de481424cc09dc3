//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use verger::{Outcome, RunResult, ScenarioReport};

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Progress reporter for scenario execution
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar over `total` scenarios
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    fn write_line(&self, line: &str) {
        match self.progress_bar {
            Some(ref pb) => pb.println(line),
            None => {
                let _ = self.term.write_line(line);
            }
        }
    }

    fn prefix(&self, outcome: &Outcome) -> String {
        let label = outcome.label();
        if !self.use_color {
            return label.to_string();
        }
        match outcome {
            Outcome::Success => style(label).green().bold().to_string(),
            Outcome::Failed { .. } => style(label).red().bold().to_string(),
            Outcome::Skipped { .. } => style(label).yellow().to_string(),
        }
    }

    /// Print the verdict for one finished scenario and advance the bar
    pub fn scenario(&self, report: &ScenarioReport) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(1);
            pb.set_message(report.id.clone());
        }
        if self.quiet && !matches!(report.outcome, Outcome::Failed { .. }) {
            return;
        }

        let role = report.role.as_deref().unwrap_or("anonymous");
        let secs = report.duration().as_secs_f64();
        self.write_line(&format!(
            "{} {} ({role}, {secs:.2}s)",
            self.prefix(&report.outcome),
            report.id
        ));
        match &report.outcome {
            Outcome::Success => {}
            Outcome::Failed {
                kind, step, reason, ..
            } => {
                self.write_line(&format!("    {} at {step}: {reason}", kind.as_str()));
            }
            Outcome::Skipped { reason } => {
                self.write_line(&format!("    {reason}"));
            }
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };

        self.write_line(&format!("{prefix} {message}"));
    }

    /// Print run summary
    pub fn summary(&self, result: &RunResult) {
        let failing = !result.all_passed();
        if self.quiet && !failing {
            return;
        }

        let _ = self.term.write_line("");

        let total = result.reports.len();
        let duration = (result.finished_at - result.started_at)
            .to_std()
            .unwrap_or_default();
        let duration_secs = duration.as_secs_f64();
        let (passed, failed, skipped) = (result.passed, result.failed, result.skipped);

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let skipped_style = Style::new().yellow();

            let status = if failing {
                failed_style.apply_to("FAILED")
            } else {
                passed_style.apply_to("PASSED")
            };

            let _ = self.term.write_line(&format!(
                "{} {} scenarios in {:.2}s ({} passed, {} failed, {} skipped)",
                status,
                total,
                duration_secs,
                passed_style.apply_to(passed),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
                skipped_style.apply_to(skipped)
            ));
        } else {
            let status = if failing { "FAILED" } else { "PASSED" };
            let _ = self.term.write_line(&format!(
                "{status} {total} scenarios in {duration_secs:.2}s ({passed} passed, {failed} failed, {skipped} skipped)"
            ));
        }

        if let Some(ref fatal) = result.fatal {
            let _ = self.term.write_line(&format!("run aborted: {fatal}"));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use verger::{ErrorKind, Scenario, VergerError};

    fn report(id: &str, outcome: Outcome) -> ScenarioReport {
        ScenarioReport {
            id: id.to_string(),
            role: Some("admin".to_string()),
            outcome,
            artifacts: Vec::new(),
            duration_ms: 1200,
        }
    }

    mod output_format_tests {
        use super::*;

        #[test]
        fn test_default_format() {
            assert_eq!(OutputFormat::default(), OutputFormat::Text);
        }
    }

    mod progress_reporter_tests {
        use super::*;

        #[test]
        fn test_new_reporter() {
            let reporter = ProgressReporter::new(false, true);
            assert!(!reporter.use_color);
            assert!(reporter.quiet);
        }

        #[test]
        fn test_quiet_reporter_never_starts_a_bar() {
            let mut reporter = ProgressReporter::new(false, true);
            reporter.start_progress(3, "running");
            assert!(reporter.progress_bar.is_none());
            reporter.finish();
        }

        #[test]
        fn test_prefix_without_color() {
            let reporter = ProgressReporter::new(false, false);
            assert_eq!(reporter.prefix(&Outcome::Success), "PASS");
            let err = VergerError::AssertionFailed {
                message: "expected heading".into(),
            };
            assert_eq!(reporter.prefix(&Outcome::failed(Some(1), "assert", &err)), "FAIL");
        }

        #[test]
        fn test_every_outcome_prints() {
            let reporter = ProgressReporter::new(false, false);
            let err = VergerError::WaitTimeout {
                condition: "visible(text \"Groups\")".into(),
                elapsed_ms: 5000,
            };
            reporter.scenario(&report("a", Outcome::Success));
            reporter.scenario(&report("b", Outcome::failed(Some(0), "wait", &err)));
            reporter.scenario(&ScenarioReport::skipped(&Scenario::new("c"), "fail-fast"));
            reporter.info("done");
        }

        #[test]
        fn test_summary_of_aborted_run() {
            let reporter = ProgressReporter::new(false, true);
            let err = VergerError::BrowserLaunchError {
                message: "no chromium".into(),
            };
            let result = RunResult::from_reports(
                chrono::Utc::now(),
                vec![ScenarioReport::skipped(&Scenario::new("a"), "run aborted")],
            )
            .with_fatal(&err);
            assert_eq!(err.kind(), ErrorKind::BrowserLaunch);
            reporter.summary(&result);
        }
    }
}
