//! Scenario execution and run results.

use crate::artifact::{Artifact, ArtifactCollector};
use crate::cancel::CancelToken;
use crate::config::Timeouts;
use crate::locator::Selector;
use crate::result::{ErrorKind, VergerError, VergerResult};
use crate::retry::retry;
use crate::scenario::{Scenario, ScreenshotScope, Step};
use crate::session::Session;
use crate::wait::{Condition, WaitOptions, Waiter};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Verdict for one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Every step and expectation held
    Success,
    /// A step or expectation failed
    Failed {
        /// Error classification
        kind: ErrorKind,
        /// Index of the failing step; `None` for a terminal expectation or
        /// session setup
        step_index: Option<usize>,
        /// Description of what failed
        step: String,
        /// Error message
        reason: String,
    },
    /// Never ran
    Skipped {
        /// Why
        reason: String,
    },
}

impl Outcome {
    /// True for [`Outcome::Success`]
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failure built from an error
    #[must_use]
    pub fn failed(step_index: Option<usize>, step: impl Into<String>, error: &VergerError) -> Self {
        Self::Failed {
            kind: error.kind(),
            step_index,
            step: step.into(),
            reason: error.to_string(),
        }
    }

    /// Short label for console output
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "PASS",
            Self::Failed { .. } => "FAIL",
            Self::Skipped { .. } => "SKIP",
        }
    }
}

/// Result of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario id
    pub id: String,
    /// Role it ran as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Verdict
    pub outcome: Outcome,
    /// Files produced, including the failure screenshot and the step log
    pub artifacts: Vec<Artifact>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl ScenarioReport {
    /// A scenario that never started
    #[must_use]
    pub fn skipped(scenario: &Scenario, reason: impl Into<String>) -> Self {
        Self {
            id: scenario.id.clone(),
            role: scenario.role.clone(),
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
            artifacts: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A scenario whose session could not be set up
    #[must_use]
    pub fn setup_failed(scenario: &Scenario, error: &VergerError, duration: Duration) -> Self {
        Self {
            id: scenario.id.clone(),
            role: scenario.role.clone(),
            outcome: Outcome::failed(None, "open session", error),
            artifacts: Vec::new(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Wall time
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Results of a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// One report per scenario, in input order
    pub reports: Vec<ScenarioReport>,
    /// Passing scenarios
    pub passed: usize,
    /// Failing scenarios
    pub failed: usize,
    /// Scenarios that never ran
    pub skipped: usize,
    /// Error that aborted the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

impl RunResult {
    /// Aggregate reports
    #[must_use]
    pub fn from_reports(started_at: DateTime<Utc>, reports: Vec<ScenarioReport>) -> Self {
        let count = |f: fn(&Outcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();
        let passed = count(|o| matches!(o, Outcome::Success));
        let failed = count(|o| matches!(o, Outcome::Failed { .. }));
        let skipped = count(|o| matches!(o, Outcome::Skipped { .. }));
        Self {
            started_at,
            finished_at: Utc::now(),
            reports,
            passed,
            failed,
            skipped,
            fatal: None,
        }
    }

    /// Attach the error that aborted the run
    #[must_use]
    pub fn with_fatal(mut self, error: &VergerError) -> Self {
        self.fatal = Some(error.to_string());
        self
    }

    /// Every scenario passed and nothing was fatal
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.fatal.is_none() && self.failed == 0 && self.skipped == 0
    }

    /// Process exit code: 0 on success, otherwise the number of
    /// non-passing scenarios capped at 255 (at least 1 after a fatal error)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let bad = (self.failed + self.skipped).min(255) as i32;
        if self.fatal.is_some() {
            bad.max(1)
        } else {
            bad
        }
    }

    /// Report for a scenario id
    #[must_use]
    pub fn report(&self, id: &str) -> Option<&ScenarioReport> {
        self.reports.iter().find(|r| r.id == id)
    }
}

/// Executes one scenario against an open session
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    timeouts: Timeouts,
    collector: Arc<ArtifactCollector>,
    cancel: CancelToken,
}

impl ScenarioRunner {
    /// Create a runner
    #[must_use]
    pub const fn new(timeouts: Timeouts, collector: Arc<ArtifactCollector>, cancel: CancelToken) -> Self {
        Self {
            timeouts,
            collector,
            cancel,
        }
    }

    /// Run every step, then the terminal expectations.
    ///
    /// Step errors never escape: they become a `Failed` outcome, a
    /// best-effort `<id>-failure` screenshot is taken, and the step log is
    /// written either way.
    pub async fn run(&self, scenario: &Scenario, session: &Session) -> ScenarioReport {
        let start = Instant::now();
        let waiter = Waiter::with_cancel(self.cancel.clone());
        let mut artifacts: Vec<Artifact> = Vec::new();
        let mut log = vec![format!(
            "scenario {} role={}",
            scenario.id,
            scenario.role.as_deref().unwrap_or("-")
        )];
        let mut failure: Option<(Option<usize>, String, VergerError)> = None;

        for (index, step) in scenario.steps.iter().enumerate() {
            let step_start = Instant::now();
            let description = step.describe();
            debug!(scenario = %scenario.id, index, step = %description, "step");
            match self.execute(step, scenario, session, &waiter).await {
                Ok(artifact) => {
                    log.push(format!(
                        "[{index}] ok   {description} ({}ms)",
                        step_start.elapsed().as_millis()
                    ));
                    if let Some(artifact) = artifact {
                        push_artifact(&mut artifacts, artifact);
                    }
                }
                Err(e) => {
                    log.push(format!(
                        "[{index}] FAIL {description} ({}ms): {e}",
                        step_start.elapsed().as_millis()
                    ));
                    failure = Some((Some(index), description, e));
                    break;
                }
            }
        }

        if failure.is_none() {
            for condition in &scenario.expect {
                let description = format!("expect {condition}");
                match self.check(session, &waiter, condition, None).await {
                    Ok(()) => log.push(format!("[expect] ok   {condition}")),
                    Err(e) => {
                        log.push(format!("[expect] FAIL {condition}: {e}"));
                        failure = Some((None, description, e));
                        break;
                    }
                }
            }
        }

        let outcome = match failure {
            None => Outcome::Success,
            Some((index, description, error)) => {
                if !matches!(error, VergerError::Cancelled { .. }) {
                    self.failure_screenshot(scenario, session, &mut artifacts).await;
                }
                Outcome::failed(index, description, &error)
            }
        };
        log.push(format!("outcome {}", outcome.label()));

        match self.collector.write_log(&scenario.id, &log).await {
            Ok(artifact) => push_artifact(&mut artifacts, artifact),
            Err(e) => warn!(scenario = %scenario.id, error = %e, "failed to write step log"),
        }

        let duration = start.elapsed();
        info!(
            scenario = %scenario.id,
            outcome = outcome.label(),
            duration_ms = duration.as_millis() as u64,
            "scenario finished"
        );
        ScenarioReport {
            id: scenario.id.clone(),
            role: scenario.role.clone(),
            outcome,
            artifacts,
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn execute<'a>(
        &'a self,
        step: &'a Step,
        scenario: &'a Scenario,
        session: &'a Session,
        waiter: &'a Waiter,
    ) -> BoxFuture<'a, VergerResult<Option<Artifact>>> {
        Box::pin(async move {
            self.cancel.check()?;
            match step {
                Step::Navigate { url } => {
                    session.navigate(url).await?;
                }
                Step::Click {
                    selector,
                    timeout_ms,
                } => {
                    self.actionable(session, waiter, selector, *timeout_ms).await?;
                    if !session.driver().click(selector).await? {
                        return Err(not_found(selector));
                    }
                }
                Step::Fill {
                    selector,
                    value,
                    timeout_ms,
                } => {
                    self.actionable(session, waiter, selector, *timeout_ms).await?;
                    if !session.driver().fill(selector, value).await? {
                        return Err(not_found(selector));
                    }
                }
                Step::WaitFor {
                    condition,
                    timeout_ms,
                } => {
                    let options = self.options(timeout_ms.unwrap_or(self.timeouts.wait_ms));
                    waiter.wait_for(session, condition, &options).await?;
                }
                Step::Assert {
                    condition,
                    timeout_ms,
                } => {
                    self.check(session, waiter, condition, *timeout_ms).await?;
                }
                Step::Screenshot { name, scope } => {
                    let artifact = self
                        .collector
                        .capture(session, &scenario.id, name, scope)
                        .await?;
                    return Ok(Some(artifact));
                }
                Step::Evaluate { script } => {
                    session.driver().evaluate(script).await?;
                }
                Step::Retry { step, policy } => {
                    return retry(policy, move |_| self.execute(step, scenario, session, waiter)).await;
                }
            }
            Ok(None)
        })
    }

    /// Auto-wait until the target is visible
    async fn actionable(
        &self,
        session: &Session,
        waiter: &Waiter,
        selector: &Selector,
        timeout_ms: Option<u64>,
    ) -> VergerResult<()> {
        let options = self.options(timeout_ms.unwrap_or(self.timeouts.wait_ms));
        match waiter
            .wait_for(session, &Condition::visible(selector.clone()), &options)
            .await
        {
            Ok(_) => Ok(()),
            Err(VergerError::WaitTimeout { .. }) => Err(not_found(selector)),
            Err(e) => Err(e),
        }
    }

    async fn check(
        &self,
        session: &Session,
        waiter: &Waiter,
        condition: &Condition,
        timeout_ms: Option<u64>,
    ) -> VergerResult<()> {
        let options = self.options(timeout_ms.unwrap_or(self.timeouts.assertion_ms));
        match waiter.wait_for(session, condition, &options).await {
            Ok(_) => Ok(()),
            Err(VergerError::WaitTimeout { elapsed_ms, .. }) => {
                let current = session.driver().current_url().await.unwrap_or_default();
                Err(VergerError::assertion(format!(
                    "expected {condition} within {elapsed_ms}ms (at {current})"
                )))
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn failure_screenshot(
        &self,
        scenario: &Scenario,
        session: &Session,
        artifacts: &mut Vec<Artifact>,
    ) {
        let name = format!("{}-failure", scenario.id);
        match self
            .collector
            .capture(session, &scenario.id, &name, &ScreenshotScope::FullPage)
            .await
        {
            Ok(artifact) => push_artifact(artifacts, artifact),
            Err(e) => warn!(scenario = %scenario.id, error = %e, "failure screenshot not captured"),
        }
    }

    const fn options(&self, timeout_ms: u64) -> WaitOptions {
        WaitOptions {
            timeout_ms,
            poll_interval_ms: self.timeouts.poll_interval_ms,
        }
    }
}

fn not_found(selector: &Selector) -> VergerError {
    VergerError::SelectorNotFound {
        selector: selector.to_string(),
    }
}

fn push_artifact(artifacts: &mut Vec<Artifact>, artifact: Artifact) {
    artifacts.retain(|a| a.path != artifact.path);
    artifacts.push(artifact);
}
