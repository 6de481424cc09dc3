//! Run orchestration.
//!
//! A run has one writer phase on each side of many reader phases: services
//! start once, the browser launches once, scenarios then execute with up to
//! `jobs` isolated contexts at a time, and finally the browser and services
//! are torn down. Teardown happens on every path, including fatal errors
//! and cancellation.

use crate::artifact::ArtifactCollector;
use crate::browser;
use crate::cancel::CancelToken;
use crate::config::HarnessConfig;
use crate::driver::BrowserBackend;
use crate::fixture::FixtureProvider;
use crate::result::{VergerError, VergerResult};
use crate::runner::{Outcome, RunResult, ScenarioReport, ScenarioRunner};
use crate::scenario::{check_unique_ids, Scenario};
use crate::session::{with_session, Session};
use crate::supervisor::{ProcessSupervisor, ServiceSpec};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
enum BackendSource {
    Ready(Arc<dyn BrowserBackend>),
    Launch,
}

/// Runs scenario suites
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    backend: BackendSource,
    supervisor: ProcessSupervisor,
    collector: Arc<ArtifactCollector>,
    cancel: CancelToken,
    progress: Option<mpsc::UnboundedSender<ScenarioReport>>,
}

/// State shared by every scenario of one run
struct RunState<'r> {
    backend: &'r dyn BrowserBackend,
    provider: FixtureProvider,
    runner: ScenarioRunner,
    halted: Mutex<Option<String>>,
    fatal: Mutex<Option<VergerError>>,
}

impl RunState<'_> {
    fn halted(&self) -> Option<String> {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn halt(&self, reason: String) {
        let mut halted = self.halted.lock().unwrap_or_else(PoisonError::into_inner);
        if halted.is_none() {
            *halted = Some(reason);
        }
    }

    fn record_fatal(&self, error: VergerError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }
}

impl Harness {
    /// Harness over an already running browser backend
    #[must_use]
    pub fn new(config: HarnessConfig, backend: Arc<dyn BrowserBackend>) -> Self {
        Self::with_source(config, BackendSource::Ready(backend))
    }

    /// Harness that launches the configured browser after services are up
    #[must_use]
    pub fn launching(config: HarnessConfig) -> Self {
        Self::with_source(config, BackendSource::Launch)
    }

    fn with_source(config: HarnessConfig, backend: BackendSource) -> Self {
        let collector = Arc::new(ArtifactCollector::new(config.output_dir.clone()));
        Self {
            config,
            backend,
            supervisor: ProcessSupervisor::new(),
            collector,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Use an externally controlled cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the process supervisor
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Send every report to `progress` as soon as its scenario finishes
    #[must_use]
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<ScenarioReport>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Token that cancels the run
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Collector holding every artifact of the run
    #[must_use]
    pub const fn collector(&self) -> &Arc<ArtifactCollector> {
        &self.collector
    }

    /// Run `scenarios`, starting `services` first.
    ///
    /// Reports come back in input order. Fatal errors after preflight
    /// (service startup, browser launch, context creation) do not surface as
    /// `Err`: they end the run after cleanup and are recorded in
    /// [`RunResult::fatal`], with every scenario that never ran reported as
    /// skipped. The run summary is written on every path past preflight.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, empty or duplicate
    /// scenario ids and `UnknownRole` when a scenario names a role without a
    /// fixture. Nothing has been started when these are returned.
    pub async fn run(
        &self,
        scenarios: &[Scenario],
        services: &[ServiceSpec],
    ) -> VergerResult<RunResult> {
        let started_at = Utc::now();
        self.preflight(scenarios)?;
        info!(
            scenarios = scenarios.len(),
            services = services.len(),
            jobs = self.config.jobs,
            "run starting"
        );

        let started = tokio::select! {
            started = self.supervisor.start(services) => started,
            () = self.cancel.cancelled() => Err(self.cancelled_error()),
        };
        let mut running = match started {
            Ok(running) => running,
            Err(e) => return Ok(self.abort(started_at, scenarios, &e).await),
        };

        let backend = match self.backend().await {
            Ok(backend) => backend,
            Err(e) => {
                running.stop().await;
                return Ok(self.abort(started_at, scenarios, &e).await);
            }
        };

        let (reports, fatal) = self.run_scenarios(backend.as_ref(), scenarios).await;

        if let Err(e) = backend.shutdown().await {
            warn!(backend = backend.name(), error = %e, "browser shutdown failed");
        }
        running.stop().await;

        let mut result = RunResult::from_reports(started_at, reports);
        if let Some(e) = fatal {
            result = result.with_fatal(&e);
        }
        Ok(self.finish(result).await)
    }

    fn preflight(&self, scenarios: &[Scenario]) -> VergerResult<()> {
        self.config.validate()?;
        check_unique_ids(scenarios)?;
        let provider = FixtureProvider::from_config(&self.config);
        for role in scenarios.iter().filter_map(|s| s.role.as_deref()) {
            provider.fixture_for(role)?;
        }
        Ok(())
    }

    async fn backend(&self) -> VergerResult<Arc<dyn BrowserBackend>> {
        match &self.backend {
            BackendSource::Ready(backend) => Ok(backend.clone()),
            BackendSource::Launch => {
                tokio::select! {
                    launched = browser::launch(&self.config.browser) => launched,
                    () = self.cancel.cancelled() => Err(self.cancelled_error()),
                }
            }
        }
    }

    async fn run_scenarios(
        &self,
        backend: &dyn BrowserBackend,
        scenarios: &[Scenario],
    ) -> (Vec<ScenarioReport>, Option<VergerError>) {
        let state = RunState {
            backend,
            provider: FixtureProvider::from_config(&self.config),
            runner: ScenarioRunner::new(
                self.config.timeouts.clone(),
                self.collector.clone(),
                self.cancel.clone(),
            ),
            halted: Mutex::new(None),
            fatal: Mutex::new(None),
        };

        let mut slots: Vec<Option<ScenarioReport>> = vec![None; scenarios.len()];
        let mut reports = stream::iter(scenarios.iter().enumerate())
            .map(|(index, scenario)| {
                let span = info_span!("scenario", id = %scenario.id);
                let state = &state;
                async move { (index, self.run_one(state, scenario).await) }.instrument(span)
            })
            .buffer_unordered(self.config.jobs.max(1));
        while let Some((index, report)) = reports.next().await {
            if let Some(progress) = &self.progress {
                let _ = progress.send(report.clone());
            }
            slots[index] = Some(report);
        }
        drop(reports);

        let reports = slots
            .into_iter()
            .zip(scenarios)
            .map(|(slot, scenario)| {
                slot.unwrap_or_else(|| ScenarioReport::skipped(scenario, "not scheduled"))
            })
            .collect();
        let fatal = state.fatal.into_inner().unwrap_or_else(PoisonError::into_inner);
        (reports, fatal)
    }

    async fn run_one(&self, state: &RunState<'_>, scenario: &Scenario) -> ScenarioReport {
        if let Some(reason) = state.halted() {
            return ScenarioReport::skipped(scenario, reason);
        }
        if let Some(reason) = self.cancel.reason() {
            return ScenarioReport::skipped(scenario, format!("cancelled: {reason}"));
        }
        for selector in scenario.structural_selectors() {
            warn!(%selector, "structural selector in use, prefer a role, label or text locator");
        }

        let start = Instant::now();
        let session = match state
            .provider
            .create_context(state.backend, scenario.role.as_deref())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "session setup failed, aborting run");
                state.halt(format!("run aborted: {e}"));
                let report = ScenarioReport::setup_failed(scenario, &e, start.elapsed());
                state.record_fatal(e);
                return report;
            }
        };

        let limit = Duration::from_millis(
            scenario
                .timeout_ms
                .unwrap_or(self.config.timeouts.scenario_ms),
        );
        let runner = state.runner.clone();
        let cancel = self.cancel.clone();
        let owned = scenario.clone();
        let report = with_session(session, move |session| {
            Box::pin(async move { Ok(drive(&runner, &owned, session, limit, &cancel).await) })
        })
        .await
        .unwrap_or_else(|e| ScenarioReport::setup_failed(scenario, &e, start.elapsed()));

        if self.config.fail_fast && matches!(report.outcome, Outcome::Failed { .. }) {
            state.halt(format!("fail-fast after {}", scenario.id));
        }
        report
    }

    async fn abort(
        &self,
        started_at: chrono::DateTime<Utc>,
        scenarios: &[Scenario],
        error: &VergerError,
    ) -> RunResult {
        error!(error = %error, "run aborted");
        let reports = scenarios
            .iter()
            .map(|s| ScenarioReport::skipped(s, format!("run aborted: {error}")))
            .collect();
        let result = RunResult::from_reports(started_at, reports).with_fatal(error);
        self.finish(result).await
    }

    async fn finish(&self, result: RunResult) -> RunResult {
        if let Err(e) = self.collector.write_summary(&result).await {
            warn!(error = %e, "run summary not written");
        }
        info!(
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            "run finished"
        );
        result
    }

    fn cancelled_error(&self) -> VergerError {
        VergerError::cancelled(self.cancel.reason().unwrap_or_else(|| "cancelled".into()))
    }
}

/// Run one scenario under its time limit, giving up at cancellation
async fn drive(
    runner: &ScenarioRunner,
    scenario: &Scenario,
    session: &Session,
    limit: Duration,
    cancel: &CancelToken,
) -> ScenarioReport {
    let start = Instant::now();
    tokio::select! {
        finished = tokio::time::timeout(limit, runner.run(scenario, session)) => match finished {
            Ok(report) => report,
            Err(_) => {
                let error = VergerError::cancelled(format!(
                    "scenario exceeded {}ms",
                    limit.as_millis()
                ));
                let mut artifacts = Vec::new();
                runner.failure_screenshot(scenario, session, &mut artifacts).await;
                interrupted(scenario, &error, artifacts, start)
            }
        },
        () = cancel.cancelled() => {
            let error = VergerError::cancelled(cancel.reason().unwrap_or_default());
            interrupted(scenario, &error, Vec::new(), start)
        }
    }
}

fn interrupted(
    scenario: &Scenario,
    error: &VergerError,
    artifacts: Vec<crate::artifact::Artifact>,
    start: Instant,
) -> ScenarioReport {
    warn!(scenario = %scenario.id, error = %error, "scenario interrupted");
    ScenarioReport {
        id: scenario.id.clone(),
        role: scenario.role.clone(),
        outcome: Outcome::failed(None, "scenario", error),
        artifacts,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
