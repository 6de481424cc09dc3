//! Verger: end-to-end UI verification for the membership and check-in app.
//!
//! Verger drives the web application through a headless browser, bypasses
//! the login form with per-role auth fixtures, waits for asynchronous page
//! state by polling instead of sleeping, and records screenshots and step
//! logs as evidence for a pass/fail verdict per scenario.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Verger Run                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐ │
//! │  │ Process    │   │ Fixture    │   │ Scenario   │   │ Artifact │ │
//! │  │ Supervisor │──►│ Provider   │──►│ Runner     │──►│ Collector│ │
//! │  └────────────┘   └─────┬──────┘   └─────┬──────┘   └──────────┘ │
//! │                         ▼                ▼                       │
//! │                   ┌────────────┐   ┌────────────┐                │
//! │                   │ Session    │◄──│ Waiter     │                │
//! │                   │ (context)  │   │ (polling)  │                │
//! │                   └─────┬──────┘   └────────────┘                │
//! │                         ▼                                        │
//! │                   ┌────────────┐                                 │
//! │                   │ Chromium   │  (CDP via chromiumoxide)        │
//! │                   └────────────┘                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use verger::prelude::*;
//!
//! # async fn demo(backend: Arc<dyn BrowserBackend>) -> VergerResult<()> {
//! let scenario = Scenario::new("checkin-dashboard")
//!     .as_role("volunteer")
//!     .step(Step::navigate("/checkin/dashboard"))
//!     .step(Step::assert(Condition::visible(Selector::role("heading", "Child Check-In"))))
//!     .step(Step::screenshot("checkin-dashboard"));
//!
//! let harness = Harness::new(HarnessConfig::default(), backend);
//! let result = harness.run(&[scenario], &[]).await?;
//! assert_eq!(result.exit_code(), 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod artifact;
pub mod browser;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod fixture;
pub mod harness;
pub mod locator;
pub mod result;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod supervisor;
pub mod wait;
pub mod yaml;

pub use artifact::{Artifact, ArtifactCollector, ArtifactKind, SUMMARY_FILE};
pub use browser::{launch, BrowserConfig};
#[cfg(feature = "browser")]
pub use browser::{ChromiumBackend, ChromiumPage};
pub use cancel::CancelToken;
pub use config::{AuthConfig, HarnessConfig, InjectionMode, RoleConfig, Timeouts};
pub use driver::{
    BrowserBackend, CaptureArea, Cookie, ElementProbe, MockApp, MockBackend, MockElement,
    MockPage, NavigationOutcome, NetworkActivity, PageDriver,
};
pub use fixture::{AuthFixture, FixtureProvider};
pub use harness::Harness;
pub use locator::{BoundingBox, Selector};
pub use result::{ErrorKind, NavigationFailure, VergerError, VergerResult};
pub use retry::{retry, Backoff, RetryPolicy};
pub use runner::{Outcome, RunResult, ScenarioReport, ScenarioRunner};
pub use scenario::{Scenario, ScenarioFile, ScreenshotScope, Step};
pub use session::{with_session, Session};
pub use supervisor::{ProcessSupervisor, Readiness, RunningServices, ServiceSpec};
pub use wait::{Condition, UrlMatcher, UrlPattern, WaitOptions, WaitOutcome, Waiter};

/// Everything a scenario author usually needs
pub mod prelude {
    pub use super::artifact::{Artifact, ArtifactCollector, ArtifactKind};
    pub use super::cancel::CancelToken;
    pub use super::config::{HarnessConfig, InjectionMode, Timeouts};
    pub use super::driver::{BrowserBackend, PageDriver};
    pub use super::harness::Harness;
    pub use super::locator::Selector;
    pub use super::result::{ErrorKind, VergerError, VergerResult};
    pub use super::retry::{Backoff, RetryPolicy};
    pub use super::runner::{Outcome, RunResult, ScenarioReport};
    pub use super::scenario::{Scenario, ScenarioFile, ScreenshotScope, Step};
    pub use super::supervisor::{Readiness, ServiceSpec};
    pub use super::wait::{Condition, UrlPattern};
}
