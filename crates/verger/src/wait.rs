//! Stabilization: poll page state until a condition holds.
//!
//! Every wait is bounded and observable. There are no fixed sleeps; a
//! condition is re-evaluated every `poll_interval_ms` until it holds or the
//! timeout expires, and the cancel token is checked between polls.

use crate::cancel::CancelToken;
use crate::driver::{ElementProbe, PageDriver};
use crate::locator::{text_matches, Selector};
use crate::result::{VergerError, VergerResult};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default timeout for wait operations
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Network idle threshold (no finished resources for this long)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

// =============================================================================
// URL PATTERNS
// =============================================================================

/// Pattern for matching the page URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlPattern {
    /// Whole URL equals the pattern
    Exact(String),
    /// URL starts with the pattern
    Prefix(String),
    /// URL contains the pattern
    Contains(String),
    /// `*` matches any run of characters
    Glob(String),
    /// Regular expression; an invalid expression never matches
    Regex(String),
}

impl UrlPattern {
    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.matcher().matches(url)
    }

    /// Prepare the pattern for repeated matching
    #[must_use]
    pub fn matcher(&self) -> UrlMatcher<'_> {
        let regex = match self {
            Self::Regex(pattern) => match regex::Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!(%pattern, error = %e, "invalid URL regex never matches");
                    None
                }
            },
            _ => None,
        };
        UrlMatcher {
            pattern: self,
            regex,
        }
    }
}

/// A [`UrlPattern`] with its regular expression compiled once
#[derive(Debug, Clone)]
pub struct UrlMatcher<'a> {
    pattern: &'a UrlPattern,
    regex: Option<regex::Regex>,
}

impl UrlMatcher<'_> {
    /// Check if a URL matches the pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self.pattern {
            UrlPattern::Exact(pattern) => url == pattern,
            UrlPattern::Prefix(pattern) => url.starts_with(pattern.as_str()),
            UrlPattern::Contains(pattern) => url.contains(pattern.as_str()),
            UrlPattern::Regex(_) => self.regex.as_ref().is_some_and(|re| re.is_match(url)),
            UrlPattern::Glob(pattern) => glob_matches(pattern, url),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "url == {p:?}"),
            Self::Prefix(p) => write!(f, "url starts with {p:?}"),
            Self::Contains(p) => write!(f, "url contains {p:?}"),
            Self::Glob(p) => write!(f, "url like {p:?}"),
            Self::Regex(p) => write!(f, "url =~ /{p}/"),
        }
    }
}

fn glob_matches(pattern: &str, url: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == url;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        let Some(found) = url[pos..].find(part) else {
            return false;
        };
        if i == 0 && found != 0 {
            return false;
        }
        pos += found + part.len();
    }
    // A trailing literal must sit at the very end of the URL.
    parts.last().map_or(true, |last| url.ends_with(last))
}

// =============================================================================
// CONDITIONS
// =============================================================================

/// What a wait is waiting for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// At least one match is rendered and visible
    #[serde(rename = "visible")]
    ElementVisible(Selector),
    /// No match is visible (absent counts as hidden)
    #[serde(rename = "hidden")]
    ElementHidden(Selector),
    /// Document loaded and no resource finished for the idle threshold
    NetworkIdle,
    /// Current URL matches
    #[serde(rename = "url")]
    UrlMatches(UrlPattern),
    /// A visible match whose text contains `text`
    #[serde(rename = "text")]
    TextPresent {
        /// Element to read
        selector: Selector,
        /// Expected text (case-insensitive substring)
        text: String,
    },
}

impl Condition {
    /// Shorthand for [`Condition::ElementVisible`]
    #[must_use]
    pub const fn visible(selector: Selector) -> Self {
        Self::ElementVisible(selector)
    }

    /// Shorthand for [`Condition::ElementHidden`]
    #[must_use]
    pub const fn hidden(selector: Selector) -> Self {
        Self::ElementHidden(selector)
    }

    /// Shorthand for [`Condition::TextPresent`]
    #[must_use]
    pub fn text(selector: Selector, text: impl Into<String>) -> Self {
        Self::TextPresent {
            selector,
            text: text.into(),
        }
    }

    /// Selector the condition inspects, if any
    #[must_use]
    pub const fn selector(&self) -> Option<&Selector> {
        match self {
            Self::ElementVisible(s) | Self::ElementHidden(s) | Self::TextPresent { selector: s, .. } => {
                Some(s)
            }
            Self::NetworkIdle | Self::UrlMatches(_) => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementVisible(s) => write!(f, "{s} to be visible"),
            Self::ElementHidden(s) => write!(f, "{s} to be hidden"),
            Self::NetworkIdle => write!(f, "network idle"),
            Self::UrlMatches(p) => write!(f, "{p}"),
            Self::TextPresent { selector, text } => write!(f, "{selector} to contain {text:?}"),
        }
    }
}

// =============================================================================
// OPTIONS AND OUTCOME
// =============================================================================

/// Bounds for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Observation that satisfied a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The element that became visible
    Element(ElementProbe),
    /// The element is gone or hidden
    Hidden,
    /// Network went quiet
    Idle,
    /// The matching URL
    Url(String),
    /// The text that matched
    Text(String),
}

/// Successful wait
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    /// What satisfied the condition
    pub signal: Signal,
    /// Polls performed, at least one
    pub attempts: u32,
    /// Time spent waiting
    pub elapsed: Duration,
}

// =============================================================================
// WAITER
// =============================================================================

/// Polls a page until a [`Condition`] holds
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    cancel: CancelToken,
}

impl Waiter {
    /// Create a waiter that never observes cancellation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a waiter that stops when `cancel` fires
    #[must_use]
    pub const fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Wait for `condition` on the session's page
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` when the timeout expires, `Cancelled` when the
    /// token fires, or a driver error other than a transient page error
    pub async fn wait_for(
        &self,
        session: &Session,
        condition: &Condition,
        options: &WaitOptions,
    ) -> VergerResult<WaitOutcome> {
        self.wait_on(session.driver(), condition, options).await
    }

    /// Wait for `condition` directly on a driver
    ///
    /// # Errors
    ///
    /// See [`Waiter::wait_for`]
    pub async fn wait_on(
        &self,
        driver: &dyn PageDriver,
        condition: &Condition,
        options: &WaitOptions,
    ) -> VergerResult<WaitOutcome> {
        let start = Instant::now();
        let timeout = options.timeout();
        let mut attempts = 0u32;
        let url_matcher = match condition {
            Condition::UrlMatches(pattern) => Some(pattern.matcher()),
            _ => None,
        };
        loop {
            self.cancel.check()?;
            attempts += 1;
            match evaluate(driver, condition, url_matcher.as_ref()).await {
                Ok(Some(signal)) => {
                    let elapsed = start.elapsed();
                    debug!(%condition, attempts, elapsed_ms = elapsed.as_millis() as u64, "condition met");
                    return Ok(WaitOutcome {
                        signal,
                        attempts,
                        elapsed,
                    });
                }
                Ok(None) => {}
                // The document may be mid-navigation; try again next poll.
                Err(VergerError::PageError { message }) => {
                    debug!(%condition, %message, "transient page error while polling");
                }
                Err(e) => return Err(e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(VergerError::WaitTimeout {
                    condition: condition.to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            let nap = options.poll_interval().min(timeout - elapsed);
            tokio::select! {
                () = tokio::time::sleep(nap) => {}
                () = self.cancel.cancelled() => {}
            }
        }
    }
}

async fn evaluate(
    driver: &dyn PageDriver,
    condition: &Condition,
    url_matcher: Option<&UrlMatcher<'_>>,
) -> VergerResult<Option<Signal>> {
    Ok(match condition {
        Condition::ElementVisible(selector) => {
            let probe = driver.probe(selector).await?;
            probe.visible.then_some(Signal::Element(probe))
        }
        Condition::ElementHidden(selector) => {
            let probe = driver.probe(selector).await?;
            (!probe.visible).then_some(Signal::Hidden)
        }
        Condition::NetworkIdle => {
            let activity = driver.network_activity().await?;
            (activity.ready_state_complete && activity.quiet_ms >= NETWORK_IDLE_THRESHOLD_MS)
                .then_some(Signal::Idle)
        }
        Condition::UrlMatches(pattern) => {
            let url = driver.current_url().await?;
            let matched = url_matcher.map_or_else(|| pattern.matches(&url), |m| m.matches(&url));
            matched.then_some(Signal::Url(url))
        }
        Condition::TextPresent { selector, text } => {
            let probe = driver.probe(selector).await?;
            match probe.text {
                Some(actual) if probe.visible && text_matches(text, &actual, false) => {
                    Some(Signal::Text(actual))
                }
                _ => None,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{BrowserBackend, ClickEffect, MockApp, MockBackend, MockElement, MockPage};
    use proptest::prelude::*;

    const ORIGIN: &str = "http://localhost:3000";

    async fn session_on(app: MockApp, path: &str) -> Session {
        let backend = MockBackend::new(app);
        let session = Session::open(&backend, ORIGIN, Duration::from_secs(1))
            .await
            .unwrap();
        session.navigate(path).await.unwrap();
        session
    }

    mod url_pattern_tests {
        use super::*;

        #[test]
        fn test_kinds() {
            let url = "http://localhost:3000/checkin/dashboard";
            assert!(UrlPattern::Exact(url.into()).matches(url));
            assert!(UrlPattern::Prefix("http://localhost:3000/".into()).matches(url));
            assert!(UrlPattern::Contains("/checkin/".into()).matches(url));
            assert!(UrlPattern::Glob("*/checkin/*".into()).matches(url));
            assert!(UrlPattern::Glob("*/dashboard".into()).matches(url));
            assert!(!UrlPattern::Glob("*/login".into()).matches(url));
            assert!(UrlPattern::Regex(r"/checkin/\w+$".into()).matches(url));
            assert!(!UrlPattern::Regex("([".into()).matches(url));
        }

        #[test]
        fn test_glob_anchors_at_start() {
            assert!(!UrlPattern::Glob("localhost*".into()).matches("http://localhost/"));
            assert!(UrlPattern::Glob("http://*".into()).matches("http://localhost/"));
        }

        #[test]
        fn test_matcher_compiles_once() {
            let pattern = UrlPattern::Regex(r"/checkin/\w+$".into());
            let matcher = pattern.matcher();
            assert!(matcher.regex.is_some());
            assert!(matcher.matches("http://localhost:3000/checkin/sunday"));
            assert!(!matcher.matches("http://localhost:3000/checkin/"));

            let broken = UrlPattern::Regex("([".into());
            let matcher = broken.matcher();
            assert!(matcher.regex.is_none());
            assert!(!matcher.matches("(["));
            assert!(UrlPattern::Glob("*".into()).matcher().regex.is_none());
        }

        #[test]
        fn test_yaml_shape() {
            let c: Condition = crate::yaml::from_str("url: { glob: \"*/login\" }").unwrap();
            assert_eq!(c, Condition::UrlMatches(UrlPattern::Glob("*/login".into())));
            let c: Condition = crate::yaml::from_str("network_idle").unwrap();
            assert_eq!(c, Condition::NetworkIdle);
            let c: Condition =
                crate::yaml::from_str("visible: { role: heading, name: Child Check-In }").unwrap();
            assert_eq!(c, Condition::visible(Selector::role("heading", "Child Check-In")));
        }

        proptest! {
            #[test]
            fn prop_star_matches_everything(url in "[a-z:/.0-9]{0,40}") {
                prop_assert!(UrlPattern::Glob("*".into()).matches(&url));
            }

            #[test]
            fn prop_literal_glob_is_exact(url in "[a-z/]{1,20}") {
                prop_assert!(UrlPattern::Glob(url.clone()).matches(&url));
                let longer = format!("{url}x");
                prop_assert!(!UrlPattern::Glob(url).matches(&longer));
            }
        }
    }

    mod waiter_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_visible_before_timeout() {
            let app = MockApp::new(ORIGIN).route(
                "/late",
                MockPage::public().with(
                    MockElement::heading("h", "Child Check-In")
                        .appearing_after(Duration::from_millis(400)),
                ),
            );
            let mut session = session_on(app, "/late").await;
            let cond = Condition::visible(Selector::role("heading", "Child Check-In"));
            let outcome = Waiter::new()
                .wait_for(&session, &cond, &WaitOptions::new().with_timeout(1_000))
                .await
                .unwrap();
            assert!(matches!(outcome.signal, Signal::Element(ref p) if p.visible));
            assert!(outcome.elapsed >= Duration::from_millis(400));
            assert!(outcome.elapsed < Duration::from_millis(400 + 2 * DEFAULT_POLL_INTERVAL_MS));
            assert!(outcome.attempts > 1);

            // Already satisfied: first poll succeeds.
            let again = Waiter::new()
                .wait_for(&session, &cond, &WaitOptions::new())
                .await
                .unwrap();
            assert_eq!(again.attempts, 1);
            session.close().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_reports_condition() {
            let app = MockApp::new(ORIGIN).route(
                "/never",
                MockPage::public().with(MockElement::heading("h", "Later").hidden()),
            );
            let mut session = session_on(app, "/never").await;
            let cond = Condition::visible(Selector::role("heading", "Later"));
            let err = Waiter::new()
                .wait_for(&session, &cond, &WaitOptions::new().with_timeout(300))
                .await
                .unwrap_err();
            match err {
                VergerError::WaitTimeout {
                    condition,
                    elapsed_ms,
                } => {
                    assert!(condition.contains("heading"));
                    assert!(elapsed_ms >= 300);
                    assert!(elapsed_ms < 300 + DEFAULT_POLL_INTERVAL_MS);
                }
                other => panic!("unexpected {other:?}"),
            }
            session.close().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_hidden_and_text() {
            let app = MockApp::new(ORIGIN).route(
                "/dialog",
                MockPage::public()
                    .with(MockElement::heading("title", "Manage Children"))
                    .with(MockElement::button("close", "Close").on_click(ClickEffect::Hide("title".into()))),
            );
            let mut session = session_on(app, "/dialog").await;
            let waiter = Waiter::new();
            let title = Selector::role("heading", "Manage Children");

            let outcome = waiter
                .wait_for(&session, &Condition::text(title.clone(), "children"), &WaitOptions::new())
                .await
                .unwrap();
            assert_eq!(outcome.signal, Signal::Text("Manage Children".into()));

            session.driver().click(&Selector::role("button", "Close")).await.unwrap();
            let outcome = waiter
                .wait_for(&session, &Condition::hidden(title), &WaitOptions::new())
                .await
                .unwrap();
            assert_eq!(outcome.signal, Signal::Hidden);
            session.close().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_network_idle_after_loading() {
            let app = MockApp::new(ORIGIN)
                .route("/busy", MockPage::public())
                .busy_for(Duration::from_millis(300));
            let mut session = session_on(app, "/busy").await;
            let outcome = Waiter::new()
                .wait_for(&session, &Condition::NetworkIdle, &WaitOptions::new())
                .await
                .unwrap();
            assert_eq!(outcome.signal, Signal::Idle);
            assert!(outcome.elapsed >= Duration::from_millis(300 + NETWORK_IDLE_THRESHOLD_MS));
            session.close().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_url_condition() {
            let backend = MockBackend::new(
                MockApp::new(ORIGIN).route("/members/*", MockPage::protected()),
            );
            let mut driver = backend.new_context().await.unwrap();
            driver
                .navigate(&format!("{ORIGIN}/members/unknown-id"), Duration::from_secs(1))
                .await
                .unwrap();
            let outcome = Waiter::new()
                .wait_on(
                    driver.as_ref(),
                    &Condition::UrlMatches(UrlPattern::Glob("*/login".into())),
                    &WaitOptions::new(),
                )
                .await
                .unwrap();
            assert_eq!(outcome.signal, Signal::Url(format!("{ORIGIN}/login")));

            let err = Waiter::new()
                .wait_on(
                    driver.as_ref(),
                    &Condition::UrlMatches(UrlPattern::Regex(r"/members/\w+$".into())),
                    &WaitOptions::new().with_timeout(200),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, VergerError::WaitTimeout { .. }));

            let outcome = Waiter::new()
                .wait_on(
                    driver.as_ref(),
                    &Condition::UrlMatches(UrlPattern::Regex(r"/login$".into())),
                    &WaitOptions::new(),
                )
                .await
                .unwrap();
            assert_eq!(outcome.attempts, 1);
            driver.close().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancel_interrupts_wait() {
            let app = MockApp::new(ORIGIN).route("/empty", MockPage::public());
            let mut session = session_on(app, "/empty").await;
            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                trigger.cancel("ctrl-c");
            });
            let err = Waiter::with_cancel(cancel)
                .wait_for(
                    &session,
                    &Condition::visible(Selector::text("nothing")),
                    &WaitOptions::new().with_timeout(60_000),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, VergerError::Cancelled { .. }));
            session.close().await.unwrap();
        }
    }
}
