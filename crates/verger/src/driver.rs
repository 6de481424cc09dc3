//! Page driver abstraction.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  BrowserBackend  (one browser process)                       │
//! │     └── new_context() ──► PageDriver  (isolated context+page) │
//! │                                                              │
//! │  ChromiumBackend   CDP via chromiumoxide  (feature=browser)  │
//! │  MockBackend       in-process scripted application           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions, the wait engine and the runner only ever talk to these traits,
//! so every layer above can be exercised against [`MockApp`].

use crate::locator::{normalize_text, text_matches, BoundingBox, Selector};
use crate::result::{NavigationFailure, VergerError, VergerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// PNG file signature; mock screenshots start with it
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Where a navigation ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationOutcome {
    /// URL after redirects
    pub url: String,
    /// Main document status, when the backend can observe it
    pub status: Option<u16>,
}

/// Snapshot of what a selector currently resolves to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementProbe {
    /// Number of matching elements
    pub count: usize,
    /// At least one match is rendered and visible
    pub visible: bool,
    /// Normalized text of the first visible match (or first match)
    pub text: Option<String>,
    /// Box of the first visible match
    #[serde(rename = "box")]
    pub bounding_box: Option<BoundingBox>,
}

impl ElementProbe {
    /// True when nothing matched
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Inputs to the network-idle heuristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkActivity {
    /// Resource timing entries recorded so far
    pub resource_count: u64,
    /// `document.readyState === "complete"`
    pub ready_state_complete: bool,
    /// Milliseconds since the last resource finished loading
    pub quiet_ms: u64,
}

/// A cookie scoped to a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// URL the cookie is scoped to
    pub url: String,
}

impl Cookie {
    /// Create a new cookie
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url: url.into(),
        }
    }
}

/// Region a screenshot covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureArea {
    /// Entire scrollable page
    FullPage,
    /// A clip rectangle
    Clip(BoundingBox),
}

/// One isolated browser context with a single page
#[async_trait]
pub trait PageDriver: Send + Sync + fmt::Debug {
    /// Navigate and wait for the main document to commit
    async fn navigate(&self, url: &str, timeout: Duration) -> VergerResult<NavigationOutcome>;

    /// URL of the current document
    async fn current_url(&self) -> VergerResult<String>;

    /// Resolve a selector without waiting
    async fn probe(&self, selector: &Selector) -> VergerResult<ElementProbe>;

    /// Click the first visible match; `Ok(false)` when none is visible
    async fn click(&self, selector: &Selector) -> VergerResult<bool>;

    /// Fill the first visible match; `Ok(false)` when none is visible
    async fn fill(&self, selector: &Selector, value: &str) -> VergerResult<bool>;

    /// Evaluate a script in the page
    async fn evaluate(&self, script: &str) -> VergerResult<serde_json::Value>;

    /// Add cookies to the context
    async fn set_cookies(&self, cookies: &[Cookie]) -> VergerResult<()>;

    /// Write a local-storage entry for the current origin
    async fn set_local_storage(&self, key: &str, value: &str) -> VergerResult<()>;

    /// Sample the page's network activity
    async fn network_activity(&self) -> VergerResult<NetworkActivity>;

    /// Capture PNG bytes
    async fn screenshot(&self, area: CaptureArea) -> VergerResult<Vec<u8>>;

    /// Dispose of the context; further calls fail
    async fn close(&mut self) -> VergerResult<()>;
}

/// Owner of a browser process, handing out isolated contexts
#[async_trait]
pub trait BrowserBackend: Send + Sync + fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Open a fresh context with one blank page
    async fn new_context(&self) -> VergerResult<Box<dyn PageDriver>>;

    /// Close every context and the browser process
    async fn shutdown(&self) -> VergerResult<()>;
}

// ============================================================================
// Mock application
// ============================================================================

/// What happens when a mock element is clicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickEffect {
    /// Make the element with this key visible
    Show(String),
    /// Hide the element with this key
    Hide(String),
    /// Append a visible text element echoing the value filled into `from`
    EchoInput {
        /// Key of the input whose value is echoed
        from: String,
    },
    /// Navigate to a path on the same origin
    NavigateTo(String),
}

/// An element on a mock page
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// Key used by click effects
    pub key: String,
    /// ARIA role
    pub role: Option<String>,
    /// Accessible name (defaults to `text`)
    pub name: Option<String>,
    /// Associated label text
    pub label: Option<String>,
    /// Placeholder text
    pub placeholder: Option<String>,
    /// Rendered text
    pub text: String,
    /// `data-testid`
    pub test_id: Option<String>,
    /// CSS/XPath expressions that select this element
    pub structural: Vec<String>,
    /// Rendered at page load
    pub visible: bool,
    /// Becomes visible this long after the page loads
    pub appear_after: Option<Duration>,
    /// Effects applied on click
    pub on_click: Vec<ClickEffect>,
}

impl MockElement {
    fn with_role(key: &str, role: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            role: Some(role.to_string()),
            name: Some(name.to_string()),
            text: name.to_string(),
            visible: true,
            ..Self::default()
        }
    }

    /// A heading
    #[must_use]
    pub fn heading(key: &str, text: &str) -> Self {
        Self::with_role(key, "heading", text)
    }

    /// A button
    #[must_use]
    pub fn button(key: &str, text: &str) -> Self {
        Self::with_role(key, "button", text)
    }

    /// A text input
    #[must_use]
    pub fn textbox(key: &str) -> Self {
        Self {
            key: key.to_string(),
            role: Some("textbox".to_string()),
            visible: true,
            ..Self::default()
        }
    }

    /// Plain text
    #[must_use]
    pub fn text(key: &str, text: &str) -> Self {
        Self {
            key: key.to_string(),
            text: text.to_string(),
            visible: true,
            ..Self::default()
        }
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Set the placeholder
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    /// Set the test id
    #[must_use]
    pub fn with_test_id(mut self, id: &str) -> Self {
        self.test_id = Some(id.to_string());
        self
    }

    /// Add a CSS or XPath alias
    #[must_use]
    pub fn with_structural(mut self, expr: &str) -> Self {
        self.structural.push(expr.to_string());
        self
    }

    /// Start hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Appear after a delay
    #[must_use]
    pub const fn appearing_after(mut self, delay: Duration) -> Self {
        self.visible = false;
        self.appear_after = Some(delay);
        self
    }

    /// Add a click effect
    #[must_use]
    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click.push(effect);
        self
    }

    /// Whether a selector resolves to this element
    #[must_use]
    pub fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Role { role, name, exact } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_deref().map_or(true, |expected| {
                        let actual = self
                            .name
                            .as_deref()
                            .or(self.label.as_deref())
                            .unwrap_or(&self.text);
                        text_matches(expected, actual, *exact)
                    })
            }
            Selector::Label(label) => self
                .label
                .as_deref()
                .is_some_and(|actual| text_matches(label, actual, false)),
            Selector::Placeholder(text) => self
                .placeholder
                .as_deref()
                .is_some_and(|actual| text_matches(text, actual, false)),
            Selector::Text(text) => !self.text.is_empty() && text_matches(text, &self.text, false),
            Selector::TestId(id) => self.test_id.as_deref() == Some(id.as_str()),
            Selector::Css(expr) | Selector::XPath(expr) => self.structural.iter().any(|s| s == expr),
        }
    }
}

/// A route of the mock application
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    /// Requires an accepted auth token
    pub protected: bool,
    /// Elements rendered on load
    pub elements: Vec<MockElement>,
}

impl MockPage {
    /// A page anyone can see
    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    /// A page behind authentication
    #[must_use]
    pub fn protected() -> Self {
        Self {
            protected: true,
            elements: Vec::new(),
        }
    }

    /// Add an element
    #[must_use]
    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }
}

#[derive(Debug)]
struct AppState {
    origin: String,
    login_path: String,
    pages: Vec<(String, MockPage)>,
    accepted_tokens: HashSet<String>,
    auth_cookie: String,
    storage_key: String,
    unresolvable_hosts: HashSet<String>,
    status_overrides: HashMap<String, u16>,
    latency: Duration,
    busy_for: Duration,
    fail_screenshots: bool,
    fail_new_context: bool,
    fail_close: bool,
    contexts_opened: usize,
    contexts_closed: usize,
    shutdowns: usize,
    calls: Vec<String>,
}

/// In-process stand-in for the target web application.
///
/// Routes are registered by path; a key ending in `/*` matches any deeper
/// path. Protected routes redirect to the login path unless the context
/// carries an accepted token, either as the auth cookie or inside the JSON
/// local-storage session entry.
#[derive(Debug, Clone)]
pub struct MockApp {
    state: Arc<Mutex<AppState>>,
}

impl MockApp {
    /// Create an app served at `origin` (no trailing slash)
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            state: Arc::new(Mutex::new(AppState {
                origin: origin.trim_end_matches('/').to_string(),
                login_path: "/login".to_string(),
                pages: vec![
                    ("/".to_string(), MockPage::public()),
                    ("/login".to_string(), MockPage::public()),
                ],
                accepted_tokens: HashSet::new(),
                auth_cookie: "demo_token".to_string(),
                storage_key: "session".to_string(),
                unresolvable_hosts: HashSet::new(),
                status_overrides: HashMap::new(),
                latency: Duration::ZERO,
                busy_for: Duration::ZERO,
                fail_screenshots: false,
                fail_new_context: false,
                fail_close: false,
                contexts_opened: 0,
                contexts_closed: 0,
                shutdowns: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a route
    #[must_use]
    pub fn route(self, path: &str, page: MockPage) -> Self {
        {
            let mut state = self.state();
            state.pages.retain(|(p, _)| p != path);
            state.pages.push((path.to_string(), page));
        }
        self
    }

    /// Accept a token for protected routes
    #[must_use]
    pub fn accept_token(self, token: &str) -> Self {
        self.state().accepted_tokens.insert(token.to_string());
        self
    }

    /// Host that fails DNS resolution
    #[must_use]
    pub fn unresolvable(self, host: &str) -> Self {
        self.state().unresolvable_hosts.insert(host.to_string());
        self
    }

    /// Serve a path with a fixed HTTP status
    #[must_use]
    pub fn status(self, path: &str, status: u16) -> Self {
        self.state().status_overrides.insert(path.to_string(), status);
        self
    }

    /// Delay every navigation
    #[must_use]
    pub fn latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    /// Keep loading resources this long after each navigation
    #[must_use]
    pub fn busy_for(self, busy: Duration) -> Self {
        self.state().busy_for = busy;
        self
    }

    /// Make screenshot capture fail
    pub fn set_fail_screenshots(&self, fail: bool) {
        self.state().fail_screenshots = fail;
    }

    /// Make context creation fail
    pub fn set_fail_new_context(&self, fail: bool) {
        self.state().fail_new_context = fail;
    }

    /// Make context disposal fail
    pub fn set_fail_close(&self, fail: bool) {
        self.state().fail_close = fail;
    }

    /// Origin the app is served at
    #[must_use]
    pub fn origin(&self) -> String {
        self.state().origin.clone()
    }

    /// Contexts opened so far
    #[must_use]
    pub fn contexts_opened(&self) -> usize {
        self.state().contexts_opened
    }

    /// Contexts opened and not yet closed
    #[must_use]
    pub fn open_contexts(&self) -> usize {
        let state = self.state();
        state.contexts_opened - state.contexts_closed
    }

    /// How many times the backend was shut down
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.state().shutdowns
    }

    /// Recorded driver calls, `"<ctx>:<method> <arg>"`
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Check if any context made a call starting with `prefix`
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.state()
            .calls
            .iter()
            .any(|c| c.split_once(':').is_some_and(|(_, call)| call.starts_with(prefix)))
    }

    fn record(&self, context: usize, call: String) {
        self.state().calls.push(format!("{context}:{call}"));
    }

    fn lookup(&self, path: &str) -> Option<MockPage> {
        let state = self.state();
        state
            .pages
            .iter()
            .find(|(p, _)| p == path)
            .or_else(|| {
                state.pages.iter().find(|(p, _)| {
                    p.strip_suffix("/*")
                        .is_some_and(|prefix| path.starts_with(&format!("{prefix}/")))
                })
            })
            .map(|(_, page)| page.clone())
    }
}

/// Backend handing out [`MockDriver`] contexts over one [`MockApp`]
#[derive(Debug, Clone)]
pub struct MockBackend {
    app: MockApp,
}

impl MockBackend {
    /// Create a backend for `app`
    #[must_use]
    pub const fn new(app: MockApp) -> Self {
        Self { app }
    }

    /// The application behind this backend
    #[must_use]
    pub const fn app(&self) -> &MockApp {
        &self.app
    }
}

#[async_trait]
impl BrowserBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn new_context(&self) -> VergerResult<Box<dyn PageDriver>> {
        let id = {
            let mut state = self.app.state();
            if state.fail_new_context {
                return Err(VergerError::page("mock: context creation disabled"));
            }
            state.contexts_opened += 1;
            state.contexts_opened
        };
        Ok(Box::new(MockDriver::new(self.app.clone(), id)))
    }

    async fn shutdown(&self) -> VergerResult<()> {
        self.app.state().shutdowns += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ContextState {
    url: String,
    path: Option<String>,
    page: Option<MockPage>,
    loaded_at: Option<Instant>,
    cookies: Vec<Cookie>,
    local_storage: HashMap<String, String>,
    shown: HashSet<String>,
    hidden: HashSet<String>,
    filled: HashMap<String, String>,
    extra: Vec<MockElement>,
    screenshots: u64,
    closed: bool,
}

/// One context of the mock browser
#[derive(Debug)]
pub struct MockDriver {
    app: MockApp,
    id: usize,
    ctx: Mutex<ContextState>,
}

impl MockDriver {
    fn new(app: MockApp, id: usize) -> Self {
        Self {
            app,
            id,
            ctx: Mutex::new(ContextState {
                url: "about:blank".to_string(),
                ..ContextState::default()
            }),
        }
    }

    fn ctx(&self) -> MutexGuard<'_, ContextState> {
        self.ctx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> VergerResult<()> {
        if self.ctx().closed {
            Err(VergerError::page("context is closed"))
        } else {
            Ok(())
        }
    }

    fn is_authenticated(&self, ctx: &ContextState) -> bool {
        let state = self.app.state();
        let cookie_token = ctx
            .cookies
            .iter()
            .find(|c| c.name == state.auth_cookie && c.url.starts_with(&state.origin))
            .map(|c| c.value.clone());
        let storage_token = ctx
            .local_storage
            .get(&state.storage_key)
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|v| v.get("token").and_then(|t| t.as_str()).map(String::from));
        [cookie_token, storage_token]
            .into_iter()
            .flatten()
            .any(|token| state.accepted_tokens.contains(&token))
    }

    /// Every element currently in the DOM, with its visibility
    fn elements(ctx: &ContextState) -> Vec<(MockElement, bool)> {
        let Some(page) = &ctx.page else {
            return Vec::new();
        };
        let elapsed = ctx.loaded_at.map(|t| t.elapsed()).unwrap_or_default();
        page.elements
            .iter()
            .chain(ctx.extra.iter())
            .map(|el| {
                let appeared = el.appear_after.is_some_and(|delay| elapsed >= delay);
                let visible = !ctx.hidden.contains(&el.key)
                    && (el.visible || appeared || ctx.shown.contains(&el.key));
                (el.clone(), visible)
            })
            .collect()
    }

    fn first_visible(ctx: &ContextState, selector: &Selector) -> Option<MockElement> {
        Self::elements(ctx)
            .into_iter()
            .find(|(el, visible)| *visible && el.matches(selector))
            .map(|(el, _)| el)
    }

    fn load(&self, ctx: &mut ContextState, url: String, path: String, page: Option<MockPage>) {
        ctx.url = url;
        ctx.path = Some(path);
        ctx.page = page;
        ctx.loaded_at = Some(Instant::now());
        ctx.shown.clear();
        ctx.hidden.clear();
        ctx.filled.clear();
        ctx.extra.clear();
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> VergerResult<NavigationOutcome> {
        self.ensure_open()?;
        self.app.record(self.id, format!("navigate {url}"));

        let parsed = reqwest::Url::parse(url).map_err(|e| VergerError::NavigationError {
            url: url.to_string(),
            failure: NavigationFailure::Other(e.to_string()),
        })?;
        let (origin, login_path, latency, status_override) = {
            let state = self.app.state();
            let host = parsed.host_str().unwrap_or_default().to_string();
            if state.unresolvable_hosts.contains(&host) {
                return Err(VergerError::NavigationError {
                    url: url.to_string(),
                    failure: NavigationFailure::Dns,
                });
            }
            if parsed.origin().ascii_serialization() != state.origin {
                return Err(VergerError::NavigationError {
                    url: url.to_string(),
                    failure: NavigationFailure::Connection,
                });
            }
            (
                state.origin.clone(),
                state.login_path.clone(),
                state.latency,
                state.status_overrides.get(parsed.path()).copied(),
            )
        };

        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(VergerError::NavigationError {
                url: url.to_string(),
                failure: NavigationFailure::Timeout,
            });
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(status) = status_override {
            return Err(VergerError::NavigationError {
                url: url.to_string(),
                failure: NavigationFailure::HttpStatus(status),
            });
        }

        let path = parsed.path().to_string();
        let page = self.app.lookup(&path);
        let mut ctx = self.ctx();
        match page {
            None => Err(VergerError::NavigationError {
                url: url.to_string(),
                failure: NavigationFailure::HttpStatus(404),
            }),
            Some(page) if page.protected && !self.is_authenticated(&ctx) => {
                let login_url = format!("{origin}{login_path}");
                let login = self.app.lookup(&login_path);
                self.load(&mut ctx, login_url.clone(), login_path, login);
                Ok(NavigationOutcome {
                    url: login_url,
                    status: Some(200),
                })
            }
            Some(page) => {
                let final_url = parsed.to_string();
                self.load(&mut ctx, final_url.clone(), path, Some(page));
                Ok(NavigationOutcome {
                    url: final_url,
                    status: Some(200),
                })
            }
        }
    }

    async fn current_url(&self) -> VergerResult<String> {
        self.ensure_open()?;
        Ok(self.ctx().url.clone())
    }

    async fn probe(&self, selector: &Selector) -> VergerResult<ElementProbe> {
        self.ensure_open()?;
        let ctx = self.ctx();
        let matched: Vec<(MockElement, bool)> = Self::elements(&ctx)
            .into_iter()
            .filter(|(el, _)| el.matches(selector))
            .collect();
        let first_visible = matched.iter().position(|(_, visible)| *visible);
        let target = first_visible.or(if matched.is_empty() { None } else { Some(0) });
        Ok(ElementProbe {
            count: matched.len(),
            visible: first_visible.is_some(),
            text: target.map(|i| {
                let el = &matched[i].0;
                normalize_text(ctx.filled.get(&el.key).unwrap_or(&el.text))
            }),
            bounding_box: first_visible.map(|i| BoundingBox::new(0.0, 40.0 * i as f64, 320.0, 32.0)),
        })
    }

    async fn click(&self, selector: &Selector) -> VergerResult<bool> {
        self.ensure_open()?;
        self.app.record(self.id, format!("click {selector}"));
        let effects = {
            let ctx = self.ctx();
            match Self::first_visible(&ctx, selector) {
                Some(el) => el.on_click,
                None => return Ok(false),
            }
        };
        for effect in effects {
            match effect {
                ClickEffect::Show(key) => {
                    let mut ctx = self.ctx();
                    ctx.hidden.remove(&key);
                    ctx.shown.insert(key);
                }
                ClickEffect::Hide(key) => {
                    let mut ctx = self.ctx();
                    ctx.shown.remove(&key);
                    ctx.hidden.insert(key);
                }
                ClickEffect::EchoInput { from } => {
                    let mut ctx = self.ctx();
                    let value = ctx.filled.get(&from).cloned().unwrap_or_default();
                    let key = format!("echo-{}", ctx.extra.len());
                    ctx.extra.push(MockElement::text(&key, &value));
                }
                ClickEffect::NavigateTo(path) => {
                    let origin = self.app.origin();
                    let page = self.app.lookup(&path);
                    let mut ctx = self.ctx();
                    self.load(&mut ctx, format!("{origin}{path}"), path, page);
                }
            }
        }
        Ok(true)
    }

    async fn fill(&self, selector: &Selector, value: &str) -> VergerResult<bool> {
        self.ensure_open()?;
        self.app.record(self.id, format!("fill {selector} {value:?}"));
        let mut ctx = self.ctx();
        match Self::first_visible(&ctx, selector) {
            Some(el) => {
                ctx.filled.insert(el.key, value.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn evaluate(&self, script: &str) -> VergerResult<serde_json::Value> {
        self.ensure_open()?;
        self.app.record(self.id, format!("evaluate {script}"));
        Ok(serde_json::Value::Null)
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> VergerResult<()> {
        self.ensure_open()?;
        let mut ctx = self.ctx();
        for cookie in cookies {
            self.app
                .record(self.id, format!("set_cookie {}={}", cookie.name, cookie.value));
            ctx.cookies.retain(|c| c.name != cookie.name);
            ctx.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn set_local_storage(&self, key: &str, value: &str) -> VergerResult<()> {
        self.ensure_open()?;
        let mut ctx = self.ctx();
        if ctx.page.is_none() {
            return Err(VergerError::page(
                "local storage is unavailable before the first navigation",
            ));
        }
        self.app.record(self.id, format!("set_local_storage {key}"));
        ctx.local_storage.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn network_activity(&self) -> VergerResult<NetworkActivity> {
        self.ensure_open()?;
        let busy_for = self.app.state().busy_for;
        let ctx = self.ctx();
        let elapsed = ctx.loaded_at.map(|t| t.elapsed()).unwrap_or_default();
        let settled = elapsed >= busy_for;
        let loading = if settled { busy_for } else { elapsed };
        Ok(NetworkActivity {
            resource_count: 1 + (loading.as_millis() / 100) as u64,
            ready_state_complete: settled,
            quiet_ms: elapsed.saturating_sub(busy_for).as_millis() as u64,
        })
    }

    async fn screenshot(&self, area: CaptureArea) -> VergerResult<Vec<u8>> {
        self.ensure_open()?;
        if self.app.state().fail_screenshots {
            return Err(VergerError::page("mock: screenshot capture disabled"));
        }
        let mut ctx = self.ctx();
        ctx.screenshots += 1;
        let area = match area {
            CaptureArea::FullPage => "full".to_string(),
            CaptureArea::Clip(b) => format!("{}x{}+{}+{}", b.width, b.height, b.x, b.y),
        };
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(
            format!("{}|{}|{}|{}", self.id, ctx.url, area, ctx.screenshots).as_bytes(),
        );
        drop(ctx);
        self.app.record(self.id, format!("screenshot {area}"));
        Ok(bytes)
    }

    async fn close(&mut self) -> VergerResult<()> {
        let mut ctx = self.ctx();
        if ctx.closed {
            return Ok(());
        }
        if self.app.state().fail_close {
            return Err(VergerError::page("context disposal failed"));
        }
        ctx.closed = true;
        drop(ctx);
        self.app.state().contexts_closed += 1;
        self.app.record(self.id, "close".to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ORIGIN: &str = "http://localhost:3000";

    fn app() -> MockApp {
        MockApp::new(ORIGIN)
            .accept_token("demo-admin")
            .route(
                "/dashboard",
                MockPage::protected().with(MockElement::heading("title", "Dashboard")),
            )
            .route(
                "/members/*",
                MockPage::protected().with(MockElement::heading("title", "Member Profile")),
            )
            .route(
                "/settings",
                MockPage::protected()
                    .with(
                        MockElement::button("add", "Add Request Type")
                            .on_click(ClickEffect::Show("name".into())),
                    )
                    .with(
                        MockElement::textbox("name")
                            .with_placeholder("Request type name")
                            .hidden(),
                    )
                    .with(
                        MockElement::button("confirm", "Save")
                            .on_click(ClickEffect::EchoInput {
                                from: "name".into(),
                            })
                            .on_click(ClickEffect::Hide("name".into())),
                    ),
            )
    }

    async fn context(app: &MockApp) -> Box<dyn PageDriver> {
        MockBackend::new(app.clone()).new_context().await.unwrap()
    }

    mod element_tests {
        use super::*;

        #[test]
        fn test_role_matching_uses_name() {
            let el = MockElement::heading("h", "Child Check-In");
            assert!(el.matches(&Selector::role("heading", "check-in")));
            assert!(el.matches(&Selector::any_role("heading")));
            assert!(!el.matches(&Selector::role("button", "Child Check-In")));
            assert!(!el.matches(&Selector::role("heading", "Check-In").exact()));
        }

        #[test]
        fn test_structural_aliases() {
            let el = MockElement::button("b", "Go").with_structural("#go");
            assert!(el.matches(&Selector::css("#go")));
            assert!(!el.matches(&Selector::css(".go")));
        }

        #[test]
        fn test_label_and_placeholder() {
            let el = MockElement::textbox("t")
                .with_label("Full Name")
                .with_placeholder("Jane Doe");
            assert!(el.matches(&Selector::label("full name")));
            assert!(el.matches(&Selector::placeholder("Jane")));
            assert!(el.matches(&Selector::role("textbox", "Full Name")));
        }
    }

    mod navigation_tests {
        use super::*;

        #[tokio::test]
        async fn test_protected_redirects_without_token() {
            let app = app();
            let page = context(&app).await;
            let outcome = page
                .navigate(&format!("{ORIGIN}/dashboard"), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(outcome.url, format!("{ORIGIN}/login"));
        }

        #[tokio::test]
        async fn test_cookie_token_authenticates() {
            let app = app();
            let page = context(&app).await;
            page.set_cookies(&[Cookie::new("demo_token", "demo-admin", ORIGIN)])
                .await
                .unwrap();
            let outcome = page
                .navigate(&format!("{ORIGIN}/members/42"), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(outcome.url, format!("{ORIGIN}/members/42"));
        }

        #[tokio::test]
        async fn test_storage_token_authenticates() {
            let app = app();
            let page = context(&app).await;
            page.navigate(&format!("{ORIGIN}/login"), Duration::from_secs(1))
                .await
                .unwrap();
            page.set_local_storage("session", r#"{"token":"demo-admin","provider":"demo"}"#)
                .await
                .unwrap();
            let outcome = page
                .navigate(&format!("{ORIGIN}/dashboard"), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(outcome.url.ends_with("/dashboard"));
        }

        #[tokio::test]
        async fn test_storage_requires_a_document() {
            let app = app();
            let page = context(&app).await;
            assert!(page.set_local_storage("session", "{}").await.is_err());
        }

        #[tokio::test]
        async fn test_failure_classification() {
            let app = app()
                .unresolvable("nowhere.invalid")
                .status("/boom", 500);
            let page = context(&app).await;
            let t = Duration::from_secs(1);

            let err = page.navigate("http://nowhere.invalid/", t).await.unwrap_err();
            assert!(matches!(
                err,
                VergerError::NavigationError {
                    failure: NavigationFailure::Dns,
                    ..
                }
            ));

            let err = page.navigate("http://localhost:9/", t).await.unwrap_err();
            assert!(matches!(
                err,
                VergerError::NavigationError {
                    failure: NavigationFailure::Connection,
                    ..
                }
            ));

            let err = page.navigate(&format!("{ORIGIN}/boom"), t).await.unwrap_err();
            assert!(matches!(
                err,
                VergerError::NavigationError {
                    failure: NavigationFailure::HttpStatus(500),
                    ..
                }
            ));
        }

        #[tokio::test(start_paused = true)]
        async fn test_latency_beyond_timeout() {
            let app = app().latency(Duration::from_secs(5));
            let page = context(&app).await;
            let err = page
                .navigate(&format!("{ORIGIN}/login"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                VergerError::NavigationError {
                    failure: NavigationFailure::Timeout,
                    ..
                }
            ));
        }
    }

    mod interaction_tests {
        use super::*;

        #[tokio::test]
        async fn test_show_fill_echo_flow() {
            let app = app();
            let page = context(&app).await;
            page.set_cookies(&[Cookie::new("demo_token", "demo-admin", ORIGIN)])
                .await
                .unwrap();
            page.navigate(&format!("{ORIGIN}/settings"), Duration::from_secs(1))
                .await
                .unwrap();

            let input = Selector::placeholder("Request type name");
            assert!(!page.probe(&input).await.unwrap().visible);
            assert!(!page.fill(&input, "x").await.unwrap());

            assert!(page.click(&Selector::role("button", "Add Request Type")).await.unwrap());
            assert!(page.probe(&input).await.unwrap().visible);
            assert!(page.fill(&input, "Test Request Type").await.unwrap());
            assert!(page.click(&Selector::role("button", "Save")).await.unwrap());

            let probe = page.probe(&Selector::text("Test Request Type")).await.unwrap();
            assert!(probe.visible);
            assert_eq!(probe.text.as_deref(), Some("Test Request Type"));
            assert!(!page.probe(&input).await.unwrap().visible);
        }

        #[tokio::test(start_paused = true)]
        async fn test_delayed_element() {
            let app = MockApp::new(ORIGIN).route(
                "/slow",
                MockPage::public().with(
                    MockElement::heading("h", "Late").appearing_after(Duration::from_millis(300)),
                ),
            );
            let page = context(&app).await;
            page.navigate(&format!("{ORIGIN}/slow"), Duration::from_secs(1))
                .await
                .unwrap();
            let sel = Selector::role("heading", "Late");
            let probe = page.probe(&sel).await.unwrap();
            assert_eq!(probe.count, 1);
            assert!(!probe.visible);
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(page.probe(&sel).await.unwrap().visible);
        }

        #[tokio::test]
        async fn test_screenshots_differ_and_close_is_idempotent() {
            let app = app();
            let mut page = context(&app).await;
            let a = page.screenshot(CaptureArea::FullPage).await.unwrap();
            let b = page.screenshot(CaptureArea::FullPage).await.unwrap();
            assert!(a.starts_with(&PNG_SIGNATURE));
            assert_ne!(a, b);

            page.close().await.unwrap();
            page.close().await.unwrap();
            assert_eq!(app.open_contexts(), 0);
            assert!(page.current_url().await.is_err());
        }

        #[tokio::test]
        async fn test_call_history() {
            let app = app();
            let page = context(&app).await;
            page.navigate(&format!("{ORIGIN}/login"), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(app.was_called("navigate"));
            assert!(!app.was_called("click"));
        }
    }
}
