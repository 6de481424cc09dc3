//! Harness configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! overrides:
//!
//! ```yaml
//! base_url: http://localhost:3000
//! jobs: 2
//! timeouts:
//!   wait_ms: 10000
//! auth:
//!   default_mode: cookie
//!   roles:
//!     pastor: { token: demo-pastor }
//! ```

use crate::browser::BrowserConfig;
use crate::result::{VergerError, VergerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default application origin
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default artifact directory
pub const DEFAULT_OUTPUT_DIR: &str = "target/verger";

/// Timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Per navigation
    pub navigation_ms: u64,
    /// Per `wait_for` step and action auto-wait
    pub wait_ms: u64,
    /// Per `assert` step and terminal expectation
    pub assertion_ms: u64,
    /// Whole scenario, including session setup
    pub scenario_ms: u64,
    /// Condition polling interval
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            wait_ms: 5_000,
            assertion_ms: 5_000,
            scenario_ms: 120_000,
            poll_interval_ms: 50,
        }
    }
}

impl Timeouts {
    /// Navigation timeout as Duration
    #[must_use]
    pub const fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    /// Scenario timeout as Duration
    #[must_use]
    pub const fn scenario(&self) -> Duration {
        Duration::from_millis(self.scenario_ms)
    }
}

/// How an auth token reaches the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// Cookie set before the first navigation
    #[default]
    Cookie,
    /// Local-storage session written after visiting the origin
    Storage,
}

/// Token and optional mode override for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Opaque token the application accepts
    pub token: String,
    /// Overrides [`AuthConfig::default_mode`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<InjectionMode>,
}

impl RoleConfig {
    /// Role using the default injection mode
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            mode: None,
        }
    }

    /// Pin the injection mode
    #[must_use]
    pub const fn with_mode(mut self, mode: InjectionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Authentication fixture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Mode for roles without an override
    pub default_mode: InjectionMode,
    /// Auth cookie name
    pub cookie_name: String,
    /// Companion cookie carrying the provider, if any
    pub provider_cookie: Option<String>,
    /// Provider recorded alongside the token
    pub provider: String,
    /// Local-storage key for storage mode
    pub storage_key: String,
    /// Route visited after storage injection
    pub landing_route: String,
    /// Role name to token
    pub roles: BTreeMap<String, RoleConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let roles = [
            ("admin", "demo-admin"),
            ("leader", "demo-leader"),
            ("member", "demo-member"),
            ("volunteer", "demo-volunteer"),
            ("demo", "demo-admin"),
        ]
        .into_iter()
        .map(|(role, token)| (role.to_string(), RoleConfig::token(token)))
        .collect();

        Self {
            default_mode: InjectionMode::Cookie,
            cookie_name: "demo_token".to_string(),
            provider_cookie: Some("session_provider".to_string()),
            provider: "demo".to_string(),
            storage_key: "session".to_string(),
            landing_route: "/dashboard".to_string(),
            roles,
        }
    }
}

impl AuthConfig {
    /// Add or replace a role
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>, config: RoleConfig) -> Self {
        self.roles.insert(role.into(), config);
        self
    }

    /// Set the default injection mode
    #[must_use]
    pub const fn with_default_mode(mut self, mode: InjectionMode) -> Self {
        self.default_mode = mode;
        self
    }
}

/// Complete harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Origin relative navigation targets resolve against
    pub base_url: String,
    /// Where screenshots, logs and the run summary go
    pub output_dir: PathBuf,
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Scenarios running at once, each in its own context
    pub jobs: usize,
    /// Skip remaining scenarios after the first failure
    pub fail_fast: bool,
    /// Timeouts
    pub timeouts: Timeouts,
    /// Auth fixtures
    pub auth: AuthConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            browser: BrowserConfig::default(),
            jobs: 1,
            fail_fast: false,
            timeouts: Timeouts::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_yaml_file(path: &Path) -> VergerResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VergerError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse from YAML text
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_yaml(raw: &str) -> VergerResult<Self> {
        let config: Self = crate::yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set browser configuration
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    /// Set concurrent scenario count
    #[must_use]
    pub const fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set fail fast
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set timeouts
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set auth configuration
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Check invariants the harness relies on
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first violation
    pub fn validate(&self) -> VergerResult<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| VergerError::config(format!("invalid base_url {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VergerError::config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.jobs == 0 {
            return Err(VergerError::config("jobs must be at least 1"));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(VergerError::config("timeouts.poll_interval_ms must be positive"));
        }
        if !self.auth.landing_route.starts_with('/') {
            return Err(VergerError::config("auth.landing_route must start with '/'"));
        }
        if let Some((role, _)) = self.auth.roles.iter().find(|(_, r)| r.token.is_empty()) {
            return Err(VergerError::config(format!("role {role} has an empty token")));
        }
        Ok(())
    }
}
