//! Scenario definitions.
//!
//! Scenarios are built in code or loaded from YAML:
//!
//! ```yaml
//! scenarios:
//!   - id: checkin-dashboard
//!     role: volunteer
//!     steps:
//!       - action: navigate
//!         url: /checkin/dashboard
//!       - action: assert
//!         condition: { visible: { role: heading, name: Child Check-In } }
//!       - action: screenshot
//!         name: checkin-dashboard
//! ```

use crate::locator::Selector;
use crate::result::{VergerError, VergerResult};
use crate::retry::RetryPolicy;
use crate::supervisor::ServiceSpec;
use crate::wait::Condition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Region a screenshot step captures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotScope {
    /// Entire page
    #[default]
    FullPage,
    /// Bounding box of the first visible match
    Element(Selector),
}

/// One action of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a URL, relative to the base URL unless absolute
    Navigate {
        /// Target
        url: String,
    },
    /// Click the first visible match
    Click {
        /// Element to click
        selector: Selector,
        /// Auto-wait override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Type into the first visible match
    Fill {
        /// Input to fill
        selector: Selector,
        /// Value typed
        value: String,
        /// Auto-wait override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Block until a condition holds
    WaitFor {
        /// Condition
        condition: Condition,
        /// Timeout override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Like `wait_for`, but a timeout is an assertion failure
    Assert {
        /// Condition
        condition: Condition,
        /// Timeout override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Capture a PNG artifact
    Screenshot {
        /// Artifact name (file stem)
        name: String,
        /// Region
        #[serde(default)]
        scope: ScreenshotScope,
    },
    /// Run a script in the page
    Evaluate {
        /// JavaScript expression
        script: String,
    },
    /// Re-run a step under a retry policy
    Retry {
        /// Wrapped step
        step: Box<Step>,
        /// Attempts and backoff
        #[serde(default)]
        policy: RetryPolicy,
    },
}

impl Step {
    /// Navigate step
    #[must_use]
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::Navigate { url: url.into() }
    }

    /// Click step
    #[must_use]
    pub const fn click(selector: Selector) -> Self {
        Self::Click {
            selector,
            timeout_ms: None,
        }
    }

    /// Fill step
    #[must_use]
    pub fn fill(selector: Selector, value: impl Into<String>) -> Self {
        Self::Fill {
            selector,
            value: value.into(),
            timeout_ms: None,
        }
    }

    /// Wait step
    #[must_use]
    pub const fn wait_for(condition: Condition) -> Self {
        Self::WaitFor {
            condition,
            timeout_ms: None,
        }
    }

    /// Assert step
    #[must_use]
    pub const fn assert(condition: Condition) -> Self {
        Self::Assert {
            condition,
            timeout_ms: None,
        }
    }

    /// Full-page screenshot step
    #[must_use]
    pub fn screenshot(name: impl Into<String>) -> Self {
        Self::Screenshot {
            name: name.into(),
            scope: ScreenshotScope::FullPage,
        }
    }

    /// Element screenshot step
    #[must_use]
    pub fn screenshot_of(name: impl Into<String>, selector: Selector) -> Self {
        Self::Screenshot {
            name: name.into(),
            scope: ScreenshotScope::Element(selector),
        }
    }

    /// Evaluate step
    #[must_use]
    pub fn evaluate(script: impl Into<String>) -> Self {
        Self::Evaluate {
            script: script.into(),
        }
    }

    /// Wrap `self` in a retry
    #[must_use]
    pub fn retried(self, policy: RetryPolicy) -> Self {
        Self::Retry {
            step: Box::new(self),
            policy,
        }
    }

    /// Override the step timeout; steps without one are returned unchanged
    #[must_use]
    pub fn with_timeout(self, ms: u64) -> Self {
        let timeout_ms = Some(ms);
        match self {
            Self::Click { selector, .. } => Self::Click {
                selector,
                timeout_ms,
            },
            Self::Fill {
                selector, value, ..
            } => Self::Fill {
                selector,
                value,
                timeout_ms,
            },
            Self::WaitFor { condition, .. } => Self::WaitFor {
                condition,
                timeout_ms,
            },
            Self::Assert { condition, .. } => Self::Assert {
                condition,
                timeout_ms,
            },
            Self::Retry { step, policy } => Self::Retry {
                step: Box::new(step.with_timeout(ms)),
                policy,
            },
            other => other,
        }
    }

    /// Human-readable one-liner for logs and failure summaries
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Navigate { url } => format!("navigate to {url}"),
            Self::Click { selector, .. } => format!("click {selector}"),
            Self::Fill {
                selector, value, ..
            } => format!("fill {selector} with {value:?}"),
            Self::WaitFor { condition, .. } => format!("wait for {condition}"),
            Self::Assert { condition, .. } => format!("assert {condition}"),
            Self::Screenshot { name, scope } => match scope {
                ScreenshotScope::FullPage => format!("screenshot {name:?}"),
                ScreenshotScope::Element(selector) => format!("screenshot {name:?} of {selector}"),
            },
            Self::Evaluate { script } => {
                let first = script.lines().next().unwrap_or_default();
                if first.len() > 60 || script.lines().count() > 1 {
                    let cut: String = first.chars().take(60).collect();
                    format!("evaluate `{cut}...`")
                } else {
                    format!("evaluate `{first}`")
                }
            }
            Self::Retry { step, policy } => {
                format!("{} (up to {} attempts)", step.describe(), policy.max_attempts.max(1))
            }
        }
    }

    /// Every selector the step touches
    #[must_use]
    pub fn selectors(&self) -> Vec<&Selector> {
        match self {
            Self::Click { selector, .. } | Self::Fill { selector, .. } => vec![selector],
            Self::WaitFor { condition, .. } | Self::Assert { condition, .. } => {
                condition.selector().into_iter().collect()
            }
            Self::Screenshot {
                scope: ScreenshotScope::Element(selector),
                ..
            } => vec![selector],
            Self::Retry { step, .. } => step.selectors(),
            Self::Navigate { .. } | Self::Screenshot { .. } | Self::Evaluate { .. } => Vec::new(),
        }
    }
}

/// A named, ordered list of steps run in one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Unique id, also used for log and failure-screenshot names
    pub id: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Auth role; `None` runs unauthenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Steps, in order
    pub steps: Vec<Step>,
    /// Checked after every step succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect: Vec<Condition>,
    /// Labels used for filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Whole-scenario timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Scenario {
    /// Empty unauthenticated scenario
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            role: None,
            steps: Vec::new(),
            expect: Vec::new(),
            tags: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Run as `role`
    #[must_use]
    pub fn as_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a terminal expectation
    #[must_use]
    pub fn expect(mut self, condition: Condition) -> Self {
        self.expect.push(condition);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Override the scenario timeout
    #[must_use]
    pub const fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// True if `filter` is empty or shares a tag with the scenario
    #[must_use]
    pub fn matches_tags(&self, filter: &[String]) -> bool {
        filter.is_empty() || filter.iter().any(|t| self.tags.contains(t))
    }

    /// CSS/XPath selectors used anywhere in the scenario
    #[must_use]
    pub fn structural_selectors(&self) -> Vec<&Selector> {
        self.steps
            .iter()
            .flat_map(Step::selectors)
            .chain(self.expect.iter().filter_map(Condition::selector))
            .filter(|s| s.is_structural())
            .collect()
    }

    /// Check the scenario is runnable
    ///
    /// # Errors
    ///
    /// Returns `Config` for an empty id, no steps and no expectations, or a
    /// blank screenshot name
    pub fn validate(&self) -> VergerResult<()> {
        if self.id.trim().is_empty() {
            return Err(VergerError::config("scenario id must not be empty"));
        }
        if self.steps.is_empty() && self.expect.is_empty() {
            return Err(VergerError::config(format!(
                "scenario {} has no steps",
                self.id
            )));
        }
        for step in &self.steps {
            if let Step::Screenshot { name, .. } = step {
                if name.trim().is_empty() {
                    return Err(VergerError::config(format!(
                        "scenario {} has a screenshot without a name",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Contents of a scenario YAML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// Services started before any scenario runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceSpec>,
    /// Scenarios, in file order
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioFile {
    /// Parse and validate YAML
    ///
    /// # Errors
    ///
    /// Returns `Yaml` on malformed input, `Config` on invalid scenarios or
    /// duplicate ids
    pub fn from_yaml(raw: &str) -> VergerResult<Self> {
        let file: Self = crate::yaml::from_str(raw)?;
        file.validate()?;
        Ok(file)
    }

    /// Read, parse and validate a file
    ///
    /// # Errors
    ///
    /// See [`ScenarioFile::from_yaml`]; also `Io` if the file is unreadable
    pub fn load(path: &Path) -> VergerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw).map_err(|e| match e {
            VergerError::Config { message } => {
                VergerError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Check every scenario and that ids are unique
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first problem
    pub fn validate(&self) -> VergerResult<()> {
        check_unique_ids(&self.scenarios)?;
        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(VergerError::config(format!(
                    "duplicate service name {}",
                    service.name
                )));
            }
        }
        Ok(())
    }

    /// Merge another file into this one
    pub fn extend(&mut self, other: Self) {
        self.services.extend(other.services);
        self.scenarios.extend(other.scenarios);
    }
}

/// Validate each scenario and reject duplicate ids
///
/// # Errors
///
/// Returns `Config` for the first invalid scenario or repeated id
pub fn check_unique_ids(scenarios: &[Scenario]) -> VergerResult<()> {
    let mut seen = HashSet::new();
    for scenario in scenarios {
        scenario.validate()?;
        if !seen.insert(scenario.id.as_str()) {
            return Err(VergerError::config(format!(
                "duplicate scenario id {}",
                scenario.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    const CHECKIN: &str = r#"
scenarios:
  - id: checkin-dashboard
    role: volunteer
    tags: [smoke]
    steps:
      - action: navigate
        url: /checkin/dashboard
      - action: assert
        condition: { visible: { role: heading, name: "Child Check-In" } }
      - action: screenshot
        name: checkin-dashboard
"#;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parse_checkin() {
            let file = ScenarioFile::from_yaml(CHECKIN).unwrap();
            assert!(file.services.is_empty());
            let s = &file.scenarios[0];
            assert_eq!(s.role.as_deref(), Some("volunteer"));
            assert_eq!(
                s.steps,
                vec![
                    Step::navigate("/checkin/dashboard"),
                    Step::assert(Condition::visible(Selector::role("heading", "Child Check-In"))),
                    Step::screenshot("checkin-dashboard"),
                ]
            );
        }

        #[test]
        fn test_parse_all_actions() {
            let yaml = r#"
scenarios:
  - id: everything
    steps:
      - action: click
        selector: { role: button, name: Edit }
        timeout_ms: 2000
      - action: fill
        selector: { label: Full Name }
        value: Test Child
      - action: wait_for
        condition: network_idle
      - action: screenshot
        name: card
        scope: { element: { test_id: member-card } }
      - action: evaluate
        script: document.documentElement.classList.add('dark')
      - action: retry
        policy: { max_attempts: 3, backoff: { fixed: { ms: 100 } } }
        step:
          action: click
          selector: { text: Save }
    expect:
      - { hidden: { role: dialog } }
"#;
            let file = ScenarioFile::from_yaml(yaml).unwrap();
            let s = &file.scenarios[0];
            assert_eq!(s.steps.len(), 6);
            assert_eq!(
                s.steps[0],
                Step::click(Selector::role("button", "Edit")).with_timeout(2000)
            );
            assert_eq!(
                s.steps[5],
                Step::click(Selector::text("Save")).retried(RetryPolicy {
                    max_attempts: 3,
                    backoff: Backoff::Fixed { ms: 100 },
                })
            );
            assert_eq!(s.expect, vec![Condition::hidden(Selector::any_role("dialog"))]);
        }

        #[test]
        fn test_duplicate_ids_rejected() {
            let yaml = format!("{CHECKIN}\n  - id: checkin-dashboard\n    steps: [{{ action: navigate, url: / }}]\n");
            let err = ScenarioFile::from_yaml(&yaml).unwrap_err();
            assert!(err.to_string().contains("duplicate scenario id"));
        }

        #[test]
        fn test_unknown_action_rejected() {
            let yaml = "scenarios:\n  - id: x\n    steps:\n      - action: hover\n";
            assert!(matches!(
                ScenarioFile::from_yaml(yaml),
                Err(VergerError::Yaml(_))
            ));
        }

        #[test]
        fn test_load_prefixes_path() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("bad.yaml");
            std::fs::write(&path, "scenarios:\n  - id: \"\"\n    steps: []\n").unwrap();
            let err = ScenarioFile::load(&path).unwrap_err();
            assert!(err.to_string().contains("bad.yaml"));
        }

        #[test]
        fn test_serialize_round_trips_through_yaml() {
            let scenario = Scenario::new("member-form")
                .as_role("admin")
                .step(Step::navigate("/members/1"))
                .step(Step::click(Selector::role("button", "Edit")))
                .step(Step::screenshot("edit-member-form"));
            let yaml = crate::yaml::to_string(&scenario).unwrap();
            let back: Scenario = crate::yaml::from_str(&yaml).unwrap();
            assert_eq!(back, scenario);
        }
    }

    mod scenario_tests {
        use super::*;

        #[test]
        fn test_structural_selectors_found_everywhere() {
            let xpath = Selector::xpath(r#"//div[contains(@class, "DialogFooter")]//button"#);
            let s = Scenario::new("s")
                .step(Step::click(Selector::role("button", "Add")))
                .step(Step::click(xpath.clone()).retried(RetryPolicy::default()))
                .expect(Condition::visible(Selector::css("#main-content")));
            let found = s.structural_selectors();
            assert_eq!(found, vec![&xpath, &Selector::css("#main-content")]);
        }

        #[test]
        fn test_tags_filter() {
            let s = Scenario::new("s").tag("theme").tag("smoke");
            assert!(s.matches_tags(&[]));
            assert!(s.matches_tags(&["smoke".to_string()]));
            assert!(!s.matches_tags(&["children".to_string()]));
        }

        #[test]
        fn test_describe() {
            assert_eq!(Step::navigate("/settings").describe(), "navigate to /settings");
            assert_eq!(
                Step::fill(Selector::placeholder("Request type name"), "Test Request Type").describe(),
                r#"fill placeholder="Request type name" with "Test Request Type""#
            );
            let retry = Step::click(Selector::text("Save")).retried(RetryPolicy::attempts(4));
            assert!(retry.describe().ends_with("(up to 4 attempts)"));
            let long = Step::evaluate("a".repeat(100)).describe();
            assert!(long.ends_with("...`"));
        }

        #[test]
        fn test_validate() {
            assert!(Scenario::new(" ").step(Step::navigate("/")).validate().is_err());
            assert!(Scenario::new("x").validate().is_err());
            assert!(Scenario::new("x").step(Step::screenshot("")).validate().is_err());
            assert!(Scenario::new("x").step(Step::navigate("/")).validate().is_ok());
        }
    }
}
