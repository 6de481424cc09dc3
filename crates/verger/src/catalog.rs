//! Built-in scenarios for the membership and check-in application.
//!
//! These cover the flows the application's UI work is verified against:
//! check-in dashboard, request types, theme contrast, children management
//! and the member edit form.

use crate::locator::Selector;
use crate::scenario::{Scenario, Step};
use crate::wait::{Condition, UrlPattern};

/// Pages captured in both themes by `theme-pages`
pub const THEMED_PAGES: [&str; 8] = [
    "dashboard",
    "members",
    "groups",
    "events",
    "announcements",
    "giving",
    "roles",
    "audit-log",
];

const THEME_SWITCHER: &str = "#theme-switcher-button";
const REQUEST_TYPE: &str = "Test Request Type";

/// Every built-in scenario, in catalog order
#[must_use]
pub fn all() -> Vec<Scenario> {
    vec![
        checkin_dashboard(),
        request_type(),
        request_type_dialog(),
        theme_contrast(),
        theme_pages(),
        ui_improvements(),
        manage_children(),
        member_form(),
        protected_route_redirect(),
    ]
}

/// Built-in scenario ids
#[must_use]
pub fn names() -> Vec<String> {
    all().into_iter().map(|s| s.id).collect()
}

/// Look up a built-in scenario
#[must_use]
pub fn builtin(name: &str) -> Option<Scenario> {
    all().into_iter().find(|s| s.id == name)
}

fn checkin_dashboard() -> Scenario {
    Scenario::new("checkin-dashboard")
        .with_description("Volunteer sees the child check-in dashboard")
        .as_role("volunteer")
        .tag("checkin")
        .step(Step::navigate("/checkin/dashboard"))
        .step(Step::assert(Condition::visible(Selector::role(
            "heading",
            "Child Check-In",
        ))))
        .step(Step::screenshot("checkin-dashboard"))
}

fn request_type() -> Scenario {
    let added = || Condition::visible(Selector::text(REQUEST_TYPE));
    Scenario::new("request-type")
        .with_description("Admin adds a request type and it shows up on the requests page")
        .as_role("admin")
        .tag("settings")
        .step(Step::navigate("/settings"))
        .step(
            Step::assert(Condition::visible(Selector::role(
                "heading",
                "Request Form Settings",
            )))
            .with_timeout(10_000),
        )
        .step(Step::click(Selector::role("button", "Add Request Type")))
        .step(Step::fill(Selector::placeholder("Request type name"), REQUEST_TYPE))
        .step(Step::click(Selector::xpath(
            r#"//div[contains(@class, "DialogFooter")]//button[text()="Add Request Type"]"#,
        )))
        .step(Step::assert(added()))
        .step(Step::screenshot("settings-page"))
        .step(Step::navigate("/requests"))
        .step(Step::click(Selector::any_role("combobox")))
        .step(Step::assert(added()))
        .step(Step::screenshot("requests-page"))
}

fn request_type_dialog() -> Scenario {
    Scenario::new("request-type-dialog")
        .with_description("Request type dialog with the confidential switch on")
        .as_role("admin")
        .tag("settings")
        .step(Step::navigate("/settings"))
        .step(Step::click(Selector::role("button", "Add Request Type")))
        .step(Step::fill(Selector::placeholder("Request type name"), REQUEST_TYPE))
        .step(Step::click(Selector::css("#confidential-switch")))
        .step(Step::screenshot("request-type-dialog"))
}

fn theme_contrast() -> Scenario {
    Scenario::new("theme-contrast")
        .with_description("Dashboard contrast after toggling the theme switcher")
        .as_role("admin")
        .tag("theme")
        .step(Step::navigate("/dashboard"))
        .step(Step::wait_for(Condition::visible(Selector::css("#main-content"))))
        .step(Step::click(Selector::css(THEME_SWITCHER)))
        .step(Step::wait_for(Condition::NetworkIdle))
        .step(Step::screenshot("light-theme-contrast"))
        .step(Step::click(Selector::css(THEME_SWITCHER)))
        .step(Step::wait_for(Condition::NetworkIdle))
        .step(Step::screenshot("dark-theme-contrast"))
}

fn theme_pages() -> Scenario {
    let mut scenario = Scenario::new("theme-pages")
        .with_description("Main pages captured in light and dark themes")
        .as_role("admin")
        .tag("theme")
        .with_timeout(300_000);
    for page in THEMED_PAGES {
        scenario = scenario
            .step(Step::navigate(format!("/{page}")))
            .step(Step::wait_for(Condition::NetworkIdle))
            .step(Step::evaluate(
                "document.documentElement.classList.remove('dark')",
            ))
            .step(Step::screenshot(format!("{page}-light")))
            .step(Step::evaluate("document.documentElement.classList.add('dark')"))
            .step(Step::screenshot(format!("{page}-dark")));
    }
    scenario
}

fn ui_improvements() -> Scenario {
    Scenario::new("ui-improvements")
        .with_description("Home page before and after switching theme")
        .as_role("admin")
        .tag("theme")
        .step(Step::navigate("/"))
        .step(
            Step::wait_for(Condition::visible(Selector::css(THEME_SWITCHER)))
                .with_timeout(120_000),
        )
        .step(Step::screenshot("light-theme"))
        .step(Step::click(Selector::css(THEME_SWITCHER)))
        .step(Step::screenshot("dark-theme"))
}

fn manage_children() -> Scenario {
    Scenario::new("manage-children")
        .with_description("Admin adds a child from a member profile")
        .as_role("admin")
        .tag("members")
        .step(Step::navigate("/members/user-member-3"))
        .step(Step::click(Selector::role("button", "Manage Children")))
        .step(Step::assert(Condition::visible(Selector::role(
            "heading",
            "Manage Children",
        ))))
        .step(Step::fill(Selector::label("Full Name"), "Test Child"))
        .step(Step::fill(Selector::label("Date of Birth"), "2020-01-01"))
        .step(Step::click(Selector::role("button", "Add Child")))
        .step(Step::screenshot("manage-children"))
}

fn member_form() -> Scenario {
    Scenario::new("member-form")
        .with_description("Member edit form opens from the profile page")
        .as_role("admin")
        .tag("members")
        .step(Step::navigate("/members/1"))
        .step(Step::click(Selector::role("button", "Edit")))
        .step(Step::screenshot("edit-member-form"))
}

fn protected_route_redirect() -> Scenario {
    Scenario::new("protected-route-redirect")
        .with_description("Anonymous visit to a member page lands on the login page")
        .tag("auth")
        .step(Step::navigate("/members/unknown-id"))
        .expect(Condition::UrlMatches(UrlPattern::Glob("*/login*".into())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scenario::check_unique_ids;

    mod catalog_tests {
        use super::*;

        #[test]
        fn test_catalog_is_valid() {
            let scenarios = all();
            check_unique_ids(&scenarios).unwrap();
            assert_eq!(names().len(), scenarios.len());
            assert!(builtin("checkin-dashboard").is_some());
            assert!(builtin("nope").is_none());
        }

        #[test]
        fn test_theme_pages_screenshots_are_unique() {
            let scenario = builtin("theme-pages").unwrap();
            let shots: Vec<&str> = scenario
                .steps
                .iter()
                .filter_map(|s| match s {
                    Step::Screenshot { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(shots.len(), THEMED_PAGES.len() * 2);
            let unique: std::collections::HashSet<_> = shots.iter().collect();
            assert_eq!(unique.len(), shots.len());
            assert!(shots.contains(&"audit-log-dark"));
        }

        #[test]
        fn test_structural_selectors_are_flagged() {
            assert!(builtin("checkin-dashboard")
                .unwrap()
                .structural_selectors()
                .is_empty());
            assert_eq!(builtin("request-type").unwrap().structural_selectors().len(), 1);
        }

        #[test]
        fn test_only_redirect_check_is_anonymous() {
            let anonymous: Vec<String> = all()
                .into_iter()
                .filter(|s| s.role.is_none())
                .map(|s| s.id)
                .collect();
            assert_eq!(anonymous, ["protected-route-redirect"]);
        }
    }
}
