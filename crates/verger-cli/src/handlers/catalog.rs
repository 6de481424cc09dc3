//! List and show handlers for the built-in catalog

use crate::error::{CliError, CliResult};
use crate::{ListArgs, ShowArgs};
use verger::{catalog, yaml, ScenarioFile};

/// Catalog table, one scenario per line
#[must_use]
pub fn render_list(tag: Option<&str>) -> String {
    let filter: Vec<String> = tag.map(str::to_string).into_iter().collect();
    let mut out = String::new();
    for scenario in catalog::all()
        .into_iter()
        .filter(|s| s.matches_tags(&filter))
    {
        let role = scenario.role.as_deref().unwrap_or("-");
        let description = scenario.description.as_deref().unwrap_or("");
        out.push_str(&format!("{:<26} {role:<10} {description}\n", scenario.id));
    }
    out
}

/// A built-in scenario as a loadable scenario file
///
/// # Errors
///
/// Returns an invalid argument error for an unknown name
pub fn render_show(name: &str) -> CliResult<String> {
    let scenario = catalog::builtin(name).ok_or_else(|| {
        CliError::invalid_argument(format!(
            "unknown built-in scenario {name}; known: {}",
            catalog::names().join(", ")
        ))
    })?;
    let file = ScenarioFile {
        services: Vec::new(),
        scenarios: vec![scenario],
    };
    Ok(yaml::to_string(&file)?)
}

/// Execute the list command
pub fn execute_list(args: &ListArgs) {
    print!("{}", render_list(args.tag.as_deref()));
}

/// Execute the show command
///
/// # Errors
///
/// See [`render_show`]
pub fn execute_show(args: &ShowArgs) -> CliResult<()> {
    print!("{}", render_show(&args.name)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod list_tests {
        use super::*;

        #[test]
        fn test_lists_every_builtin() {
            let out = render_list(None);
            assert_eq!(out.lines().count(), catalog::all().len());
            assert!(out.contains("checkin-dashboard"));
            assert!(out.contains("volunteer"));
        }

        #[test]
        fn test_tag_filter() {
            let out = render_list(Some("theme"));
            assert!(out.contains("theme-contrast"));
            assert!(!out.contains("checkin-dashboard"));
        }
    }

    mod show_tests {
        use super::*;

        #[test]
        fn test_show_loads_back() {
            let yaml = render_show("checkin-dashboard").unwrap();
            assert!(yaml.contains("Child Check-In"));
            let file = ScenarioFile::from_yaml(&yaml).unwrap();
            assert_eq!(file.scenarios, vec![catalog::builtin("checkin-dashboard").unwrap()]);
        }

        #[test]
        fn test_every_builtin_loads_back() {
            for name in catalog::names() {
                let yaml = render_show(&name).unwrap();
                assert!(!yaml.contains(": !"), "{name} emitted a YAML tag:\n{yaml}");
                let file = ScenarioFile::from_yaml(&yaml).unwrap();
                assert_eq!(file.scenarios, vec![catalog::builtin(&name).unwrap()]);
            }
        }

        #[test]
        fn test_unknown_name() {
            let err = render_show("nope").unwrap_err();
            assert!(err.to_string().contains("unknown built-in scenario nope"));
        }
    }
}
