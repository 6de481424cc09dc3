//! Run command handler

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, ProgressReporter};
use crate::RunArgs;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{info, warn};
use verger::{catalog, Harness, HarnessConfig, RunResult, ScenarioFile, SUMMARY_FILE};

/// Harness configuration from the config file (or defaults) with flag
/// and environment overrides applied
///
/// # Errors
///
/// Returns the library's configuration error when the file is unreadable
/// or the merged configuration is invalid
pub fn harness_config(args: &RunArgs) -> CliResult<HarnessConfig> {
    let mut config = match args.config {
        Some(ref path) => HarnessConfig::from_yaml_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(headless) = args.headless {
        config.browser.headless = headless;
    }
    if let Some(ref dir) = args.output_dir {
        config.output_dir.clone_from(dir);
    }
    if let Some(ref url) = args.base_url {
        config.base_url.clone_from(url);
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(ms) = args.timeout {
        config.timeouts.scenario_ms = ms;
    }
    if args.fail_fast {
        config.fail_fast = true;
    }
    if let Some(ref path) = args.chromium {
        config.browser.chromium_path = Some(path.clone());
    }
    if args.no_sandbox {
        config.browser.sandbox = false;
    }

    config.validate()?;
    Ok(config)
}

/// Scenarios and services from files plus the requested built-ins,
/// filtered by tag
///
/// # Errors
///
/// Returns an invalid argument error for unknown built-ins or when nothing
/// is left to run, and the library error for unreadable or invalid files
pub fn collect_scenarios(args: &RunArgs) -> CliResult<ScenarioFile> {
    let mut file = ScenarioFile::default();
    for path in &args.files {
        file.extend(ScenarioFile::load(path)?);
    }

    let mut builtins = Vec::with_capacity(args.builtins.len());
    for name in &args.builtins {
        let scenario = catalog::builtin(name).ok_or_else(|| {
            CliError::invalid_argument(format!(
                "unknown built-in scenario {name}; see `verger list`"
            ))
        })?;
        builtins.push(scenario);
    }
    if args.all_builtin {
        builtins = catalog::all();
    }
    file.scenarios.extend(builtins);

    file.scenarios.retain(|s| s.matches_tags(&args.tags));
    if file.scenarios.is_empty() {
        return Err(CliError::invalid_argument(
            "no scenarios to run; pass scenario files, --builtin NAME or --all-builtin",
        ));
    }

    file.validate()?;
    Ok(file)
}

/// Execute the run command, returning the process exit code
///
/// # Errors
///
/// Returns an error for invalid arguments or configuration, and for
/// preflight failures (unknown role, duplicate ids) before anything starts
pub fn execute_run(cli: &CliConfig, args: &RunArgs) -> CliResult<i32> {
    let config = harness_config(args)?;
    let file = collect_scenarios(args)?;
    let format = OutputFormat::from(args.format);

    let mut reporter = ProgressReporter::new(cli.color.should_color(), cli.verbosity.is_quiet());
    reporter.info(&format!(
        "running {} scenario(s) against {}",
        file.scenarios.len(),
        config.base_url
    ));
    reporter.start_progress(file.scenarios.len() as u64, "scenarios");

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::execution(format!("failed to create runtime: {e}")))?;
    let result = runtime.block_on(run_suite(config, &file, &reporter));
    reporter.finish();
    let result = result?;

    match format {
        OutputFormat::Text => reporter.summary(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(result.exit_code())
}

async fn run_suite(
    config: HarnessConfig,
    file: &ScenarioFile,
    reporter: &ProgressReporter,
) -> CliResult<RunResult> {
    let summary = config.output_dir.join(SUMMARY_FILE);
    let (progress, mut finished) = mpsc::unbounded_channel();
    let harness = Harness::launching(config).with_progress(progress);

    let cancel = harness.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel("interrupted");
        }
    });

    let run = async {
        let result = harness.run(&file.scenarios, &file.services).await;
        drop(harness);
        result
    };
    let print = async {
        let mut printed = HashSet::new();
        while let Some(report) = finished.recv().await {
            reporter.scenario(&report);
            printed.insert(report.id);
        }
        printed
    };
    let (result, printed) = tokio::join!(run, print);
    interrupt.abort();

    let result = result?;
    for report in result.reports.iter().filter(|r| !printed.contains(&r.id)) {
        reporter.scenario(report);
    }
    info!(summary = %summary.display(), "run finished");
    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::FormatArg;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    mod harness_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = harness_config(&RunArgs::default()).unwrap();
            assert!(config.browser.headless);
            assert_eq!(config.output_dir, PathBuf::from("target/verger"));
            assert_eq!(config.base_url, "http://localhost:3000");
            assert_eq!(config.jobs, 1);
        }

        #[test]
        fn test_flags_override_file() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("verger.yaml");
            fs::write(
                &path,
                "base_url: http://localhost:4000\njobs: 2\nbrowser:\n  headless: false\n",
            )
            .unwrap();
            let args = RunArgs {
                config: Some(path),
                jobs: Some(3),
                timeout: Some(9_000),
                no_sandbox: true,
                chromium: Some("/usr/bin/chromium".into()),
                ..RunArgs::default()
            };
            let config = harness_config(&args).unwrap();
            assert_eq!(config.base_url, "http://localhost:4000");
            assert_eq!(config.jobs, 3);
            assert!(!config.browser.headless);
            assert!(!config.browser.sandbox);
            assert_eq!(config.timeouts.scenario_ms, 9_000);
            assert_eq!(config.browser.chromium_path.as_deref(), Some("/usr/bin/chromium"));
        }

        #[test]
        fn test_invalid_override_rejected() {
            let args = RunArgs {
                base_url: Some("ftp://church.example".into()),
                ..RunArgs::default()
            };
            assert!(harness_config(&args).is_err());
            let args = RunArgs {
                jobs: Some(0),
                ..RunArgs::default()
            };
            assert!(harness_config(&args).is_err());
        }
    }

    mod collect_tests {
        use super::*;

        #[test]
        fn test_nothing_to_run() {
            let err = collect_scenarios(&RunArgs::default()).unwrap_err();
            assert!(err.to_string().contains("no scenarios to run"));
        }

        #[test]
        fn test_unknown_builtin() {
            let args = RunArgs {
                builtins: vec!["nope".into()],
                ..RunArgs::default()
            };
            let err = collect_scenarios(&args).unwrap_err();
            assert!(err.to_string().contains("unknown built-in scenario nope"));
        }

        #[test]
        fn test_all_builtin_with_tag_filter() {
            let args = RunArgs {
                all_builtin: true,
                tags: vec!["settings".into()],
                ..RunArgs::default()
            };
            let file = collect_scenarios(&args).unwrap();
            let ids: Vec<&str> = file.scenarios.iter().map(|s| s.id.as_str()).collect();
            assert_eq!(ids, ["request-type", "request-type-dialog"]);
        }

        #[test]
        fn test_file_and_builtin_merge() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("groups.yaml");
            fs::write(
                &path,
                "scenarios:\n  - id: groups\n    role: admin\n    steps:\n      - action: navigate\n        url: /groups\n",
            )
            .unwrap();
            let args = RunArgs {
                files: vec![path],
                builtins: vec!["member-form".into()],
                ..RunArgs::default()
            };
            let file = collect_scenarios(&args).unwrap();
            assert_eq!(file.scenarios.len(), 2);
            assert_eq!(file.scenarios[0].id, "groups");
        }

        #[test]
        fn test_duplicate_between_file_and_builtin() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("dup.yaml");
            fs::write(
                &path,
                "scenarios:\n  - id: member-form\n    steps:\n      - action: navigate\n        url: /members/1\n",
            )
            .unwrap();
            let args = RunArgs {
                files: vec![path],
                builtins: vec!["member-form".into()],
                format: FormatArg::Json,
                ..RunArgs::default()
            };
            let err = collect_scenarios(&args).unwrap_err();
            assert!(err.to_string().contains("duplicate scenario id member-form"));
        }
    }
}
