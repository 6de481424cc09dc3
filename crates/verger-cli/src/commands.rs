//! CLI command definitions using clap

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Verger: scripted UI verification for the membership and check-in app
#[derive(Parser, Debug)]
#[command(name = "verger")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios from files and the built-in catalog
    Run(RunArgs),

    /// List built-in scenarios
    List(ListArgs),

    /// Print a built-in scenario as YAML
    Show(ShowArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Scenario YAML files
    pub files: Vec<PathBuf>,

    /// Add a built-in scenario by name (repeatable)
    #[arg(long = "builtin", value_name = "NAME")]
    pub builtins: Vec<String>,

    /// Add every built-in scenario
    #[arg(long)]
    pub all_builtin: bool,

    /// Only run scenarios carrying one of these tags (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Harness configuration file (YAML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run the browser headless
    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub headless: Option<bool>,

    /// Output directory for screenshots, logs and the summary
    #[arg(short, long, env = "VERGER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Application origin
    #[arg(long, env = "VERGER_BASE_URL")]
    pub base_url: Option<String>,

    /// Scenarios running at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-scenario timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Skip remaining scenarios after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Chromium binary
    #[arg(long, env = "CHROMIUM_PATH")]
    pub chromium: Option<String>,

    /// Disable the browser sandbox (containers, CI)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Result format on stdout
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for the list command
#[derive(Parser, Debug, Default)]
pub struct ListArgs {
    /// Only list scenarios carrying this tag
    #[arg(long)]
    pub tag: Option<String>,
}

/// Arguments for the show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Built-in scenario name
    pub name: String,
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Result format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatArg {
    /// Per-scenario lines and a summary
    #[default]
    Text,
    /// The run result as JSON
    Json,
}

impl From<FormatArg> for crate::output::OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}
