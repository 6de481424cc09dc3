//! Verger CLI: scripted UI verification for the membership and check-in app
//!
//! ## Usage
//!
//! ```bash
//! verger list                                   # Built-in scenarios
//! verger show checkin-dashboard                 # Print one as YAML
//! verger run --all-builtin --base-url http://localhost:3000
//! verger run scenarios/checkin.yaml --jobs 4 --fail-fast
//! ```

use clap::Parser;
use std::process::ExitCode;
use verger_cli::{
    handlers, logging, Cli, CliConfig, CliResult, ColorChoice, Commands, Verbosity,
};

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<i32> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    logging::init(&config)?;

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&config, &args),
        Commands::List(args) => {
            handlers::execute_list(&args);
            Ok(0)
        }
        Commands::Show(args) => handlers::execute_show(&args).map(|()| 0),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(ColorChoice::from(cli.color))
        .with_log_format(cli.log_format)
}
