//! Command handlers - kept out of main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests

pub mod catalog;
pub mod run;

pub use catalog::{execute_list, execute_show, render_list, render_show};
pub use run::{collect_scenarios, execute_run, harness_config};
