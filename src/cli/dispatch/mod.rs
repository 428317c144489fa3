use crate::cli::actions::{simulate, Action};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let state_dir = matches
        .get_one::<String>("state-dir")
        .map(PathBuf::from)
        .context("missing required argument: --state-dir")?;

    let timeout_secs = matches.get_one::<u64>("session-timeout").copied().unwrap_or(300);
    let warning_threshold_secs = matches.get_one::<u64>("warning-seconds").copied().unwrap_or(30);
    let max_attempts = matches.get_one::<u32>("max-attempts").copied().unwrap_or(5);
    let lockout_secs = matches.get_one::<u64>("lockout-seconds").copied().unwrap_or(30);

    Ok(Action::Simulate(simulate::Args {
        state_dir,
        timeout_ms: timeout_secs.saturating_mul(1_000),
        warning_threshold_secs,
        max_attempts,
        initial_lockout_ms: lockout_secs.saturating_mul(1_000),
    }))
}
