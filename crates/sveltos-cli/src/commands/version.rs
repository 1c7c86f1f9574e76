//! `version`: client version and the git commit it was built from

use std::io::Write;

use tracing::info;

use crate::{CtlConfig, Result};

/// Crate version of this build
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit recorded at build time through `SVELTOSCTL_GIT_COMMIT`
pub fn git_commit() -> &'static str {
    option_env!("SVELTOSCTL_GIT_COMMIT").unwrap_or("unknown")
}

/// Print version information, or log it when console output is disabled
pub fn run(config: &CtlConfig) -> Result<()> {
    report(config, &mut std::io::stdout())
}

fn report(config: &CtlConfig, out: &mut impl Write) -> Result<()> {
    if config.console_output {
        writeln!(out, "Client Version: {}", CLIENT_VERSION)?;
        writeln!(out, "Git commit: {}", git_commit())?;
    } else {
        info!(version = CLIENT_VERSION, git_commit = git_commit(), "sveltosctl version");
    }
    Ok(())
}
