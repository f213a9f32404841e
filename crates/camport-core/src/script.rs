//! External post-process script run on each downloaded file.
//!
//! Placeholders in the command line:
//!
//! | Placeholder    | Replaced with                         |
//! |----------------|---------------------------------------|
//! | `%orgfilename` | file name on the device               |
//! | `%filename`    | file name of the working file         |
//! | `%orgpath`     | folder on the device                  |
//! | `%path`        | directory of the working file         |
//! | `%file`        | full path of the working file         |
//!
//! A script without any `%` gets the destination directory appended as its
//! last argument.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ScriptError};

/// Default time a script may run before it is killed.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 60;

/// Values substituted into a script command line.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    /// File name on the device.
    pub original_file: &'a str,
    /// Folder on the device.
    pub original_folder: &'a str,
    /// Current working file.
    pub working_file: &'a Path,
    /// Destination directory of the download.
    pub dest: &'a Path,
}

/// Substitute the placeholders of `script`.
#[must_use]
pub fn expand(script: &str, ctx: &ScriptContext<'_>) -> String {
    if !script.contains('%') {
        return format!("{script} \"{}\"", ctx.dest.display());
    }

    let working_name = ctx
        .working_file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let working_dir = ctx
        .working_file
        .parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();

    // %filename must be replaced before %file.
    script
        .replace("%orgfilename", ctx.original_file)
        .replace("%filename", &working_name)
        .replace("%orgpath", ctx.original_folder)
        .replace("%path", &working_dir)
        .replace("%file", &ctx.working_file.display().to_string())
}

/// Split a command line on whitespace, stripping one pair of surrounding
/// double quotes from each token.
#[must_use]
pub fn tokenize(cmdline: &str) -> Vec<String> {
    cmdline
        .split_whitespace()
        .map(|token| {
            token
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(token)
                .to_string()
        })
        .collect()
}

/// Run an expanded command line, killing it once `timeout` elapses.
pub async fn run(cmdline: &str, timeout: Duration) -> Result<()> {
    let mut tokens = tokenize(cmdline).into_iter();
    let program = tokens.next().ok_or(ScriptError::Empty)?;
    debug!("Script name: {}", program);

    let child = Command::new(&program)
        .args(tokens)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ScriptError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ScriptError::SpawnFailed {
                program,
                reason: e.to_string(),
            }
            .into());
        }
        Err(_) => {
            return Err(ScriptError::TimedOut {
                program,
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
    };

    debug!("stdout: {}", String::from_utf8_lossy(&output.stdout));
    debug!("stderr: {}", String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(())
    } else {
        Err(ScriptError::NonZeroExit {
            program,
            code: output.status.code(),
        }
        .into())
    }
}
