//! Blocking driver around a [`DeviceController`] for one CLI invocation.

use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use camport_core::{
    ControllerConfig, ControllerEvent, Decision, DeviceController, DeviceSpec, FailurePrompt,
    PipelineTools, final_name,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::error::{CliError, CliResult};

/// How failure prompts are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Ask on the terminal; abort when stdin is not a terminal.
    Ask,
    /// Always give the same answer.
    Always(Decision),
}

impl FailurePolicy {
    fn answer(self, prompt: &FailurePrompt) -> Decision {
        match self {
            Self::Always(decision) => decision,
            Self::Ask if io::stdin().is_terminal() => ask(prompt),
            Self::Ask => Decision::Abort,
        }
    }
}

fn ask(prompt: &FailurePrompt) -> Decision {
    eprint!(
        "Failed to {} {}{}. Continue with the remaining files? [y/N] ",
        prompt.kind, prompt.folder, prompt.file
    );
    let _ = io::stderr().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) if parse_answer(&line) => Decision::Continue,
        _ => Decision::Abort,
    }
}

fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// A connected device plus its event stream.
pub struct Session {
    controller: DeviceController,
    events: UnboundedReceiver<ControllerEvent>,
    on_failure: FailurePolicy,
}

impl Session {
    /// Open the directory at `mount` and connect to it.
    pub fn connect(
        mount: &Path,
        config: ControllerConfig,
        tools: PipelineTools,
        on_failure: FailurePolicy,
    ) -> CliResult<Self> {
        let title = mount
            .file_name()
            .map_or_else(|| mount.display().to_string(), |name| name.to_string_lossy().to_string());
        let spec = DeviceSpec::mounted(title, mount.display().to_string());
        let (controller, events) = DeviceController::open(&spec, config, tools)?;

        let mut session = Self {
            controller,
            events,
            on_failure,
        };

        session.controller.connect();
        let mut connected = false;
        session.run_until_idle(|event| {
            if let ControllerEvent::ConnectionResult(ok) = event {
                connected = ok;
            }
        })?;

        if !connected {
            return Err(CliError::ConnectionFailed(mount.to_path_buf()));
        }
        info!("Connected to {}", session.controller.title());
        Ok(session)
    }

    /// The underlying controller.
    pub const fn controller(&self) -> &DeviceController {
        &self.controller
    }

    /// Hand every event to `handle` until the worker goes idle.
    ///
    /// Failure prompts are answered through the session's policy and never
    /// reach `handle`.
    pub fn run_until_idle(&mut self, mut handle: impl FnMut(ControllerEvent)) -> CliResult<()> {
        loop {
            match self.events.blocking_recv() {
                None => return Err(CliError::WorkerGone),
                Some(ControllerEvent::Busy(false)) => return Ok(()),
                Some(ControllerEvent::Busy(true)) => {}
                Some(ControllerEvent::FailurePrompt(prompt)) => {
                    let decision = self.on_failure.answer(&prompt);
                    warn!("{} of {} failed, answering {:?}", prompt.kind, prompt.file, decision);
                    prompt.respond(decision);
                }
                Some(event) => handle(event),
            }
        }
    }
}

/// Rename a finished working file to the name it stands for.
///
/// The working file is kept as is when the final name is already taken.
pub fn finalize(working: &Path, prefix: &str) -> CliResult<PathBuf> {
    let Some(name) = final_name(working, prefix) else {
        return Ok(working.to_path_buf());
    };
    let target = working.with_file_name(name);

    if target.exists() {
        warn!(
            "{} already exists, keeping {}",
            target.display(),
            working.display()
        );
        return Ok(working.to_path_buf());
    }

    fs::rename(working, &target).map_err(|e| CliError::Io {
        path: target.clone(),
        source: e,
    })?;
    debug!("Renamed {} to {}", working.display(), target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camport_core::DEFAULT_TEMP_PREFIX;
    use tempfile::TempDir;

    #[test]
    fn test_finalize_renames_working_file() {
        let dir = TempDir::new().unwrap();
        let working = dir.path().join("camport-Ab3dE5gH.IMG_0001.JPG");
        fs::write(&working, b"jpeg").unwrap();

        let target = finalize(&working, DEFAULT_TEMP_PREFIX).unwrap();

        assert_eq!(target, dir.path().join("IMG_0001.JPG"));
        assert!(target.exists());
        assert!(!working.exists());
    }

    #[test]
    fn test_finalize_keeps_name_when_taken() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("IMG_0001.JPG"), b"older").unwrap();
        let working = dir.path().join("camport-Ab3dE5gH.IMG_0001.JPG");
        fs::write(&working, b"jpeg").unwrap();

        let kept = finalize(&working, DEFAULT_TEMP_PREFIX).unwrap();

        assert_eq!(kept, working);
        assert_eq!(fs::read(dir.path().join("IMG_0001.JPG")).unwrap(), b"older");
    }

    #[test]
    fn test_finalize_ignores_foreign_names() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("photo.jpg");
        fs::write(&other, b"jpeg").unwrap();
        assert_eq!(finalize(&other, DEFAULT_TEMP_PREFIX).unwrap(), other);
    }

    #[test]
    fn test_connect_to_missing_directory_fails() {
        let result = Session::connect(
            Path::new("/nonexistent/camport/card"),
            ControllerConfig::default(),
            PipelineTools::default(),
            FailurePolicy::Always(Decision::Abort),
        );
        assert!(matches!(result, Err(CliError::ConnectionFailed(_))));
    }

    #[test]
    fn test_parse_answer() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer(" YES "));
        assert!(!parse_answer("\n"));
        assert!(!parse_answer("nope"));
    }
}
