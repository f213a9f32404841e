//! Continue-or-abort decision after a failed download, upload, delete or
//! lock.
//!
//! The worker only asks when there is something left to decide about: with
//! an empty or already canceled queue the answer is [`Decision::Abort`]
//! without a prompt. Otherwise a [`FailurePrompt`] goes out and the worker
//! blocks until it is answered, dropped, or the controller shuts down.

use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::DeviceBackend;
use crate::event::{ControllerEvent, Decision, EventSink, FailureKind, FailurePrompt};
use crate::queue::CommandQueue;

pub(crate) struct RecoveryGate<'a> {
    pub(crate) queue: &'a CommandQueue,
    pub(crate) events: &'a EventSink,
    pub(crate) runtime: &'a Runtime,
    pub(crate) shutdown: &'a watch::Receiver<bool>,
}

impl RecoveryGate<'_> {
    /// Decide how to go on after a failure and apply an abort to `backend`.
    pub(crate) fn route(
        &self,
        backend: &dyn DeviceBackend,
        kind: FailureKind,
        folder: &str,
        file: &str,
    ) -> Decision {
        // Nothing is dropped on this path, so a command enqueued right after
        // the check survives.
        if self.queue.is_idle() {
            debug!("Failed {} of {} with nothing left to run", kind, file);
            backend.cancel();
            return Decision::Abort;
        }

        let decision = self.ask(kind, folder, file);
        if decision == Decision::Abort {
            let dropped = self.queue.clear_all();
            backend.cancel();
            info!("Aborted after failed {} of {}{}, dropped {} commands", kind, folder, file, dropped);
        }
        decision
    }

    fn ask(&self, kind: FailureKind, folder: &str, file: &str) -> Decision {
        let (prompt, reply) = FailurePrompt::new(kind, folder, file);
        if !self.events.emit(ControllerEvent::FailurePrompt(prompt)) {
            return Decision::Abort;
        }

        let mut shutdown = self.shutdown.clone();
        self.runtime.block_on(async move {
            tokio::select! {
                decision = reply => decision.unwrap_or(Decision::Abort),
                _ = shutdown.wait_for(|stop| *stop) => Decision::Abort,
            }
        })
    }
}
