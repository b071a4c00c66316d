//! Worker thread handles with bounded join

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error};

use super::error::{SessionError, SessionFault};
use super::session::SessionShared;

/// A running session worker
///
/// The thread owns the sending half of `done`; it disconnects when the
/// thread exits, including by panic, so `join_timeout` can wait for exit
/// without blocking on `JoinHandle::join`.
pub(crate) struct WorkerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Records a fault if the worker unwinds
struct PanicGuard {
    name: &'static str,
    shared: Arc<SessionShared>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .record_fault(SessionFault::WorkerPanicked { worker: self.name });
        }
    }
}

/// Spawn a named worker thread
pub(crate) fn spawn_worker<F>(
    name: &'static str,
    shared: Arc<SessionShared>,
    body: F,
) -> Result<WorkerHandle, SessionError>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _done = done_tx;
            let _guard = PanicGuard { name, shared };
            body();
        })
        .map_err(SessionError::ThreadSpawn)?;

    debug!("Spawned worker '{}'", name);

    Ok(WorkerHandle {
        name,
        handle,
        done: done_rx,
    })
}

impl WorkerHandle {
    /// Worker thread name
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Wait up to `timeout` for the worker to exit
    ///
    /// A worker that does not exit in time is detached, never killed; its
    /// cancellation flag is already set and it exits on its next check.
    pub(crate) fn join_timeout(self, timeout: Duration) -> Result<(), SessionError> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Worker '{}' did not stop within {}ms, detaching",
                    self.name,
                    timeout.as_millis()
                );
                Err(SessionError::WorkerJoinTimeout {
                    worker: self.name,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(()) => {
                    debug!("Worker '{}' joined", self.name);
                    Ok(())
                }
                Err(_) => {
                    error!("Worker '{}' panicked", self.name);
                    Err(SessionError::Fatal(SessionFault::WorkerPanicked {
                        worker: self.name,
                    }))
                }
            },
        }
    }
}
