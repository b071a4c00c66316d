//! Input side of the session: FrameQueue → conversion → device
//!
//! The worker peeks the front frame, converts it and offers it to the
//! device. The frame leaves FrameQueue only once the device accepts it, so a
//! "full" answer retries the same frame and no frame is accepted twice.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::error::{SessionError, SessionFault};
use super::session::SessionShared;
use super::worker::{spawn_worker, WorkerHandle};
use crate::encoder::{EncodeTimer, Submission};

/// Thread name of the submit worker
pub const SUBMIT_WORKER: &str = "encode-submit";

/// Outcome of one submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Keep draining after the pacing sleep
    Continue,
    /// Nothing to do until the next wake
    Idle,
    /// Device stayed full for `max_retries` attempts
    Backoff,
    /// Fault recorded; exit the worker
    Stop,
}

/// Drains FrameQueue into the encoder device
pub(crate) struct EncodeSubmitWorker {
    shared: Arc<SessionShared>,
    retries: u32,
    max_retries: u32,
    first_attempt_at: Option<Instant>,
    accepted_any: bool,
}

impl EncodeSubmitWorker {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        let max_retries = shared.max_submit_retries.max(1);
        Self {
            shared,
            retries: 0,
            max_retries,
            first_attempt_at: None,
            accepted_any: false,
        }
    }

    /// Run the worker on its own thread
    pub(crate) fn spawn(self) -> Result<WorkerHandle, SessionError> {
        let shared = Arc::clone(&self.shared);
        spawn_worker(SUBMIT_WORKER, shared, move || self.run())
    }

    fn run(mut self) {
        debug!("Submit worker started");

        while self.shared.should_run() {
            self.shared
                .submit_wake
                .wait_timeout(self.shared.frame_interval());
            if !self.shared.should_run() {
                break;
            }
            if self.drain() == Step::Stop {
                break;
            }
        }

        debug!(
            "Submit worker stopped (cancelled={}, faulted={})",
            self.shared.cancel.is_cancelled(),
            self.shared.fault().is_some()
        );
    }

    /// Submit frames until the queue is empty, the device backs us off, or
    /// the session stops
    fn drain(&mut self) -> Step {
        loop {
            if !self.shared.should_run() {
                return Step::Stop;
            }

            match self.step() {
                Step::Continue => {}
                other => return other,
            }

            if !self.shared.cancel.sleep(self.shared.pacing_interval()) {
                return Step::Stop;
            }
        }
    }

    fn step(&mut self) -> Step {
        let _gate = self.shared.gate.read();

        if let Some(step) = self.check_startup_timeout() {
            return step;
        }

        let Some(frame) = self.shared.frames.peek_front() else {
            return self.drain_device_if_flushing();
        };
        self.first_attempt_at.get_or_insert_with(Instant::now);

        let surface = match self.shared.converter.convert(&frame) {
            Ok(surface) => surface,
            Err(e) => {
                warn!("Dropping frame {}: {}", frame.presentation_index, e);
                self.shared.frames.pop_front_if_any();
                self.shared.stats.lock().record_conversion_drop();
                return Step::Continue;
            }
        };

        // Output for this surface may be read before submit() returns
        let index = frame.presentation_index;
        self.shared.decode_clock.record_accepted(index);

        let timer = EncodeTimer::start();
        let result = self.shared.device.submit(surface);
        self.shared.note_device_call("submit", timer.elapsed());

        if !matches!(result, Ok(Submission::Accepted)) {
            self.shared.decode_clock.retract(index);
        }

        match result {
            Ok(Submission::Accepted) => {
                self.shared.frames.pop_front_if_any();
                self.retries = 0;
                self.accepted_any = true;
                self.shared.stats.lock().record_accepted(timer.elapsed_ms());
                trace!("Device accepted frame {}", frame.presentation_index);
                self.shared.retrieve_wake.notify();
                Step::Continue
            }
            Ok(Submission::Full) => {
                // Draining output is what frees device input
                self.shared.retrieve_wake.notify();
                self.retries += 1;
                self.shared.stats.lock().record_retry();
                if self.retries >= self.max_retries {
                    trace!(
                        "Device full for {} attempts on frame {}, backing off",
                        self.retries,
                        frame.presentation_index
                    );
                    self.retries = 0;
                    Step::Backoff
                } else {
                    Step::Continue
                }
            }
            Err(e) => {
                self.shared.record_fault(SessionFault::Device(e));
                Step::Stop
            }
        }
    }

    fn check_startup_timeout(&self) -> Option<Step> {
        if self.accepted_any {
            return None;
        }
        let first = self.first_attempt_at?;
        let timeout = self.shared.startup_timeout;
        if first.elapsed() < timeout {
            return None;
        }
        self.shared.record_fault(SessionFault::StartupTimeout {
            timeout_ms: timeout.as_millis() as u64,
        });
        Some(Step::Stop)
    }

    /// Issue the device drain once FrameQueue is empty after `flush()`
    fn drain_device_if_flushing(&self) -> Step {
        if !self.shared.flush_requested.load(Ordering::Acquire)
            || self.shared.input_drained.load(Ordering::Acquire)
        {
            return Step::Idle;
        }

        // Set first: the retrieve worker may see end of stream before
        // drain_and_flush returns
        self.shared.input_drained.store(true, Ordering::Release);
        let timer = EncodeTimer::start();
        let result = self.shared.device.drain_and_flush();
        self.shared.note_device_call("drain_and_flush", timer.elapsed());

        match result {
            Ok(()) => {
                debug!("Frame queue empty, device drain issued");
                self.shared.retrieve_wake.notify();
                Step::Idle
            }
            Err(e) => {
                self.shared.record_fault(SessionFault::Device(e));
                Step::Stop
            }
        }
    }
}
