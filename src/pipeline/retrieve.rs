//! Output side of the session: device → PacketQueue

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, trace};

use super::error::{SessionError, SessionFault};
use super::packet::EncodedPacket;
use super::session::SessionShared;
use super::worker::{spawn_worker, WorkerHandle};
use crate::encoder::{EncodeTimer, OutputPoll};

/// Thread name of the retrieve worker
pub const RETRIEVE_WORKER: &str = "encode-retrieve";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Wait for the next wake
    Idle,
    /// Exit the worker
    Stop,
}

/// Polls the encoder device and fills PacketQueue
pub(crate) struct EncodeRetrieveWorker {
    shared: Arc<SessionShared>,
    /// Packet read from the device while PacketQueue was full
    held: Option<EncodedPacket>,
}

impl EncodeRetrieveWorker {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared, held: None }
    }

    /// Run the worker on its own thread
    pub(crate) fn spawn(self) -> Result<WorkerHandle, SessionError> {
        let shared = Arc::clone(&self.shared);
        spawn_worker(RETRIEVE_WORKER, shared, move || self.run())
    }

    fn run(mut self) {
        debug!("Retrieve worker started");

        while self.shared.should_run() {
            self.shared
                .retrieve_wake
                .wait_timeout(self.shared.frame_interval());
            if !self.shared.should_run() {
                break;
            }
            if self.poll_until_idle() == Flow::Stop {
                break;
            }
        }

        debug!("Retrieve worker stopped");
    }

    fn poll_until_idle(&mut self) -> Flow {
        loop {
            if !self.shared.should_run() {
                return Flow::Stop;
            }

            if let Some(packet) = self.held.take() {
                if let Err(packet) = self.shared.packets.try_push(packet) {
                    self.held = Some(packet);
                    return Flow::Idle;
                }
            }
            // Host must consume before we read more
            if self.shared.packets.is_full() {
                trace!("Packet queue full, waiting for host");
                return Flow::Idle;
            }

            let result = {
                let _gate = self.shared.gate.read();
                let timer = EncodeTimer::start();
                let result = self.shared.device.query_output();
                self.shared.note_device_call("query_output", timer.elapsed());
                result
            };

            match result {
                Ok(OutputPoll::Ready(output)) => {
                    let pts = output.presentation_index as i64;
                    let dts = self.shared.decode_clock.next_dts(pts, self.shared.lookahead);
                    let packet = EncodedPacket {
                        data: output.data,
                        pts,
                        dts,
                        class: output.class,
                    };
                    trace!(
                        "Packet ready: pts={} dts={} class={} bytes={}",
                        packet.pts,
                        packet.dts,
                        packet.class,
                        packet.data.len()
                    );
                    if let Err(packet) = self.shared.packets.try_push(packet) {
                        self.held = Some(packet);
                    }
                    self.shared.submit_wake.notify();
                }
                Ok(OutputPoll::NeedsMoreInput) => {
                    self.shared.submit_wake.notify();
                    return Flow::Idle;
                }
                Ok(OutputPoll::EndOfStream) => {
                    if self.shared.input_drained.load(Ordering::Acquire) {
                        info!("Encoder drained, end of stream");
                        self.shared.end_of_stream.store(true, Ordering::Release);
                    } else {
                        self.shared
                            .record_fault(SessionFault::UnexpectedEndOfStream);
                    }
                    return Flow::Stop;
                }
                Err(e) => {
                    self.shared.record_fault(SessionFault::Device(e));
                    return Flow::Stop;
                }
            }

            if !self.shared.cancel.sleep(self.shared.pacing_interval()) {
                return Flow::Stop;
            }
        }
    }
}
