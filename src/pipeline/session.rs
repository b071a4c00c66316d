//! The encode session: public host interface and lifecycle
//!
//! # State machine
//!
//! ```text
//!            start()              flush()
//! Created ───────────> Running ───────────> Draining
//!    │                  │   ▲                   │
//!    │     reconfigure()│   │done               │
//!    │                  ▼   │                   │
//!    │             Reconfiguring                │
//!    │                                          │
//!    └──────────────── stop() ──────────────────┴──> Stopped
//! ```
//!
//! # Locking
//!
//! Each queue has its own mutex. Workers hold the session gate (shared)
//! around each device call; `reconfigure()` takes it exclusively, then the
//! FrameQueue lock, then the PacketQueue lock. No other path holds two of
//! these at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::congestion::CongestionMonitor;
use super::error::{DropReason, SessionError, SessionFault, SubmitError};
use super::packet::{DecodeClock, EncodedPacket};
use super::queue::{FrameQueue, PacketQueue};
use super::retrieve::EncodeRetrieveWorker;
use super::signal::{CancellationToken, WakeSignal};
use super::submit::{EncodeSubmitWorker, SUBMIT_WORKER};
use super::worker::WorkerHandle;
use crate::config::SessionConfig;
use crate::encoder::{
    DeviceContext, DeviceParams, EncodeTimer, EncoderDevice, FrameRate, PropertyError,
    ResolvedProperties, SessionStats, SurfaceFormat,
};
use crate::video::converter::{ColorMatrix, ColorRange, ConversionAdapter, ConversionTarget};
use crate::video::frame::Frame;

/// Lifecycle state of an [`EncodeSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, device not initialized
    Created,
    /// Workers running, accepting frames
    Running,
    /// `reconfigure()` in progress; new frames are dropped
    Reconfiguring,
    /// `flush()` called; no new frames, remaining output retrievable
    Draining,
    /// Workers joined, queues cleared
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Reconfiguring => write!(f, "reconfiguring"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// State shared between the session and its two workers
pub(crate) struct SessionShared {
    pub(crate) frames: FrameQueue,
    pub(crate) packets: PacketQueue,
    pub(crate) submit_wake: WakeSignal,
    pub(crate) retrieve_wake: WakeSignal,
    pub(crate) cancel: CancellationToken,
    /// Shared by workers around device calls, exclusive for reconfigure
    pub(crate) gate: RwLock<()>,
    fault: Mutex<Option<SessionFault>>,
    pub(crate) stats: Mutex<SessionStats>,
    frame_rate: RwLock<FrameRate>,
    pacing_divisor: u32,
    pub(crate) lookahead: u32,
    pub(crate) max_submit_retries: u32,
    pub(crate) startup_timeout: Duration,
    pub(crate) flush_requested: AtomicBool,
    /// Set by the submit worker as it issues `drain_and_flush`
    pub(crate) input_drained: AtomicBool,
    pub(crate) end_of_stream: AtomicBool,
    pub(crate) converter: ConversionAdapter,
    pub(crate) device: Arc<dyn EncoderDevice>,
    pub(crate) decode_clock: DecodeClock,
    congestion: CongestionMonitor,
}

impl SessionShared {
    /// Record the first fault; later ones are logged and discarded
    pub(crate) fn record_fault(&self, fault: SessionFault) {
        {
            let mut slot = self.fault.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Ignoring fault '{}' after '{}'", fault, existing);
                    return;
                }
                None => {
                    error!("Encode session fault: {}", fault);
                    *slot = Some(fault);
                }
            }
        }
        self.submit_wake.notify();
        self.retrieve_wake.notify();
    }

    /// The recorded fault, if any
    pub(crate) fn fault(&self) -> Option<SessionFault> {
        self.fault.lock().clone()
    }

    /// Workers keep looping while this holds
    #[inline]
    pub(crate) fn should_run(&self) -> bool {
        !self.cancel.is_cancelled() && self.fault.lock().is_none()
    }

    pub(crate) fn frame_rate(&self) -> FrameRate {
        *self.frame_rate.read()
    }

    pub(crate) fn frame_interval(&self) -> Duration {
        self.frame_rate().frame_interval()
    }

    pub(crate) fn pacing_interval(&self) -> Duration {
        self.frame_interval() / self.pacing_divisor
    }

    /// Warn about device calls that take longer than a frame
    pub(crate) fn note_device_call(&self, call: &'static str, elapsed: Duration) {
        let interval = self.frame_interval();
        if elapsed > interval {
            warn!(
                "Slow device call: {} took {:.2}ms (frame interval {:.2}ms)",
                call,
                elapsed.as_secs_f64() * 1000.0,
                interval.as_secs_f64() * 1000.0
            );
        }
    }
}

/// Feeds raw frames to an encoder device and hands back encoded packets
///
/// All methods take `&self`; a session can be shared between a producer
/// thread calling [`submit`](Self::submit) and a consumer thread calling
/// [`retrieve`](Self::retrieve).
///
/// # Example
///
/// ```rust,ignore
/// let ctx = create_device_context(&DeviceConfig::default())?;
/// let session = EncodeSession::new(SessionConfig::default(), ctx)?;
/// session.start()?;
/// session.submit(frame)?;
/// while let Some(packet) = session.retrieve()? {
///     sink.write_all(&packet.data)?;
/// }
/// session.stop()?;
/// ```
pub struct EncodeSession {
    shared: Arc<SessionShared>,
    config: SessionConfig,
    properties: ResolvedProperties,
    params: Mutex<DeviceParams>,
    state: Mutex<SessionState>,
    /// Serializes start/stop/flush/reconfigure
    lifecycle: Mutex<()>,
    workers: Mutex<Vec<WorkerHandle>>,
    last_index: Mutex<Option<u64>>,
    extra_data: Mutex<Option<Bytes>>,
}

impl EncodeSession {
    /// Build a session on an explicit device context
    ///
    /// Validates the configuration and resolves the property tables; the
    /// device is not touched until [`start`](Self::start).
    pub fn new(config: SessionConfig, ctx: DeviceContext) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::Config(format!("{:#}", e)))?;

        let properties = ResolvedProperties::resolve(&config)?;
        let format = SurfaceFormat::from_str(&config.surface_format).ok_or_else(|| {
            PropertyError::UnknownValue {
                property: "surface_format",
                value: config.surface_format.clone(),
                valid: "nv12, i420".to_string(),
            }
        })?;
        let target = conversion_target(&config, format, config.width, config.height)?;
        let converter = ConversionAdapter::new(ctx.converter, target)?;

        let rate = config.frame_rate;
        let params = DeviceParams {
            format,
            width: config.width,
            height: config.height,
            frame_rate: rate,
            b_frames: properties.b_frame_pattern.b_frames(),
            rate_control: properties.rate_control,
        };

        let shared = SessionShared {
            frames: FrameQueue::new(config.frame_queue_capacity_for(rate)),
            packets: PacketQueue::new(config.packet_queue_capacity_for(rate)),
            submit_wake: WakeSignal::new(),
            retrieve_wake: WakeSignal::new(),
            cancel: CancellationToken::new(),
            gate: RwLock::new(()),
            fault: Mutex::new(None),
            stats: Mutex::new(SessionStats::new(ctx.device.backend_name())),
            frame_rate: RwLock::new(rate),
            pacing_divisor: config.pacing_divisor,
            lookahead: properties.lookahead,
            max_submit_retries: config.max_submit_retries,
            startup_timeout: config.startup_timeout(),
            flush_requested: AtomicBool::new(false),
            input_drained: AtomicBool::new(false),
            end_of_stream: AtomicBool::new(false),
            converter,
            device: ctx.device,
            decode_clock: DecodeClock::new(),
            congestion: CongestionMonitor::new(config.congestion_warning_interval()),
        };

        debug!(
            "Encode session created: {}x{} @ {}, {:?} (lookahead {}), {} preset, backend={}",
            config.width,
            config.height,
            rate,
            properties.b_frame_pattern,
            properties.lookahead,
            properties.quality_preset,
            shared.device.backend_name()
        );

        Ok(Self {
            shared: Arc::new(shared),
            config,
            properties,
            params: Mutex::new(params),
            state: Mutex::new(SessionState::Created),
            lifecycle: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
            last_index: Mutex::new(None),
            extra_data: Mutex::new(None),
        })
    }

    /// Initialize the device and start both workers
    ///
    /// Valid only from `Created`. If the device fails to initialize the
    /// session stays in `Created`.
    pub fn start(&self) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if state != SessionState::Created {
            return Err(SessionError::InvalidState {
                operation: "start",
                state,
            });
        }

        let params = self.params.lock().clone();
        let timer = EncodeTimer::start();
        self.shared.device.init(&params).map_err(|e| {
            error!("Encoder device init failed: {}", e);
            SessionError::DeviceInit(e)
        })?;
        *self.extra_data.lock() = self.shared.device.extra_data();

        let submit = EncodeSubmitWorker::new(Arc::clone(&self.shared)).spawn()?;
        let retrieve = match EncodeRetrieveWorker::new(Arc::clone(&self.shared)).spawn() {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.cancel.cancel();
                self.shared.submit_wake.notify();
                if let Err(join_err) = submit.join_timeout(self.config.join_timeout()) {
                    warn!("Worker '{}' stop error: {}", SUBMIT_WORKER, join_err);
                }
                self.set_state(SessionState::Stopped);
                return Err(e);
            }
        };
        self.workers.lock().extend([submit, retrieve]);
        self.set_state(SessionState::Running);

        info!(
            "Encode session started: {} {}x{} @ {} (init {:.1}ms)",
            self.shared.device.backend_name(),
            params.width,
            params.height,
            params.frame_rate,
            timer.elapsed_ms()
        );
        Ok(())
    }

    /// Stop the workers, drain the device and clear both queues
    ///
    /// A no-op from `Created` or `Stopped`. Each worker is given the
    /// configured join timeout; one that does not exit is reported as
    /// [`SessionError::WorkerJoinTimeout`] and left detached, and the device
    /// drain is skipped. The session is `Stopped` either way.
    pub fn stop(&self) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if matches!(state, SessionState::Created | SessionState::Stopped) {
            debug!("stop() ignored in state {}", state);
            return Ok(());
        }

        info!("Stopping encode session");
        self.shared.cancel.cancel();
        self.shared.submit_wake.notify();
        self.shared.retrieve_wake.notify();

        let timeout = self.config.join_timeout();
        let mut first_error: Option<SessionError> = None;
        let mut all_joined = true;
        let workers: Vec<WorkerHandle> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let name = worker.name();
            if let Err(e) = worker.join_timeout(timeout) {
                if matches!(e, SessionError::WorkerJoinTimeout { .. }) {
                    all_joined = false;
                }
                debug!("Worker '{}' stop error: {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        if all_joined && !self.shared.input_drained.load(Ordering::Acquire) {
            match self.shared.device.drain_and_flush() {
                Ok(()) => self.shared.input_drained.store(true, Ordering::Release),
                Err(e) => warn!("Device drain on stop failed: {}", e),
            }
        }

        let frames = self.shared.frames.clear();
        let packets = self.shared.packets.clear();
        self.shared.decode_clock.clear();
        if frames > 0 || packets > 0 {
            debug!(
                "Discarded {} queued frames and {} unretrieved packets",
                frames, packets
            );
        }

        self.set_state(SessionState::Stopped);
        info!("Encode session stopped: {}", self.stats().summary());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Queue a frame for encoding
    ///
    /// Presentation indices must increase by exactly one per call. When
    /// FrameQueue is full the call retries with exponential backoff for
    /// about one frame interval, then drops the frame with
    /// [`SubmitError::Dropped`]. It never blocks longer than that window.
    pub fn submit(&self, frame: Frame) -> Result<(), SubmitError> {
        if let Some(fault) = self.shared.fault() {
            return Err(fault.into());
        }

        let state = self.state();
        if !matches!(state, SessionState::Running | SessionState::Reconfiguring) {
            return Err(SessionError::InvalidState {
                operation: "submit",
                state,
            }
            .into());
        }

        let index = frame.presentation_index;
        {
            let mut last = self.last_index.lock();
            if let Some(prev) = *last {
                let expected = prev + 1;
                if index != expected {
                    return Err(SubmitError::NonSequential {
                        expected,
                        got: index,
                    });
                }
            }
            *last = Some(index);
        }

        if state == SessionState::Reconfiguring {
            self.shared.stats.lock().record_congestion_drop();
            return Err(SubmitError::Dropped {
                presentation_index: index,
                queue_depth: self.shared.frames.size(),
                reason: DropReason::Reconfiguring,
            });
        }

        self.push_with_backoff(frame)
    }

    fn push_with_backoff(&self, frame: Frame) -> Result<(), SubmitError> {
        let index = frame.presentation_index;
        let window = self.shared.frame_interval();
        let deadline = Instant::now() + window;
        let mut backoff = (window / 8).max(Duration::from_micros(100));
        let mut frame = frame;

        loop {
            // Bounded wait: reconfigure() holds this lock across reinit
            match self.shared.frames.try_push_until(frame, deadline) {
                Ok(()) => {
                    let depth = self.shared.frames.size();
                    self.shared.stats.lock().record_submitted(depth);
                    self.shared.submit_wake.notify();
                    trace!("Queued frame {} (depth {})", index, depth);
                    return Ok(());
                }
                Err(back) => frame = back,
            }

            self.shared.submit_wake.notify();
            let now = Instant::now();
            if now >= deadline || self.shared.cancel.is_cancelled() {
                break;
            }
            self.shared.cancel.sleep(backoff.min(deadline - now));
            backoff *= 2;
        }

        let depth = self.shared.frames.size();
        if self.state() == SessionState::Reconfiguring {
            self.shared.stats.lock().record_congestion_drop();
            return Err(SubmitError::Dropped {
                presentation_index: index,
                queue_depth: depth,
                reason: DropReason::Reconfiguring,
            });
        }

        let capacity = self.shared.frames.capacity();
        let logged = self.shared.congestion.on_drop(index, depth, capacity);
        {
            let mut stats = self.shared.stats.lock();
            stats.record_congestion_drop();
            stats.record_congestion_warning(logged);
        }

        Err(SubmitError::Dropped {
            presentation_index: index,
            queue_depth: depth,
            reason: DropReason::QueueFull,
        })
    }

    /// Take the next encoded packet, in decode order
    ///
    /// Never blocks. `Ok(None)` means nothing is ready yet, which is always
    /// the answer while the session is reconfiguring. A recorded fault is
    /// returned before any packets still queued.
    pub fn retrieve(&self) -> Result<Option<EncodedPacket>, SessionError> {
        let state = self.state();
        if matches!(state, SessionState::Created | SessionState::Stopped) {
            return Err(SessionError::InvalidState {
                operation: "retrieve",
                state,
            });
        }
        if let Some(fault) = self.shared.fault() {
            return Err(SessionError::Fatal(fault));
        }

        if state == SessionState::Reconfiguring {
            return Ok(None);
        }

        // Lost race with reconfigure() reads as "nothing ready"
        let packet = self.shared.packets.try_pop_front();
        self.shared.retrieve_wake.notify();

        if let Some(packet) = &packet {
            self.shared
                .stats
                .lock()
                .record_packet(packet.data.len(), packet.keyframe());
            trace!(
                "Retrieved packet pts={} dts={} {}",
                packet.pts,
                packet.dts,
                packet.class
            );
        }
        Ok(packet)
    }

    /// Codec header bytes (parameter sets)
    pub fn get_extra_data(&self) -> Result<Bytes, SessionError> {
        self.extra_data
            .lock()
            .clone()
            .ok_or(SessionError::ExtraDataNotReady)
    }

    /// Stop accepting frames and drain the device
    ///
    /// Frames already queued are still encoded. [`is_drained`](Self::is_drained)
    /// turns true once the device has reported end of stream and every
    /// packet has been retrieved.
    pub fn flush(&self) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if state != SessionState::Running {
            return Err(SessionError::InvalidState {
                operation: "flush",
                state,
            });
        }
        if let Some(fault) = self.shared.fault() {
            return Err(SessionError::Fatal(fault));
        }

        self.shared.flush_requested.store(true, Ordering::Release);
        self.set_state(SessionState::Draining);
        self.shared.submit_wake.notify();
        info!(
            "Flushing encode session ({} frames queued)",
            self.shared.frames.size()
        );
        Ok(())
    }

    /// Whether end of stream was reached and PacketQueue is empty
    pub fn is_drained(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire) && self.shared.packets.is_empty()
    }

    /// Change resolution and frame rate on a running session
    ///
    /// Both workers are quiesced between device calls while the device is
    /// re-initialized. Frames submitted meanwhile are dropped with
    /// [`DropReason::Reconfiguring`]; queued frames of the old size fail
    /// conversion and are dropped by the submit worker.
    pub fn reconfigure(
        &self,
        width: u32,
        height: u32,
        frame_rate: FrameRate,
    ) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if state != SessionState::Running {
            return Err(SessionError::InvalidState {
                operation: "reconfigure",
                state,
            });
        }
        if let Some(fault) = self.shared.fault() {
            return Err(SessionError::Fatal(fault));
        }
        if !frame_rate.is_valid() {
            return Err(SessionError::Config(format!(
                "Invalid frame rate: {}",
                frame_rate
            )));
        }

        let format = self.shared.converter.target().format;
        let target = conversion_target(&self.config, format, width, height)?;
        target.validate()?;

        self.set_state(SessionState::Reconfiguring);
        let timer = EncodeTimer::start();
        let result = self.apply_reconfigure(target, frame_rate);
        self.set_state(SessionState::Running);
        self.shared.submit_wake.notify();
        self.shared.retrieve_wake.notify();

        match &result {
            Ok(()) => info!(
                "Encode session reconfigured: {}x{} @ {} ({:.1}ms)",
                width,
                height,
                frame_rate,
                timer.elapsed_ms()
            ),
            Err(e) => error!("Reconfigure to {}x{} failed: {}", width, height, e),
        }
        result
    }

    fn apply_reconfigure(
        &self,
        target: ConversionTarget,
        frame_rate: FrameRate,
    ) -> Result<(), SessionError> {
        let _gate = self.shared.gate.write();
        let _frames = self.shared.frames.lock();
        let _packets = self.shared.packets.lock();

        if let Err(e) = self.shared.device.reinit(target.width, target.height) {
            self.shared.record_fault(SessionFault::Device(e.clone()));
            return Err(SessionError::DeviceInit(e));
        }

        self.shared.converter.set_target(target)?;
        *self.shared.frame_rate.write() = frame_rate;
        self.shared
            .frames
            .set_capacity(self.config.frame_queue_capacity_for(frame_rate));
        *self.extra_data.lock() = self.shared.device.extra_data();
        {
            let mut params = self.params.lock();
            params.width = target.width;
            params.height = target.height;
            params.frame_rate = frame_rate;
        }
        self.shared.congestion.reset();

        debug!(
            "Reconfigured: target {}x{} {:?}/{:?}, frame queue capacity {}",
            target.width,
            target.height,
            target.matrix,
            target.range,
            self.shared.frames.capacity()
        );
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Session state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Snapshot of the session statistics
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.uptime = stats.created_at.elapsed();
        stats
    }

    /// Resolved property-table values
    pub fn properties(&self) -> ResolvedProperties {
        self.properties
    }

    /// Current frame rate
    pub fn frame_rate(&self) -> FrameRate {
        self.shared.frame_rate()
    }

    /// Current FrameQueue depth
    pub fn frame_queue_depth(&self) -> usize {
        self.shared.frames.size()
    }

    /// Current FrameQueue capacity
    pub fn frame_queue_capacity(&self) -> usize {
        self.shared.frames.capacity()
    }

    /// Current PacketQueue depth
    pub fn packet_queue_depth(&self) -> usize {
        self.shared.packets.size()
    }

    /// The recorded fault, if any
    pub fn fault(&self) -> Option<SessionFault> {
        self.shared.fault()
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Encode session stop on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for EncodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("state", &self.state())
            .field("backend", &self.shared.device.backend_name())
            .field("frame_queue", &self.shared.frames.size())
            .field("packet_queue", &self.shared.packets.size())
            .finish()
    }
}

fn conversion_target(
    config: &SessionConfig,
    format: SurfaceFormat,
    width: u32,
    height: u32,
) -> Result<ConversionTarget, PropertyError> {
    let matrix = ColorMatrix::from_setting(&config.color_matrix, width, height).ok_or_else(|| {
        PropertyError::UnknownValue {
            property: "color_matrix",
            value: config.color_matrix.clone(),
            valid: "auto, bt601, bt709".to_string(),
        }
    })?;
    let range =
        ColorRange::from_setting(&config.color_range).ok_or_else(|| PropertyError::UnknownValue {
            property: "color_range",
            value: config.color_range.clone(),
            valid: "limited, full".to_string(),
        })?;

    Ok(ConversionTarget {
        format,
        width,
        height,
        matrix,
        range,
    })
}
