//! Shared fixtures for session integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use lamco_encode_session::config::SessionConfig;
use lamco_encode_session::encoder::{
    DeviceContext, DeviceError, DeviceOutput, DeviceParams, DeviceResult, EncoderDevice,
    FrameClass, FrameRate, OutputPoll, Submission, Surface,
};
use lamco_encode_session::pipeline::{EncodeSession, EncodedPacket};
use lamco_encode_session::video::{Frame, SoftwareConverter};

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 8;

#[derive(Default)]
struct Inner {
    params: Option<DeviceParams>,
    /// Accepted, not yet output
    pending: VecDeque<u64>,
    /// Ready for query_output
    output: VecDeque<u64>,
    drained: bool,
    reinits: Vec<(u32, u32)>,
    surfaces: Vec<(u64, u32, u32)>,
}

/// Encoder double with scripted behavior
///
/// Outputs frames in presentation order once `latency` newer frames have
/// been accepted. Payloads are the little-endian presentation index.
pub struct ScriptedDevice {
    inner: Mutex<Inner>,
    latency: usize,
    input_depth: usize,
    /// Answer every submission with `Full`
    pub always_full: AtomicBool,
    /// Block inside `submit()` while set
    pub block_submit: AtomicBool,
    /// Set once a blocked `submit()` has been entered
    pub submit_entered: AtomicBool,
    /// Report end of stream without a drain request
    pub early_end_of_stream: AtomicBool,
    /// Panic inside `query_output()`
    pub panic_on_query: AtomicBool,
    /// Block inside `reinit()` for this long
    pub reinit_delay: Mutex<Duration>,
    /// Stay inside `submit()` this long after the output is readable
    pub submit_delay: Mutex<Duration>,
    fail_submit_at: Mutex<Option<u64>>,
    accept_counts: Mutex<HashMap<u64, u32>>,
    pub submit_calls: AtomicUsize,
}

impl ScriptedDevice {
    pub fn new(latency: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            latency,
            input_depth: latency + 4,
            always_full: AtomicBool::new(false),
            block_submit: AtomicBool::new(false),
            submit_entered: AtomicBool::new(false),
            early_end_of_stream: AtomicBool::new(false),
            panic_on_query: AtomicBool::new(false),
            reinit_delay: Mutex::new(Duration::ZERO),
            submit_delay: Mutex::new(Duration::ZERO),
            fail_submit_at: Mutex::new(None),
            accept_counts: Mutex::new(HashMap::new()),
            submit_calls: AtomicUsize::new(0),
        }
    }

    /// Fail with `DeviceLost` when this presentation index is submitted
    pub fn fail_submit_at(&self, index: u64) {
        *self.fail_submit_at.lock() = Some(index);
    }

    /// How many times each index was accepted
    pub fn accept_counts(&self) -> HashMap<u64, u32> {
        self.accept_counts.lock().clone()
    }

    pub fn reinits(&self) -> Vec<(u32, u32)> {
        self.inner.lock().reinits.clone()
    }

    /// (index, width, height) of every accepted surface
    pub fn accepted_surfaces(&self) -> Vec<(u64, u32, u32)> {
        self.inner.lock().surfaces.clone()
    }
}

impl EncoderDevice for ScriptedDevice {
    fn init(&self, params: &DeviceParams) -> DeviceResult<()> {
        self.inner.lock().params = Some(params.clone());
        Ok(())
    }

    fn reinit(&self, width: u32, height: u32) -> DeviceResult<()> {
        let delay = *self.reinit_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut inner = self.inner.lock();
        let pending: Vec<u64> = inner.pending.drain(..).collect();
        inner.output.extend(pending);
        inner.reinits.push((width, height));
        if let Some(params) = inner.params.as_mut() {
            params.width = width;
            params.height = height;
        }
        Ok(())
    }

    fn submit(&self, surface: Surface) -> DeviceResult<Submission> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if self.block_submit.load(Ordering::SeqCst) {
            self.submit_entered.store(true, Ordering::SeqCst);
            while self.block_submit.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if *self.fail_submit_at.lock() == Some(surface.presentation_index) {
            return Err(DeviceError::DeviceLost("scripted failure".to_string()));
        }
        if self.always_full.load(Ordering::SeqCst) {
            return Ok(Submission::Full);
        }

        {
            let mut inner = self.inner.lock();
            if inner.pending.len() + inner.output.len() >= self.input_depth {
                return Ok(Submission::Full);
            }

            let index = surface.presentation_index;
            *self.accept_counts.lock().entry(index).or_insert(0) += 1;
            inner.surfaces.push((index, surface.width, surface.height));
            inner.pending.push_back(index);
            while inner.pending.len() > self.latency {
                if let Some(ready) = inner.pending.pop_front() {
                    inner.output.push_back(ready);
                }
            }
        }

        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(Submission::Accepted)
    }

    fn query_output(&self) -> DeviceResult<OutputPoll> {
        if self.panic_on_query.load(Ordering::SeqCst) {
            panic!("scripted panic in query_output");
        }
        if self.early_end_of_stream.load(Ordering::SeqCst) {
            return Ok(OutputPoll::EndOfStream);
        }

        let mut inner = self.inner.lock();
        match inner.output.pop_front() {
            Some(index) => Ok(OutputPoll::Ready(DeviceOutput {
                data: Bytes::copy_from_slice(&index.to_le_bytes()),
                presentation_index: index,
                class: if index == 0 {
                    FrameClass::Idr
                } else {
                    FrameClass::P
                },
            })),
            None if inner.drained => Ok(OutputPoll::EndOfStream),
            None => Ok(OutputPoll::NeedsMoreInput),
        }
    }

    fn drain_and_flush(&self) -> DeviceResult<()> {
        let mut inner = self.inner.lock();
        let pending: Vec<u64> = inner.pending.drain(..).collect();
        inner.output.extend(pending);
        inner.drained = true;
        Ok(())
    }

    fn extra_data(&self) -> Option<Bytes> {
        let inner = self.inner.lock();
        let params = inner.params.as_ref()?;
        let mut header = vec![0, 0, 0, 1, 0x67];
        header.extend_from_slice(&(params.width as u16).to_be_bytes());
        header.extend_from_slice(&(params.height as u16).to_be_bytes());
        Some(Bytes::from(header))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Small, fast session settings
pub fn test_config() -> SessionConfig {
    SessionConfig {
        width: WIDTH,
        height: HEIGHT,
        frame_rate: FrameRate::fps(100),
        join_timeout_ms: 2000,
        ..SessionConfig::default()
    }
}

pub fn session_on(device: &Arc<ScriptedDevice>, config: SessionConfig) -> EncodeSession {
    let ctx = DeviceContext::new(
        Arc::clone(device) as Arc<dyn EncoderDevice>,
        Arc::new(SoftwareConverter::new()),
    );
    EncodeSession::new(config, ctx).expect("session config is valid")
}

pub fn frame(index: u64) -> Frame {
    sized_frame(index, WIDTH, HEIGHT)
}

pub fn sized_frame(index: u64, width: u32, height: u32) -> Frame {
    let data = vec![(index & 0xff) as u8; (width * height * 4) as usize];
    Frame::bgra(index, width, height, data)
}

/// Flush and collect packets until the session reports drained
pub fn flush_and_collect(session: &EncodeSession, timeout: Duration) -> Vec<EncodedPacket> {
    session.flush().expect("flush");
    collect_until(session, timeout, |s| s.is_drained())
}

/// Retrieve packets until `done` holds or the timeout passes
pub fn collect_until(
    session: &EncodeSession,
    timeout: Duration,
    done: impl Fn(&EncodeSession) -> bool,
) -> Vec<EncodedPacket> {
    let deadline = Instant::now() + timeout;
    let mut packets = Vec::new();
    while !done(session) {
        assert!(Instant::now() < deadline, "timed out collecting packets");
        match session.retrieve().expect("retrieve") {
            Some(packet) => packets.push(packet),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    packets
}

/// Poll until `condition` holds or the timeout passes
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
