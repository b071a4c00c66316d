//! Software-only encoder device
//!
//! `SyntheticEncoder` implements [`EncoderDevice`] without any hardware. It
//! does not compress anything; it models the behaviour the session has to
//! cope with on a real device:
//!
//! - a bounded in-flight queue that answers [`Submission::Full`],
//! - GOP structure with IDR, I, P and B frames,
//! - B-frame reordering: an anchor is emitted before the B-frames that
//!   precede it in presentation order, so output is in decode order,
//! - Annex-B style payloads sized from the rate-control profile,
//! - SPS/PPS-like extra data that tracks the resolution,
//! - [`OutputPoll::EndOfStream`] once drained and empty.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    DeviceError, DeviceOutput, DeviceParams, DeviceResult, EncoderDevice, FrameClass, OutputPoll,
    Submission, Surface,
};

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const NAL_IDR: u8 = 0x65;
const NAL_SLICE_REF: u8 = 0x41;
const NAL_SLICE_NONREF: u8 = 0x01;
const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;

/// Tuning for the synthetic device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticConfig {
    /// Surfaces the device holds (pending reorder + completed output)
    pub queue_depth: usize,
    /// GOP length override; `None` uses the rate-control profile
    pub gop_length: Option<u32>,
    /// Every n-th GOP starts with an IDR, the others with a plain I frame
    pub idr_interval_gops: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            gop_length: None,
            idr_interval_gops: 1,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    params: Option<DeviceParams>,
    gop_length: u32,
    /// Frames accepted since the current GOP started
    gop_position: u32,
    gops_started: u64,
    /// Accepted, waiting for their anchor (presentation order)
    pending: Vec<u64>,
    /// Completed, in decode order
    output: VecDeque<DeviceOutput>,
    flushed: bool,
    extra_data: Option<Bytes>,
}

impl State {
    fn in_flight(&self) -> usize {
        self.pending.len() + self.output.len()
    }

    fn params(&self) -> DeviceResult<&DeviceParams> {
        self.params.as_ref().ok_or(DeviceError::NotInitialized)
    }

    /// Emit the newest pending frame as P, then the rest as B
    fn flush_pending(&mut self) -> DeviceResult<()> {
        let Some(anchor) = self.pending.pop() else {
            return Ok(());
        };
        let rest = std::mem::take(&mut self.pending);
        self.emit(anchor, FrameClass::P)?;
        for index in rest {
            self.emit(index, FrameClass::B)?;
        }
        Ok(())
    }

    fn emit(&mut self, presentation_index: u64, class: FrameClass) -> DeviceResult<()> {
        let params = self.params()?;
        let data = payload(presentation_index, class, average_frame_bytes(params));
        trace!("Synthetic output: frame {} as {}", presentation_index, class);
        self.output.push_back(DeviceOutput {
            data,
            presentation_index,
            class,
        });
        Ok(())
    }
}

/// Software model of an asynchronous hardware encoder
pub struct SyntheticEncoder {
    config: SyntheticConfig,
    state: Mutex<State>,
}

impl SyntheticEncoder {
    /// Create an uninitialized device
    pub fn new(config: SyntheticConfig) -> DeviceResult<Self> {
        if config.queue_depth == 0 {
            return Err(DeviceError::UnsupportedConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if config.idr_interval_gops == 0 {
            return Err(DeviceError::UnsupportedConfig(
                "idr_interval_gops must be at least 1".to_string(),
            ));
        }
        if config.gop_length == Some(0) {
            return Err(DeviceError::UnsupportedConfig(
                "gop_length must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config,
            state: Mutex::new(State::default()),
        })
    }

    /// Device tuning
    pub fn config(&self) -> SyntheticConfig {
        self.config
    }
}

impl EncoderDevice for SyntheticEncoder {
    fn init(&self, params: &DeviceParams) -> DeviceResult<()> {
        check_dimensions(params.width, params.height)?;
        if !params.frame_rate.is_valid() {
            return Err(DeviceError::UnsupportedConfig(format!(
                "frame rate {} is not valid",
                params.frame_rate
            )));
        }
        if params.b_frames as usize >= self.config.queue_depth {
            return Err(DeviceError::UnsupportedConfig(format!(
                "{} B-frames need a queue depth above {}",
                params.b_frames, params.b_frames
            )));
        }

        let gop_length = self
            .config
            .gop_length
            .unwrap_or(params.rate_control.gop_length)
            .max(1);

        let mut state = self.state.lock();
        *state = State {
            params: Some(params.clone()),
            gop_length,
            extra_data: Some(parameter_sets(params.width, params.height)),
            ..State::default()
        };

        debug!(
            "Synthetic encoder initialized: {}x{} @ {}, {} B-frames, GOP {}",
            params.width, params.height, params.frame_rate, params.b_frames, gop_length
        );
        Ok(())
    }

    fn reinit(&self, width: u32, height: u32) -> DeviceResult<()> {
        check_dimensions(width, height)?;

        let mut state = self.state.lock();
        if state.params.is_none() {
            return Err(DeviceError::NotInitialized);
        }

        // Frames of the old resolution leave as output; the new one starts a GOP
        state.flush_pending()?;
        if let Some(params) = state.params.as_mut() {
            params.width = width;
            params.height = height;
        }
        state.gop_position = 0;
        state.flushed = false;
        state.extra_data = Some(parameter_sets(width, height));

        debug!("Synthetic encoder reinitialized: {}x{}", width, height);
        Ok(())
    }

    fn submit(&self, surface: Surface) -> DeviceResult<Submission> {
        let mut state = self.state.lock();
        let params = state.params()?;

        if surface.width != params.width || surface.height != params.height {
            return Err(DeviceError::SubmitFailed(format!(
                "surface {}x{} does not match stream {}x{}",
                surface.width, surface.height, params.width, params.height
            )));
        }
        let b_frames = params.b_frames as usize;

        if state.flushed {
            return Err(DeviceError::SubmitFailed(
                "device has been drained".to_string(),
            ));
        }
        if state.in_flight() >= self.config.queue_depth {
            return Ok(Submission::Full);
        }

        let index = surface.presentation_index;
        if state.gop_position == 0 {
            state.flush_pending()?;
            let class = if state.gops_started % u64::from(self.config.idr_interval_gops) == 0 {
                FrameClass::Idr
            } else {
                FrameClass::I
            };
            state.gops_started += 1;
            state.emit(index, class)?;
        } else {
            state.pending.push(index);
            if state.pending.len() > b_frames {
                state.flush_pending()?;
            }
        }
        state.gop_position = (state.gop_position + 1) % state.gop_length;

        Ok(Submission::Accepted)
    }

    fn query_output(&self) -> DeviceResult<OutputPoll> {
        let mut state = self.state.lock();
        state.params()?;

        Ok(match state.output.pop_front() {
            Some(output) => OutputPoll::Ready(output),
            None if state.flushed => OutputPoll::EndOfStream,
            None => OutputPoll::NeedsMoreInput,
        })
    }

    fn drain_and_flush(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.params()?;
        state.flush_pending()?;
        state.flushed = true;
        debug!(
            "Synthetic encoder drained, {} packets outstanding",
            state.output.len()
        );
        Ok(())
    }

    fn extra_data(&self) -> Option<Bytes> {
        self.state.lock().extra_data.clone()
    }

    fn backend_name(&self) -> &'static str {
        "synthetic"
    }
}

fn check_dimensions(width: u32, height: u32) -> DeviceResult<()> {
    if width == 0 || height == 0 {
        return Err(DeviceError::InvalidDimensions {
            width,
            height,
            reason: "dimensions must be non-zero".to_string(),
        });
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(DeviceError::InvalidDimensions {
            width,
            height,
            reason: "dimensions must be even for 4:2:0".to_string(),
        });
    }
    Ok(())
}

/// Average bytes per frame for the configured bitrate
fn average_frame_bytes(params: &DeviceParams) -> usize {
    let rate = params.frame_rate;
    let bytes_per_sec = u64::from(params.rate_control.bitrate_kbps) * 1000 / 8;
    (bytes_per_sec * u64::from(rate.denominator) / u64::from(rate.numerator.max(1))) as usize
}

fn payload(presentation_index: u64, class: FrameClass, average: usize) -> Bytes {
    let (nal, body_len) = match class {
        FrameClass::Idr => (NAL_IDR, average * 4),
        FrameClass::I => (NAL_SLICE_REF, average * 3),
        FrameClass::P => (NAL_SLICE_REF, average),
        FrameClass::B => (NAL_SLICE_NONREF, average / 2),
    };
    let body_len = body_len.max(16);

    let mut buf = BytesMut::with_capacity(START_CODE.len() + 1 + body_len);
    buf.put_slice(&START_CODE);
    buf.put_u8(nal);
    buf.put_u64(presentation_index);
    // 0x00 never appears in the filler, so no emulation prevention is needed
    let fill = (presentation_index % 255) as u8 + 1;
    buf.put_bytes(fill, body_len - 8);
    buf.freeze()
}

fn parameter_sets(width: u32, height: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_slice(&START_CODE);
    buf.put_u8(NAL_SPS);
    // profile_idc high, constraint flags, level 4.0
    buf.put_slice(&[0x64, 0x00, 0x28]);
    buf.put_u16(width as u16);
    buf.put_u16(height as u16);
    buf.put_slice(&START_CODE);
    buf.put_u8(NAL_PPS);
    buf.put_slice(&[0xee, 0x3c, 0x80]);
    buf.freeze()
}
