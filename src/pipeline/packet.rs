//! Encoded packets and decode timestamp bookkeeping

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::encoder::{FrameClass, FrameRate};

/// One compressed frame handed to the host
///
/// Packets arrive in decode order. `pts` and `dts` are in frame units; use
/// [`pts_us`](Self::pts_us) / [`dts_us`](Self::dts_us) for microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Compressed payload
    pub data: Bytes,
    /// Presentation timestamp (the originating frame's presentation index)
    pub pts: i64,
    /// Decode timestamp, never greater than `pts`
    pub dts: i64,
    /// Frame class reported by the device
    pub class: FrameClass,
}

impl EncodedPacket {
    /// True iff the packet is an IDR frame
    #[inline]
    pub fn keyframe(&self) -> bool {
        self.class.is_keyframe()
    }

    /// Drop priority: IDR=3, I=2, P=1, B=0
    #[inline]
    pub fn priority(&self) -> u8 {
        self.class.priority()
    }

    /// Presentation index of the originating frame
    #[inline]
    pub fn presentation_index(&self) -> u64 {
        self.pts as u64
    }

    /// Presentation timestamp in microseconds
    pub fn pts_us(&self, rate: FrameRate) -> i64 {
        rate.frames_to_us(self.pts)
    }

    /// Decode timestamp in microseconds
    pub fn dts_us(&self, rate: FrameRate) -> i64 {
        rate.frames_to_us(self.dts)
    }
}

/// Assigns decode timestamps to packets in decode order
///
/// The submit worker records each presentation index before offering it to
/// the device and retracts it if the device refuses; the retrieve worker
/// takes them back in the same order. Recording first keeps the entry in
/// place when output shows up before `submit()` returns. The k-th packet out of the
/// device gets `dts = accepted[k] - lookahead`, clamped to its own `pts`.
#[derive(Debug, Default)]
pub struct DecodeClock {
    accepted: Mutex<VecDeque<u64>>,
}

impl DecodeClock {
    /// Create an empty clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a presentation index the device accepted
    pub fn record_accepted(&self, presentation_index: u64) {
        self.accepted.lock().push_back(presentation_index);
    }

    /// Withdraw the most recent record if it is `presentation_index`
    ///
    /// Used when the device did not take the surface. Returns whether an
    /// entry was removed.
    pub fn retract(&self, presentation_index: u64) -> bool {
        let mut accepted = self.accepted.lock();
        if accepted.back() == Some(&presentation_index) {
            accepted.pop_back();
            true
        } else {
            false
        }
    }

    /// Decode timestamp for the next packet out of the device
    pub fn next_dts(&self, pts: i64, lookahead: u32) -> i64 {
        let base = self
            .accepted
            .lock()
            .pop_front()
            .map(|index| index as i64)
            .unwrap_or(pts);
        (base - i64::from(lookahead)).min(pts)
    }

    /// Accepted indices not yet matched to a packet
    pub fn outstanding(&self) -> usize {
        self.accepted.lock().len()
    }

    /// Forget all outstanding indices
    pub fn clear(&self) {
        self.accepted.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn packet(class: FrameClass) -> EncodedPacket {
        EncodedPacket {
            data: Bytes::from_static(&[0, 0, 0, 1]),
            pts: 5,
            dts: 3,
            class,
        }
    }

    #[test]
    fn test_packet_metadata() {
        let idr = packet(FrameClass::Idr);
        assert!(idr.keyframe());
        assert_eq!(idr.priority(), 3);
        assert_eq!(idr.presentation_index(), 5);

        let b = packet(FrameClass::B);
        assert!(!b.keyframe());
        assert_eq!(b.priority(), 0);
    }

    #[test]
    fn test_packet_microseconds() {
        let p = packet(FrameClass::P);
        assert_eq!(p.pts_us(FrameRate::fps(25)), 200_000);
        assert_eq!(p.dts_us(FrameRate::fps(25)), 120_000);
    }

    #[test]
    fn test_no_reordering_is_pts_minus_lookahead() {
        let clock = DecodeClock::new();
        for i in 0..5 {
            clock.record_accepted(i);
        }
        for i in 0..5i64 {
            assert_eq!(clock.next_dts(i, 2), i - 2);
        }
        assert_eq!(clock.outstanding(), 0);
    }

    #[test]
    fn test_reordered_output() {
        // Decode order 0 3 1 2 with one B-frame pair
        let clock = DecodeClock::new();
        for i in 0..4 {
            clock.record_accepted(i);
        }
        let dts: Vec<i64> = [0, 3, 1, 2].iter().map(|&pts| clock.next_dts(pts, 2)).collect();
        assert_eq!(dts, vec![-2, -1, 0, 1]);
    }

    #[test]
    fn test_clamped_to_pts() {
        let clock = DecodeClock::new();
        clock.record_accepted(10);
        assert_eq!(clock.next_dts(4, 0), 4);
    }

    #[test]
    fn test_retract_only_removes_latest() {
        let clock = DecodeClock::new();
        clock.record_accepted(0);
        clock.record_accepted(1);
        assert!(!clock.retract(0));
        assert!(clock.retract(1));
        assert!(!clock.retract(1));
        assert_eq!(clock.outstanding(), 1);

        // Refused, then offered again
        clock.record_accepted(1);
        assert!(clock.retract(1));
        clock.record_accepted(1);
        assert_eq!(clock.next_dts(0, 1), -1);
        assert_eq!(clock.next_dts(1, 1), 0);
    }

    #[test]
    fn test_record_before_output_keeps_offset() {
        // Output read while submit() is still in flight
        let clock = DecodeClock::new();
        clock.record_accepted(0);
        assert_eq!(clock.next_dts(0, 2), -2);
        clock.record_accepted(1);
        assert_eq!(clock.next_dts(1, 2), -1);
        assert_eq!(clock.outstanding(), 0);
    }

    #[test]
    fn test_empty_clock_falls_back() {
        let clock = DecodeClock::new();
        assert_eq!(clock.next_dts(7, 3), 4);
        clock.record_accepted(1);
        clock.clear();
        assert_eq!(clock.outstanding(), 0);
    }

    proptest! {
        #[test]
        fn prop_dts_monotonic_and_not_after_pts(
            n in 1usize..64,
            b_frames in 0u32..4,
            extra_delay in 0u32..3,
        ) {
            // Anchor first, then its B-frames in presentation order
            let lookahead = b_frames + extra_delay;
            let clock = DecodeClock::new();
            for i in 0..n as u64 {
                clock.record_accepted(i);
            }
            let order: Vec<i64> = (0..n as i64)
                .collect::<Vec<_>>()
                .chunks(b_frames as usize + 1)
                .flat_map(|c| {
                    let (anchor, bs) = c.split_last().unwrap();
                    std::iter::once(*anchor).chain(bs.iter().copied()).collect::<Vec<_>>()
                })
                .collect();

            let mut prev = i64::MIN;
            for pts in order {
                let dts = clock.next_dts(pts, lookahead);
                prop_assert!(dts <= pts);
                prop_assert!(dts > prev);
                prev = dts;
            }
        }
    }
}
