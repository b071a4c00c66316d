//! Encode session integration tests
//!
//! Drives full sessions (both workers running) against scripted devices and
//! the synthetic backend.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use common::{
    collect_until, flush_and_collect, frame, session_on, sized_frame, test_config, wait_for,
    ScriptedDevice,
};
use lamco_encode_session::config::{DeviceConfig, SessionConfig};
use lamco_encode_session::encoder::{create_device_context, DeviceError, FrameClass, FrameRate};
use lamco_encode_session::pipeline::{
    DropReason, EncodeSession, SessionError, SessionFault, SessionState, SubmitError,
    RETRIEVE_WORKER, SUBMIT_WORKER,
};

const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_packets_arrive_in_decode_order() {
    let device = Arc::new(ScriptedDevice::new(0));
    let session = session_on(&device, test_config());
    session.start().unwrap();

    for i in 0..50 {
        session.submit(frame(i)).unwrap();
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, (0..50).collect::<Vec<i64>>());
    for packet in &packets {
        assert_eq!(packet.dts, packet.pts);
    }
    assert!(packets[0].keyframe());
    assert!(session.is_drained());

    session.stop().unwrap();
}

#[test]
fn test_payload_matches_presentation_index() {
    let device = Arc::new(ScriptedDevice::new(1));
    let session = session_on(&device, test_config());
    session.start().unwrap();

    for i in 0..20 {
        session.submit(frame(i)).unwrap();
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    assert_eq!(packets.len(), 20);
    for packet in &packets {
        let index = u64::from_le_bytes(packet.data[..8].try_into().unwrap());
        assert_eq!(index, packet.presentation_index());
        assert_eq!(packet.pts, index as i64);
    }

    let stats = session.stats();
    assert_eq!(stats.frames_submitted, 20);
    assert_eq!(stats.frames_accepted, 20);
    assert_eq!(stats.packets_retrieved, 20);
    assert_eq!(stats.keyframes, 1);
    assert_eq!(stats.bytes_retrieved, 20 * 8);

    session.stop().unwrap();
}

#[test]
fn test_decode_delay_offsets_dts() {
    let device = Arc::new(ScriptedDevice::new(2));
    let config = SessionConfig {
        decode_delay_frames: Some(2),
        ..test_config()
    };
    let session = session_on(&device, config);
    session.start().unwrap();
    assert_eq!(session.properties().lookahead, 2);

    for i in 0..10 {
        session.submit(frame(i)).unwrap();
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    assert_eq!(packets.len(), 10);
    for packet in &packets {
        assert_eq!(packet.pts - packet.dts, 2);
    }
    let rate = session.frame_rate();
    assert_eq!(packets[0].dts_us(rate), -20_000);

    session.stop().unwrap();
}

#[test]
fn test_output_ready_before_submit_returns() {
    let device = Arc::new(ScriptedDevice::new(0));
    *device.submit_delay.lock() = Duration::from_millis(30);
    let config = SessionConfig {
        decode_delay_frames: Some(2),
        ..test_config()
    };
    let session = session_on(&device, config);
    session.start().unwrap();

    for i in 0..5 {
        session.submit(frame(i)).unwrap();
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    let timestamps: Vec<(i64, i64)> = packets.iter().map(|p| (p.pts, p.dts)).collect();
    assert_eq!(timestamps, vec![(0, -2), (1, -1), (2, 0), (3, 1), (4, 2)]);

    session.stop().unwrap();
}

#[test]
fn test_full_queue_drops_within_one_frame_interval() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.always_full.store(true, Ordering::SeqCst);
    let config = SessionConfig {
        frame_queue_capacity: Some(3),
        ..test_config()
    };
    let session = session_on(&device, config);
    session.start().unwrap();

    let interval = session.frame_rate().frame_interval();
    let mut dropped = 0;
    for i in 0..5 {
        let started = Instant::now();
        match session.submit(frame(i)) {
            Ok(()) => {}
            Err(SubmitError::Dropped {
                presentation_index,
                queue_depth,
                reason,
            }) => {
                assert_eq!(presentation_index, i);
                assert_eq!(queue_depth, 3);
                assert_eq!(reason, DropReason::QueueFull);
                dropped += 1;
            }
            Err(e) => panic!("unexpected submit error: {}", e),
        }
        // Bounded by the backoff window plus scheduling slack
        assert!(started.elapsed() < interval + Duration::from_millis(50));
    }

    assert!(dropped >= 2);
    let stats = session.stats();
    assert_eq!(stats.frames_dropped_congestion, dropped);
    assert_eq!(stats.congestion_warnings, 1);
    assert_eq!(stats.congestion_suppressed, dropped - 1);
    assert!(stats.submit_retries > 0);
    assert!(device.accept_counts().is_empty());

    session.stop().unwrap();
}

#[test]
fn test_congested_device_never_accepts_twice() {
    let device = Arc::new(ScriptedDevice::new(1));
    device.always_full.store(true, Ordering::SeqCst);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    for i in 0..3 {
        session.submit(frame(i)).unwrap();
    }
    assert!(wait_for(Duration::from_secs(2), || {
        device.submit_calls.load(Ordering::SeqCst) >= 3
    }));
    device.always_full.store(false, Ordering::SeqCst);

    for i in 3..10 {
        session.submit(frame(i)).unwrap();
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, (0..10).collect::<Vec<i64>>());
    let counts = device.accept_counts();
    assert_eq!(counts.len(), 10);
    assert!(counts.values().all(|&n| n == 1));
    assert!(session.stats().submit_retries >= 3);

    session.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let device = Arc::new(ScriptedDevice::new(0));
    let session = session_on(&device, test_config());

    // No-op before start
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Created);

    session.start().unwrap();
    for i in 0..5 {
        session.submit(frame(i)).unwrap();
    }
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    assert_eq!(session.frame_queue_depth(), 0);
    assert_eq!(session.packet_queue_depth(), 0);
    assert!(matches!(
        session.submit(frame(5)),
        Err(SubmitError::Session(SessionError::InvalidState {
            state: SessionState::Stopped,
            ..
        }))
    ));
    assert!(matches!(
        session.start(),
        Err(SessionError::InvalidState { .. })
    ));
}

#[test]
fn test_extra_data_after_start() {
    let device = Arc::new(ScriptedDevice::new(0));
    let session = session_on(&device, test_config());

    assert!(matches!(
        session.get_extra_data(),
        Err(SessionError::ExtraDataNotReady)
    ));

    session.start().unwrap();
    let header = session.get_extra_data().unwrap();
    assert_eq!(&header[..5], &[0, 0, 0, 1, 0x67]);
    assert_eq!(&header[5..9], &[0, 16, 0, 8]);

    session.stop().unwrap();
}

#[test]
fn test_device_failure_is_reported_on_every_call() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.fail_submit_at(3);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    for i in 0..6 {
        let _ = session.submit(frame(i));
    }
    assert!(wait_for(Duration::from_secs(2), || session.fault().is_some()));

    let expected = SessionFault::Device(DeviceError::DeviceLost("scripted failure".to_string()));
    assert_eq!(session.fault(), Some(expected.clone()));

    // Fault wins over packets still queued
    for _ in 0..2 {
        match session.retrieve() {
            Err(SessionError::Fatal(fault)) => assert_eq!(fault, expected),
            other => panic!("expected fatal error, got {:?}", other),
        }
    }
    match session.submit(frame(100)) {
        Err(e) => {
            assert!(!e.is_recoverable());
            assert!(matches!(e, SubmitError::Session(SessionError::Fatal(_))));
        }
        Ok(()) => panic!("submit succeeded after a fault"),
    }
    assert!(matches!(session.flush(), Err(SessionError::Fatal(_))));

    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_startup_timeout_faults_session() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.always_full.store(true, Ordering::SeqCst);
    let config = SessionConfig {
        startup_timeout_ms: 100,
        ..test_config()
    };
    let session = session_on(&device, config);
    session.start().unwrap();
    session.submit(frame(0)).unwrap();

    assert!(wait_for(Duration::from_secs(3), || session.fault().is_some()));
    assert_eq!(
        session.fault(),
        Some(SessionFault::StartupTimeout { timeout_ms: 100 })
    );
    assert!(matches!(session.retrieve(), Err(SessionError::Fatal(_))));

    session.stop().unwrap();
}

#[test]
fn test_unexpected_end_of_stream_faults_session() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.early_end_of_stream.store(true, Ordering::SeqCst);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || session.fault().is_some()));
    assert_eq!(session.fault(), Some(SessionFault::UnexpectedEndOfStream));
    assert!(!session.is_drained());

    session.stop().unwrap();
}

#[test]
fn test_worker_panic_becomes_fault() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.panic_on_query.store(true, Ordering::SeqCst);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || session.fault().is_some()));
    assert_eq!(
        session.fault(),
        Some(SessionFault::WorkerPanicked {
            worker: RETRIEVE_WORKER
        })
    );

    match session.stop() {
        Err(SessionError::Fatal(SessionFault::WorkerPanicked { worker })) => {
            assert_eq!(worker, RETRIEVE_WORKER)
        }
        other => panic!("expected panicked worker on stop, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_stop_times_out_on_blocked_device() {
    let device = Arc::new(ScriptedDevice::new(0));
    device.block_submit.store(true, Ordering::SeqCst);
    let config = SessionConfig {
        join_timeout_ms: 100,
        ..test_config()
    };
    let session = session_on(&device, config);
    session.start().unwrap();
    session.submit(frame(0)).unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        device.submit_entered.load(Ordering::SeqCst)
    }));

    let started = Instant::now();
    match session.stop() {
        Err(SessionError::WorkerJoinTimeout { worker, timeout_ms }) => {
            assert_eq!(worker, SUBMIT_WORKER);
            assert_eq!(timeout_ms, 100);
        }
        other => panic!("expected join timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.state(), SessionState::Stopped);

    // Let the detached worker finish
    device.block_submit.store(false, Ordering::SeqCst);
}

#[test]
fn test_reconfigure_changes_resolution_and_rate() {
    let device = Arc::new(ScriptedDevice::new(0));
    let session = session_on(&device, test_config());
    session.start().unwrap();

    for i in 0..5 {
        session.submit(frame(i)).unwrap();
    }
    let mut packets = collect_until(&session, COLLECT_TIMEOUT, |s| {
        s.stats().packets_retrieved >= 5
    });

    session.reconfigure(32, 16, FrameRate::fps(50)).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(device.reinits(), vec![(32, 16)]);
    assert_eq!(session.frame_rate(), FrameRate::fps(50));
    assert_eq!(session.frame_queue_capacity(), 50);
    let header = session.get_extra_data().unwrap();
    assert_eq!(&header[5..9], &[0, 32, 0, 16]);

    // A frame of the old size fails conversion and is dropped
    session.submit(sized_frame(5, 16, 8)).unwrap();
    for i in 6..10 {
        session.submit(sized_frame(i, 32, 16)).unwrap();
    }
    packets.extend(flush_and_collect(&session, COLLECT_TIMEOUT));

    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    for (index, width, height) in device.accepted_surfaces() {
        if index >= 6 {
            assert_eq!((width, height), (32, 16));
        } else {
            assert_eq!((width, height), (16, 8));
        }
    }
    assert_eq!(session.stats().frames_dropped_conversion, 1);

    session.stop().unwrap();
}

#[test]
fn test_submit_during_reconfigure_is_dropped() {
    let device = Arc::new(ScriptedDevice::new(0));
    *device.reinit_delay.lock() = Duration::from_millis(300);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    std::thread::scope(|scope| {
        let reconfigure = scope.spawn(|| session.reconfigure(32, 16, FrameRate::fps(100)));

        assert!(wait_for(Duration::from_secs(2), || {
            session.state() == SessionState::Reconfiguring
        }));
        match session.submit(sized_frame(0, 32, 16)) {
            Err(SubmitError::Dropped {
                presentation_index,
                reason,
                ..
            }) => {
                assert_eq!(presentation_index, 0);
                assert_eq!(reason, DropReason::Reconfiguring);
            }
            other => panic!("expected drop while reconfiguring, got {:?}", other),
        }

        reconfigure.join().unwrap().unwrap();
    });

    // The dropped frame still consumed its index
    assert!(matches!(
        session.submit(sized_frame(0, 32, 16)),
        Err(SubmitError::NonSequential {
            expected: 1,
            got: 0
        })
    ));
    session.submit(sized_frame(1, 32, 16)).unwrap();
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].pts, 1);
    assert_eq!(session.stats().frames_dropped_congestion, 1);

    session.stop().unwrap();
}

#[test]
fn test_retrieve_does_not_wait_for_reconfigure() {
    let device = Arc::new(ScriptedDevice::new(0));
    *device.reinit_delay.lock() = Duration::from_millis(500);
    let session = session_on(&device, test_config());
    session.start().unwrap();

    std::thread::scope(|scope| {
        let reconfigure = scope.spawn(|| session.reconfigure(32, 16, FrameRate::fps(100)));

        assert!(wait_for(Duration::from_secs(2), || {
            session.state() == SessionState::Reconfiguring
        }));
        let started = Instant::now();
        assert!(session.retrieve().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_millis(100));

        reconfigure.join().unwrap().unwrap();
    });

    session.stop().unwrap();
}

#[test]
fn test_synthetic_backend_end_to_end() {
    let ctx = create_device_context(&DeviceConfig::default()).unwrap();
    let config = SessionConfig {
        width: 64,
        height: 32,
        frame_rate: FrameRate::fps(100),
        b_frame_pattern: "two".to_string(),
        join_timeout_ms: 2000,
        ..SessionConfig::default()
    };
    let session = EncodeSession::new(config, ctx).unwrap();
    session.start().unwrap();
    assert_eq!(session.stats().backend, "synthetic");

    let header = session.get_extra_data().unwrap();
    assert_eq!(&header[..4], &[0, 0, 0, 1]);

    for i in 0..30 {
        session
            .submit(sized_frame(i, 64, 32))
            .unwrap_or_else(|e| panic!("frame {}: {}", i, e));
    }
    let packets = flush_and_collect(&session, COLLECT_TIMEOUT);

    assert_eq!(packets.len(), 30);
    assert_eq!(packets[0].class, FrameClass::Idr);
    assert_eq!(packets[0].pts, 0);

    let pts: HashSet<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, (0..30).collect::<HashSet<i64>>());
    assert!(packets.iter().any(|p| p.class == FrameClass::B));
    for window in packets.windows(2) {
        assert!(window[1].dts > window[0].dts);
    }
    for packet in &packets {
        assert!(packet.dts <= packet.pts);
    }

    session.stop().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_packets_match_frames(frames in 1u64..40, latency in 0usize..4) {
        let device = Arc::new(ScriptedDevice::new(latency));
        let config = SessionConfig {
            decode_delay_frames: Some(latency as u32),
            ..test_config()
        };
        let session = session_on(&device, config);
        session.start().unwrap();

        for i in 0..frames {
            session.submit(frame(i)).unwrap();
        }
        let packets = flush_and_collect(&session, COLLECT_TIMEOUT);
        session.stop().unwrap();

        prop_assert_eq!(packets.len() as u64, frames);
        let mut prev_pts = -1;
        let mut prev_dts = i64::MIN;
        for packet in &packets {
            let index = u64::from_le_bytes(packet.data[..8].try_into().unwrap());
            prop_assert_eq!(packet.pts, index as i64);
            prop_assert!(packet.pts > prev_pts);
            prop_assert!(packet.dts > prev_dts);
            prop_assert_eq!(packet.pts - packet.dts, latency as i64);
            prev_pts = packet.pts;
            prev_dts = packet.dts;
        }
    }
}
