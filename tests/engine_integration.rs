//! Integration tests for the metronome engine over both device flavours
//!
//! These tests drive the public API only:
//! - deterministic playback through `SimulatedDevice`
//! - realtime-style playback through `StreamCore`, where the head jumps by
//!   whole hardware buffers and callbacks arrive on the notifier thread
//! - engine event streams

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures::StreamExt;
use metronome_engine::config::EngineConfig;
use metronome_engine::device::{SimulatedDevice, StreamCore};
use metronome_engine::engine::{EngineEvent, MarkerAnchor, MetronomeEngine, PlaylistItem};
use metronome_engine::error::{AudioError, AudioErrorCodes};
use metronome_engine::notify::InlineExecutor;
use metronome_engine::{InMemorySampleRepository, OutputDevice};

const RATE: u32 = 48000;

fn low_latency_config(anchor: MarkerAnchor) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.audio.max_latency_ms = 0.0;
    config.scheduling.marker_anchor = anchor;
    config
}

fn samples() -> Arc<InMemorySampleRepository> {
    let samples = InMemorySampleRepository::new(RATE);
    samples.insert(1, vec![1.0; 64]);
    samples.insert(2, vec![-1.0; 64]);
    Arc::new(samples)
}

fn record_notes<P: Clone + Send + Sync + 'static>(
    engine: &MetronomeEngine<P>,
) -> Arc<Mutex<Vec<(P, i64)>>> {
    let notes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notes);
    engine.register_listener(Duration::ZERO, Arc::new(InlineExecutor), move |event| {
        sink.lock()
            .unwrap()
            .push((event.payload.clone(), event.frame));
    });
    notes
}

#[test]
fn test_playlist_loops_in_order() {
    let device = Arc::new(SimulatedDevice::new(RATE, 4096, 16384));
    let engine = MetronomeEngine::new(
        low_latency_config(MarkerAnchor::BeatEnd),
        device.clone(),
        samples(),
    )
    .unwrap();
    let notes = record_notes(&engine);
    engine
        .set_playlist(vec![
            PlaylistItem::new(1, 1.0, 1.0, 'A'),
            PlaylistItem::new(2, 1.0, 2.0, 'B'),
        ])
        .unwrap();
    engine.start().unwrap();

    device.advance(4096 + 48000 + 96000 + 48000);

    assert_eq!(
        *notes.lock().unwrap(),
        vec![
            ('A', 4096 + 48000),
            ('B', 4096 + 48000 + 96000),
            ('A', 4096 + 48000 + 96000 + 48000),
        ]
    );

    // Each beat's sound starts where the previous beat ended
    let played = device.played();
    assert_eq!(played[4096], 1.0);
    assert_eq!(played[4096 + 48000], -1.0);
    assert_eq!(played[4096 + 48000 + 96000], 1.0);
}

#[test]
fn test_volume_scales_output() {
    let device = Arc::new(SimulatedDevice::new(RATE, 1024, 8192));
    let engine = MetronomeEngine::<()>::new(
        low_latency_config(MarkerAnchor::BeatStart),
        device.clone(),
        samples(),
    )
    .unwrap();
    engine
        .set_playlist(vec![PlaylistItem::new(1, 0.25, 0.1, ())])
        .unwrap();
    engine.start().unwrap();

    device.advance(1024 + 64);

    let played = device.played();
    assert!(played[1024..1024 + 64].iter().all(|&s| s == 0.25));
}

#[test]
fn test_markers_fire_once_when_head_jumps_whole_buffers() {
    const WINDOW: usize = 256;
    const BEAT: i64 = 480;
    const HARDWARE_BUFFER: usize = 2048;

    let (core, mut render, _notifier) = StreamCore::new(RATE, WINDOW, 64 * WINDOW).unwrap();
    let mut config = low_latency_config(MarkerAnchor::BeatStart);
    // Enough primed windows for a whole hardware buffer
    config.audio.prime_windows = HARDWARE_BUFFER / WINDOW;
    let engine = MetronomeEngine::new(config, core.clone(), samples()).unwrap();
    assert_eq!(engine.window_size(), WINDOW);
    let notes = record_notes(&engine);
    engine
        .set_playlist(vec![PlaylistItem::new(1, 1.0, 0.01, 0u32)])
        .unwrap();
    engine.start().unwrap();

    let mut out = vec![0.0; HARDWARE_BUFFER];
    for _ in 0..20 {
        render.render(&mut out);
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(100));
    assert!(engine.is_running(), "engine stopped during playback");
    engine.stop().unwrap();

    let frames: Vec<i64> = notes.lock().unwrap().iter().map(|n| n.1).collect();
    assert!(frames.len() >= 50, "only {} notes delivered", frames.len());
    let expected: Vec<i64> = (0..frames.len() as i64)
        .map(|i| WINDOW as i64 + i * BEAT)
        .collect();
    assert_eq!(frames, expected);
    assert!(*frames.last().unwrap() <= core.playback_head_position());
}

#[test]
fn test_starved_stream_halts_engine_with_error_event() {
    const WINDOW: usize = 256;

    let (core, mut render, _notifier) = StreamCore::new(RATE, WINDOW, 64 * WINDOW).unwrap();
    let engine = MetronomeEngine::new(
        low_latency_config(MarkerAnchor::BeatStart),
        core.clone(),
        samples(),
    )
    .unwrap();
    let mut events = engine.subscribe_events();
    engine
        .set_playlist(vec![PlaylistItem::new(1, 1.0, 0.01, 0u32)])
        .unwrap();
    engine.start().unwrap();

    // Two primed windows cannot cover a buffer of four
    let mut out = vec![0.0; 4 * WINDOW];
    assert_eq!(render.render(&mut out), 2 * WINDOW);
    assert_eq!(core.playback_head_position(), 2 * WINDOW as i64);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut error = None;
    while error.is_none() && Instant::now() < deadline {
        match events.try_recv() {
            Ok(EngineEvent::Error { code, .. }) => error = Some(code),
            Ok(_) => {}
            Err(_) => thread::sleep(Duration::from_millis(5)),
        }
    }
    assert_eq!(error, Some(AudioErrorCodes::PLAYBACK_STARVED));
    assert!(!engine.is_running());
    assert_eq!(engine.stop(), Err(AudioError::NotRunning));

    // Paused: the head no longer moves
    let head = core.playback_head_position();
    assert_eq!(render.render(&mut out), 0);
    assert_eq!(core.playback_head_position(), head);
}

#[test]
fn test_event_stream_reports_lifecycle() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let device = Arc::new(SimulatedDevice::new(RATE, 1024, 8192));
    let engine =
        MetronomeEngine::<u8>::new(EngineConfig::default(), device.clone(), samples()).unwrap();
    let window_size = engine.window_size();
    let stream = engine.event_stream();

    engine
        .set_playlist(vec![PlaylistItem::new(1, 1.0, 0.5, 0)])
        .unwrap();
    engine.start().unwrap();
    device.advance(window_size);
    engine.stop().unwrap();
    // Dropping the engine closes the stream
    drop(engine);

    let events: Vec<EngineEvent> = runtime.block_on(stream.collect());
    assert_eq!(
        events,
        vec![
            EngineEvent::PlaylistChanged { len: 1 },
            EngineEvent::Started {
                session: 1,
                window_size
            },
            EngineEvent::Stopped,
        ]
    );
}
