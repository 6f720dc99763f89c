//! Integration tests for note listener delivery
//!
//! Covers listener delay, the three executor kinds, and unregistering from
//! inside a callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use metronome_engine::config::EngineConfig;
use metronome_engine::device::SimulatedDevice;
use metronome_engine::engine::{MetronomeEngine, PlaylistItem};
use metronome_engine::notify::{InlineExecutor, ListenerHandle, QueueExecutor, TokioExecutor};
use metronome_engine::InMemorySampleRepository;

const RATE: u32 = 48000;
const WINDOW: usize = 1024;
/// First beat-end marker for a 0.1 s beat
const FIRST_MARKER: usize = WINDOW + 4800;

fn running_engine() -> (Arc<SimulatedDevice>, MetronomeEngine<u32>) {
    let device = Arc::new(SimulatedDevice::new(RATE, WINDOW, 8 * WINDOW));
    let samples = Arc::new(InMemorySampleRepository::new(RATE));
    samples.insert_click(1);

    let mut config = EngineConfig::default();
    config.audio.max_latency_ms = 0.0;
    let engine = MetronomeEngine::new(config, device.clone(), samples).unwrap();
    engine
        .set_playlist(vec![PlaylistItem::new(1, 1.0, 0.1, 42)])
        .unwrap();
    engine.start().unwrap();
    (device, engine)
}

#[test]
fn test_delayed_listener_waits_for_its_delay() {
    let (device, engine) = running_engine();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let delay = Duration::from_millis(50);
    engine.register_listener(delay, Arc::new(InlineExecutor), move |event| {
        let _ = tx
            .lock()
            .unwrap()
            .send((event.payload, event.firing_time, Instant::now()));
    });

    device.advance(FIRST_MARKER);

    let (payload, firing_time, delivered_at) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(payload, 42);
    assert!(delivered_at >= firing_time + delay);
}

#[test]
fn test_undelayed_and_delayed_listeners_both_fire() {
    let (device, engine) = running_engine();
    let immediate = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&immediate);
    engine.register_listener(Duration::ZERO, Arc::new(InlineExecutor), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    engine.register_listener(
        Duration::from_millis(10),
        Arc::new(InlineExecutor),
        move |event| {
            let _ = tx.lock().unwrap().send(event.frame);
        },
    );

    device.advance(FIRST_MARKER);

    assert_eq!(immediate.load(Ordering::SeqCst), 1);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        FIRST_MARKER as i64
    );
}

#[test]
fn test_queue_executor_runs_on_drain() {
    let (device, engine) = running_engine();
    let queue = Arc::new(QueueExecutor::new());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    engine.register_listener(Duration::ZERO, queue.clone(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    device.advance(FIRST_MARKER);
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    assert_eq!(queue.run_pending(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tokio_executor_delivers_on_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (device, engine) = running_engine();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine.register_listener(
        Duration::ZERO,
        Arc::new(TokioExecutor::new(runtime.handle().clone())),
        move |event| {
            let _ = tx.send(event.payload);
        },
    );

    device.advance(FIRST_MARKER);

    let payload = runtime.block_on(async {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
    });
    assert_eq!(payload, Ok(Some(42)));
}

#[test]
fn test_listener_can_unregister_itself() {
    let (device, engine) = running_engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

    let counter = Arc::clone(&calls);
    let own_handle = Arc::clone(&slot);
    let handle = engine.register_listener(Duration::ZERO, Arc::new(InlineExecutor), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = own_handle.lock().unwrap().as_ref() {
            handle.unregister();
        }
    });
    *slot.lock().unwrap() = Some(handle);

    device.advance(FIRST_MARKER + 3 * 4800);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
