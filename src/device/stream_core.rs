// StreamCore - shared plumbing between a realtime output callback and the engine
//
// Real audio APIs pull samples from a callback thread that must never block.
// StreamCore turns that pull model into the push-with-callbacks model the
// engine expects:
//
// - SAMPLE FIFO: rtrb SPSC queue. The engine pushes mixed windows through
//   `write` (producer behind a control-side mutex); the realtime callback
//   pops them (consumer behind a mutex it only ever `try_lock`s).
// - TIMING: the head position, armed marker and tick period are atomics.
// - EVENT QUEUE: crossings detected on the realtime thread are pushed into a
//   second rtrb queue and drained by a notifier thread, which is where the
//   listener actually runs.
//
// Flow:
// 1. Engine writes a window -> sample FIFO
// 2. Realtime callback renders from the FIFO, advances the head by the frames
//    it actually took
// 3. Realtime callback pushes PeriodicTick / MarkerReached, unparks notifier
// 4. Notifier thread calls the DeviceListener with this core as the device
//
// Starved renders and events that did not fit the queue are counted on the
// realtime thread and reported through `on_device_error`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use log::{debug, error, warn};
use rtrb::{Consumer, Producer};

use super::{DeviceListener, OutputDevice};
use crate::error::{AudioError, ErrorCode};

/// Capacity of the realtime-to-notifier event queue
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Notifier wake-up interval when no event arrived
const NOTIFIER_IDLE: Duration = Duration::from_millis(5);

const NO_MARKER: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceEvent {
    PeriodicTick,
    MarkerReached,
}

/// Device state shared by the control side, the realtime callback and the
/// notifier thread
pub struct StreamCore {
    sample_rate: u32,
    min_buffer_frames: AtomicUsize,
    producer: Mutex<Producer<f32>>,
    consumer: Mutex<Consumer<f32>>,
    head: AtomicI64,
    marker: AtomicI64,
    period: AtomicUsize,
    period_reset: AtomicBool,
    playing: AtomicBool,
    /// Frames rendered as silence while playing, not yet reported
    starved_frames: AtomicUsize,
    /// Events the realtime thread could not queue, not yet reported
    dropped_events: AtomicUsize,
    listener: Mutex<Option<Arc<dyn DeviceListener>>>,
}

impl StreamCore {
    /// Create the core, its realtime render side and the notifier thread.
    ///
    /// # Arguments
    /// * `sample_rate` - Rate the hardware stream runs at
    /// * `min_buffer_frames` - Hardware callback size
    /// * `capacity_frames` - Sample FIFO capacity
    ///
    /// # Errors
    /// `HardwareError` if the notifier thread cannot be spawned
    pub fn new(
        sample_rate: u32,
        min_buffer_frames: usize,
        capacity_frames: usize,
    ) -> Result<(Arc<Self>, RenderContext, Notifier), AudioError> {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity_frames.max(1));
        let (event_producer, event_consumer) = rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY);

        let core = Arc::new(Self {
            sample_rate,
            min_buffer_frames: AtomicUsize::new(min_buffer_frames),
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            head: AtomicI64::new(0),
            marker: AtomicI64::new(NO_MARKER),
            period: AtomicUsize::new(0),
            period_reset: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            starved_frames: AtomicUsize::new(0),
            dropped_events: AtomicUsize::new(0),
            listener: Mutex::new(None),
        });

        let notifier = Notifier::spawn(Arc::clone(&core), event_consumer)?;
        let render = RenderContext {
            core: Arc::clone(&core),
            events: event_producer,
            frames_since_tick: 0,
            notifier_thread: notifier.thread(),
        };

        Ok((core, render, notifier))
    }

    /// Update the reported buffer size once the hardware stream is open
    pub fn set_minimum_buffer_size_frames(&self, frames: usize) {
        self.min_buffer_frames.store(frames, Ordering::Release);
    }

    fn listener(&self) -> Option<Arc<dyn DeviceListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    fn producer(&self) -> MutexGuard<'_, Producer<f32>> {
        self.producer.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Take the oldest unreported realtime fault
    fn take_fault(&self) -> Option<AudioError> {
        let missing_frames = self.starved_frames.swap(0, Ordering::AcqRel);
        if missing_frames > 0 {
            return Some(AudioError::PlaybackStarved { missing_frames });
        }
        let count = self.dropped_events.swap(0, Ordering::AcqRel);
        if count > 0 {
            return Some(AudioError::DeviceEventsDropped { count });
        }
        None
    }
}

impl OutputDevice for StreamCore {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn minimum_buffer_size_frames(&self) -> usize {
        self.min_buffer_frames.load(Ordering::Acquire)
    }

    fn write(&self, samples: &[f32]) -> Result<usize, AudioError> {
        let mut producer = self.producer();
        let accepted = producer.slots().min(samples.len());
        for &sample in &samples[..accepted] {
            if producer.push(sample).is_err() {
                return Err(AudioError::HardwareError {
                    details: "sample FIFO rejected a reserved slot".to_string(),
                });
            }
        }
        Ok(accepted)
    }

    fn playback_head_position(&self) -> i64 {
        self.head.load(Ordering::Acquire)
    }

    fn set_periodic_notification_period(&self, frames: usize) {
        self.period.store(frames, Ordering::Release);
        self.period_reset.store(true, Ordering::Release);
    }

    fn set_next_marker_position(&self, frame: Option<i64>) {
        self.marker
            .store(frame.unwrap_or(NO_MARKER), Ordering::Release);
    }

    fn set_listener(&self, listener: Option<Arc<dyn DeviceListener>>) {
        *self.listener.lock().unwrap_or_else(|err| err.into_inner()) = listener;
    }

    fn play(&self) -> Result<(), AudioError> {
        self.starved_frames.store(0, Ordering::Release);
        self.dropped_events.store(0, Ordering::Release);
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<(), AudioError> {
        self.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn flush(&self) {
        let mut consumer = self.consumer.lock().unwrap_or_else(|err| err.into_inner());
        while consumer.pop().is_ok() {}
    }
}

/// Realtime half of a [`StreamCore`], owned by the hardware callback
///
/// `render` is allocation-free and never blocks: when the FIFO is short or
/// the control side holds it (during `flush`) the callback plays silence.
/// The head only moves by frames taken from the FIFO.
pub struct RenderContext {
    core: Arc<StreamCore>,
    events: Producer<DeviceEvent>,
    frames_since_tick: usize,
    notifier_thread: Thread,
}

impl RenderContext {
    /// Fill `out` with the next mono frames and advance the head by the
    /// frames taken from the FIFO.
    ///
    /// # Returns
    /// Number of frames taken from the FIFO; the rest of `out` is silence
    /// and is reported to the listener as starvation
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        let core = &*self.core;
        if !core.playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let mut read = 0;
        if let Ok(mut consumer) = core.consumer.try_lock() {
            for slot in out.iter_mut() {
                match consumer.pop() {
                    Ok(sample) => {
                        *slot = sample;
                        read += 1;
                    }
                    Err(_) => break,
                }
            }
        }
        out[read..].fill(0.0);

        let mut notify = false;
        let missing = out.len() - read;
        if missing > 0 {
            core.starved_frames.fetch_add(missing, Ordering::AcqRel);
            notify = true;
        }

        let head = core.head.fetch_add(read as i64, Ordering::AcqRel) + read as i64;

        if core.period_reset.swap(false, Ordering::AcqRel) {
            self.frames_since_tick = 0;
        }

        let period = core.period.load(Ordering::Acquire);
        if period > 0 {
            self.frames_since_tick += read;
            while self.frames_since_tick >= period {
                self.frames_since_tick -= period;
                push_event(&mut self.events, &core.dropped_events, DeviceEvent::PeriodicTick);
                notify = true;
            }
        }

        let marker = core.marker.load(Ordering::Acquire);
        if marker != NO_MARKER
            && marker <= head
            && core
                .marker
                .compare_exchange(marker, NO_MARKER, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            push_event(&mut self.events, &core.dropped_events, DeviceEvent::MarkerReached);
            notify = true;
        }

        if notify {
            self.notifier_thread.unpark();
        }
        read
    }
}

/// Queue an event for the notifier, counting it as dropped when full
fn push_event(events: &mut Producer<DeviceEvent>, dropped: &AtomicUsize, event: DeviceEvent) {
    if events.push(event).is_err() {
        dropped.fetch_add(1, Ordering::AcqRel);
    }
}

/// Thread delivering realtime events to the device listener
///
/// Stopped and joined on drop.
pub struct Notifier {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    fn spawn(core: Arc<StreamCore>, mut events: Consumer<DeviceEvent>) -> Result<Self, AudioError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("device-notifier".to_string())
            .spawn(move || {
                debug!("[StreamCore] Notifier thread started");
                while !stop.load(Ordering::Acquire) {
                    while let Ok(event) = events.pop() {
                        let Some(listener) = core.listener() else {
                            continue;
                        };
                        match event {
                            DeviceEvent::PeriodicTick => listener.on_periodic_tick(&*core),
                            DeviceEvent::MarkerReached => listener.on_marker_reached(&*core),
                        }
                    }
                    while let Some(fault) = core.take_fault() {
                        warn!("[StreamCore] {}", fault.message());
                        if let Some(listener) = core.listener() {
                            listener.on_device_error(&*core, fault);
                        }
                    }
                    thread::park_timeout(NOTIFIER_IDLE);
                }
                debug!("[StreamCore] Notifier thread stopped");
            })
            .map_err(|e| AudioError::HardwareError {
                details: format!("Failed to spawn notifier thread: {}", e),
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    fn thread(&self) -> Thread {
        match &self.handle {
            Some(handle) => handle.thread().clone(),
            None => thread::current(),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Dropped from inside a listener callback: the thread exits on its own
        if handle.thread().id() == thread::current().id() {
            return;
        }
        handle.thread().unpark();
        if handle.join().is_err() {
            error!("[StreamCore] Notifier thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct ChannelListener {
        tx: Mutex<mpsc::Sender<(&'static str, i64)>>,
        errors: Mutex<mpsc::Sender<AudioError>>,
    }

    impl DeviceListener for ChannelListener {
        fn on_periodic_tick(&self, device: &dyn OutputDevice) {
            let _ = self
                .tx
                .lock()
                .unwrap()
                .send(("tick", device.playback_head_position()));
        }

        fn on_marker_reached(&self, device: &dyn OutputDevice) {
            let _ = self
                .tx
                .lock()
                .unwrap()
                .send(("marker", device.playback_head_position()));
        }

        fn on_device_error(&self, _device: &dyn OutputDevice, error: AudioError) {
            let _ = self.errors.lock().unwrap().send(error);
        }
    }

    fn attach_listener(
        core: &StreamCore,
    ) -> (
        mpsc::Receiver<(&'static str, i64)>,
        mpsc::Receiver<AudioError>,
    ) {
        let (tx, rx) = mpsc::channel();
        let (errors_tx, errors_rx) = mpsc::channel();
        core.set_listener(Some(Arc::new(ChannelListener {
            tx: Mutex::new(tx),
            errors: Mutex::new(errors_tx),
        })));
        (rx, errors_rx)
    }

    #[test]
    fn test_render_plays_written_frames_then_silence() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 16).unwrap();
        assert_eq!(core.write(&[0.25; 6]).unwrap(), 6);
        core.play().unwrap();

        let mut out = [1.0_f32; 8];
        assert_eq!(render.render(&mut out), 6);

        assert_eq!(&out[..6], &[0.25; 6]);
        assert_eq!(&out[6..], &[0.0; 2]);
        assert_eq!(core.playback_head_position(), 6);
    }

    #[test]
    fn test_write_respects_fifo_capacity() {
        let (core, _render, _notifier) = StreamCore::new(48000, 4, 8).unwrap();
        assert_eq!(core.write(&[0.1; 5]).unwrap(), 5);
        assert_eq!(core.write(&[0.1; 5]).unwrap(), 3);
        core.flush();
        assert_eq!(core.write(&[0.1; 5]).unwrap(), 5);
    }

    #[test]
    fn test_paused_render_outputs_silence_without_advancing() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 16).unwrap();
        let (_events, errors) = attach_listener(&core);
        core.write(&[0.5; 4]).unwrap();

        let mut out = [1.0_f32; 4];
        assert_eq!(render.render(&mut out), 0);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(core.playback_head_position(), 0);
        assert!(errors.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_events_reach_listener_on_notifier_thread() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 64).unwrap();
        let (rx, errors) = attach_listener(&core);
        core.write(&[0.0; 16]).unwrap();
        core.set_periodic_notification_period(8);
        core.set_next_marker_position(Some(10));
        core.play().unwrap();

        let mut out = [0.0_f32; 8];
        render.render(&mut out);
        render.render(&mut out);

        let mut received = vec![
            rx.recv_timeout(TIMEOUT).unwrap().0,
            rx.recv_timeout(TIMEOUT).unwrap().0,
            rx.recv_timeout(TIMEOUT).unwrap().0,
        ];
        received.sort();
        assert_eq!(received, vec!["marker", "tick", "tick"]);
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_starved_render_holds_head_and_reports_error() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 64).unwrap();
        let (_events, errors) = attach_listener(&core);
        core.play().unwrap();

        let mut out = [1.0_f32; 8];
        assert_eq!(render.render(&mut out), 0);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(core.playback_head_position(), 0);
        assert_eq!(
            errors.recv_timeout(TIMEOUT).unwrap(),
            AudioError::PlaybackStarved { missing_frames: 8 }
        );

        core.write(&[0.5; 8]).unwrap();
        assert_eq!(render.render(&mut out), 8);
        assert_eq!(out, [0.5; 8]);
        assert_eq!(core.playback_head_position(), 8);
        assert!(errors.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_starved_frames_do_not_count_toward_ticks() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 64).unwrap();
        let (rx, _errors) = attach_listener(&core);
        core.set_periodic_notification_period(8);
        core.write(&[0.0; 4]).unwrap();
        core.play().unwrap();

        // Four real frames out of eight: no tick yet
        let mut out = [0.0_f32; 8];
        assert_eq!(render.render(&mut out), 4);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        core.write(&[0.0; 4]).unwrap();
        render.render(&mut out[..4]);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("tick", 8));
    }

    /// Holds the notifier inside its first tick until released
    struct GatedListener {
        entered: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
        blocked_once: AtomicBool,
        errors: Mutex<mpsc::Sender<AudioError>>,
    }

    impl DeviceListener for GatedListener {
        fn on_periodic_tick(&self, _device: &dyn OutputDevice) {
            if !self.blocked_once.swap(true, Ordering::SeqCst) {
                let _ = self.entered.lock().unwrap().send(());
                let _ = self.gate.lock().unwrap().recv_timeout(TIMEOUT);
            }
        }

        fn on_marker_reached(&self, _device: &dyn OutputDevice) {}

        fn on_device_error(&self, _device: &dyn OutputDevice, error: AudioError) {
            let _ = self.errors.lock().unwrap().send(error);
        }
    }

    #[test]
    fn test_full_event_queue_reports_dropped_ticks() {
        let (core, mut render, _notifier) = StreamCore::new(48000, 4, 512).unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let (errors_tx, errors_rx) = mpsc::channel();
        core.set_listener(Some(Arc::new(GatedListener {
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
            blocked_once: AtomicBool::new(false),
            errors: Mutex::new(errors_tx),
        })));
        core.write(&[0.0; 1 + 100]).unwrap();
        core.set_periodic_notification_period(1);
        core.play().unwrap();

        let mut out = [0.0_f32; 100];
        render.render(&mut out[..1]);
        entered_rx.recv_timeout(TIMEOUT).unwrap();

        // Notifier is busy: 64 ticks fit, the other 36 are lost
        assert_eq!(render.render(&mut out), 100);
        gate_tx.send(()).unwrap();

        assert_eq!(
            errors_rx.recv_timeout(TIMEOUT).unwrap(),
            AudioError::DeviceEventsDropped {
                count: 100 - EVENT_QUEUE_CAPACITY
            }
        );
    }
}
