//! MetronomeEngine: the scheduling/mixing core driven by an output device.
//!
//! The engine owns one piece of shared state, [`MixerState`], behind a
//! mutex. Device callbacks and control operations (start, stop, playlist
//! changes, tempo sync) take that lock only for field updates and the
//! non-blocking device write; note listeners always run after it is
//! released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::clock::{SystemTimeSource, TimeSource};
use super::mixer::Mixer;
use super::playlist::{resolve_playlist, PlaylistItem};
use super::scheduler::{Marker, PlaylistCursor};
use super::sync::{beat_frames, reference_frame};
use crate::audio::ring_buffer::RingBuffer;
use crate::audio::samples::SampleRepository;
use crate::config::EngineConfig;
use crate::device::{DeviceListener, OutputDevice};
use crate::error::{log_audio_error, AudioError, ErrorCode};
use crate::notify::{Executor, ListenerHandle, NoteDispatcher, NoteEvent};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

/// Lifecycle event published by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    Started { session: u64, window_size: usize },
    Stopped,
    PlaylistChanged { len: usize },
    TempoSynchronized { next_track_frame: i64 },
    Error { code: i32, message: String },
}

/// Everything the device callbacks mutate
struct MixerState<P> {
    cursor: PlaylistCursor<P>,
    markers: RingBuffer<Marker<P>>,
    mixer: Mixer,
    running: bool,
    session: u64,
    /// Device head position at `start()`; engine frames are relative to it
    head_origin: i64,
    marker_armed: bool,
}

impl<P: Clone> MixerState<P> {
    /// Schedule and mix one window
    fn tick(&mut self, device: &dyn OutputDevice) -> Result<(), AudioError> {
        let window = self.mixer.window_size();
        self.cursor
            .queue_next_tracks(window, self.mixer.tracks_mut(), &mut self.markers);
        self.mixer.mix_and_play_queued_tracks(device)?;

        if !self.marker_armed && !self.markers.is_empty() {
            self.arm_marker(device);
        }
        Ok(())
    }

    fn arm_marker(&mut self, device: &dyn OutputDevice) {
        let frame = self.markers.first().frame;
        device.set_next_marker_position(Some(self.head_origin + frame));
        self.marker_armed = true;
    }

    /// Drop every queued track and marker and rewind the cursor
    fn reset(&mut self, first_beat_frame: i64) {
        self.cursor.reset(first_beat_frame);
        for marker in self.markers.iter_mut() {
            marker.payload = None;
        }
        self.markers.clear();
        self.mixer.clear();
        self.marker_armed = false;
    }
}

struct EngineInner<P> {
    config: EngineConfig,
    device: Arc<dyn OutputDevice>,
    samples: Arc<dyn SampleRepository>,
    time_source: Arc<dyn TimeSource>,
    sample_rate: u32,
    window_size: usize,
    state: Mutex<MixerState<P>>,
    running: AtomicBool,
    notes: NoteDispatcher<P>,
    events_tx: broadcast::Sender<EngineEvent>,
}

impl<P: Clone + Send + Sync + 'static> EngineInner<P> {
    fn lock_state(&self) -> Result<MutexGuard<'_, MixerState<P>>, AudioError> {
        self.state.lock().map_err(|_| AudioError::LockPoisoned {
            component: "mixer state".to_string(),
        })
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.events_tx.send(event);
    }

    /// Stop playback and clear all scheduling state.
    ///
    /// # Returns
    /// Whether the engine was running
    fn halt(&self, state: &mut MixerState<P>) -> bool {
        let was_running = state.running;
        state.running = false;
        self.running.store(false, Ordering::SeqCst);
        state.reset(0);

        if let Err(err) = self.device.pause() {
            log_audio_error(&err, "halt");
        }
        self.device.flush();
        self.device.set_next_marker_position(None);
        self.device.set_periodic_notification_period(0);
        was_running
    }

    /// Stop the session after an error inside a device callback
    fn fail(&self, err: AudioError) {
        let was_running = {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.halt(&mut state)
        };
        if was_running {
            log_audio_error(&err, "device callback");
            self.publish(EngineEvent::Error {
                code: err.code(),
                message: err.message(),
            });
        }
    }

    /// How long ago the head crossed `frame`, given it is now at `head`
    fn crossing_time(&self, now: Instant, head: i64, frame: i64) -> Instant {
        let late_frames = (head - frame).max(0);
        let late = Duration::from_secs_f64(late_frames as f64 / self.sample_rate as f64);
        now.checked_sub(late).unwrap_or(now)
    }
}

impl<P: Clone + Send + Sync + 'static> DeviceListener for EngineInner<P> {
    fn on_periodic_tick(&self, device: &dyn OutputDevice) {
        let result = match self.lock_state() {
            Ok(mut state) => {
                if !state.running {
                    return;
                }
                state.tick(device)
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    fn on_marker_reached(&self, device: &dyn OutputDevice) {
        let now = self.time_source.now();
        let fired = match self.lock_state() {
            Ok(mut guard) => {
                let state = &mut *guard;
                if !state.running {
                    return;
                }
                let head = device.playback_head_position() - state.head_origin;
                state.marker_armed = false;

                let mut fired = Vec::new();
                while !state.markers.is_empty() && state.markers.first().frame <= head {
                    let marker = state.markers.pop();
                    if let Some(payload) = marker.payload.take() {
                        fired.push(NoteEvent {
                            payload,
                            playlist_index: marker.playlist_index,
                            frame: marker.frame,
                            firing_time: self.crossing_time(now, head, marker.frame),
                        });
                    }
                }
                if !state.markers.is_empty() {
                    state.arm_marker(device);
                }
                fired
            }
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        for event in fired {
            self.notes.dispatch(event);
        }
    }

    fn on_device_error(&self, _device: &dyn OutputDevice, error: AudioError) {
        if self.running.load(Ordering::SeqCst) {
            self.fail(error);
        }
    }
}

/// Click-accurate metronome engine
///
/// Constructed explicitly around an output device and a sample repository;
/// there is no global instance. Dropping the engine stops it and detaches
/// it from the device.
///
/// # Example
/// ```ignore
/// let device = Arc::new(SimulatedDevice::new(48000, 256, 16384));
/// let samples = Arc::new(InMemorySampleRepository::new(48000));
/// samples.insert_click(1);
/// let engine = MetronomeEngine::new(EngineConfig::default(), device, samples)?;
/// engine.set_playlist(vec![PlaylistItem::new(1, 1.0, 0.5, "tick")])?;
/// engine.start()?;
/// ```
pub struct MetronomeEngine<P: Clone + Send + Sync + 'static> {
    inner: Arc<EngineInner<P>>,
}

impl<P: Clone + Send + Sync + 'static> MetronomeEngine<P> {
    /// Create an engine using the system clock.
    ///
    /// # Errors
    /// - `SampleRateMismatch` if the repository and device rates differ
    /// - `HardwareError` if the notification thread cannot be started
    pub fn new(
        config: EngineConfig,
        device: Arc<dyn OutputDevice>,
        samples: Arc<dyn SampleRepository>,
    ) -> Result<Self, AudioError> {
        Self::with_time_source(config, device, samples, Arc::new(SystemTimeSource::default()))
    }

    /// Create an engine with an explicit time source (tests, offline renders)
    pub fn with_time_source(
        config: EngineConfig,
        device: Arc<dyn OutputDevice>,
        samples: Arc<dyn SampleRepository>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, AudioError> {
        let sample_rate = device.sample_rate();
        if samples.sample_rate() != sample_rate {
            return Err(AudioError::SampleRateMismatch {
                expected: sample_rate,
                actual: samples.sample_rate(),
            });
        }

        let window_size = config
            .audio
            .window_size(sample_rate, device.minimum_buffer_size_frames());
        let scheduling = &config.scheduling;
        let state = MixerState {
            cursor: PlaylistCursor::new(scheduling.marker_anchor),
            markers: RingBuffer::new(scheduling.marker_queue_capacity.max(1)),
            mixer: Mixer::new(window_size, scheduling.track_queue_capacity),
            running: false,
            session: 0,
            head_origin: 0,
            marker_armed: false,
        };
        let notes = NoteDispatcher::new(config.notifications.note_channel_capacity)?;
        let (events_tx, _) = broadcast::channel(config.notifications.event_channel_capacity.max(1));

        let inner = Arc::new(EngineInner {
            config,
            device: Arc::clone(&device),
            samples,
            time_source,
            sample_rate,
            window_size,
            state: Mutex::new(state),
            running: AtomicBool::new(false),
            notes,
            events_tx,
        });
        device.set_listener(Some(inner.clone() as Arc<dyn DeviceListener>));

        tracing::info!(
            "[MetronomeEngine] Created: {} Hz, window {} frames ({:.1} ms)",
            sample_rate,
            window_size,
            window_size as f64 * 1000.0 / sample_rate as f64
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Frames mixed per periodic tick
    pub fn window_size(&self) -> usize {
        self.inner.window_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Replace the looping playlist.
    ///
    /// The whole playlist is validated before anything changes. A playlist
    /// of the same length keeps the cursor's position; already queued tracks
    /// finish with the sound they were scheduled with.
    ///
    /// # Errors
    /// `EmptyPlaylist`, `InvalidPlaylistItem`, `UnknownSound`, or
    /// `LockPoisoned`
    pub fn set_playlist(&self, items: Vec<PlaylistItem<P>>) -> Result<(), AudioError> {
        let scheduled = resolve_playlist(items, &*self.inner.samples, self.inner.sample_rate)?;
        let len = scheduled.len();
        {
            let mut state = self.inner.lock_state()?;
            state.cursor.set_items(scheduled);
        }
        tracing::debug!("[MetronomeEngine] Playlist set ({} items)", len);
        self.inner.publish(EngineEvent::PlaylistChanged { len });
        Ok(())
    }

    pub fn playlist_len(&self) -> usize {
        self.inner
            .lock_state()
            .map(|state| state.cursor.playlist_len())
            .unwrap_or(0)
    }

    /// Start playback from the first playlist item.
    ///
    /// The first beat lands `first_beat_delay_windows` windows after the
    /// start; `prime_windows` windows are mixed and written before the
    /// device starts playing.
    ///
    /// # Errors
    /// - `AlreadyRunning` if started twice
    /// - `EmptyPlaylist` if no playlist was set
    /// - `BufferUnderrun` if the device cannot hold the primed windows
    /// - any device error from `play()`
    pub fn start(&self) -> Result<(), AudioError> {
        let _span = tracing::info_span!("start").entered();
        let inner = &*self.inner;
        let device = &*inner.device;

        let session = {
            let mut guard = inner.lock_state()?;
            let state = &mut *guard;
            if state.running {
                return Err(AudioError::AlreadyRunning);
            }
            if state.cursor.playlist_len() == 0 {
                return Err(AudioError::EmptyPlaylist);
            }

            let first_beat =
                (inner.config.scheduling.first_beat_delay_windows * inner.window_size) as i64;
            state.reset(first_beat);
            state.head_origin = device.playback_head_position();
            device.flush();
            device.set_next_marker_position(None);
            device.set_periodic_notification_period(inner.window_size);

            let primed = (0..inner.config.audio.prime_windows)
                .try_for_each(|_| state.tick(device))
                .and_then(|_| device.play());
            if let Err(err) = primed {
                inner.halt(state);
                log_audio_error(&err, "start");
                return Err(err);
            }

            state.running = true;
            state.session += 1;
            inner.running.store(true, Ordering::SeqCst);
            state.session
        };

        tracing::info!(
            "[MetronomeEngine] Started session {} (window {} frames)",
            session,
            inner.window_size
        );
        inner.publish(EngineEvent::Started {
            session,
            window_size: inner.window_size,
        });
        Ok(())
    }

    /// Stop playback, dropping everything queued.
    ///
    /// # Errors
    /// `NotRunning` if the engine is not playing
    pub fn stop(&self) -> Result<(), AudioError> {
        let _span = tracing::info_span!("stop").entered();
        {
            let mut state = self.inner.lock_state()?;
            if !state.running {
                return Err(AudioError::NotRunning);
            }
            self.inner.halt(&mut state);
        }
        tracing::info!("[MetronomeEngine] Stopped");
        self.inner.publish(EngineEvent::Stopped);
        Ok(())
    }

    /// Align upcoming beats with an external beat grid.
    ///
    /// # Arguments
    /// * `reference` - Instant of a grid point (past or future)
    /// * `beat_duration` - Grid spacing
    ///
    /// # Returns
    /// The new start frame of the next unscheduled item
    ///
    /// # Errors
    /// `InvalidBeatDuration` for a zero duration, `NotRunning` when stopped
    pub fn synchronize_time(
        &self,
        reference: Instant,
        beat_duration: Duration,
    ) -> Result<i64, AudioError> {
        let _span = tracing::info_span!("synchronize_time").entered();
        let inner = &*self.inner;
        let beat = beat_frames(beat_duration, inner.sample_rate)?;

        let next_track_frame = {
            let mut state = inner.lock_state()?;
            if !state.running {
                return Err(AudioError::NotRunning);
            }
            let now = inner.time_source.now();
            let head = inner.device.playback_head_position() - state.head_origin;
            let reference = reference_frame(head, now, reference, inner.sample_rate);
            state.cursor.synchronize(reference, beat)
        };

        tracing::debug!(
            "[MetronomeEngine] Synchronized, next beat at frame {}",
            next_track_frame
        );
        inner.publish(EngineEvent::TempoSynchronized { next_track_frame });
        Ok(next_track_frame)
    }

    /// Register a note listener. See [`NoteDispatcher::register_listener`].
    pub fn register_listener<F>(
        &self,
        delay: Duration,
        executor: Arc<dyn Executor>,
        callback: F,
    ) -> ListenerHandle
    where
        F: Fn(&NoteEvent<P>) + Send + Sync + 'static,
    {
        self.inner.notes.register_listener(delay, executor, callback)
    }

    pub fn unregister_listener(&self, handle: &ListenerHandle) -> bool {
        self.inner.notes.unregister_listener(handle)
    }

    /// Start frame of the next unscheduled item, relative to `start()`
    pub fn next_track_frame(&self) -> Option<i64> {
        self.inner
            .lock_state()
            .ok()
            .map(|state| state.cursor.next_track_frame())
    }

    /// Frames already handed to the mixer, relative to `start()`
    pub fn queued_frames(&self) -> Option<i64> {
        self.inner
            .lock_state()
            .ok()
            .map(|state| state.cursor.queued_frames())
    }

    /// Frames of every marker not yet reached, oldest first
    pub fn pending_marker_frames(&self) -> Vec<i64> {
        self.inner
            .lock_state()
            .map(|state| state.markers.iter().map(|m| m.frame).collect())
            .unwrap_or_default()
    }

    pub fn queued_track_count(&self) -> usize {
        self.inner
            .lock_state()
            .map(|state| state.mixer.tracks().len())
            .unwrap_or(0)
    }
}

impl<P: Clone + Send + Sync + 'static> Drop for MetronomeEngine<P> {
    fn drop(&mut self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.running {
                self.inner.halt(&mut state);
            }
        }
        self.inner.device.set_listener(None);
    }
}
