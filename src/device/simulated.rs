//! Deterministic in-process output device
//!
//! Playback only advances when the owner calls [`SimulatedDevice::advance`],
//! so tests and offline renders control time exactly. Callbacks fire at the
//! precise frame where the period or marker is crossed and run with no
//! device lock held, so listeners may write back into the device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DeviceListener, OutputDevice};
use crate::error::AudioError;

struct SimulatedState {
    fifo: VecDeque<f32>,
    capacity_frames: usize,
    head: i64,
    playing: bool,
    period: usize,
    frames_since_tick: usize,
    marker: Option<i64>,
    played: Vec<f32>,
    underflow_frames: usize,
}

impl SimulatedState {
    fn play_frames(&mut self, frames: usize) {
        for _ in 0..frames {
            let sample = match self.fifo.pop_front() {
                Some(sample) => sample,
                None => {
                    self.underflow_frames += 1;
                    0.0
                }
            };
            self.played.push(sample);
        }
        self.head += frames as i64;
        self.frames_since_tick += frames;
    }
}

/// Output device driven by explicit calls to `advance`
pub struct SimulatedDevice {
    sample_rate: u32,
    min_buffer_frames: usize,
    state: Mutex<SimulatedState>,
    listener: Mutex<Option<Arc<dyn DeviceListener>>>,
}

impl SimulatedDevice {
    /// # Arguments
    /// * `sample_rate` - Reported native rate
    /// * `min_buffer_frames` - Reported minimum buffer size
    /// * `capacity_frames` - How many unplayed frames `write` will hold
    pub fn new(sample_rate: u32, min_buffer_frames: usize, capacity_frames: usize) -> Self {
        Self {
            sample_rate,
            min_buffer_frames,
            state: Mutex::new(SimulatedState {
                fifo: VecDeque::with_capacity(capacity_frames),
                capacity_frames,
                head: 0,
                playing: false,
                period: 0,
                frames_since_tick: 0,
                marker: None,
                played: Vec::new(),
                underflow_frames: 0,
            }),
            listener: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn current_listener(&self) -> Option<Arc<dyn DeviceListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Play up to `frames` frames, firing callbacks along the way.
    ///
    /// Does nothing while paused. Stops early if a callback pauses the
    /// device.
    pub fn advance(&self, frames: usize) {
        let mut remaining = frames;
        loop {
            let (fire_marker, fire_tick) = {
                let mut state = self.state();
                if !state.playing {
                    return;
                }

                let marker_due = state.marker.is_some_and(|m| m <= state.head);
                if !marker_due {
                    if remaining == 0 {
                        return;
                    }
                    let mut step = remaining;
                    if state.period > 0 {
                        step = step.min(state.period.saturating_sub(state.frames_since_tick));
                    }
                    if let Some(marker) = state.marker {
                        step = step.min((marker - state.head) as usize);
                    }
                    state.play_frames(step);
                    remaining -= step;
                }

                let fire_marker = state.marker.is_some_and(|m| m <= state.head);
                if fire_marker {
                    state.marker = None;
                }
                let fire_tick = state.period > 0 && state.frames_since_tick >= state.period;
                if fire_tick {
                    state.frames_since_tick = 0;
                }
                (fire_marker, fire_tick)
            };

            if !(fire_marker || fire_tick) {
                continue;
            }
            if let Some(listener) = self.current_listener() {
                if fire_marker {
                    listener.on_marker_reached(self);
                }
                if fire_tick {
                    listener.on_periodic_tick(self);
                }
            }
        }
    }

    /// Change how many unplayed frames `write` will hold. Frames already
    /// queued beyond the new capacity stay queued.
    pub fn set_capacity_frames(&self, frames: usize) {
        self.state().capacity_frames = frames;
    }

    /// Copy of every frame played so far
    pub fn played(&self) -> Vec<f32> {
        self.state().played.clone()
    }

    /// Drain the played-frames record
    pub fn take_played(&self) -> Vec<f32> {
        std::mem::take(&mut self.state().played)
    }

    /// Frames written but not yet played
    pub fn queued_frames(&self) -> usize {
        self.state().fifo.len()
    }

    /// Frames played as silence because nothing was queued
    pub fn underflow_frames(&self) -> usize {
        self.state().underflow_frames
    }

    pub fn next_marker(&self) -> Option<i64> {
        self.state().marker
    }

    pub fn is_playing(&self) -> bool {
        self.state().playing
    }

    pub fn periodic_notification_period(&self) -> usize {
        self.state().period
    }
}

impl OutputDevice for SimulatedDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn minimum_buffer_size_frames(&self) -> usize {
        self.min_buffer_frames
    }

    fn write(&self, samples: &[f32]) -> Result<usize, AudioError> {
        let mut state = self.state();
        let space = state.capacity_frames.saturating_sub(state.fifo.len());
        let accepted = space.min(samples.len());
        state.fifo.extend(&samples[..accepted]);
        Ok(accepted)
    }

    fn playback_head_position(&self) -> i64 {
        self.state().head
    }

    fn set_periodic_notification_period(&self, frames: usize) {
        let mut state = self.state();
        state.period = frames;
        state.frames_since_tick = 0;
    }

    fn set_next_marker_position(&self, frame: Option<i64>) {
        self.state().marker = frame;
    }

    fn set_listener(&self, listener: Option<Arc<dyn DeviceListener>>) {
        *self.listener.lock().unwrap_or_else(|err| err.into_inner()) = listener;
    }

    fn play(&self) -> Result<(), AudioError> {
        self.state().playing = true;
        Ok(())
    }

    fn pause(&self) -> Result<(), AudioError> {
        self.state().playing = false;
        Ok(())
    }

    fn flush(&self) {
        self.state().fifo.clear();
    }
}
