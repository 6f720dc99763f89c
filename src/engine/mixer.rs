//! Mixer - sums queued tracks into one window and hands it to the device
//!
//! Tracks are mixed in queue order and retired from the front only, so a
//! short track queued after a long one stays queued (contributing nothing)
//! until the long one is done.

use super::scheduler::QueuedTrack;
use crate::audio::ring_buffer::RingBuffer;
use crate::device::OutputDevice;
use crate::error::AudioError;

pub struct Mixer {
    tracks: RingBuffer<QueuedTrack>,
    mix_buffer: Vec<f32>,
}

impl Mixer {
    /// # Arguments
    /// * `window_size` - Frames mixed per periodic tick
    /// * `track_capacity` - Initial track queue capacity (grows on demand)
    pub fn new(window_size: usize, track_capacity: usize) -> Self {
        Self {
            tracks: RingBuffer::new(track_capacity.max(1)),
            mix_buffer: vec![0.0; window_size],
        }
    }

    pub fn window_size(&self) -> usize {
        self.mix_buffer.len()
    }

    pub fn tracks(&self) -> &RingBuffer<QueuedTrack> {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut RingBuffer<QueuedTrack> {
        &mut self.tracks
    }

    /// Drop every queued track
    pub fn clear(&mut self) {
        for track in self.tracks.iter_mut() {
            track.samples = None;
        }
        self.tracks.clear();
        self.mix_buffer.fill(0.0);
    }

    /// Mix the next window from every queued track and retire finished
    /// tracks from the front of the queue.
    ///
    /// # Returns
    /// The mixed window
    pub fn mix_queued_tracks(&mut self) -> &[f32] {
        self.mix_buffer.fill(0.0);
        let window = self.mix_buffer.len();

        for track in self.tracks.iter_mut() {
            let Some(samples) = track.samples.as_deref() else {
                continue;
            };
            let delay = track.start_delay_frames.min(window);
            let remaining = samples.len().saturating_sub(track.cursor_offset);
            let count = remaining.min(window - delay);

            let source = &samples[track.cursor_offset..track.cursor_offset + count];
            for (out, &sample) in self.mix_buffer[delay..delay + count].iter_mut().zip(source) {
                *out += track.volume * sample;
            }

            track.start_delay_frames = track.start_delay_frames.saturating_sub(window);
            track.cursor_offset += count;
        }

        while !self.tracks.is_empty() && self.tracks.first().is_exhausted() {
            self.tracks.pop().samples = None;
        }

        &self.mix_buffer
    }

    /// Mix the next window and write it to `device` without blocking.
    ///
    /// # Errors
    /// - `BufferUnderrun` if the device accepts fewer frames than the window
    /// - any error the device reports
    pub fn mix_and_play_queued_tracks(&mut self, device: &dyn OutputDevice) -> Result<(), AudioError> {
        let window = self.mix_queued_tracks();
        let written = device.write(window)?;
        if written < window.len() {
            return Err(AudioError::BufferUnderrun {
                requested: window.len(),
                written,
            });
        }
        Ok(())
    }
}
