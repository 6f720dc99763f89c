//! Scheduler - looping playlist cursor feeding the track and marker queues
//!
//! The cursor walks the playlist one window ahead of the mixer. Every
//! periodic tick it schedules each item whose start frame falls inside the
//! upcoming window (inclusive of the window's end frame, so a beat landing
//! exactly on the next window boundary is queued one tick early with a full
//! window of start delay).
//!
//! Frame positions are absolute output frames since `start()`. The running
//! start position is kept fractional and rounded only when read, so
//! non-integer beat lengths (e.g. 137 BPM) never accumulate drift.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::playlist::ScheduledItem;
use crate::audio::ring_buffer::RingBuffer;
use crate::audio::samples::SoundId;

/// Where a note's marker sits relative to its beat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAnchor {
    /// Marker at the first frame of the beat
    BeatStart,
    /// Marker at the first frame after the beat's duration
    #[default]
    BeatEnd,
}

/// A sample currently being mixed, with its own playback progress
#[derive(Debug, Clone, Default)]
pub struct QueuedTrack {
    pub sound_id: SoundId,
    /// Sample data; `None` only for never-used slots
    pub samples: Option<Arc<[f32]>>,
    /// Next sample index to mix
    pub cursor_offset: usize,
    /// Frames into the next window before this track begins
    pub start_delay_frames: usize,
    pub volume: f32,
}

impl QueuedTrack {
    pub fn sample_len(&self) -> usize {
        self.samples.as_ref().map_or(0, |s| s.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor_offset >= self.sample_len()
    }
}

/// Frame at which a "note started" notification fires
#[derive(Debug, Clone)]
pub struct Marker<P> {
    /// Absolute frame in the output stream
    pub frame: i64,
    /// Index of the playlist item that produced this marker
    pub playlist_index: usize,
    /// Item payload; `None` only for never-used slots
    pub payload: Option<P>,
}

impl<P> Default for Marker<P> {
    fn default() -> Self {
        Self {
            frame: 0,
            playlist_index: 0,
            payload: None,
        }
    }
}

/// Looping playlist plus the frame bookkeeping of what has been scheduled
pub struct PlaylistCursor<P> {
    items: Vec<ScheduledItem<P>>,
    next_playlist_index: usize,
    next_track_position: f64,
    queued_frames: i64,
    marker_anchor: MarkerAnchor,
}

impl<P: Clone> PlaylistCursor<P> {
    pub fn new(marker_anchor: MarkerAnchor) -> Self {
        Self {
            items: Vec::new(),
            next_playlist_index: 0,
            next_track_position: 0.0,
            queued_frames: 0,
            marker_anchor,
        }
    }

    pub fn playlist_len(&self) -> usize {
        self.items.len()
    }

    /// Index of the next item to schedule (may equal `playlist_len()` until
    /// the next schedule wraps it)
    pub fn next_playlist_index(&self) -> usize {
        self.next_playlist_index
    }

    /// Absolute frame at which the next item starts
    pub fn next_track_frame(&self) -> i64 {
        self.next_track_position.round() as i64
    }

    /// Absolute frame count already handed to the track/marker queues
    pub fn queued_frames(&self) -> i64 {
        self.queued_frames
    }

    pub fn marker_anchor(&self) -> MarkerAnchor {
        self.marker_anchor
    }

    pub(crate) fn items(&self) -> &[ScheduledItem<P>] {
        &self.items
    }

    pub(crate) fn next_track_position(&self) -> f64 {
        self.next_track_position
    }

    pub(crate) fn set_next_track_position(&mut self, position: f64) {
        self.next_track_position = position;
    }

    /// Rewind to the beginning of the playlist with the first beat at
    /// `first_beat_frame`.
    pub fn reset(&mut self, first_beat_frame: i64) {
        self.next_playlist_index = 0;
        self.next_track_position = first_beat_frame as f64;
        self.queued_frames = 0;
    }

    /// Install a new playlist.
    ///
    /// A playlist of the same length is updated item by item and keeps the
    /// cursor where it is; a different length replaces the backing vector and
    /// lets the next schedule wrap the index if it ran past the end.
    pub(crate) fn set_items(&mut self, items: Vec<ScheduledItem<P>>) {
        if items.len() == self.items.len() {
            for (slot, item) in self.items.iter_mut().zip(items) {
                *slot = item;
            }
        } else {
            self.items = items;
        }
    }

    /// Schedule every item starting inside the upcoming window.
    ///
    /// Appends one track and one marker per item, then advances
    /// `queued_frames` by `window_size`. Must run exactly once per periodic
    /// tick.
    ///
    /// # Returns
    /// Number of items scheduled
    pub fn queue_next_tracks(
        &mut self,
        window_size: usize,
        tracks: &mut RingBuffer<QueuedTrack>,
        markers: &mut RingBuffer<Marker<P>>,
    ) -> usize {
        let horizon = self.queued_frames + window_size as i64;
        let mut scheduled = 0;

        while !self.items.is_empty() && self.next_track_position.round() as i64 <= horizon {
            if self.next_playlist_index >= self.items.len() {
                self.next_playlist_index = 0;
            }
            let index = self.next_playlist_index;
            let item = &self.items[index];

            let start_frame = self.next_track_position.round() as i64;
            self.next_track_position += item.duration_frames;
            let end_frame = self.next_track_position.round() as i64;

            let track = tracks.add();
            track.sound_id = item.item.sound_id;
            track.samples = Some(Arc::clone(&item.samples));
            track.cursor_offset = 0;
            track.start_delay_frames = (start_frame - self.queued_frames).max(0) as usize;
            track.volume = item.item.volume;

            let marker = markers.add();
            marker.frame = match self.marker_anchor {
                MarkerAnchor::BeatStart => start_frame,
                MarkerAnchor::BeatEnd => end_frame,
            };
            marker.playlist_index = index;
            marker.payload = Some(item.item.payload.clone());

            self.next_playlist_index += 1;
            scheduled += 1;
        }

        self.queued_frames = horizon;
        scheduled
    }
}
