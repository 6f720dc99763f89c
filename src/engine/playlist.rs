//! Playlist items and their validated, sample-resolved form.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::click::frames_for_duration;
use crate::audio::samples::{SampleRepository, SoundId};
use crate::error::AudioError;

/// One beat of the looping pattern
///
/// `payload` is opaque to the engine and is handed back untouched in the
/// note event fired for this item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem<P> {
    /// Sound to play at the start of the beat
    pub sound_id: SoundId,
    /// Linear gain in [0.0, 1.0]
    pub volume: f32,
    /// Time until the next item starts
    pub duration_seconds: f64,
    /// Caller data identifying the logical note
    pub payload: P,
}

impl<P> PlaylistItem<P> {
    pub fn new(sound_id: SoundId, volume: f32, duration_seconds: f64, payload: P) -> Self {
        Self {
            sound_id,
            volume,
            duration_seconds,
            payload,
        }
    }

    fn validate(&self, index: usize, sample_rate: u32) -> Result<(), AudioError> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(AudioError::InvalidPlaylistItem {
                index,
                reason: format!("volume {} outside [0, 1]", self.volume),
            });
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(AudioError::InvalidPlaylistItem {
                index,
                reason: format!("duration {}s must be positive", self.duration_seconds),
            });
        }
        // Every beat must advance the cursor by at least one frame
        if frames_for_duration(self.duration_seconds, sample_rate) < 1.0 {
            return Err(AudioError::InvalidPlaylistItem {
                index,
                reason: format!(
                    "duration {}s is shorter than one frame at {} Hz",
                    self.duration_seconds, sample_rate
                ),
            });
        }
        Ok(())
    }
}

/// Playlist item with its sample data resolved and duration in frames
#[derive(Clone)]
pub(crate) struct ScheduledItem<P> {
    pub item: PlaylistItem<P>,
    pub samples: Arc<[f32]>,
    pub duration_frames: f64,
}

/// Validate every item and resolve its samples.
///
/// Nothing is accepted unless the whole playlist is valid.
pub(crate) fn resolve_playlist<P>(
    items: Vec<PlaylistItem<P>>,
    repository: &dyn SampleRepository,
    sample_rate: u32,
) -> Result<Vec<ScheduledItem<P>>, AudioError> {
    if items.is_empty() {
        return Err(AudioError::EmptyPlaylist);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.validate(index, sample_rate)?;
            let samples = repository
                .samples(item.sound_id)
                .ok_or(AudioError::UnknownSound {
                    sound_id: item.sound_id,
                })?;
            let duration_frames = frames_for_duration(item.duration_seconds, sample_rate);
            Ok(ScheduledItem {
                item,
                samples,
                duration_frames,
            })
        })
        .collect()
}
