//! Tempo synchronization - snap the next beat onto an external beat grid
//!
//! An external clock says "a bar started at instant R and beats are D long".
//! The cursor's next start frame is moved to the grid point `R + k·D` (after
//! accounting for the playlist items already played this loop) closest to
//! where it currently is. Frames already handed to the mixer are never
//! rescheduled: a grid point before `queued_frames` is pushed forward by
//! whole beats, keeping the phase.

use std::time::{Duration, Instant};

use super::scheduler::PlaylistCursor;
use crate::error::AudioError;

/// Beat length in frames.
///
/// # Errors
/// `InvalidBeatDuration` for a zero duration
pub fn beat_frames(beat_duration: Duration, sample_rate: u32) -> Result<f64, AudioError> {
    let frames = beat_duration.as_secs_f64() * sample_rate as f64;
    if frames <= 0.0 || !frames.is_finite() {
        return Err(AudioError::InvalidBeatDuration {
            seconds: beat_duration.as_secs_f64(),
        });
    }
    Ok(frames)
}

/// Output frame at which `reference` happens, given the head was at
/// `head_frame` at instant `now`. `reference` may lie in the past or future.
pub fn reference_frame(head_frame: i64, now: Instant, reference: Instant, sample_rate: u32) -> f64 {
    let offset_seconds = if reference >= now {
        (reference - now).as_secs_f64()
    } else {
        -(now - reference).as_secs_f64()
    };
    head_frame as f64 + offset_seconds * sample_rate as f64
}

impl<P: Clone> PlaylistCursor<P> {
    /// Re-anchor the next start frame onto the grid `reference_frame + k·beat_frames`.
    ///
    /// Calling it twice with the same arguments leaves the cursor unchanged
    /// the second time.
    ///
    /// # Returns
    /// The new `next_track_frame`
    pub fn synchronize(&mut self, reference_frame: f64, beat_frames: f64) -> i64 {
        // Past the last item the upcoming beat is item 0 of the next loop
        let played = match self.next_playlist_index() {
            index if index >= self.playlist_len() => 0,
            index => index,
        };
        let elapsed: f64 = self.items()[..played]
            .iter()
            .map(|item| item.duration_frames)
            .sum();
        let anchor = reference_frame + elapsed;

        let next = self.next_track_position();
        let k = ((next - anchor) / beat_frames).round();
        let mut candidate = anchor + k * beat_frames;

        let floor = self.queued_frames() as f64;
        if candidate < floor {
            let steps = ((floor - candidate) / beat_frames).ceil();
            candidate += steps * beat_frames;
        }

        self.set_next_track_position(candidate);
        self.next_track_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring_buffer::RingBuffer;
    use crate::audio::samples::InMemorySampleRepository;
    use crate::engine::playlist::{resolve_playlist, PlaylistItem};
    use crate::engine::scheduler::{Marker, MarkerAnchor, QueuedTrack};

    const RATE: u32 = 1000;

    fn cursor(beats: usize, seconds: f64) -> PlaylistCursor<usize> {
        let repo = InMemorySampleRepository::new(RATE);
        repo.insert(1, vec![1.0; 10]);
        let items = (0..beats)
            .map(|i| PlaylistItem::new(1, 1.0, seconds, i))
            .collect();
        let mut cursor = PlaylistCursor::new(MarkerAnchor::BeatStart);
        cursor.set_items(resolve_playlist(items, &repo, RATE).unwrap());
        cursor
    }

    fn run_ticks(cursor: &mut PlaylistCursor<usize>, ticks: usize, window: usize) {
        let mut tracks = RingBuffer::<QueuedTrack>::new(8);
        let mut markers = RingBuffer::<Marker<usize>>::new(8);
        for _ in 0..ticks {
            cursor.queue_next_tracks(window, &mut tracks, &mut markers);
        }
    }

    #[test]
    fn test_beat_frames_rejects_zero() {
        assert_eq!(beat_frames(Duration::from_millis(500), 48000), Ok(24000.0));
        assert!(matches!(
            beat_frames(Duration::ZERO, 48000),
            Err(AudioError::InvalidBeatDuration { .. })
        ));
    }

    #[test]
    fn test_reference_frame_past_and_future() {
        let now = Instant::now();
        let future = now + Duration::from_millis(100);
        assert_eq!(reference_frame(500, now, future, RATE), 600.0);

        let later_now = now + Duration::from_millis(300);
        assert_eq!(reference_frame(500, later_now, now, RATE), 200.0);
    }

    #[test]
    fn test_snaps_to_nearest_grid_point() {
        // One 500-frame beat, cursor at 1000 after reset
        let mut cursor = cursor(1, 0.5);
        cursor.reset(1000);

        // Grid at 120 + k·500: nearest to 1000 is 1120
        assert_eq!(cursor.synchronize(120.0, 500.0), 1120);
        // Grid at 380 + k·500: nearest to 1120 is 880
        assert_eq!(cursor.synchronize(380.0, 500.0), 880);
    }

    #[test]
    fn test_synchronize_is_idempotent() {
        let mut cursor = cursor(4, 0.25);
        cursor.reset(100);
        run_ticks(&mut cursor, 3, 128);

        let first = cursor.synchronize(37.5, 250.0);
        let second = cursor.synchronize(37.5, 250.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_accounts_for_items_already_played() {
        // Two 300-frame items; after one is scheduled the next should sit one
        // item after the reference
        let mut cursor = cursor(2, 0.3);
        cursor.reset(0);
        run_ticks(&mut cursor, 1, 100);
        assert_eq!(cursor.next_playlist_index(), 1);

        assert_eq!(cursor.synchronize(50.0, 300.0), 350);
    }

    #[test]
    fn test_wrapped_cursor_uses_reference_as_is() {
        // Single 500-frame item: after one tick the index sits past the end
        // and the upcoming beat is item 0 again
        let mut cursor = cursor(1, 0.5);
        cursor.reset(0);
        run_ticks(&mut cursor, 1, 100);
        assert_eq!(cursor.next_playlist_index(), cursor.playlist_len());
        assert_eq!(cursor.next_track_frame(), 500);

        // Grid 0 + k·300: nearest to 500 is 600
        assert_eq!(cursor.synchronize(0.0, 300.0), 600);
    }

    #[test]
    fn test_wrapped_cursor_in_longer_playlist() {
        // Three 300-frame items, all scheduled once: next is item 0 at 900
        let mut cursor = cursor(3, 0.3);
        cursor.reset(0);
        run_ticks(&mut cursor, 1, 700);
        assert_eq!(cursor.next_playlist_index(), 3);
        assert_eq!(cursor.next_track_frame(), 900);

        // Grid 50 + k·400: nearest to 900 is 850, not shifted by the loop
        assert_eq!(cursor.synchronize(50.0, 400.0), 850);
    }

    #[test]
    fn test_never_moves_before_queued_frames() {
        let mut cursor = cursor(1, 0.5);
        cursor.reset(0);
        run_ticks(&mut cursor, 2, 400);
        assert_eq!(cursor.queued_frames(), 800);
        assert_eq!(cursor.next_track_frame(), 1000);

        // Nearest grid point to 1000 on 10 + k·500 is 1010, fine
        assert_eq!(cursor.synchronize(10.0, 500.0), 1010);

        // Nearest to 1010 on 300 + k·500 is 800, still allowed
        assert_eq!(cursor.synchronize(300.0, 500.0), 800);

        // Nearest to 800 on 290 + k·500 is 790, before the queued horizon;
        // pushed forward one whole beat
        assert_eq!(cursor.synchronize(290.0, 500.0), 1290);
        assert!(cursor.next_track_frame() >= cursor.queued_frames());
    }
}
