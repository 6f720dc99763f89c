//! Click - built-in metronome sounds and frame arithmetic
//!
//! This module provides the synthesized sounds the engine ships with and the
//! conversions between musical time and output frames.
//! Key features:
//! - 20ms white noise burst click (deterministic, fixed seed)
//! - Exponentially decaying sine beep for accents
//! - Exact (fractional) frame math so long sessions never drift

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Duration of metronome click in milliseconds
pub const CLICK_DURATION_MS: f32 = 20.0;

/// Generates a metronome click sample (20ms white noise burst).
///
/// The noise is generated using a fixed seed to ensure identical output
/// across calls, with a short linear fade-out to avoid a hard edge.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 48000)
///
/// # Returns
/// A `Vec<f32>` containing exactly 20ms worth of samples in range [-1.0, 1.0]
pub fn generate_click_sample(sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;

    let mut rng = StdRng::seed_from_u64(42);

    let mut samples = Vec::with_capacity(num_samples);
    for i in 0..num_samples {
        let fade = 1.0 - i as f32 / num_samples as f32;
        samples.push(rng.gen_range(-1.0..1.0) * fade);
    }

    samples
}

/// Generates a decaying sine beep.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz
/// * `frequency_hz` - Pitch of the beep
/// * `duration_ms` - Length of the generated buffer
pub fn generate_beep(sample_rate: u32, frequency_hz: f32, duration_ms: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_ms / 1000.0) as usize;
    // Decays to ~1% by the end of the buffer
    let decay = 4.6 / num_samples.max(1) as f32;
    let step = std::f32::consts::TAU * frequency_hz / sample_rate as f32;

    (0..num_samples)
        .map(|i| (step * i as f32).sin() * (-decay * i as f32).exp())
        .collect()
}

/// Exact number of frames covered by `seconds` at `sample_rate`.
///
/// Kept fractional; callers round the running position, never each
/// individual duration.
#[inline]
pub fn frames_for_duration(seconds: f64, sample_rate: u32) -> f64 {
    seconds * sample_rate as f64
}

/// Beat period for a tempo in beats per minute.
///
/// # Examples
/// ```
/// use metronome_engine::audio::click::beat_duration_for_bpm;
/// assert_eq!(beat_duration_for_bpm(120.0).as_millis(), 500);
/// ```
#[inline]
pub fn beat_duration_for_bpm(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / bpm)
}
