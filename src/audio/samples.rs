//! Sample repository - sound id to pre-decoded mono PCM
//!
//! The engine never decodes audio itself. Playlists reference sounds by id
//! and are only accepted once every id resolves through a
//! [`SampleRepository`]. Resolved buffers are shared `Arc<[f32]>` slices, so
//! queueing a track on the audio path is a reference-count increment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use log::info;

use super::click::{generate_beep, generate_click_sample};
use crate::error::AudioError;

/// Identifier of a sound in the repository
pub type SoundId = u32;

/// Source of decoded sample data, at the engine's native sample rate
pub trait SampleRepository: Send + Sync {
    /// Sample rate every buffer in this repository is recorded at
    fn sample_rate(&self) -> u32;

    /// Mono samples for `sound_id`, if loaded
    fn samples(&self, sound_id: SoundId) -> Option<Arc<[f32]>>;
}

/// Thread-safe in-memory repository
///
/// Writers (loading, replacing sounds) take a short write lock; the engine
/// only reads when a playlist is accepted, never from the mixing path.
pub struct InMemorySampleRepository {
    sample_rate: u32,
    sounds: RwLock<HashMap<SoundId, Arc<[f32]>>>,
}

impl InMemorySampleRepository {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            sounds: RwLock::new(HashMap::new()),
        }
    }

    /// Store (or replace) the samples for `sound_id`
    pub fn insert(&self, sound_id: SoundId, samples: Vec<f32>) {
        let samples: Arc<[f32]> = samples.into();
        let mut sounds = self
            .sounds
            .write()
            .unwrap_or_else(|err| err.into_inner());
        sounds.insert(sound_id, samples);
    }

    /// Store the built-in noise click under `sound_id`
    pub fn insert_click(&self, sound_id: SoundId) {
        self.insert(sound_id, generate_click_sample(self.sample_rate));
    }

    /// Store a synthesized decaying sine beep under `sound_id`
    pub fn insert_beep(&self, sound_id: SoundId, frequency_hz: f32, duration_ms: f32) {
        self.insert(
            sound_id,
            generate_beep(self.sample_rate, frequency_hz, duration_ms),
        );
    }

    /// Decode a WAV file into `sound_id`.
    ///
    /// Only the first channel is kept and integer formats are scaled to
    /// [-1.0, 1.0]. No resampling is done: files at another rate are rejected.
    ///
    /// # Returns
    /// Number of frames loaded
    ///
    /// # Errors
    /// - `SampleLoadFailed` if the file cannot be opened or decoded
    /// - `SampleRateMismatch` if the file's rate differs from the repository's
    pub fn load_wav<P: AsRef<Path>>(&self, sound_id: SoundId, path: P) -> Result<usize, AudioError> {
        let path = path.as_ref();
        let load_failed = |reason: String| AudioError::SampleLoadFailed {
            path: path.display().to_string(),
            reason,
        };

        let reader = hound::WavReader::open(path).map_err(|e| load_failed(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_rate != self.sample_rate {
            return Err(AudioError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: spec.sample_rate,
            });
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| load_failed(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| load_failed(e.to_string()))?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let mono: Vec<f32> = interleaved.chunks(channels).map(|frame| frame[0]).collect();
        let frames = mono.len();

        info!(
            "[Samples] Loaded sound {} from {:?} ({} frames, {} channel(s))",
            sound_id, path, frames, channels
        );
        self.insert(sound_id, mono);
        Ok(frames)
    }

    pub fn remove(&self, sound_id: SoundId) -> bool {
        self.sounds
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&sound_id)
            .is_some()
    }

    pub fn contains(&self, sound_id: SoundId) -> bool {
        self.sounds
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .contains_key(&sound_id)
    }
}

impl SampleRepository for InMemorySampleRepository {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn samples(&self, sound_id: SoundId) -> Option<Arc<[f32]>> {
        self.sounds
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(&sound_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "metronome_engine_{}_{}.wav",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_insert_and_lookup() {
        let repo = InMemorySampleRepository::new(48000);
        repo.insert(1, vec![0.5, -0.5]);

        let samples = repo.samples(1).expect("sound 1 should be loaded");
        assert_eq!(&samples[..], &[0.5, -0.5]);
        assert!(repo.samples(2).is_none());
        assert!(repo.contains(1));
        assert!(repo.remove(1));
        assert!(!repo.contains(1));
    }

    #[test]
    fn test_builtin_sounds() {
        let repo = InMemorySampleRepository::new(48000);
        repo.insert_click(1);
        repo.insert_beep(2, 1000.0, 30.0);

        assert_eq!(repo.samples(1).unwrap().len(), 960);
        assert_eq!(repo.samples(2).unwrap().len(), 1440);
    }

    #[test]
    fn test_load_wav_takes_first_channel() {
        let path = temp_wav("stereo");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for (left, right) in [(16384_i16, -1_i16), (-16384, -1), (0, -1)] {
                writer.write_sample(left).unwrap();
                writer.write_sample(right).unwrap();
            }
            writer.finalize().unwrap();
        }

        let repo = InMemorySampleRepository::new(48000);
        let frames = repo.load_wav(7, &path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(frames, 3);
        let samples = repo.samples(7).unwrap();
        assert_eq!(&samples[..], &[0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_load_wav_rejects_other_sample_rate() {
        let path = temp_wav("rate");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            writer.write_sample(0.25_f32).unwrap();
            writer.finalize().unwrap();
        }

        let repo = InMemorySampleRepository::new(48000);
        let result = repo.load_wav(1, &path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(
            result,
            Err(AudioError::SampleRateMismatch {
                expected: 48000,
                actual: 44100
            })
        );
        assert!(!repo.contains(1));
    }

    #[test]
    fn test_load_wav_missing_file() {
        let repo = InMemorySampleRepository::new(48000);
        let result = repo.load_wav(1, "/nonexistent/click.wav");
        assert!(matches!(result, Err(AudioError::SampleLoadFailed { .. })));
    }
}
