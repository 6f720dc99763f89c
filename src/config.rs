//! Configuration management for the metronome engine
//!
//! This module provides runtime configuration loading from JSON files, so
//! latency targets and queue sizes can be tuned per device without
//! recompilation. Missing or unreadable files fall back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::engine::MarkerAnchor;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Output stream parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Native output sample rate in Hz
    pub sample_rate: u32,
    /// Target latency; the mixing window is this long unless the device
    /// needs more
    pub max_latency_ms: f64,
    /// Windows mixed and written synchronously by `start()` before playback
    pub prime_windows: usize,
    /// Device FIFO capacity, in windows
    pub buffer_windows: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_latency_ms: 85.0,
            prime_windows: 2,
            buffer_windows: 4,
        }
    }
}

impl AudioConfig {
    /// Frames mixed per periodic tick for a device running at
    /// `device_sample_rate` whose minimum buffer is `min_buffer_frames`
    pub fn window_size(&self, device_sample_rate: u32, min_buffer_frames: usize) -> usize {
        let latency_frames = (self.max_latency_ms * device_sample_rate as f64 / 1000.0).round();
        let latency_frames = if latency_frames.is_finite() && latency_frames > 0.0 {
            latency_frames as usize
        } else {
            0
        };
        latency_frames.max(min_buffer_frames).max(1)
    }
}

/// Playlist scheduling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Whole windows of silence before the first beat after `start()`
    pub first_beat_delay_windows: usize,
    /// Where each note's marker sits within its beat
    pub marker_anchor: MarkerAnchor,
    /// Initial track queue capacity (grows on demand)
    pub track_queue_capacity: usize,
    /// Initial marker queue capacity (grows on demand)
    pub marker_queue_capacity: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            first_beat_delay_windows: 1,
            marker_anchor: MarkerAnchor::BeatEnd,
            track_queue_capacity: 16,
            marker_queue_capacity: 16,
        }
    }
}

/// Broadcast channel sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub event_channel_capacity: usize,
    pub note_channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 128,
            note_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or its
    /// JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load the configuration bundled with the app
    #[cfg(not(target_os = "android"))]
    pub fn load() -> Self {
        Self::load_from_file("assets/metronome_config.json")
    }

    /// Android has no readable assets directory from native code; defaults
    /// apply
    #[cfg(target_os = "android")]
    pub fn load() -> Self {
        log::info!("[Config] Using default configuration on Android");
        Self::default()
    }
}
