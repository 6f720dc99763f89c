// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes carried by [`AudioError`]
/// and by `EngineEvent::Error`.
///
/// Error code range: 1001-1014
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Engine is already running
    pub const ALREADY_RUNNING: i32 = 1001;

    /// Engine is not running
    pub const NOT_RUNNING: i32 = 1002;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1003;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1004;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1005;

    /// Device accepted fewer frames than one full window
    pub const BUFFER_UNDERRUN: i32 = 1006;

    /// Playlist must contain at least one item
    pub const EMPTY_PLAYLIST: i32 = 1007;

    /// Playlist item failed validation
    pub const INVALID_PLAYLIST_ITEM: i32 = 1008;

    /// Sound id has no samples in the repository
    pub const UNKNOWN_SOUND: i32 = 1009;

    /// Sample file could not be decoded
    pub const SAMPLE_LOAD_FAILED: i32 = 1010;

    /// Sample data does not match the engine sample rate
    pub const SAMPLE_RATE_MISMATCH: i32 = 1011;

    /// Beat duration must be positive and finite
    pub const INVALID_BEAT_DURATION: i32 = 1012;

    /// Realtime callback ran out of queued frames while playing
    pub const PLAYBACK_STARVED: i32 = 1013;

    /// Realtime callback could not queue a device event
    pub const DEVICE_EVENTS_DROPPED: i32 = 1014;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=MetronomeEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover device acquisition, playlist validation, sample
/// loading and the realtime mixing path.
///
/// Error code ranges: 1001-1014
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Engine is already running
    AlreadyRunning,

    /// Engine is not running
    NotRunning,

    /// Hardware error occurred
    HardwareError { details: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Non-blocking write accepted fewer frames than supplied
    BufferUnderrun { requested: usize, written: usize },

    /// Playlist must contain at least one item
    EmptyPlaylist,

    /// Playlist item failed validation
    InvalidPlaylistItem { index: usize, reason: String },

    /// Sound id is not present in the sample repository
    UnknownSound { sound_id: u32 },

    /// Sample file could not be read or decoded
    SampleLoadFailed { path: String, reason: String },

    /// Sample data was recorded at a different rate than the engine runs at
    SampleRateMismatch { expected: u32, actual: u32 },

    /// Beat duration passed to tempo synchronization was not positive
    InvalidBeatDuration { seconds: f64 },

    /// Output callback needed more frames than were queued
    PlaybackStarved { missing_frames: usize },

    /// Tick or marker events lost because the event queue was full
    DeviceEventsDropped { count: usize },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::BufferUnderrun { .. } => AudioErrorCodes::BUFFER_UNDERRUN,
            AudioError::EmptyPlaylist => AudioErrorCodes::EMPTY_PLAYLIST,
            AudioError::InvalidPlaylistItem { .. } => AudioErrorCodes::INVALID_PLAYLIST_ITEM,
            AudioError::UnknownSound { .. } => AudioErrorCodes::UNKNOWN_SOUND,
            AudioError::SampleLoadFailed { .. } => AudioErrorCodes::SAMPLE_LOAD_FAILED,
            AudioError::SampleRateMismatch { .. } => AudioErrorCodes::SAMPLE_RATE_MISMATCH,
            AudioError::InvalidBeatDuration { .. } => AudioErrorCodes::INVALID_BEAT_DURATION,
            AudioError::PlaybackStarved { .. } => AudioErrorCodes::PLAYBACK_STARVED,
            AudioError::DeviceEventsDropped { .. } => AudioErrorCodes::DEVICE_EVENTS_DROPPED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::AlreadyRunning => {
                "Metronome already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Metronome not running. Call start() first.".to_string(),
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::BufferUnderrun { requested, written } => {
                format!(
                    "Buffer underrun: device accepted {} of {} frames",
                    written, requested
                )
            }
            AudioError::EmptyPlaylist => "Playlist must contain at least one item".to_string(),
            AudioError::InvalidPlaylistItem { index, reason } => {
                format!("Invalid playlist item {}: {}", index, reason)
            }
            AudioError::UnknownSound { sound_id } => {
                format!("No samples loaded for sound {}", sound_id)
            }
            AudioError::SampleLoadFailed { path, reason } => {
                format!("Failed to load samples from {}: {}", path, reason)
            }
            AudioError::SampleRateMismatch { expected, actual } => {
                format!(
                    "Sample rate mismatch: engine runs at {} Hz, samples are {} Hz",
                    expected, actual
                )
            }
            AudioError::InvalidBeatDuration { seconds } => {
                format!("Beat duration must be positive (got {}s)", seconds)
            }
            AudioError::PlaybackStarved { missing_frames } => {
                format!("Playback starved: {} frames played as silence", missing_frames)
            }
            AudioError::DeviceEventsDropped { count } => {
                format!("Device event queue overflowed: {} events dropped", count)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
