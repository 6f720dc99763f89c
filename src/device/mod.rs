//! Output devices - where mixed windows go and where timing comes from
//!
//! The engine never runs its own clock. An [`OutputDevice`] accepts mono
//! frames through a non-blocking `write`, reports how far playback has
//! progressed, and calls its [`DeviceListener`] back:
//! - every `period` played frames (periodic tick)
//! - once when the playback head reaches the armed marker frame
//!
//! Callbacks receive the device itself so listeners do not need to hold a
//! reference to it.

use std::sync::Arc;

use crate::error::AudioError;

mod simulated;
mod stream_core;

pub use simulated::SimulatedDevice;
pub use stream_core::{Notifier, RenderContext, StreamCore};

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        mod oboe;
        pub use self::oboe::OboeDevice;
    } else {
        mod cpal;
        pub use self::cpal::CpalDevice;
    }
}

/// Receiver of device timing callbacks
pub trait DeviceListener: Send + Sync {
    /// Called every `period` frames of playback
    fn on_periodic_tick(&self, device: &dyn OutputDevice);

    /// Called once when the playback head reaches the armed marker
    fn on_marker_reached(&self, device: &dyn OutputDevice);

    /// Called when the device could not keep up: it played silence it was
    /// never given, or lost callbacks. Timing can no longer be trusted.
    fn on_device_error(&self, _device: &dyn OutputDevice, _error: AudioError) {}
}

/// Mono audio sink with playback-driven callbacks
pub trait OutputDevice: Send + Sync {
    /// Native sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Smallest write window the device can sustain without glitches
    fn minimum_buffer_size_frames(&self) -> usize;

    /// Queue frames for playback without blocking.
    ///
    /// # Returns
    /// Number of frames accepted, which may be fewer than offered when the
    /// device buffer is full
    fn write(&self, samples: &[f32]) -> Result<usize, AudioError>;

    /// Frames played since the device was created
    fn playback_head_position(&self) -> i64;

    /// Set the periodic callback period in frames (0 disables it)
    fn set_periodic_notification_period(&self, frames: usize);

    /// Arm the marker callback at an absolute head position, or disarm it.
    /// A marker at or before the current head fires on the next update.
    fn set_next_marker_position(&self, frame: Option<i64>);

    fn set_listener(&self, listener: Option<Arc<dyn DeviceListener>>);

    fn play(&self) -> Result<(), AudioError>;

    fn pause(&self) -> Result<(), AudioError>;

    /// Drop every queued frame not yet played
    fn flush(&self);
}

/// Reject a hardware stream that opened at a rate other than the one asked for
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn check_stream_rate(requested: u32, actual: u32) -> Result<(), AudioError> {
    if requested != actual {
        return Err(AudioError::SampleRateMismatch {
            expected: requested,
            actual,
        });
    }
    Ok(())
}

/// Create the platform's default output device
pub fn default_output_device(
    sample_rate: u32,
    buffer_frames: usize,
) -> Result<Arc<dyn OutputDevice>, AudioError> {
    #[cfg(target_os = "android")]
    let device = OboeDevice::open(sample_rate, buffer_frames)?;
    #[cfg(not(target_os = "android"))]
    let device = CpalDevice::open(sample_rate, buffer_frames)?;

    Ok(Arc::new(device))
}
