//! Android output device on top of Oboe (AAudio / OpenSL ES)

use std::sync::{Arc, Mutex};

use log::{info, warn};
use oboe::{
    AudioOutputCallback, AudioOutputStreamSafe, AudioStream, AudioStreamAsync, AudioStreamBase,
    AudioStreamBuilder, DataCallbackResult, Output, PerformanceMode, SharingMode,
};

use super::stream_core::{Notifier, RenderContext, StreamCore};
use super::{check_stream_rate, DeviceListener, OutputDevice};
use crate::error::AudioError;

/// Oboe data callback rendering from the shared stream core
pub struct OboeRenderCallback {
    render: RenderContext,
}

impl AudioOutputCallback for OboeRenderCallback {
    type FrameType = (f32, oboe::Mono);

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioOutputStreamSafe,
        frames: &mut [f32],
    ) -> DataCallbackResult {
        // Real-time audio callback - NO ALLOCATIONS, LOCKS, OR BLOCKING!
        self.render.render(frames);
        DataCallbackResult::Continue
    }
}

/// Low-latency mono f32 output stream
pub struct OboeDevice {
    core: Arc<StreamCore>,
    stream: Mutex<Option<AudioStreamAsync<Output, OboeRenderCallback>>>,
    _notifier: Notifier,
}

impl OboeDevice {
    /// Open and start an exclusive low-latency output stream.
    ///
    /// # Errors
    /// - `StreamOpenFailed` if the stream cannot be opened
    /// - `SampleRateMismatch` if it opened at another rate than `sample_rate`
    /// - `HardwareError` if it cannot be started
    pub fn open(sample_rate: u32, buffer_frames: usize) -> Result<Self, AudioError> {
        // Replaced by the real burst size once the stream is open
        let (core, render, notifier) = StreamCore::new(sample_rate, 192, buffer_frames)?;

        let mut stream = AudioStreamBuilder::default()
            .set_performance_mode(PerformanceMode::LowLatency)
            .set_sharing_mode(SharingMode::Exclusive)
            .set_direction::<Output>()
            .set_sample_rate(sample_rate as i32)
            .set_channel_count::<oboe::Mono>()
            .set_format::<f32>()
            .set_callback(OboeRenderCallback { render })
            .open_stream()
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("Output stream: {:?}", e),
            })?;

        let burst = stream.get_frames_per_burst();
        if burst > 0 {
            core.set_minimum_buffer_size_frames(burst as usize);
        }
        let min_buffer_frames = core.minimum_buffer_size_frames();

        // The core counts frames at the requested rate
        let actual_rate = stream.get_sample_rate() as u32;
        if let Err(err) = check_stream_rate(sample_rate, actual_rate) {
            warn!(
                "[OboeDevice] Requested {} Hz, stream opened at {} Hz",
                sample_rate, actual_rate
            );
            drop(stream);
            return Err(err);
        }

        stream.start().map_err(|e| AudioError::HardwareError {
            details: format!("Output start failed: {:?}", e),
        })?;
        info!(
            "[OboeDevice] Output stream running at {} Hz (burst {} frames)",
            actual_rate, min_buffer_frames
        );

        Ok(Self {
            core,
            stream: Mutex::new(Some(stream)),
            _notifier: notifier,
        })
    }
}

impl OutputDevice for OboeDevice {
    fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    fn minimum_buffer_size_frames(&self) -> usize {
        self.core.minimum_buffer_size_frames()
    }

    fn write(&self, samples: &[f32]) -> Result<usize, AudioError> {
        self.core.write(samples)
    }

    fn playback_head_position(&self) -> i64 {
        self.core.playback_head_position()
    }

    fn set_periodic_notification_period(&self, frames: usize) {
        self.core.set_periodic_notification_period(frames)
    }

    fn set_next_marker_position(&self, frame: Option<i64>) {
        self.core.set_next_marker_position(frame)
    }

    fn set_listener(&self, listener: Option<Arc<dyn DeviceListener>>) {
        self.core.set_listener(listener)
    }

    fn play(&self) -> Result<(), AudioError> {
        self.core.play()
    }

    fn pause(&self) -> Result<(), AudioError> {
        self.core.pause()
    }

    fn flush(&self) {
        self.core.flush()
    }
}

impl Drop for OboeDevice {
    fn drop(&mut self) {
        let mut stream = self.stream.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(mut stream) = stream.take() {
            let _ = stream.stop();
        }
    }
}
