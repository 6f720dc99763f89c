//! Desktop output device on top of cpal
//!
//! cpal streams are not `Send` on every host, so the stream is built, played
//! and eventually dropped on a dedicated owner thread. Everything the engine
//! touches lives in the shared [`StreamCore`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use log::{error, info, warn};

use super::stream_core::{Notifier, RenderContext, StreamCore};
use super::{DeviceListener, OutputDevice};
use crate::error::AudioError;

/// Default output device of the default cpal host
pub struct CpalDevice {
    core: Arc<StreamCore>,
    stream_errors: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    owner: Option<JoinHandle<()>>,
    _notifier: Notifier,
}

impl CpalDevice {
    /// Open the default output device at `sample_rate`.
    ///
    /// Falls back to the device's default rate when `sample_rate` is not
    /// supported; the engine rejects the device later if the rate does not
    /// match its samples.
    ///
    /// # Arguments
    /// * `sample_rate` - Requested rate in Hz
    /// * `buffer_frames` - Capacity of the sample FIFO
    ///
    /// # Errors
    /// `StreamOpenFailed` if no device or config is available or the stream
    /// cannot be built, `HardwareError` if it cannot be started
    pub fn open(sample_rate: u32, buffer_frames: usize) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::StreamOpenFailed {
                reason: "No default output device found".to_string(),
            })?;

        let (stream_config, sample_format) = choose_config(&device, sample_rate)?;
        let actual_rate = stream_config.sample_rate.0;
        let min_buffer_frames = match device.default_output_config().map(|c| c.buffer_size().clone()) {
            Ok(cpal::SupportedBufferSize::Range { min, .. }) => min as usize,
            _ => 256,
        };

        let (core, render, notifier) =
            StreamCore::new(actual_rate, min_buffer_frames, buffer_frames)?;
        let stream_errors = Arc::new(AtomicUsize::new(0));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let errors = Arc::clone(&stream_errors);

        let owner = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, render, errors),
                    SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, render, errors),
                    _ => build_output_stream::<f32>(&device, &stream_config, render, errors),
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::HardwareError {
                        details: format!("Output start failed: {}", e),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until the device is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::HardwareError {
                details: format!("Failed to spawn stream owner thread: {}", e),
            })?;

        ready_rx.recv().map_err(|_| AudioError::StreamOpenFailed {
            reason: "Stream owner thread exited before reporting".to_string(),
        })??;

        info!(
            "[CpalDevice] Output stream running at {} Hz ({:?}, fifo {} frames)",
            actual_rate, sample_format, buffer_frames
        );

        Ok(Self {
            core,
            stream_errors,
            shutdown_tx: Some(shutdown_tx),
            owner: Some(owner),
            _notifier: notifier,
        })
    }

    /// Number of errors reported by the cpal stream so far
    pub fn stream_error_count(&self) -> usize {
        self.stream_errors.load(Ordering::Relaxed)
    }
}

fn choose_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let requested = cpal::SampleRate(sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to query output configs: {:?}", e),
        })?
        .filter(|range| range.min_sample_rate() <= requested && requested <= range.max_sample_rate())
        .max_by_key(|range| range.sample_format() == SampleFormat::F32);

    if let Some(range) = supported {
        let config = range.with_sample_rate(requested);
        return Ok((config.config(), config.sample_format()));
    }

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;
    warn!(
        "[CpalDevice] {} Hz not supported, using device default {} Hz",
        sample_rate,
        config.sample_rate().0
    );
    Ok((config.config(), config.sample_format()))
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut render: RenderContext,
    stream_errors: Arc<AtomicUsize>,
) -> Result<cpal::Stream, AudioError>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    // Sized for the largest callback we expect; grown off the hot path only
    // if a host hands us more.
    let mut mono: Vec<f32> = vec![0.0; 8192];

    let err_fn = move |err: cpal::StreamError| {
        error!("[CpalDevice] Output stream error: {}", err);
        stream_errors.fetch_add(1, Ordering::Relaxed);
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                render.render(&mut mono[..frames]);
                for (frame, &value) in data.chunks_mut(channels).zip(&mono[..frames]) {
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(value);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })
}

impl OutputDevice for CpalDevice {
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

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(owner) = self.owner.take() {
            if owner.thread().id() != thread::current().id() && owner.join().is_err() {
                error!("[CpalDevice] Stream owner thread panicked");
            }
        }
    }
}
