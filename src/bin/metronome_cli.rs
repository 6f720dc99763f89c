use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use metronome_engine::audio::{beat_duration_for_bpm, InMemorySampleRepository, SoundId};
use metronome_engine::device::{default_output_device, OutputDevice, SimulatedDevice};
use metronome_engine::engine::{ManualTimeSource, MetronomeEngine, PlaylistItem};
use metronome_engine::notify::{InlineExecutor, NoteEvent};
use metronome_engine::EngineConfig;

const ACCENT_SOUND: SoundId = 1;
const BEAT_SOUND: SoundId = 2;

/// Minimum buffer reported by the offline render device
const RENDER_MIN_BUFFER_FRAMES: usize = 256;

#[derive(Parser, Debug)]
#[command(
    name = "metronome_cli",
    about = "Play or render a click-accurate metronome"
)]
struct Cli {
    /// JSON configuration file (defaults to assets/metronome_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play through the default output device and print note events
    Play {
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        /// Beats per bar
        #[arg(long, default_value_t = 4)]
        beats: u32,
        /// Use a higher beep on the first beat of each bar
        #[arg(long)]
        accent: bool,
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
    },
    /// Render offline to a 32-bit float mono WAV file
    Render {
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(long, default_value_t = 4)]
        beats: u32,
        #[arg(long)]
        accent: bool,
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the effective configuration as JSON
    DumpConfig,
}

fn main() -> ExitCode {
    metronome_engine::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path),
        None => EngineConfig::load(),
    };

    match cli.command {
        Commands::Play {
            bpm,
            beats,
            accent,
            seconds,
        } => run_play(config, bpm, beats, accent, seconds),
        Commands::Render {
            bpm,
            beats,
            accent,
            seconds,
            output,
        } => run_render(config, bpm, beats, accent, seconds, &output),
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::from(0))
        }
    }
}

/// One bar of `beats` items; payload is the beat number within the bar
fn bar_playlist(bpm: f64, beats: u32, accent: bool) -> Result<Vec<PlaylistItem<u32>>> {
    if !(bpm.is_finite() && bpm > 0.0) {
        bail!("bpm must be positive, got {bpm}");
    }
    if beats == 0 {
        bail!("beats must be at least 1");
    }
    let seconds = beat_duration_for_bpm(bpm).as_secs_f64();
    Ok((0..beats)
        .map(|beat| {
            let sound = if accent && beat == 0 {
                ACCENT_SOUND
            } else {
                BEAT_SOUND
            };
            PlaylistItem::new(sound, 1.0, seconds, beat)
        })
        .collect())
}

fn sample_repository(sample_rate: u32) -> Arc<InMemorySampleRepository> {
    let samples = InMemorySampleRepository::new(sample_rate);
    samples.insert_beep(ACCENT_SOUND, 1760.0, 30.0);
    samples.insert_click(BEAT_SOUND);
    Arc::new(samples)
}

fn fifo_frames(config: &EngineConfig, min_buffer_frames: usize) -> usize {
    let audio = &config.audio;
    let windows = audio.buffer_windows.max(audio.prime_windows + 1);
    audio.window_size(audio.sample_rate, min_buffer_frames) * windows
}

#[derive(Serialize)]
struct NoteLine {
    beat: u32,
    playlist_index: usize,
    frame: i64,
}

impl From<&NoteEvent<u32>> for NoteLine {
    fn from(event: &NoteEvent<u32>) -> Self {
        Self {
            beat: event.payload,
            playlist_index: event.playlist_index,
            frame: event.frame,
        }
    }
}

fn run_play(config: EngineConfig, bpm: f64, beats: u32, accent: bool, seconds: f64) -> Result<ExitCode> {
    let playlist = bar_playlist(bpm, beats, accent)?;
    let device = default_output_device(config.audio.sample_rate, fifo_frames(&config, 0))
        .context("opening output device")?;
    let samples = sample_repository(device.sample_rate());
    let engine = MetronomeEngine::new(config, device, samples)?;

    engine.register_listener(Duration::ZERO, Arc::new(InlineExecutor), |event| {
        match serde_json::to_string(&NoteLine::from(event)) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("Error: {err}"),
        }
    });
    engine.set_playlist(playlist)?;
    engine.start()?;

    thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));

    if engine.is_running() {
        engine.stop()?;
        Ok(ExitCode::from(0))
    } else {
        eprintln!("Playback stopped early");
        Ok(ExitCode::from(2))
    }
}

#[derive(Serialize)]
struct RenderReport<'a> {
    output: &'a Path,
    sample_rate: u32,
    window_size: usize,
    frames: usize,
    notes: Vec<NoteLine>,
}

fn run_render(
    config: EngineConfig,
    bpm: f64,
    beats: u32,
    accent: bool,
    seconds: f64,
    output: &Path,
) -> Result<ExitCode> {
    let playlist = bar_playlist(bpm, beats, accent)?;
    let sample_rate = config.audio.sample_rate;
    let device = Arc::new(SimulatedDevice::new(
        sample_rate,
        RENDER_MIN_BUFFER_FRAMES,
        fifo_frames(&config, RENDER_MIN_BUFFER_FRAMES),
    ));
    let clock = Arc::new(ManualTimeSource::new());
    let engine = MetronomeEngine::with_time_source(
        config,
        device.clone(),
        sample_repository(sample_rate),
        clock.clone(),
    )?;

    let notes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notes);
    engine.register_listener(Duration::ZERO, Arc::new(InlineExecutor), move |event| {
        sink.lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(NoteLine::from(event));
    });
    engine.set_playlist(playlist)?;
    engine.start()?;

    let total = (seconds.max(0.0) * sample_rate as f64).round() as usize;
    let window = engine.window_size();
    let mut rendered = 0;
    while rendered < total && engine.is_running() {
        let step = window.min(total - rendered);
        device.advance(step);
        clock.advance_frames(step, sample_rate);
        rendered += step;
    }
    if !engine.is_running() {
        bail!("render stopped after {rendered} frames");
    }
    engine.stop()?;

    write_wav(output, sample_rate, &device.take_played())?;

    let report = RenderReport {
        output,
        sample_rate,
        window_size: window,
        frames: rendered,
        notes: std::mem::take(&mut *notes.lock().unwrap_or_else(|err| err.into_inner())),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
