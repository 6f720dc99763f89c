//! Engine module housing the metronome core.
//!
//! `scheduler` turns the looping playlist into queued tracks and markers,
//! `mixer` renders them window by window, and `core` ties both to an output
//! device behind [`MetronomeEngine`].

pub mod clock;
pub mod core;
pub mod mixer;
pub mod playlist;
pub mod scheduler;
pub mod sync;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use core::{EngineEvent, MetronomeEngine};
pub use mixer::Mixer;
pub use playlist::PlaylistItem;
pub use scheduler::{Marker, MarkerAnchor, PlaylistCursor, QueuedTrack};
