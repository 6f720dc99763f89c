// Audio module - sample storage, click synthesis and the queue container

pub mod click;
pub mod ring_buffer;
pub mod samples;

// Re-export commonly used types for convenience
pub use click::{beat_duration_for_bpm, generate_beep, generate_click_sample};
pub use ring_buffer::RingBuffer;
pub use samples::{InMemorySampleRepository, SampleRepository, SoundId};
