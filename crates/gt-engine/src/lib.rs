//! Conversion engine for gigatune.
//!
//! Maps a decoded 16-channel performance onto the 4 hardware voices,
//! expands instrument macros into timed volume events, quantizes
//! everything to the device frame rate, and packs the result into a
//! bounded-segment instruction stream.

mod allocator;
mod channels;
mod emit;
mod expander;
mod pipeline;
mod reconcile;

pub use allocator::{AllocationPolicy, ChannelAllocator};
pub use channels::{default_waveform, is_drum_note, ChannelState};
pub use emit::{build_segments, encode_segments, Instruction, Segment, SEGMENT_INSTRUCTION_LIMIT};
pub use expander::{expand_note, Expansion};
pub use pipeline::{convert, convert_to_bytes, ConvertOptions};
pub use reconcile::{reconcile, ReconcileOptions, SoundParams, VoiceEvent, VoiceEventKind};
