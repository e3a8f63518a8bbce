//! Core IR types for the gigatune MIDI converter.
//!
//! This crate defines the intermediate representation shared by the
//! whole pipeline: the format layer decodes performances and
//! instrument configs into IR, and the conversion engine consumes IR
//! to produce the device instruction stream.

mod event;
mod profile;
mod time;
mod voice;
mod volume;

pub use event::{MacroPhase, MacroStepEvent, MidiMessage, TrackEvent};
pub use profile::{
    InstrumentProfile, MacroDef, MacroKind, MacroStep, DEFAULT_ACCURACY, MAX_MACRO_STEPS,
};
pub use time::{
    DeviceTick, SourceTick, TickConverter, TickRate, DEFAULT_TEMPO_US, TICKS_PER_SECOND,
};
pub use voice::{EmissionRecord, VoiceState, NUM_VOICES};
pub use volume::{boost_volume, clamp_note, scale_volume, simplify_volume, MAX_VOLUME};
