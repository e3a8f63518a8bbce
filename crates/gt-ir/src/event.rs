//! Decoded performance events and derived macro step events.

use crate::profile::MacroKind;
use crate::time::{DeviceTick, SourceTick};

/// A decoded channel or meta message from the source performance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MidiMessage {
    /// Trigger a note. Velocity is always nonzero (zero-velocity
    /// note-ons are decoded as `NoteOff`).
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Release a note.
    NoteOff { channel: u8, note: u8 },
    /// Control change (CC number + value).
    Controller { channel: u8, controller: u8, value: u8 },
    /// Program (instrument) change.
    ProgramChange { channel: u8, program: u8 },
    /// Pitch bend, raw 14-bit value centered at 8192.
    PitchBend { channel: u8, value: u16 },
    /// Tempo change, microseconds per quarter note.
    Tempo(u32),
}

/// A timestamped event within one source track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackEvent {
    pub track: u16,
    pub tick: SourceTick,
    pub message: MidiMessage,
}

/// Which phase of a note's life a macro step belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroPhase {
    /// While the note is sounding.
    On,
    /// After the note's release point.
    Release,
}

/// One expanded macro step, scheduled on a bound voice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MacroStepEvent {
    /// Target voice, 1-4.
    pub voice: u8,
    /// Absolute source tick the step fires at.
    pub tick: SourceTick,
    pub phase: MacroPhase,
    /// Parameter the step drives. Currently always `Volume`; other
    /// kinds are retained in profiles without expanding.
    pub kind: MacroKind,
    /// Step value (volume, 0-63).
    pub value: i32,
    /// Step duration in device ticks.
    pub duration: DeviceTick,
}
