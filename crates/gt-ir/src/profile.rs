//! Instrument profiles and the macro step language.
//!
//! A profile is a named set of macros, one per controllable parameter,
//! each holding an on-phase and a release-phase step list. Steps are
//! tagged variants decided once at parse time; nothing mutates an
//! already-built sequence.

use arrayvec::{ArrayString, ArrayVec};

/// Maximum steps per macro phase. Config macros observed in the wild
/// stay well under this; longer value strings are truncated.
pub const MAX_MACRO_STEPS: usize = 16;

/// Macro step granularity fallback, in device ticks.
pub const DEFAULT_ACCURACY: u32 = 30;

/// One element of a macro step sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroStep {
    /// Set the parameter to a value for one step.
    Value(i32),
    /// Hold a value for `duration` steps.
    Hold { value: i32, duration: u32 },
    /// Sweep from `start` to `end` over `duration` steps.
    Range { start: i32, end: i32, duration: u32 },
    /// Approach `target` over `duration` steps.
    Transition { target: i32, duration: u32 },
    /// Loop region marker. Parsed and retained; expansion semantics
    /// are unresolved upstream, so these pass through unexpanded.
    LoopStart,
    /// See [`MacroStep::LoopStart`].
    LoopEnd,
}

impl MacroStep {
    /// The plain value carried by a `Value` step, if any.
    pub fn value(&self) -> Option<i32> {
        match self {
            MacroStep::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Which voice parameter a macro drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroKind {
    Volume,
    NoteOffset,
    Waveform,
    PitchBend,
}

/// A configured macro: parameter kind plus its two phase sequences.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroDef {
    pub kind: MacroKind,
    pub on: ArrayVec<MacroStep, MAX_MACRO_STEPS>,
    pub release: ArrayVec<MacroStep, MAX_MACRO_STEPS>,
}

impl MacroDef {
    pub fn new(kind: MacroKind) -> Self {
        Self {
            kind,
            on: ArrayVec::new(),
            release: ArrayVec::new(),
        }
    }
}

/// An instrument or drum envelope configuration.
///
/// Immutable after config load; looked up by program or drum id.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentProfile {
    pub name: ArrayString<24>,
    /// Macro step granularity in device ticks.
    pub accuracy: u32,
    pub macros: Vec<MacroDef>,
}

impl InstrumentProfile {
    pub fn new(name: &str, accuracy: u32) -> Self {
        let mut profile = Self {
            name: ArrayString::new(),
            accuracy,
            macros: Vec::new(),
        };
        let _ = profile.name.try_push_str(name);
        profile
    }

    /// The synthetic profile substituted when an id has no config
    /// section: full volume while sounding, one release step at 0.
    pub fn fallback(accuracy: u32) -> Self {
        Self::new("default", accuracy)
    }

    fn macro_of(&self, kind: MacroKind) -> Option<&MacroDef> {
        self.macros.iter().find(|m| m.kind == kind)
    }

    fn phase_values(def: Option<&MacroDef>, release: bool) -> Vec<i32> {
        def.map(|m| {
            let steps = if release { &m.release } else { &m.on };
            steps.iter().filter_map(MacroStep::value).collect()
        })
        .unwrap_or_default()
    }

    /// On-phase volume values. Empty config falls back to one step at
    /// full volume.
    pub fn volume_on_values(&self) -> Vec<i32> {
        let values = Self::phase_values(self.macro_of(MacroKind::Volume), false);
        if values.is_empty() {
            vec![63]
        } else {
            values
        }
    }

    /// Release-phase volume values. Always ends in 0 so the note
    /// eventually closes; empty config falls back to a single 0.
    pub fn volume_release_values(&self) -> Vec<i32> {
        let mut values = Self::phase_values(self.macro_of(MacroKind::Volume), true);
        match values.last() {
            None => values.push(0),
            Some(&last) if last != 0 => values.push(0),
            _ => {}
        }
        values
    }

    /// First configured waveform value, if any.
    pub fn first_waveform(&self) -> Option<i32> {
        Self::phase_values(self.macro_of(MacroKind::Waveform), false)
            .first()
            .copied()
    }

    /// First configured note offset, or 0.
    pub fn note_offset(&self) -> i32 {
        Self::phase_values(self.macro_of(MacroKind::NoteOffset), false)
            .first()
            .copied()
            .unwrap_or(0)
    }
}
