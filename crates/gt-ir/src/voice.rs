//! Device voice state and emission records.

use crate::time::{DeviceTick, SourceTick};

/// Number of hardware voices on the target device.
pub const NUM_VOICES: usize = 4;

/// Live state of one device voice during conversion.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoiceState {
    /// Source channel currently bound, if any.
    pub channel: Option<u8>,
    /// Last note triggered on this voice.
    pub note: u8,
    /// Source tick at which the voice becomes free again.
    pub available_at: SourceTick,
}

impl VoiceState {
    /// Whether the voice can take a new note at `tick`.
    pub fn is_free_at(&self, tick: SourceTick) -> bool {
        self.available_at <= tick
    }
}

/// One fully resolved parameter update at a device tick.
///
/// A record with `volume == 0` silences the voice. Records are the
/// reconciled output of the pipeline, ready for instruction encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissionRecord {
    pub device_tick: DeviceTick,
    /// Voice number, 1-4.
    pub voice: u8,
    pub note: u8,
    /// 0-63; zero means the voice is turned off.
    pub volume: u8,
    pub waveform: u8,
    /// Pitch offset in semitones, rounded.
    pub bend: i8,
}

impl EmissionRecord {
    pub fn is_off(&self) -> bool {
        self.volume == 0
    }
}
