//! Macro expansion: instrument envelope steps into timed events.

use gt_ir::{
    DeviceTick, InstrumentProfile, MacroKind, MacroPhase, MacroStepEvent, SourceTick,
};

/// Result of expanding one note's volume macro.
pub struct Expansion {
    pub events: Vec<MacroStepEvent>,
    /// Source tick at which the voice is free again: the note-off or
    /// the end of the last scheduled step, whichever is later.
    pub next_available: SourceTick,
}

/// Expand the volume macro of `profile` across a note's sounding and
/// release windows.
///
/// `device_per_source` is the current device-ticks-per-source-tick
/// ratio; step spacing is the profile accuracy converted to source
/// ticks, floored to 1. On-phase steps stop at the note-off tick.
/// Release steps run only when the note lasted longer than twice the
/// accuracy, and always end at volume 0.
pub fn expand_note(
    profile: &InstrumentProfile,
    voice: u8,
    note_on: SourceTick,
    note_off: SourceTick,
    device_per_source: f64,
) -> Expansion {
    let mut events = Vec::new();
    let mut next_available = note_off;

    let step = (profile.accuracy as f64 / device_per_source).round() as i64;
    let step = step.max(1) as SourceTick;

    for (i, value) in profile.volume_on_values().into_iter().enumerate() {
        let tick = note_on + i as SourceTick * step;
        if tick >= note_off {
            break;
        }
        events.push(MacroStepEvent {
            voice,
            tick,
            phase: MacroPhase::On,
            kind: MacroKind::Volume,
            value,
            duration: profile.accuracy as DeviceTick,
        });
        next_available = next_available.max(tick + step);
    }

    let release_gate =
        ((2 * profile.accuracy) as f64 / device_per_source).round() as SourceTick;
    if note_off - note_on > release_gate {
        for (i, value) in profile.volume_release_values().into_iter().enumerate() {
            let tick = note_off + i as SourceTick * step;
            events.push(MacroStepEvent {
                voice,
                tick,
                phase: MacroPhase::Release,
                kind: MacroKind::Volume,
                value,
                duration: profile.accuracy as DeviceTick,
            });
            next_available = next_available.max(tick + step);
        }
    }

    Expansion {
        events,
        next_available,
    }
}
