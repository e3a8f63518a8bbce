//! Device-frame quantization and per-voice state tracking.
//!
//! Converts every scheduled voice event to a device tick, resolves
//! concurrent writes last-write-wins per voice per tick, applies
//! volume shaping, and suppresses output that would not change what
//! the device is already playing.

use std::collections::BTreeMap;

use gt_ir::{
    boost_volume, clamp_note, scale_volume, simplify_volume, DeviceTick, EmissionRecord,
    SourceTick, TickConverter, MAX_VOLUME, NUM_VOICES,
};

/// Snapshot of everything needed to resolve one voice update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoundParams {
    pub note: u8,
    pub velocity: u8,
    pub channel_volume: u8,
    pub expression: u8,
    pub modulation: u8,
    pub bend_semitones: f64,
    pub waveform: u8,
    /// Set for macro steps; used verbatim, bypassing velocity scaling
    /// and quantization.
    pub macro_volume: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceEventKind {
    Sound(SoundParams),
    Off { note: u8 },
    /// Tempo change in microseconds per quarter note. Applies to
    /// events converted after it; the `voice` field is unused.
    Tempo(u32),
}

/// One scheduled event on a device voice, still in source time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceEvent {
    pub source_tick: SourceTick,
    /// Voice 1-4 (0 for tempo events).
    pub voice: u8,
    pub kind: VoiceEventKind,
}

#[derive(Clone, Copy, Debug)]
pub struct ReconcileOptions {
    /// Quantize volumes to this many levels; 64 or more disables.
    pub volume_levels: u8,
    /// Floor applied to nonzero volumes after quantization.
    pub min_volume: u8,
    /// Zero out sub-semitone bend and vibrato.
    pub no_pitch_bend: bool,
    pub pitch_bend_multiplier: f64,
    /// Per-voice waveform override from the command line.
    pub forced_waveforms: [Option<u8>; NUM_VOICES],
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            volume_levels: 64,
            min_volume: 0,
            no_pitch_bend: false,
            pitch_bend_multiplier: 1.0,
            forced_waveforms: [None; NUM_VOICES],
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum VoiceFinal {
    Off,
    On {
        note: u8,
        volume: u8,
        waveform: u8,
        bend: i8,
    },
}

const MAX_VIBRATO_DEPTH_CENTS: f64 = 50.0;

/// Reconcile scheduled events into emission records.
///
/// `events` must be sorted by source tick. Note-offs that should
/// yield to a pending release tail are filtered out upstream, before
/// scheduling reaches this point.
pub fn reconcile(
    events: &[VoiceEvent],
    converter: &mut TickConverter,
    opts: &ReconcileOptions,
) -> Vec<EmissionRecord> {
    let mut grouped: BTreeMap<DeviceTick, [Option<VoiceFinal>; NUM_VOICES]> = BTreeMap::new();

    for event in events {
        let slot = match event.kind {
            VoiceEventKind::Tempo(us) => {
                converter.set_tempo(event.source_tick, us);
                continue;
            }
            VoiceEventKind::Off { .. } => Some(VoiceFinal::Off),
            VoiceEventKind::Sound(params) => Some(resolve(event.voice, &params, opts)),
        };

        let tick = converter.to_device(event.source_tick);
        grouped.entry(tick).or_insert([None; NUM_VOICES])[event.voice as usize - 1] = slot;
    }

    emit_changes(grouped)
}

fn resolve(voice: u8, params: &SoundParams, opts: &ReconcileOptions) -> VoiceFinal {
    let offset = params.bend_semitones.round() as i32;
    let shifted = (params.note as i32 + offset).clamp(0, 127) as u8;
    let note = clamp_note(shifted);
    let fine_semitones = params.bend_semitones - offset as f64;

    let volume = match params.macro_volume {
        Some(v) => v.clamp(0, MAX_VOLUME as i32) as u8,
        None => {
            let scaled = scale_volume(params.velocity, params.channel_volume, params.expression);
            boost_volume(
                simplify_volume(scaled, opts.volume_levels),
                opts.min_volume,
            )
        }
    };

    let waveform = opts.forced_waveforms[voice as usize - 1].unwrap_or(params.waveform);

    let bend = if opts.no_pitch_bend {
        0
    } else {
        let cents = fine_semitones * 100.0
            + params.modulation as f64 / 127.0 * MAX_VIBRATO_DEPTH_CENTS;
        let scaled = cents * opts.pitch_bend_multiplier;
        let rounded = if scaled > 0.0 {
            (scaled + 0.5) as i32
        } else {
            (scaled - 0.5) as i32
        };
        rounded.clamp(i8::MIN as i32, i8::MAX as i32) as i8
    };

    VoiceFinal::On {
        note,
        volume,
        waveform,
        bend,
    }
}

/// Walk ticks in order, emitting a record per voice only when its
/// resolved state differs from the last thing the device was told.
fn emit_changes(
    grouped: BTreeMap<DeviceTick, [Option<VoiceFinal>; NUM_VOICES]>,
) -> Vec<EmissionRecord> {
    #[derive(Clone, Copy, PartialEq)]
    struct LastOut {
        note: u8,
        volume: u8,
        waveform: u8,
        bend: i8,
    }

    let mut records = Vec::new();
    let mut last: [Option<LastOut>; NUM_VOICES] = [None; NUM_VOICES];

    for (tick, finals) in grouped {
        for (idx, state) in finals.into_iter().enumerate() {
            let voice = idx as u8 + 1;
            match state {
                None => {}
                Some(VoiceFinal::Off) => {
                    if let Some(prev) = last[idx].take() {
                        records.push(EmissionRecord {
                            device_tick: tick,
                            voice,
                            note: prev.note,
                            volume: 0,
                            waveform: prev.waveform,
                            bend: prev.bend,
                        });
                    }
                }
                Some(VoiceFinal::On {
                    note,
                    volume,
                    waveform,
                    bend,
                }) => {
                    if volume == 0 {
                        // Reaching silence turns the voice off; the
                        // cache resets so the next sound re-emits in
                        // full.
                        if last[idx].take().is_some() {
                            records.push(EmissionRecord {
                                device_tick: tick,
                                voice,
                                note,
                                volume: 0,
                                waveform,
                                bend,
                            });
                        }
                        continue;
                    }
                    let next = LastOut {
                        note,
                        volume,
                        waveform,
                        bend,
                    };
                    if last[idx] != Some(next) {
                        last[idx] = Some(next);
                        records.push(EmissionRecord {
                            device_tick: tick,
                            voice,
                            note,
                            volume,
                            waveform,
                            bend,
                        });
                    }
                }
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_ir::TickRate;

    fn sound(tick: SourceTick, voice: u8, note: u8, velocity: u8) -> VoiceEvent {
        VoiceEvent {
            source_tick: tick,
            voice,
            kind: VoiceEventKind::Sound(SoundParams {
                note,
                velocity,
                channel_volume: 127,
                expression: 127,
                modulation: 0,
                bend_semitones: 0.0,
                waveform: 1,
                macro_volume: None,
            }),
        }
    }

    fn off(tick: SourceTick, voice: u8, note: u8) -> VoiceEvent {
        VoiceEvent {
            source_tick: tick,
            voice,
            kind: VoiceEventKind::Off { note },
        }
    }

    fn converter() -> TickConverter {
        // 480 ppq at the default 500000 us tempo: one quarter note is
        // 30 device frames
        TickConverter::new(TickRate::new(480))
    }

    #[test]
    fn single_note_emits_on_and_off() {
        let events = vec![sound(0, 1, 60, 100), off(480, 1, 60)];
        let records = reconcile(&events, &mut converter(),&Default::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_tick, 0);
        assert_eq!(records[0].note, 60);
        assert_eq!(records[0].volume, 50);
        assert_eq!(records[1].device_tick, 30);
        assert!(records[1].is_off());
    }

    #[test]
    fn unchanged_state_is_suppressed() {
        let events = vec![sound(0, 1, 60, 100), sound(240, 1, 60, 100), off(480, 1, 60)];
        let records = reconcile(&events, &mut converter(),&Default::default());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn last_write_wins_within_a_device_tick() {
        // source ticks 0 and 3 both land on device tick 0
        let events = vec![sound(0, 1, 60, 100), sound(3, 1, 64, 100)];
        let records = reconcile(&events, &mut converter(),&Default::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].note, 64);
    }

    #[test]
    fn every_scheduled_off_silences_its_voice() {
        // off filtering happens upstream; whatever arrives here lands
        let events = vec![sound(0, 1, 60, 100), off(480, 1, 60)];
        let records = reconcile(&events, &mut converter(), &Default::default());
        assert_eq!(records.len(), 2);
        assert!(records[1].is_off());
        assert_eq!(records[1].device_tick, 30);
    }

    #[test]
    fn off_without_prior_sound_emits_nothing() {
        let events = vec![off(0, 2, 60)];
        let records = reconcile(&events, &mut converter(),&Default::default());
        assert!(records.is_empty());
    }

    #[test]
    fn macro_volume_bypasses_shaping() {
        let opts = ReconcileOptions {
            volume_levels: 4,
            min_volume: 20,
            ..Default::default()
        };
        let mut event = sound(0, 1, 60, 100);
        if let VoiceEventKind::Sound(ref mut p) = event.kind {
            p.macro_volume = Some(13);
        }
        let records = reconcile(&[event], &mut converter(),&opts);
        assert_eq!(records[0].volume, 13);
    }

    #[test]
    fn shaping_applies_quantize_then_floor() {
        let opts = ReconcileOptions {
            volume_levels: 4,
            min_volume: 30,
            ..Default::default()
        };
        // velocity 100 scales to 50; 4 levels snap it to its bucket
        // midpoint 56, already above the floor
        let records = reconcile(
            &[sound(0, 1, 60, 100)],
            &mut converter(),
            &opts,
        );
        assert_eq!(records[0].volume, 56);
    }

    #[test]
    fn bend_shifts_note_and_leaves_fine_cents() {
        let mut event = sound(0, 1, 60, 100);
        if let VoiceEventKind::Sound(ref mut p) = event.kind {
            p.bend_semitones = 1.25;
        }
        let records = reconcile(&[event], &mut converter(),&Default::default());
        assert_eq!(records[0].note, 61);
        assert_eq!(records[0].bend, 25);
    }

    #[test]
    fn no_pitch_bend_still_quantizes_to_semitones() {
        let opts = ReconcileOptions {
            no_pitch_bend: true,
            ..Default::default()
        };
        let mut event = sound(0, 1, 60, 100);
        if let VoiceEventKind::Sound(ref mut p) = event.kind {
            p.bend_semitones = 1.75;
            p.modulation = 127;
        }
        let records = reconcile(&[event], &mut converter(),&opts);
        assert_eq!(records[0].note, 62);
        assert_eq!(records[0].bend, 0);
    }

    #[test]
    fn modulation_adds_vibrato_depth() {
        let mut event = sound(0, 1, 60, 100);
        if let VoiceEventKind::Sound(ref mut p) = event.kind {
            p.modulation = 127;
        }
        let records = reconcile(&[event], &mut converter(),&Default::default());
        assert_eq!(records[0].bend, 50);
    }

    #[test]
    fn forced_waveform_overrides_event() {
        let opts = ReconcileOptions {
            forced_waveforms: [None, Some(3), None, None],
            ..Default::default()
        };
        let records = reconcile(
            &[sound(0, 2, 60, 100)],
            &mut converter(),
            &opts,
        );
        assert_eq!(records[0].waveform, 3);
    }

    #[test]
    fn tempo_change_shifts_later_conversions_only() {
        let events = vec![
            sound(0, 1, 60, 100),
            VoiceEvent {
                source_tick: 480,
                voice: 0,
                kind: VoiceEventKind::Tempo(250_000),
            },
            off(960, 1, 60),
        ];
        let records = reconcile(&events, &mut converter(),&Default::default());
        // first quarter at 30 frames, second at 15
        assert_eq!(records[1].device_tick, 45);
    }
}
