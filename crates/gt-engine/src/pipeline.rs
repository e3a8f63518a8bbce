//! Single-pass conversion pipeline.
//!
//! Walks the decoded event list once, in tick order: allocates
//! voices, snapshots controller state into scheduled voice events,
//! expands instrument macros, then hands everything to the reconciler
//! and emitter.

use std::collections::HashMap;

use gt_formats::{MacroConfig, SmfFile};
use gt_ir::{
    EmissionRecord, InstrumentProfile, MacroPhase, MidiMessage, SourceTick, TickConverter,
    TickRate, NUM_VOICES,
};

use crate::allocator::{AllocationPolicy, ChannelAllocator, NUM_CHANNELS};
use crate::channels::{default_waveform, is_drum_note, ChannelState};
use crate::emit::{build_segments, encode_segments};
use crate::expander::expand_note;
use crate::reconcile::{reconcile, ReconcileOptions, SoundParams, VoiceEvent, VoiceEventKind};

/// Conversion knobs, mirroring the command-line surface.
#[derive(Clone, Copy, Debug)]
pub struct ConvertOptions {
    pub policy: AllocationPolicy,
    /// Drop volume/expression changes on sounding notes.
    pub no_velocity_change: bool,
    /// Quantize pitch to semitones, no fine bend or vibrato.
    pub no_pitch_bend: bool,
    /// Stop processing past this many seconds of source time.
    pub max_duration_seconds: Option<f64>,
    pub pitch_bend_multiplier: f64,
    /// 1-64; 64 leaves volumes unquantized.
    pub volume_levels: u8,
    /// Floor for nonzero volumes, 0-63.
    pub min_volume: u8,
    /// Playback speed multiplier.
    pub speed: f64,
    pub forced_waveforms: [Option<u8>; NUM_VOICES],
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            policy: AllocationPolicy::Static,
            no_velocity_change: false,
            no_pitch_bend: false,
            max_duration_seconds: None,
            pitch_bend_multiplier: 1.0,
            volume_levels: 64,
            min_volume: 0,
            speed: 1.0,
            forced_waveforms: [None; NUM_VOICES],
        }
    }
}

impl ConvertOptions {
    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            volume_levels: self.volume_levels,
            min_volume: self.min_volume,
            no_pitch_bend: self.no_pitch_bend,
            pitch_bend_multiplier: self.pitch_bend_multiplier,
            forced_waveforms: self.forced_waveforms,
        }
    }
}

/// Note currently sounding on a voice, kept for re-broadcasting
/// controller changes.
#[derive(Clone, Copy)]
struct ActiveNote {
    channel: u8,
    /// Pitch after the instrument's configured note offset.
    note: u8,
    velocity: u8,
    waveform: u8,
}

/// Convert a parsed performance into emission records.
pub fn convert(
    smf: &SmfFile,
    config: Option<&MacroConfig>,
    opts: &ConvertOptions,
) -> Vec<EmissionRecord> {
    let off_ticks = link_note_offs(smf);
    let end_tick = smf.events.last().map(|e| e.tick).unwrap_or(0);

    let mut rate = TickRate::new(smf.pulses_per_quarter);
    rate.speed = opts.speed;
    let mut cutoff = opts
        .max_duration_seconds
        .map(|s| rate.seconds_to_source(s));

    let mut channels = [ChannelState::default(); NUM_CHANNELS];
    let mut alloc = ChannelAllocator::new(opts.policy);
    let mut active: [Option<ActiveNote>; NUM_VOICES] = [None; NUM_VOICES];
    let mut scheduled: Vec<VoiceEvent> = Vec::new();
    // Release-tail end per sounding (voice, pitch). An entry is
    // consumed by that note's own note-off, so a later note's tail
    // never reaches back to an earlier off.
    let mut pending_tails: HashMap<(u8, u8), SourceTick> = HashMap::new();

    for (i, event) in smf.events.iter().enumerate() {
        if cutoff.is_some_and(|max| event.tick > max) {
            break;
        }
        match event.message {
            MidiMessage::Tempo(us) => {
                rate.tempo_us = us;
                cutoff = opts
                    .max_duration_seconds
                    .map(|s| rate.seconds_to_source(s));
                scheduled.push(VoiceEvent {
                    source_tick: event.tick,
                    voice: 0,
                    kind: VoiceEventKind::Tempo(us),
                });
            }
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => {
                let Some(voice) = alloc.note_on(channel, note, event.tick) else {
                    continue;
                };
                let state = channels[channel as usize];
                let drum = is_drum_note(channel, note);
                let profile = lookup_profile(config, drum, note, state.program);

                let note_offset = if drum {
                    0
                } else {
                    profile.as_ref().map(|p| p.note_offset()).unwrap_or(0)
                };
                let played = (note as i32 + note_offset).clamp(0, 127) as u8;
                let waveform = profile
                    .as_ref()
                    .and_then(|p| p.first_waveform())
                    .map(|w| w.clamp(0, u8::MAX as i32) as u8)
                    .unwrap_or(if drum { 0 } else { default_waveform(state.program) });

                active[voice as usize - 1] = Some(ActiveNote {
                    channel,
                    note: played,
                    velocity,
                    waveform,
                });
                scheduled.push(VoiceEvent {
                    source_tick: event.tick,
                    voice,
                    kind: VoiceEventKind::Sound(SoundParams {
                        note: played,
                        velocity,
                        channel_volume: state.volume,
                        expression: state.expression,
                        modulation: state.modulation,
                        bend_semitones: state.bend_semitones,
                        waveform,
                        macro_volume: None,
                    }),
                });

                let off_tick = off_ticks[i].unwrap_or(end_tick);
                match profile {
                    Some(profile) => {
                        let expansion = expand_note(
                            &profile,
                            voice,
                            event.tick,
                            off_tick,
                            rate.device_per_source(),
                        );
                        let last_release = expansion
                            .events
                            .iter()
                            .filter(|e| e.phase == MacroPhase::Release)
                            .map(|e| e.tick)
                            .max();
                        if let Some(tail_end) = last_release {
                            pending_tails.insert((voice, played), tail_end);
                        }
                        for step in &expansion.events {
                            scheduled.push(VoiceEvent {
                                source_tick: step.tick,
                                voice,
                                kind: VoiceEventKind::Sound(SoundParams {
                                    note: played,
                                    velocity,
                                    channel_volume: state.volume,
                                    expression: state.expression,
                                    modulation: state.modulation,
                                    bend_semitones: state.bend_semitones,
                                    waveform,
                                    macro_volume: Some(step.value),
                                }),
                            });
                        }
                        alloc.set_available(voice, expansion.next_available);
                    }
                    None => alloc.set_available(voice, off_tick.max(event.tick)),
                }
            }
            MidiMessage::NoteOff { channel, note } => {
                if let Some(voice) = alloc.note_off(channel, note) {
                    let idx = voice as usize - 1;
                    let played = match active[idx] {
                        Some(a) if a.channel == channel => a.note,
                        _ => note,
                    };
                    active[idx] = None;
                    // The raw off yields to this note's own release
                    // tail, which ends at volume 0 on its own.
                    let suppressed = pending_tails
                        .remove(&(voice, played))
                        .is_some_and(|end| event.tick < end);
                    if !suppressed {
                        scheduled.push(VoiceEvent {
                            source_tick: event.tick,
                            voice,
                            kind: VoiceEventKind::Off { note: played },
                        });
                    }
                }
            }
            MidiMessage::Controller {
                channel,
                controller,
                value,
            } => {
                channels[channel as usize].apply_controller(controller, value);
                let rebroadcast = match controller {
                    // modulation feeds vibrato, always forwarded
                    1 => true,
                    7 | 11 => !opts.no_velocity_change,
                    _ => false,
                };
                if rebroadcast {
                    push_controller_updates(
                        &mut scheduled,
                        &active,
                        &channels,
                        channel,
                        event.tick,
                    );
                }
            }
            MidiMessage::ProgramChange { channel, program } => {
                channels[channel as usize].program = program;
            }
            MidiMessage::PitchBend { channel, value } => {
                channels[channel as usize].apply_bend(value);
                push_controller_updates(&mut scheduled, &active, &channels, channel, event.tick);
            }
        }
    }

    scheduled.sort_by_key(|e| e.source_tick);

    let mut converter_rate = TickRate::new(smf.pulses_per_quarter);
    converter_rate.speed = opts.speed;
    let mut converter = TickConverter::new(converter_rate);
    reconcile(&scheduled, &mut converter, &opts.reconcile_options())
}

/// Convert straight to the player's byte stream.
pub fn convert_to_bytes(
    smf: &SmfFile,
    config: Option<&MacroConfig>,
    opts: &ConvertOptions,
) -> Vec<u8> {
    encode_segments(&build_segments(&convert(smf, config, opts)))
}

fn lookup_profile(
    config: Option<&MacroConfig>,
    drum: bool,
    note: u8,
    program: u8,
) -> Option<InstrumentProfile> {
    let config = config?;
    Some(if drum {
        config.drum_or_default(note)
    } else {
        config.instrument_or_default(program)
    })
}

/// Re-broadcast a controller change to every sounding voice on the
/// channel, as a fresh snapshot of its state.
fn push_controller_updates(
    scheduled: &mut Vec<VoiceEvent>,
    active: &[Option<ActiveNote>; NUM_VOICES],
    channels: &[ChannelState; NUM_CHANNELS],
    channel: u8,
    tick: SourceTick,
) {
    let state = channels[channel as usize];
    for (idx, slot) in active.iter().enumerate() {
        let Some(note) = (*slot).filter(|a| a.channel == channel) else {
            continue;
        };
        scheduled.push(VoiceEvent {
            source_tick: tick,
            voice: idx as u8 + 1,
            kind: VoiceEventKind::Sound(SoundParams {
                note: note.note,
                velocity: note.velocity,
                channel_volume: state.volume,
                expression: state.expression,
                modulation: state.modulation,
                bend_semitones: state.bend_semitones,
                waveform: note.waveform,
                macro_volume: None,
            }),
        });
    }
}

/// Pair each note-on with its matching note-off tick, first-on
/// first-off per (channel, note).
fn link_note_offs(smf: &SmfFile) -> Vec<Option<SourceTick>> {
    let mut off_ticks = vec![None; smf.events.len()];
    let mut pending: HashMap<(u8, u8), Vec<usize>> = HashMap::new();

    for (i, event) in smf.events.iter().enumerate() {
        match event.message {
            MidiMessage::NoteOn { channel, note, .. } => {
                pending.entry((channel, note)).or_default().push(i);
            }
            MidiMessage::NoteOff { channel, note } => {
                if let Some(queue) = pending.get_mut(&(channel, note)) {
                    if !queue.is_empty() {
                        let on_idx = queue.remove(0);
                        off_ticks[on_idx] = Some(event.tick);
                    }
                }
            }
            _ => {}
        }
    }
    off_ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_formats::parse_macro_config;
    use gt_ir::TrackEvent;

    fn file(events: Vec<(SourceTick, MidiMessage)>) -> SmfFile {
        SmfFile {
            pulses_per_quarter: 480,
            events: events
                .into_iter()
                .map(|(tick, message)| TrackEvent {
                    track: 0,
                    tick,
                    message,
                })
                .collect(),
        }
    }

    fn note_on(channel: u8, note: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        }
    }

    fn note_off(channel: u8, note: u8) -> MidiMessage {
        MidiMessage::NoteOff { channel, note }
    }

    #[test]
    fn single_note_produces_sound_then_silence() {
        let smf = file(vec![
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
        ]);
        let records = convert(&smf, None, &ConvertOptions::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_tick, 0);
        assert_eq!(records[0].voice, 1);
        assert_eq!(records[0].note, 60);
        assert_eq!(records[0].volume, 50);
        assert_eq!(records[1].device_tick, 30);
        assert!(records[1].is_off());
    }

    #[test]
    fn fifth_channel_is_silent_under_static_policy() {
        let mut events = Vec::new();
        for ch in 0..5u8 {
            events.push((0, note_on(ch, 60 + ch, 100)));
        }
        for ch in 0..5u8 {
            events.push((480, note_off(ch, 60 + ch)));
        }
        let records = convert(&file(events), None, &ConvertOptions::default());
        let voices: std::collections::HashSet<_> = records.iter().map(|r| r.voice).collect();
        assert_eq!(voices.len(), 4);
        assert!(records.iter().all(|r| r.voice <= 4));
        // channel 4's pitch 64 never sounds
        assert!(records.iter().all(|r| r.note != 64 || r.is_off()));
    }

    #[test]
    fn macro_steps_shape_the_volume() {
        let config = parse_macro_config(
            "[Instrument_0]\naccuracy=30\nvol=63 40 release 20 0\n",
        );
        // one quarter at 120 BPM is 30 device ticks, so one macro
        // step spans 480 source ticks
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (1440, note_off(0, 60)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        let volumes: Vec<_> = records.iter().map(|r| r.volume).collect();
        // on steps 63 then 40, release 20, final silence
        assert_eq!(volumes, vec![63, 40, 20, 0]);
        assert_eq!(records[2].device_tick, 90);
        assert_eq!(records[3].device_tick, 120);
    }

    #[test]
    fn raw_note_off_yields_to_release_tail() {
        let config = parse_macro_config(
            "[Instrument_0]\naccuracy=30\nvol=63 release 20 0\n",
        );
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (1440, note_off(0, 60)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        // no off record at the raw note-off (device tick 90); the
        // tail plays 20 there and closes at 120
        let at_90: Vec<_> = records.iter().filter(|r| r.device_tick == 90).collect();
        assert_eq!(at_90.len(), 1);
        assert_eq!(at_90[0].volume, 20);
        assert!(records.last().unwrap().is_off());
        assert_eq!(records.last().unwrap().device_tick, 120);
    }

    #[test]
    fn short_note_gets_no_release_tail() {
        let config = parse_macro_config(
            "[Instrument_0]\naccuracy=30\nvol=63 release 20 0\n",
        );
        // the gate is 2 * accuracy = 60 device ticks = 960 source
        // ticks; a note exactly that long gets no tail
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (960, note_off(0, 60)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        assert_eq!(records.len(), 2);
        assert!(records[1].is_off());
        assert_eq!(records[1].device_tick, 60);
    }

    #[test]
    fn unlisted_program_gets_the_fallback_profile() {
        // config present but no [Instrument_0] section: the synthetic
        // default applies, not the raw velocity-scaled path
        let config = parse_macro_config("[Instrument_5]\nvol=63 40\n");
        let smf = file(vec![
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        assert_eq!(records.len(), 2);
        // fallback on-sequence is one step at full volume
        assert_eq!(records[0].volume, 63);
        assert!(records[1].is_off());
        assert_eq!(records[1].device_tick, 30);
    }

    #[test]
    fn earlier_short_note_keeps_its_off_despite_later_tail() {
        let config = parse_macro_config(
            "[Instrument_0]\naccuracy=30\nvol=63 release 20 0\n",
        );
        // first note is exactly gate length (no tail); a later note on
        // the same pitch grows a tail that must not reach back
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (960, note_off(0, 60)),
            (2000, note_on(0, 60, 127)),
            (4000, note_off(0, 60)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        // the first note's raw off lands at device tick 60
        assert!(records
            .iter()
            .any(|r| r.device_tick == 60 && r.is_off()));
        // the second note's raw off (device tick 250) yields to its
        // tail, which plays 20 there and closes at 280
        let at_250: Vec<_> = records.iter().filter(|r| r.device_tick == 250).collect();
        assert_eq!(at_250.len(), 1);
        assert_eq!(at_250[0].volume, 20);
        assert_eq!(records.last().unwrap().device_tick, 280);
        assert!(records.last().unwrap().is_off());
    }

    #[test]
    fn volume_controller_rebroadcasts_to_sounding_voice() {
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (
                240,
                MidiMessage::Controller {
                    channel: 0,
                    controller: 7,
                    value: 64,
                },
            ),
            (480, note_off(0, 60)),
        ]);
        let records = convert(&smf, None, &ConvertOptions::default());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].volume, 63);
        // 127/127 * 64/127 * 63 = 31.7 -> 32
        assert_eq!(records[1].volume, 32);
        assert_eq!(records[1].device_tick, 15);
    }

    #[test]
    fn no_velocity_flag_freezes_volume_changes() {
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (
                240,
                MidiMessage::Controller {
                    channel: 0,
                    controller: 7,
                    value: 64,
                },
            ),
            (480, note_off(0, 60)),
        ]);
        let opts = ConvertOptions {
            no_velocity_change: true,
            ..Default::default()
        };
        let records = convert(&smf, None, &opts);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn pitch_bend_rebroadcasts_with_shifted_note() {
        let smf = file(vec![
            (0, note_on(0, 60, 127)),
            (
                240,
                MidiMessage::PitchBend {
                    channel: 0,
                    value: 16383,
                },
            ),
            (480, note_off(0, 60)),
        ]);
        let records = convert(&smf, None, &ConvertOptions::default());
        // default bend range 2 semitones, full up
        assert_eq!(records[1].note, 62);
    }

    #[test]
    fn max_duration_truncates_processing() {
        let smf = file(vec![
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
            (9600, note_on(0, 64, 100)),
            (10080, note_off(0, 64)),
        ]);
        let opts = ConvertOptions {
            // 2 s at 120 BPM is 1920 source ticks
            max_duration_seconds: Some(2.0),
            ..Default::default()
        };
        let records = convert(&smf, None, &opts);
        assert!(records.iter().all(|r| r.note != 64 || r.is_off()));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn speed_multiplier_compresses_output_time() {
        let smf = file(vec![
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
        ]);
        let opts = ConvertOptions {
            speed: 2.0,
            ..Default::default()
        };
        let records = convert(&smf, None, &opts);
        assert_eq!(records[1].device_tick, 15);
    }

    #[test]
    fn drum_channel_uses_drum_profile_waveform() {
        let config = parse_macro_config("[Drum_38]\nwave=3\nvol=63 0\naccuracy=1\n");
        let smf = file(vec![
            (0, note_on(9, 38, 127)),
            (480, note_off(9, 38)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        assert_eq!(records[0].waveform, 3);

        // unconfigured drums fall back to waveform 0
        let smf = file(vec![
            (0, note_on(9, 40, 127)),
            (480, note_off(9, 40)),
        ]);
        let records = convert(&smf, Some(&config), &ConvertOptions::default());
        assert_eq!(records[0].waveform, 0);
    }

    #[test]
    fn program_change_selects_default_waveform() {
        let smf = file(vec![
            (
                0,
                MidiMessage::ProgramChange {
                    channel: 0,
                    program: 80,
                },
            ),
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
        ]);
        let records = convert(&smf, None, &ConvertOptions::default());
        assert_eq!(records[0].waveform, 2);
    }

    #[test]
    fn note_clamps_into_device_range() {
        let smf = file(vec![
            (0, note_on(0, 5, 100)),
            (480, note_off(0, 5)),
        ]);
        let records = convert(&smf, None, &ConvertOptions::default());
        assert_eq!(records[0].note, 12);
    }

    #[test]
    fn byte_stream_ends_with_sentinel() {
        let smf = file(vec![
            (0, note_on(0, 60, 100)),
            (480, note_off(0, 60)),
        ]);
        let bytes = convert_to_bytes(&smf, None, &ConvertOptions::default());
        assert_eq!(bytes.last(), Some(&0));
        // full update for voice 1 leads the stream
        assert_eq!(bytes[0], 175 + 1);
    }
}
