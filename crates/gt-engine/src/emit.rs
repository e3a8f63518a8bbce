//! Instruction stream packing.
//!
//! Turns ordered emission records into delay/voice instructions,
//! chunked into bounded segments. The byte encoding follows the
//! device player's opcode layout: a delay is its raw frame count,
//! voice opcodes are offset by voice number, and each segment is
//! terminated by a zero sentinel.

use gt_ir::EmissionRecord;

/// Instructions per segment before a new one starts.
pub const SEGMENT_INSTRUCTION_LIMIT: usize = 64;

/// Largest frame count a single delay instruction can carry.
const MAX_DELAY: u64 = 127;

const OP_OFF: u8 = 127;
const OP_NOTE_VOL: u8 = 159;
const OP_FULL: u8 = 175;

/// One device instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction {
    /// Wait this many device frames (1-127).
    Delay(u8),
    /// Silence a voice.
    Off { voice: u8 },
    /// Retrigger with a new note and volume, keeping the voice's
    /// current waveform and pitch.
    NoteVol { voice: u8, note: u8, volume: u8 },
    /// Full update: note, volume, waveform, and fine pitch.
    Full {
        voice: u8,
        note: u8,
        volume: u8,
        waveform: u8,
        bend: i8,
    },
}

impl Instruction {
    fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Instruction::Delay(frames) => out.push(frames),
            Instruction::Off { voice } => out.push(OP_OFF + voice),
            Instruction::NoteVol { voice, note, volume } => {
                out.push(OP_NOTE_VOL + voice);
                out.push(note);
                out.push(encode_volume(volume));
            }
            Instruction::Full {
                voice,
                note,
                volume,
                waveform,
                bend,
            } => {
                out.push(OP_FULL + voice);
                out.push(note);
                out.push(encode_volume(volume));
                out.push(waveform);
                out.push(bend as u8);
            }
        }
    }
}

/// The player reads volume inverted, 64 loudest.
fn encode_volume(volume: u8) -> u8 {
    (127 - volume).clamp(64, 127)
}

/// A bounded run of instructions.
#[derive(Clone, Debug, Default)]
pub struct Segment {
    pub instructions: Vec<Instruction>,
}

/// Pack emission records into instruction segments.
///
/// A voice id outside 1-4 in the input is a bug upstream.
pub fn build_segments(records: &[EmissionRecord]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = Segment::default();
    let mut cursor: u64 = 0;

    // Per-voice last emitted waveform and bend, used to pick the
    // short encoding when neither changed.
    let mut sounding = [false; 4];
    let mut last_waveform = [0u8; 4];
    let mut last_bend = [0i8; 4];

    let push = |segments: &mut Vec<Segment>, current: &mut Segment, inst: Instruction| {
        current.instructions.push(inst);
        if current.instructions.len() >= SEGMENT_INSTRUCTION_LIMIT {
            segments.push(std::mem::take(current));
        }
    };

    for record in records {
        assert!(
            (1..=4).contains(&record.voice),
            "voice out of range: {}",
            record.voice
        );
        let idx = record.voice as usize - 1;

        let mut gap = record.device_tick.saturating_sub(cursor);
        while gap > 0 {
            let step = gap.min(MAX_DELAY);
            push(&mut segments, &mut current, Instruction::Delay(step as u8));
            gap -= step;
        }
        cursor = cursor.max(record.device_tick);

        let inst = if record.is_off() {
            sounding[idx] = false;
            Instruction::Off {
                voice: record.voice,
            }
        } else if sounding[idx]
            && record.waveform == last_waveform[idx]
            && record.bend == last_bend[idx]
        {
            Instruction::NoteVol {
                voice: record.voice,
                note: record.note,
                volume: record.volume,
            }
        } else {
            sounding[idx] = true;
            last_waveform[idx] = record.waveform;
            last_bend[idx] = record.bend;
            Instruction::Full {
                voice: record.voice,
                note: record.note,
                volume: record.volume,
                waveform: record.waveform,
                bend: record.bend,
            }
        };
        push(&mut segments, &mut current, inst);
    }

    if !current.instructions.is_empty() {
        segments.push(current);
    }
    segments
}

/// Encode segments to the player's byte stream, one zero sentinel
/// after each segment.
pub fn encode_segments(segments: &[Segment]) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in segments {
        for inst in &segment.instructions {
            inst.encode(&mut out);
        }
        out.push(0);
    }
    out
}
