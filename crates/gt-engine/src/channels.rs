//! Per-source-channel controller state.

/// Running controller state for one of the 16 source channels.
///
/// Updated as control-change, program-change, and pitch-bend messages
/// arrive; sampled whenever a note starts or a change is re-broadcast
/// to a sounding voice.
#[derive(Clone, Copy, Debug)]
pub struct ChannelState {
    pub program: u8,
    /// CC 7, defaults to full.
    pub volume: u8,
    /// CC 11, defaults to full.
    pub expression: u8,
    /// CC 1.
    pub modulation: u8,
    /// Current bend in semitones, already scaled by the bend range.
    pub bend_semitones: f64,
    bend_range: f64,
    rpn_msb: Option<u8>,
    rpn_lsb: Option<u8>,
    data_entry_msb: Option<u8>,
    data_entry_lsb: Option<u8>,
    last_bend_raw: u16,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 127,
            expression: 127,
            modulation: 0,
            bend_semitones: 0.0,
            bend_range: 2.0,
            rpn_msb: None,
            rpn_lsb: None,
            data_entry_msb: None,
            data_entry_lsb: None,
            last_bend_raw: 8192,
        }
    }
}

impl ChannelState {
    /// Apply a control change. RPN 0 (registered parameter
    /// "pitch bend sensitivity") sets the bend range via data entry;
    /// the range is clamped to [0, 72] semitones.
    pub fn apply_controller(&mut self, controller: u8, value: u8) {
        match controller {
            1 => self.modulation = value,
            7 => self.volume = value,
            11 => self.expression = value,
            101 => self.rpn_msb = Some(value),
            100 => self.rpn_lsb = Some(value),
            6 => {
                self.data_entry_msb = Some(value);
                self.update_bend_range();
            }
            38 => {
                self.data_entry_lsb = Some(value);
                self.update_bend_range();
            }
            _ => {}
        }
    }

    fn update_bend_range(&mut self) {
        if self.rpn_msb == Some(0) && self.rpn_lsb == Some(0) {
            let semis = self.data_entry_msb.unwrap_or(0) as f64;
            let cents = self.data_entry_lsb.unwrap_or(0) as f64 / 100.0;
            self.bend_range = (semis + cents).clamp(0.0, 72.0);
            // Re-scale any bend already in effect.
            self.apply_bend(self.last_bend_raw);
        }
    }

    /// Apply a raw 14-bit pitch bend value, centered at 8192.
    pub fn apply_bend(&mut self, raw: u16) {
        self.last_bend_raw = raw;
        self.bend_semitones = (raw as f64 - 8192.0) / 8192.0 * self.bend_range;
    }
}

/// Default program-to-waveform mapping used when no config supplies
/// one: 80 (square lead) and 127 (gunshot/noise) get the matching
/// hardware waveforms, everything else falls back to triangle.
pub fn default_waveform(program: u8) -> u8 {
    match program {
        80 => 2,
        127 => 0,
        _ => 1,
    }
}

/// Percussion lives on channel 9 within the General MIDI drum map
/// range; notes outside it are treated as ordinary pitches.
pub fn is_drum_note(channel: u8, note: u8) -> bool {
    channel == 9 && (27..=87).contains(&note)
}
