//! Instrument macro config parser.
//!
//! Line-oriented INI text: `[General]` holds `default_accuracy`,
//! `[Instrument_<id>]` and `[Drum_<id>]` sections hold `name`,
//! `accuracy`, and macro keys whose values use the step token
//! grammar. The parser is lenient by design: malformed tokens and
//! unknown keys are dropped and lookups never fail, so a broken
//! config degrades to default profiles instead of aborting a run.

use std::collections::HashMap;

use gt_ir::{InstrumentProfile, MacroDef, MacroKind, MacroStep, DEFAULT_ACCURACY};

/// Parsed macro configuration: instrument and drum profiles keyed by
/// id, plus the accuracy applied to sections that set none.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroConfig {
    pub default_accuracy: u32,
    instruments: HashMap<u8, InstrumentProfile>,
    drums: HashMap<u8, InstrumentProfile>,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            default_accuracy: DEFAULT_ACCURACY,
            instruments: HashMap::new(),
            drums: HashMap::new(),
        }
    }
}

impl MacroConfig {
    pub fn has_instrument(&self, program: u8) -> bool {
        self.instruments.contains_key(&program)
    }

    pub fn has_drum(&self, note: u8) -> bool {
        self.drums.contains_key(&note)
    }

    pub fn instrument(&self, program: u8) -> Option<&InstrumentProfile> {
        self.instruments.get(&program)
    }

    pub fn drum(&self, note: u8) -> Option<&InstrumentProfile> {
        self.drums.get(&note)
    }

    /// Instrument profile for `program`, falling back to the
    /// synthetic default when the id has no section.
    pub fn instrument_or_default(&self, program: u8) -> InstrumentProfile {
        self.instruments
            .get(&program)
            .cloned()
            .unwrap_or_else(|| InstrumentProfile::fallback(self.default_accuracy))
    }

    /// Drum profile for `note`, falling back like
    /// [`MacroConfig::instrument_or_default`].
    pub fn drum_or_default(&self, note: u8) -> InstrumentProfile {
        self.drums
            .get(&note)
            .cloned()
            .unwrap_or_else(|| InstrumentProfile::fallback(self.default_accuracy))
    }
}

enum Section {
    General,
    Instrument(u8),
    Drum(u8),
    Other,
}

/// Parse config text. Never fails; unparseable lines are skipped.
pub fn parse_macro_config(text: &str) -> MacroConfig {
    let mut config = MacroConfig::default();
    let mut section = Section::Other;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = parse_section_header(&line[1..line.len() - 1]);
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match section {
            Section::General => {
                if key == "default_accuracy" {
                    if let Ok(acc) = value.parse() {
                        config.default_accuracy = acc;
                    }
                }
            }
            Section::Instrument(id) => {
                let default_accuracy = config.default_accuracy;
                let profile = config
                    .instruments
                    .entry(id)
                    .or_insert_with(|| InstrumentProfile::new("", default_accuracy));
                apply_profile_key(profile, key, value);
            }
            Section::Drum(id) => {
                let default_accuracy = config.default_accuracy;
                let profile = config
                    .drums
                    .entry(id)
                    .or_insert_with(|| InstrumentProfile::new("", default_accuracy));
                apply_profile_key(profile, key, value);
            }
            Section::Other => {}
        }
    }

    config
}

fn parse_section_header(name: &str) -> Section {
    if name == "General" {
        return Section::General;
    }
    if let Some(id) = name.strip_prefix("Instrument_") {
        if let Ok(id) = id.parse() {
            return Section::Instrument(id);
        }
    }
    if let Some(id) = name.strip_prefix("Drum_") {
        if let Ok(id) = id.parse() {
            return Section::Drum(id);
        }
    }
    Section::Other
}

fn apply_profile_key(profile: &mut InstrumentProfile, key: &str, value: &str) {
    match key {
        "name" => {
            profile.name.clear();
            let _ = profile.name.try_push_str(value);
        }
        "accuracy" => {
            if let Ok(acc) = value.parse() {
                profile.accuracy = acc;
            }
        }
        "vol" => profile.macros.push(parse_macro(MacroKind::Volume, value)),
        "note" => profile.macros.push(parse_macro(MacroKind::NoteOffset, value)),
        "wave" => profile.macros.push(parse_macro(MacroKind::Waveform, value)),
        "pitch_bend" => profile.macros.push(parse_macro(MacroKind::PitchBend, value)),
        _ => {}
    }
}

/// Parse one macro value string into its on and release phase lists.
///
/// The `release` keyword switches phases for the rest of the string.
/// `=D` attaches a duration to the preceding value, replacing the
/// trailing `Value` step when one exists.
fn parse_macro(kind: MacroKind, value: &str) -> MacroDef {
    let mut def = MacroDef::new(kind);
    let mut in_release = false;

    let tokens: Vec<&str> = value.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        i += 1;

        if token == "release" {
            in_release = true;
            continue;
        }

        let steps = if in_release {
            &mut def.release
        } else {
            &mut def.on
        };

        let step = if token == "loop_start" {
            Some(MacroStep::LoopStart)
        } else if token == "loop_end" {
            Some(MacroStep::LoopEnd)
        } else if let Some(duration) = token.strip_prefix(">=") {
            // Transition: ">=D T" pairs a duration with the next token.
            let duration = duration.parse().ok();
            let target = tokens.get(i).and_then(|t| t.parse().ok());
            match (duration, target) {
                (Some(duration), Some(target)) => {
                    i += 1;
                    Some(MacroStep::Transition { target, duration })
                }
                _ => None,
            }
        } else if token.contains('~') && token.contains('=') {
            parse_range(token)
        } else if let Some(duration) = token.strip_prefix('=') {
            duration.parse().ok().and_then(|duration| {
                match steps.last() {
                    Some(MacroStep::Value(value)) => {
                        let value = *value;
                        steps.pop();
                        Some(MacroStep::Hold { value, duration })
                    }
                    // No trailing value to fold; reuse the previous
                    // token if it parses as one.
                    _ => i
                        .checked_sub(2)
                        .and_then(|prev| tokens.get(prev))
                        .and_then(|t| t.parse().ok())
                        .map(|value| MacroStep::Hold { value, duration }),
                }
            })
        } else {
            token.parse().ok().map(MacroStep::Value)
        };

        if let Some(step) = step {
            let _ = steps.try_push(step);
        }
    }

    def
}

fn parse_range(token: &str) -> Option<MacroStep> {
    let (start, rest) = token.split_once('~')?;
    let (end, duration) = rest.split_once('=')?;
    Some(MacroStep::Range {
        start: start.parse().ok()?,
        end: end.parse().ok()?,
        duration: duration.parse().ok()?,
    })
}
