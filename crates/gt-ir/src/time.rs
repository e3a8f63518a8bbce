//! Source-to-device tick conversion.
//!
//! The input performance counts time in MIDI pulses whose wall-clock
//! length depends on the running tempo; the target device counts fixed
//! 60 Hz frames. `TickConverter` maps one to the other piecewise,
//! re-anchoring at each tempo change so a change never rewrites
//! already-converted time.

/// Absolute position in source (MIDI) pulses.
pub type SourceTick = u64;

/// Absolute position in device frames.
pub type DeviceTick = u64;

/// Device frames per second.
pub const TICKS_PER_SECOND: u32 = 60;

/// Default tempo: 500000 µs per quarter note (120 BPM).
pub const DEFAULT_TEMPO_US: u32 = 500_000;

/// Timing parameters of the running conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickRate {
    /// Source pulses per quarter note.
    pub pulses_per_quarter: u16,
    /// Microseconds per quarter note.
    pub tempo_us: u32,
    /// Playback speed multiplier. >1.0 plays faster (fewer device
    /// ticks per source tick).
    pub speed: f64,
}

impl TickRate {
    pub fn new(pulses_per_quarter: u16) -> Self {
        Self {
            pulses_per_quarter,
            tempo_us: DEFAULT_TEMPO_US,
            speed: 1.0,
        }
    }

    /// Device ticks per source tick under the current tempo.
    pub fn device_per_source(&self) -> f64 {
        self.tempo_us as f64 * TICKS_PER_SECOND as f64
            / (self.pulses_per_quarter as f64 * 1_000_000.0 * self.speed)
    }

    /// Source ticks corresponding to `seconds` of wall-clock time
    /// under the current tempo. Used for the max-duration cutoff.
    pub fn seconds_to_source(&self, seconds: f64) -> SourceTick {
        (seconds * self.pulses_per_quarter as f64 * 1_000_000.0 / self.tempo_us as f64) as SourceTick
    }
}

/// Piecewise-linear source→device mapper.
///
/// A tempo change re-anchors the mapping at the change's source tick,
/// so conversions after the change use the new ratio while earlier
/// conversions are unaffected.
#[derive(Clone, Debug)]
pub struct TickConverter {
    rate: TickRate,
    anchor_source: SourceTick,
    anchor_device: f64,
}

impl TickConverter {
    pub fn new(rate: TickRate) -> Self {
        Self {
            rate,
            anchor_source: 0,
            anchor_device: 0.0,
        }
    }

    pub fn rate(&self) -> &TickRate {
        &self.rate
    }

    fn to_device_f(&self, tick: SourceTick) -> f64 {
        self.anchor_device
            + (tick.saturating_sub(self.anchor_source)) as f64 * self.rate.device_per_source()
    }

    /// Convert a source tick at or after the last tempo change.
    pub fn to_device(&self, tick: SourceTick) -> DeviceTick {
        self.to_device_f(tick) as DeviceTick
    }

    /// Apply a tempo change taking effect at `at` source ticks.
    /// Only subsequently converted ticks see the new ratio.
    pub fn set_tempo(&mut self, at: SourceTick, tempo_us: u32) {
        self.anchor_device = self.to_device_f(at);
        self.anchor_source = at;
        self.rate.tempo_us = tempo_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_480() -> TickRate {
        TickRate::new(480)
    }

    #[test]
    fn default_rate_is_120_bpm() {
        let r = rate_480();
        assert_eq!(r.tempo_us, DEFAULT_TEMPO_US);
        // 120 BPM at 480 ppq: one quarter = 0.5 s = 30 device ticks.
        assert!((r.device_per_source() - 30.0 / 480.0).abs() < 1e-12);
    }

    #[test]
    fn quarter_note_is_thirty_frames() {
        let conv = TickConverter::new(rate_480());
        assert_eq!(conv.to_device(480), 30);
        assert_eq!(conv.to_device(960), 60);
    }

    #[test]
    fn source_zero_maps_to_device_zero() {
        let conv = TickConverter::new(rate_480());
        assert_eq!(conv.to_device(0), 0);
    }

    #[test]
    fn speed_multiplier_compresses_time() {
        let mut rate = rate_480();
        rate.speed = 2.0;
        let conv = TickConverter::new(rate);
        assert_eq!(conv.to_device(480), 15);
    }

    #[test]
    fn tempo_change_is_not_retroactive() {
        let mut conv = TickConverter::new(rate_480());
        let before = conv.to_device(480);
        // Double tempo (60 BPM) from source tick 480 onward.
        conv.set_tempo(480, 1_000_000);
        assert_eq!(conv.to_device(480), before);
        // The next quarter note now spans 60 device ticks.
        assert_eq!(conv.to_device(960), before + 60);
    }

    #[test]
    fn seconds_to_source_uses_current_tempo() {
        let r = rate_480();
        // 1 s at 120 BPM = 2 quarters = 960 pulses.
        assert_eq!(r.seconds_to_source(1.0), 960);
    }
}
