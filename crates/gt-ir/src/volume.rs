//! Scalar conversions between source controller values and device units.

/// Maximum device volume.
pub const MAX_VOLUME: u8 = 63;

/// Clamp a note number into the device's playable range.
pub fn clamp_note(note: u8) -> u8 {
    note.clamp(12, 105)
}

/// Combine velocity, channel volume, and expression into a device
/// volume. Each input is a 7-bit controller value treated as a 0-1
/// fraction of full scale.
pub fn scale_volume(velocity: u8, channel_volume: u8, expression: u8) -> u8 {
    let normalized = (velocity as f64 / 127.0)
        * (channel_volume as f64 / 127.0)
        * (expression as f64 / 127.0);
    (normalized * MAX_VOLUME as f64).round() as u8
}

/// Quantize a device volume down to `levels` distinct steps.
///
/// Each step maps to the midpoint of its bucket so relative loudness
/// survives the reduction. One level silences everything; 64 or more
/// levels leaves the value untouched.
pub fn simplify_volume(volume: u8, levels: u8) -> u8 {
    if levels <= 1 {
        return 0;
    }
    if levels >= 64 {
        return volume;
    }
    let level_size = 64 / levels as u32;
    let level = (volume as u32 / level_size).min(levels as u32 - 1);
    (level * level_size + level_size / 2) as u8
}

/// Raise a nonzero volume to at least `floor`. Silence stays silent.
pub fn boost_volume(volume: u8, floor: u8) -> u8 {
    if volume == 0 {
        return 0;
    }
    volume.max(floor).min(MAX_VOLUME)
}
