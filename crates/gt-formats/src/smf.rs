//! Standard MIDI File parser.
//!
//! Chunk framing goes through binrw; the event stream inside each
//! track chunk is decoded by a byte cursor since running status and
//! variable-length quantities do not map onto fixed records.

use binrw::{io::Cursor, BinRead};
use gt_ir::{MidiMessage, SourceTick, TrackEvent};

use crate::FormatError;

#[derive(BinRead)]
#[br(big, magic = b"MThd")]
struct HeaderChunk {
    length: u32,
    _format: u16,
    num_tracks: u16,
    division: u16,
}

#[derive(BinRead)]
#[br(big, magic = b"MTrk")]
struct TrackHeader {
    length: u32,
}

/// A parsed MIDI file, flattened to a single tick-ordered event list.
pub struct SmfFile {
    pub pulses_per_quarter: u16,
    /// All channel and tempo events, sorted by tick. The sort is
    /// stable, so simultaneous events keep track order.
    pub events: Vec<TrackEvent>,
}

/// Parse an SMF byte buffer.
pub fn load_smf(data: &[u8]) -> Result<SmfFile, FormatError> {
    let mut cursor = Cursor::new(data);
    let header = HeaderChunk::read(&mut cursor).map_err(header_error)?;

    if header.division & 0x8000 != 0 {
        // SMPTE division
        return Err(FormatError::UnsupportedTiming);
    }
    if header.division == 0 {
        return Err(FormatError::InvalidHeader);
    }

    // Skip any header bytes beyond the standard six.
    let mut pos = 8 + header.length as usize;
    if pos > data.len() {
        return Err(FormatError::UnexpectedEof);
    }

    let mut events = Vec::new();
    for track in 0..header.num_tracks {
        let mut cursor = Cursor::new(&data[pos..]);
        let chunk = TrackHeader::read(&mut cursor).map_err(header_error)?;
        let body_start = pos + 8;
        let body_end = body_start + chunk.length as usize;
        if body_end > data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        decode_track(&data[body_start..body_end], track, &mut events)?;
        pos = body_end;
    }

    events.sort_by_key(|e| e.tick);
    Ok(SmfFile {
        pulses_per_quarter: header.division,
        events,
    })
}

fn header_error(err: binrw::Error) -> FormatError {
    match err {
        binrw::Error::Io(e) => FormatError::Io(e.to_string()),
        _ => FormatError::InvalidHeader,
    }
}

// ---------------------------------------------------------------------------
// TrackReader — cursor over one track chunk's event bytes
// ---------------------------------------------------------------------------

struct TrackReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TrackReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        if self.pos >= self.data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn peek_u8(&self) -> Result<u8, FormatError> {
        if self.pos >= self.data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        Ok(self.data[self.pos])
    }

    fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        if self.pos + n > self.data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    /// Variable-length quantity, at most four bytes.
    fn read_vlq(&mut self) -> Result<u32, FormatError> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::InvalidHeader)
    }
}

fn decode_track(
    body: &[u8],
    track: u16,
    events: &mut Vec<TrackEvent>,
) -> Result<(), FormatError> {
    let mut reader = TrackReader::new(body);
    let mut tick: SourceTick = 0;
    let mut running_status: Option<u8> = None;

    while !reader.at_end() {
        tick += reader.read_vlq()? as SourceTick;

        let status = if reader.peek_u8()? & 0x80 != 0 {
            reader.read_u8()?
        } else {
            running_status.ok_or(FormatError::InvalidHeader)?
        };

        match status {
            0xFF => {
                running_status = None;
                let meta_type = reader.read_u8()?;
                let len = reader.read_vlq()? as usize;
                match meta_type {
                    // Set tempo: 24-bit microseconds per quarter note.
                    0x51 => {
                        if len != 3 {
                            return Err(FormatError::InvalidHeader);
                        }
                        let b0 = reader.read_u8()? as u32;
                        let b1 = reader.read_u8()? as u32;
                        let b2 = reader.read_u8()? as u32;
                        events.push(TrackEvent {
                            track,
                            tick,
                            message: MidiMessage::Tempo((b0 << 16) | (b1 << 8) | b2),
                        });
                    }
                    // End of track.
                    0x2F => return Ok(()),
                    _ => reader.skip(len)?,
                }
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let len = reader.read_vlq()? as usize;
                reader.skip(len)?;
            }
            _ => {
                running_status = Some(status);
                let channel = status & 0x0F;
                match status & 0xF0 {
                    0x80 => {
                        let note = reader.read_u8()? & 0x7F;
                        reader.skip(1)?;
                        events.push(TrackEvent {
                            track,
                            tick,
                            message: MidiMessage::NoteOff { channel, note },
                        });
                    }
                    0x90 => {
                        let note = reader.read_u8()? & 0x7F;
                        let velocity = reader.read_u8()? & 0x7F;
                        let message = if velocity == 0 {
                            MidiMessage::NoteOff { channel, note }
                        } else {
                            MidiMessage::NoteOn {
                                channel,
                                note,
                                velocity,
                            }
                        };
                        events.push(TrackEvent {
                            track,
                            tick,
                            message,
                        });
                    }
                    0xB0 => {
                        let controller = reader.read_u8()? & 0x7F;
                        let value = reader.read_u8()? & 0x7F;
                        events.push(TrackEvent {
                            track,
                            tick,
                            message: MidiMessage::Controller {
                                channel,
                                controller,
                                value,
                            },
                        });
                    }
                    0xC0 => {
                        let program = reader.read_u8()? & 0x7F;
                        events.push(TrackEvent {
                            track,
                            tick,
                            message: MidiMessage::ProgramChange { channel, program },
                        });
                    }
                    0xE0 => {
                        let lsb = reader.read_u8()? as u16 & 0x7F;
                        let msb = reader.read_u8()? as u16 & 0x7F;
                        events.push(TrackEvent {
                            track,
                            tick,
                            message: MidiMessage::PitchBend {
                                channel,
                                value: (msb << 7) | lsb,
                            },
                        });
                    }
                    // Polyphonic aftertouch: two data bytes, unused.
                    0xA0 => reader.skip(2)?,
                    // Channel pressure: one data byte, unused.
                    0xD0 => reader.skip(1)?,
                    _ => return Err(FormatError::InvalidHeader),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(value: u32) -> Vec<u8> {
        let mut out = vec![(value & 0x7F) as u8];
        let mut rest = value >> 7;
        while rest != 0 {
            out.insert(0, 0x80 | (rest & 0x7F) as u8);
            rest >>= 7;
        }
        out
    }

    fn smf(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        data.extend_from_slice(&ppq.to_be_bytes());
        for body in tracks {
            let mut full = body.clone();
            // end-of-track meta
            full.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
            data.extend_from_slice(b"MTrk");
            data.extend_from_slice(&(full.len() as u32).to_be_bytes());
            data.extend_from_slice(&full);
        }
        data
    }

    #[test]
    fn rejects_bad_magic() {
        let data = b"RIFFxxxxxxxx";
        assert!(matches!(
            load_smf(data),
            Err(FormatError::InvalidHeader)
        ));
    }

    #[test]
    fn rejects_smpte_division() {
        let data = smf(0xE728, &[vec![]]);
        assert!(matches!(
            load_smf(&data),
            Err(FormatError::UnsupportedTiming)
        ));
    }

    #[test]
    fn decodes_note_pair() {
        let mut body = Vec::new();
        body.extend(vlq(0));
        body.extend_from_slice(&[0x90, 60, 100]);
        body.extend(vlq(480));
        body.extend_from_slice(&[0x80, 60, 0]);
        let file = load_smf(&smf(480, &[body])).unwrap();

        assert_eq!(file.pulses_per_quarter, 480);
        assert_eq!(file.events.len(), 2);
        assert_eq!(
            file.events[0].message,
            MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(file.events[1].tick, 480);
        assert_eq!(
            file.events[1].message,
            MidiMessage::NoteOff {
                channel: 0,
                note: 60
            }
        );
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let mut body = Vec::new();
        body.extend(vlq(0));
        body.extend_from_slice(&[0x90, 60, 0]);
        let file = load_smf(&smf(96, &[body])).unwrap();
        assert_eq!(
            file.events[0].message,
            MidiMessage::NoteOff {
                channel: 0,
                note: 60
            }
        );
    }

    #[test]
    fn running_status_reuses_last_status_byte() {
        let mut body = Vec::new();
        body.extend(vlq(0));
        body.extend_from_slice(&[0x91, 60, 100]);
        body.extend(vlq(10));
        // no status byte: still note-on channel 1
        body.extend_from_slice(&[64, 90]);
        let file = load_smf(&smf(96, &[body])).unwrap();
        assert_eq!(
            file.events[1].message,
            MidiMessage::NoteOn {
                channel: 1,
                note: 64,
                velocity: 90
            }
        );
    }

    #[test]
    fn decodes_tempo_meta() {
        let mut body = Vec::new();
        body.extend(vlq(0));
        body.extend_from_slice(&[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
        let file = load_smf(&smf(96, &[body])).unwrap();
        assert_eq!(file.events[0].message, MidiMessage::Tempo(500_000));
    }

    #[test]
    fn merges_tracks_in_tick_order() {
        let mut t0 = Vec::new();
        t0.extend(vlq(100));
        t0.extend_from_slice(&[0x90, 60, 100]);
        let mut t1 = Vec::new();
        t1.extend(vlq(50));
        t1.extend_from_slice(&[0x91, 62, 100]);
        let file = load_smf(&smf(96, &[t0, t1])).unwrap();
        assert_eq!(file.events[0].tick, 50);
        assert_eq!(file.events[0].track, 1);
        assert_eq!(file.events[1].tick, 100);
        assert_eq!(file.events[1].track, 0);
    }

    #[test]
    fn decodes_pitch_bend_fourteen_bit() {
        let mut body = Vec::new();
        body.extend(vlq(0));
        body.extend_from_slice(&[0xE0, 0x00, 0x60]);
        let file = load_smf(&smf(96, &[body])).unwrap();
        assert_eq!(
            file.events[0].message,
            MidiMessage::PitchBend {
                channel: 0,
                value: 0x60 << 7
            }
        );
    }
}
