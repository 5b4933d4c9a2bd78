//! The decoded event type and its lazy field accessors.
//!
//! Events keep their payload as raw bytes; every field is decoded on demand
//! straight from those bytes, so the hot iteration path never pays for
//! fields nobody looks at.

use crate::prelude::*;

/// The kinds of events found in a Standard Midi File, one variant per status
/// category.
///
/// The discriminants are the normalized status values carried on the wire
/// and are part of the public interface: for channel events the low nibble
/// (the channel) is zeroed, and for meta events the `0xFF` prefix is dropped
/// in favour of the meta type byte.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum EventKind {
    SequenceNumber = 0x00,
    Text = 0x01,
    Copyright = 0x02,
    TrackName = 0x03,
    InstrumentName = 0x04,
    Lyrics = 0x05,
    Marker = 0x06,
    CueMarker = 0x07,
    ProgramName = 0x08,
    DeviceName = 0x09,
    ChannelPrefix = 0x20,
    MidiPort = 0x21,
    EndOfTrack = 0x2F,
    SetTempo = 0x51,
    SmpteOffset = 0x54,
    TimeSignature = 0x58,
    KeySignature = 0x59,
    SequencerSpecific = 0x7F,
    NoteOff = 0x80,
    NoteOn = 0x90,
    Polytouch = 0xA0,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
    Aftertouch = 0xD0,
    Pitchwheel = 0xE0,
    Sysex = 0xF0,
    Escape = 0xF7,
}

impl EventKind {
    /// Map a normalized status byte back to its kind.
    ///
    /// Returns `None` for custom or unknown meta types, whose raw status is
    /// still visible through [`MidiEvent::status`].
    pub fn from_status(status: u8) -> Option<EventKind> {
        Some(match status {
            0x00 => EventKind::SequenceNumber,
            0x01 => EventKind::Text,
            0x02 => EventKind::Copyright,
            0x03 => EventKind::TrackName,
            0x04 => EventKind::InstrumentName,
            0x05 => EventKind::Lyrics,
            0x06 => EventKind::Marker,
            0x07 => EventKind::CueMarker,
            0x08 => EventKind::ProgramName,
            0x09 => EventKind::DeviceName,
            0x20 => EventKind::ChannelPrefix,
            0x21 => EventKind::MidiPort,
            0x2F => EventKind::EndOfTrack,
            0x51 => EventKind::SetTempo,
            0x54 => EventKind::SmpteOffset,
            0x58 => EventKind::TimeSignature,
            0x59 => EventKind::KeySignature,
            0x7F => EventKind::SequencerSpecific,
            0x80 => EventKind::NoteOff,
            0x90 => EventKind::NoteOn,
            0xA0 => EventKind::Polytouch,
            0xB0 => EventKind::ControlChange,
            0xC0 => EventKind::ProgramChange,
            0xD0 => EventKind::Aftertouch,
            0xE0 => EventKind::Pitchwheel,
            0xF0 => EventKind::Sysex,
            0xF7 => EventKind::Escape,
            _ => return None,
        })
    }

    /// The normalized status value for this kind.
    #[inline]
    pub fn as_int(self) -> u8 {
        self as u8
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            EventKind::SequenceNumber => "sequence_number",
            EventKind::Text => "text",
            EventKind::Copyright => "copyright",
            EventKind::TrackName => "track_name",
            EventKind::InstrumentName => "instrument_name",
            EventKind::Lyrics => "lyrics",
            EventKind::Marker => "marker",
            EventKind::CueMarker => "cue_marker",
            EventKind::ProgramName => "program_name",
            EventKind::DeviceName => "device_name",
            EventKind::ChannelPrefix => "channel_prefix",
            EventKind::MidiPort => "midi_port",
            EventKind::EndOfTrack => "end_of_track",
            EventKind::SetTempo => "set_tempo",
            EventKind::SmpteOffset => "smpte_offset",
            EventKind::TimeSignature => "time_signature",
            EventKind::KeySignature => "key_signature",
            EventKind::SequencerSpecific => "sequencer_specific",
            EventKind::NoteOff => "note_off",
            EventKind::NoteOn => "note_on",
            EventKind::Polytouch => "polytouch",
            EventKind::ControlChange => "control_change",
            EventKind::ProgramChange => "program_change",
            EventKind::Aftertouch => "aftertouch",
            EventKind::Pitchwheel => "pitchwheel",
            EventKind::Sysex => "sysex",
            EventKind::Escape => "escape",
        }
    }
}

/// One of the four SMPTE frame rates an offset meta event can carry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fps {
    Fps24,
    Fps25,
    Fps2997,
    Fps30,
}

impl Fps {
    /// Decode the two frame-rate bits of the hours byte.
    fn from_bits(bits: u8) -> Fps {
        match bits & 0x3 {
            0 => Fps::Fps24,
            1 => Fps::Fps25,
            2 => Fps::Fps2997,
            _ => Fps::Fps30,
        }
    }

    /// The frame rate as a number: 24, 25, 29.97 or 30.
    pub fn as_f32(self) -> f32 {
        match self {
            Fps::Fps24 => 24.0,
            Fps::Fps25 => 25.0,
            Fps::Fps2997 => 29.97,
            Fps::Fps30 => 30.0,
        }
    }
}

/// Major and minor key names indexed by sharps/flats offset by 7.
const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_KEYS: [&str; 15] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m",
    "A#m",
];

/// A single decoded midi event.
///
/// Produced by the iterators of [`MidiFile`](crate::MidiFile). Timing is
/// relative to the previously emitted event of the same iteration:
/// `delta_ticks` in the file's native midi ticks and `delta_us` converted
/// through the running tempo. Fields beyond timing are exposed through lazy
/// accessors; an accessor that does not apply to the event's kind fails with
/// [`ErrorKind::InvalidFieldForEvent`].
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MidiEvent {
    /// Midi ticks since the previously emitted event.
    pub delta_ticks: u32,
    /// Microseconds since the previously emitted event, per the tempo map.
    pub delta_us: u64,
    /// Scheduled wall-clock target, stamped by the players only.
    pub timestamp_us: Option<u64>,
    pub(crate) track: u16,
    pub(crate) status: u8,
    pub(crate) status_byte: u8,
    pub(crate) data: Vec<u8>,
}

impl MidiEvent {
    pub(crate) fn set_end_of_track(&mut self) {
        self.delta_ticks = 0;
        self.delta_us = 0;
        self.timestamp_us = None;
        self.status = EventKind::EndOfTrack.as_int();
        self.status_byte = self.status;
        self.data.clear();
    }

    /// The normalized status: channel events have the channel nibble zeroed,
    /// meta events are represented by their meta type byte.
    #[inline]
    pub fn status(&self) -> u8 {
        self.status
    }

    /// The kind of this event, or `None` for custom meta types.
    #[inline]
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_status(self.status)
    }

    /// Index of the track this event came from, in file order.
    #[inline]
    pub fn source_track(&self) -> u16 {
        self.track
    }

    /// The raw event payload: 1 or 2 bytes for channel events, the body
    /// without prefix or length for meta, sysex and escape events.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True for meta events (normalized status `0x00..=0x7F`).
    #[inline]
    pub fn is_meta(&self) -> bool {
        self.status < 0x80
    }

    #[inline]
    fn is_channel(&self) -> bool {
        (0x80..=0xEF).contains(&self.status)
    }

    fn expect(&self, kinds: &[EventKind]) -> Result<()> {
        let matches = kinds.iter().any(|kind| kind.as_int() == self.status);
        ensure!(
            matches,
            ErrorKind::InvalidFieldForEvent,
            "field not defined for this event kind"
        );
        Ok(())
    }

    fn byte(&self, index: usize) -> Result<u8> {
        match self.data.get(index) {
            Some(&byte) => Ok(byte),
            None => bail!(
                ErrorKind::InvalidFieldForEvent,
                "event payload shorter than expected"
            ),
        }
    }

    /// The channel (0-15) of a channel event or a channel prefix meta event.
    pub fn channel(&self) -> Result<u8> {
        if self.is_channel() {
            return Ok(self.status_byte & 0x0F);
        }
        self.expect(&[EventKind::ChannelPrefix])?;
        self.byte(0)
    }

    /// The note number, available for note on/off and polytouch.
    ///
    /// Values outside 0-127 are passed through untouched.
    pub fn note(&self) -> Result<u8> {
        self.expect(&[EventKind::NoteOn, EventKind::NoteOff, EventKind::Polytouch])?;
        self.byte(0)
    }

    /// The velocity of a note on/off event.
    pub fn velocity(&self) -> Result<u8> {
        self.expect(&[EventKind::NoteOn, EventKind::NoteOff])?;
        self.byte(1)
    }

    /// The value of an aftertouch, control change or polytouch event.
    pub fn value(&self) -> Result<u8> {
        if self.status == EventKind::Aftertouch.as_int() {
            return self.byte(0);
        }
        self.expect(&[EventKind::ControlChange, EventKind::Polytouch])?;
        self.byte(1)
    }

    /// The controller number of a control change event.
    pub fn control(&self) -> Result<u8> {
        self.expect(&[EventKind::ControlChange])?;
        self.byte(0)
    }

    /// The program number of a program change event.
    pub fn program(&self) -> Result<u8> {
        self.expect(&[EventKind::ProgramChange])?;
        self.byte(0)
    }

    /// The pitch of a pitchwheel event: -8192 for full bend down, 0 for no
    /// bend, 8191 for full bend up.
    pub fn pitch(&self) -> Result<i16> {
        self.expect(&[EventKind::Pitchwheel])?;
        let lsb = (self.byte(0)? & 0x7F) as i16;
        let msb = (self.byte(1)? & 0x7F) as i16;
        Ok(((msb << 7) | lsb) - 8192)
    }

    /// The number of a sequence number meta event, `0` for the empty form.
    pub fn number(&self) -> Result<u16> {
        self.expect(&[EventKind::SequenceNumber])?;
        let mut number = 0u16;
        for &byte in self.data.iter().take(2) {
            number = (number << 8) | byte as u16;
        }
        Ok(number)
    }

    /// The text of a text, copyright, lyrics, marker or cue marker event.
    ///
    /// Decoded as ASCII; bytes outside the ASCII range are preserved as
    /// `\xNN` escapes, so nothing is lost. The raw bytes stay available
    /// through [`data`](MidiEvent::data).
    pub fn text(&self) -> Result<String> {
        self.expect(&[
            EventKind::Text,
            EventKind::Copyright,
            EventKind::Lyrics,
            EventKind::Marker,
            EventKind::CueMarker,
        ])?;
        Ok(decode_ascii(&self.data))
    }

    /// The name of a track, instrument, program or device name event.
    ///
    /// Same decoding as [`text`](MidiEvent::text).
    pub fn name(&self) -> Result<String> {
        self.expect(&[
            EventKind::TrackName,
            EventKind::InstrumentName,
            EventKind::ProgramName,
            EventKind::DeviceName,
        ])?;
        Ok(decode_ascii(&self.data))
    }

    /// The port number of a midi port meta event.
    pub fn port(&self) -> Result<u8> {
        self.expect(&[EventKind::MidiPort])?;
        self.byte(0)
    }

    /// The tempo of a set tempo meta event, in microseconds per quarter note.
    pub fn tempo(&self) -> Result<u32> {
        self.expect(&[EventKind::SetTempo])?;
        ensure!(
            self.data.len() >= 3,
            ErrorKind::InvalidFieldForEvent,
            "set tempo payload shorter than 3 bytes"
        );
        Ok(u32::from_be_bytes([0, self.data[0], self.data[1], self.data[2]]))
    }

    /// The key name of a key signature meta event, e.g. `"F#"` or `"Ebm"`.
    pub fn key(&self) -> Result<&'static str> {
        self.expect(&[EventKind::KeySignature])?;
        ensure!(
            self.data.len() >= 2,
            ErrorKind::InvalidKeySignature,
            "key signature payload shorter than 2 bytes"
        );
        let sharps = self.data[0] as i8;
        let minor = self.data[1];
        ensure!(
            (-7..=7).contains(&sharps) && minor <= 1,
            ErrorKind::InvalidKeySignature,
            "key signature out of range"
        );
        let table = if minor == 0 { &MAJOR_KEYS } else { &MINOR_KEYS };
        Ok(table[(sharps + 7) as usize])
    }

    /// The numerator of a time signature meta event.
    pub fn numerator(&self) -> Result<u8> {
        self.expect(&[EventKind::TimeSignature])?;
        self.byte(0)
    }

    /// The denominator of a time signature meta event. Stored in the file as
    /// a power of two, returned expanded.
    pub fn denominator(&self) -> Result<u32> {
        self.expect(&[EventKind::TimeSignature])?;
        Ok(1u32 << self.byte(1)?.min(31))
    }

    /// Midi clocks per metronome click of a time signature meta event.
    pub fn clocks_per_click(&self) -> Result<u8> {
        self.expect(&[EventKind::TimeSignature])?;
        self.byte(2)
    }

    /// Notated 32nd notes per midi quarter note of a time signature event.
    pub fn notated_32nd_notes_per_beat(&self) -> Result<u8> {
        self.expect(&[EventKind::TimeSignature])?;
        self.byte(3)
    }

    /// The frame rate of an SMPTE offset meta event.
    pub fn frame_rate(&self) -> Result<Fps> {
        self.expect(&[EventKind::SmpteOffset])?;
        match self.data.first() {
            Some(&hours) => Ok(Fps::from_bits(hours >> 5)),
            None => bail!(
                ErrorKind::InvalidSmpteFrameRate,
                "smpte offset payload is empty"
            ),
        }
    }

    /// The hour of an SMPTE offset meta event, 0-23.
    pub fn hours(&self) -> Result<u8> {
        self.expect(&[EventKind::SmpteOffset])?;
        Ok(self.byte(0)? & 0x1F)
    }

    /// The minute of an SMPTE offset meta event.
    pub fn minutes(&self) -> Result<u8> {
        self.expect(&[EventKind::SmpteOffset])?;
        self.byte(1)
    }

    /// The second of an SMPTE offset meta event.
    pub fn seconds(&self) -> Result<u8> {
        self.expect(&[EventKind::SmpteOffset])?;
        self.byte(2)
    }

    /// The frame of an SMPTE offset meta event.
    pub fn frames(&self) -> Result<u8> {
        self.expect(&[EventKind::SmpteOffset])?;
        self.byte(3)
    }

    /// The fractional frame of an SMPTE offset meta event.
    pub fn sub_frames(&self) -> Result<u8> {
        self.expect(&[EventKind::SmpteOffset])?;
        self.byte(4)
    }

    /// Encode the event as wire bytes suitable for a midi output: the full
    /// status byte (type nibble or channel) followed by the payload.
    ///
    /// Only channel events travel on the wire; meta, sysex and escape events
    /// fail with [`ErrorKind::NotTransmittable`].
    pub fn to_midi<'b>(&self, buf: &'b mut [u8; 3]) -> Result<&'b [u8]> {
        ensure!(
            self.is_channel(),
            ErrorKind::NotTransmittable,
            "meta and sysex events are not sent to midi outputs"
        );
        buf[0] = self.status_byte;
        let n = self.data.len().min(2);
        buf[1..1 + n].copy_from_slice(&self.data[..n]);
        Ok(&buf[..1 + n])
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            Some(kind) => f.write_str(kind.name())?,
            None if self.is_meta() => write!(f, "meta_0x{:02x}", self.status)?,
            None => write!(f, "midi_0x{:02x}", self.status)?,
        }
        write!(f, " delta_ticks={} delta_us={}", self.delta_ticks, self.delta_us)?;
        write!(f, " data=[")?;
        for (i, byte) in self.data.iter().take(5).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        if self.data.len() > 5 {
            write!(f, " ..")?;
        }
        write!(f, "]")
    }
}

fn decode_ascii(bytes: &[u8]) -> String {
    use core::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if byte < 0x80 {
            out.push(byte as char);
        } else {
            // Keep unmapped bytes recoverable.
            let _ = write!(out, "\\x{:02x}", byte);
        }
    }
    out
}
