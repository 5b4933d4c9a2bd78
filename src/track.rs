//! Framing of raw events out of a single track chunk.
//!
//! One [`TrackParser`] owns the byte window of one `MTrk` chunk and fills
//! caller-provided [`MidiEvent`]s, so the event buffer can be reused across
//! events and across tracks without reallocating.

use crate::{
    event::{EventKind, MidiEvent},
    io::{ChunkReader, SourceReader},
    prelude::*,
};

/// Channel events with a single data byte: program change and aftertouch.
const FIRST_1BYTE_STATUS: u8 = 0xC0;
const LAST_1BYTE_STATUS: u8 = 0xDF;

/// A lazy parser for the events of one track chunk.
///
/// Produces events in file order, maintaining the track's running status.
/// Every track ends with exactly one end-of-track event: the one found in
/// the file, or a synthesized zero-delta one if the chunk ends without it.
/// Events following an end-of-track inside the same chunk are ignored.
#[derive(Debug)]
pub(crate) struct TrackParser<R> {
    chunk: ChunkReader<R>,
    running_status: Option<u8>,
    done: bool,
}

impl<R: SourceReader> TrackParser<R> {
    pub fn new(chunk: ChunkReader<R>) -> TrackParser<R> {
        TrackParser {
            chunk,
            running_status: None,
            done: false,
        }
    }

    /// Parse the next event into `ev`, overwriting its previous content.
    ///
    /// Returns `false` once the track is exhausted (after the end-of-track
    /// event has been delivered). A structural error poisons the parser: the
    /// error is returned once and the track reports exhaustion afterwards.
    pub fn read_into(&mut self, ev: &mut MidiEvent) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        match self.parse_into(ev) {
            Ok(more) => Ok(more),
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn parse_into(&mut self, ev: &mut MidiEvent) -> Result<bool> {
        if self.chunk.eof() {
            // The file forgot the mandatory end-of-track meta event.
            parse_warn!("track ended without end-of-track, synthesizing one");
            ev.set_end_of_track();
            self.done = true;
            return Ok(true);
        }

        let delta_ticks = self.chunk.read_vlq()?;
        ev.delta_ticks = delta_ticks;
        ev.delta_us = 0;
        ev.timestamp_us = None;
        ev.data.clear();

        let first = self.chunk.peek_u8()?;
        match first {
            0x00..=0x7F => {
                // Running status: `first` is already the first data byte.
                let status = match self.running_status {
                    Some(status) => status,
                    None => bail!(
                        ErrorKind::RunningStatusWithoutPrior,
                        "data byte with no active running status"
                    ),
                };
                self.read_channel(ev, status)?;
            }
            0x80..=0xEF => {
                self.chunk.skip(1)?;
                self.running_status = Some(first);
                self.read_channel(ev, first)?;
            }
            0xFF => {
                self.chunk.skip(1)?;
                self.read_meta(ev)?;
                if ev.status == EventKind::EndOfTrack.as_int() {
                    self.done = true;
                }
            }
            0xF0 | 0xF7 => {
                self.chunk.skip(1)?;
                self.read_sysex(ev, first)?;
            }
            _ => bail!(
                ErrorKind::UnsupportedStatus,
                "system common/realtime status inside a track"
            ),
        }
        Ok(true)
    }

    /// Read the 1 or 2 data bytes of a channel event. Does not consume the
    /// status byte; running status continuations never wrote one.
    fn read_channel(&mut self, ev: &mut MidiEvent, status: u8) -> Result<()> {
        ev.status = status & 0xF0;
        ev.status_byte = status;
        let len = if (FIRST_1BYTE_STATUS..=LAST_1BYTE_STATUS).contains(&status) {
            1
        } else {
            2
        };
        ev.data.extend_from_slice(self.chunk.read_bytes(len)?);
        Ok(())
    }

    /// Read a meta event body. Running status survives meta events, a common
    /// non-conformance this parser tolerates on purpose.
    fn read_meta(&mut self, ev: &mut MidiEvent) -> Result<()> {
        let meta_type = self.chunk.read_u8()?;
        ensure!(
            meta_type <= 0x7F,
            ErrorKind::UnsupportedStatus,
            "meta type byte above 0x7f"
        );
        ev.status = meta_type;
        ev.status_byte = meta_type;
        let len = self.chunk.read_vlq()?;
        ev.data.extend_from_slice(self.chunk.read_bytes(len as usize)?);
        Ok(())
    }

    /// Read a sysex or escape body. Running status survives these as well.
    fn read_sysex(&mut self, ev: &mut MidiEvent, status: u8) -> Result<()> {
        ev.status = status;
        ev.status_byte = status;
        let len = self.chunk.read_vlq()?;
        ev.data.extend_from_slice(self.chunk.read_bytes(len as usize)?);
        Ok(())
    }
}
