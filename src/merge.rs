//! Merging of per-track event sequences into one time-ordered stream, and
//! conversion of tick deltas into microseconds through the running tempo.

use crate::{
    event::{EventKind, MidiEvent},
    io::SourceReader,
    prelude::*,
    track::TrackParser,
};
use alloc::collections::BinaryHeap;
use core::cmp::Reverse;

/// Microseconds per quarter note until the first set tempo event: 120 bpm.
pub(crate) const DEFAULT_TEMPO: u32 = 500_000;

/// One track being merged: its parser, the next not-yet-emitted event, and
/// the absolute tick time of the last event consumed from it.
#[derive(Debug)]
struct TrackCursor<R> {
    /// File-order index of the track, carried onto every emitted event.
    index: u16,
    parser: TrackParser<R>,
    pending: MidiEvent,
    cum_ticks: u64,
}

/// A k-way merge over primed track cursors.
///
/// Yields events in non-decreasing absolute tick order; ties are broken by
/// ascending track index, so iteration is fully deterministic. Per-track
/// end-of-track events are collapsed into a single zero-delta one emitted
/// after every track is exhausted.
#[derive(Debug)]
struct MergeStream<R> {
    cursors: Vec<TrackCursor<R>>,
    /// Min-heap of `(absolute tick, track index)` of each live cursor's
    /// pending event.
    heap: BinaryHeap<Reverse<(u64, u16)>>,
    last_ticks: u64,
    last_track: u16,
    eot_emitted: bool,
    failed: bool,
    /// A track error found while advancing past an already-emitted event;
    /// surfaced on the next pull.
    pending_error: Option<Error>,
}

impl<R: SourceReader> MergeStream<R> {
    /// Prime every parser by reading its first event.
    ///
    /// Cursors must arrive in ascending track order; ties on absolute ticks
    /// resolve by position, which then equals ascending track index.
    fn new(parsers: Vec<(u16, TrackParser<R>)>) -> Result<MergeStream<R>> {
        let mut cursors = Vec::with_capacity(parsers.len());
        let mut heap = BinaryHeap::with_capacity(parsers.len());
        for (pos, (index, mut parser)) in parsers.into_iter().enumerate() {
            let mut pending = MidiEvent::default();
            // A parser always yields at least an end-of-track event.
            parser.read_into(&mut pending)?;
            heap.push(Reverse((pending.delta_ticks as u64, pos as u16)));
            cursors.push(TrackCursor {
                index,
                parser,
                pending,
                cum_ticks: 0,
            });
        }
        Ok(MergeStream {
            cursors,
            heap,
            last_ticks: 0,
            last_track: 0,
            eot_emitted: false,
            failed: false,
            pending_error: None,
        })
    }

    /// Move the next merged event into `out`. Returns `None` at the end of
    /// the stream.
    fn next_into(&mut self, out: &mut MidiEvent) -> Option<Result<()>> {
        if self.failed {
            return self.pending_error.take().map(Err);
        }
        loop {
            let Reverse((abs_ticks, pos)) = match self.heap.pop() {
                Some(entry) => entry,
                None => {
                    if self.eot_emitted {
                        return None;
                    }
                    // Exactly one end-of-track closes the merged stream.
                    // The cursors, and with them the per-track readers, are
                    // released right away.
                    self.eot_emitted = true;
                    self.cursors.clear();
                    out.set_end_of_track();
                    out.track = self.last_track;
                    return Some(Ok(()));
                }
            };
            let cursor = &mut self.cursors[pos as usize];

            if cursor.pending.kind() == Some(EventKind::EndOfTrack) {
                // Collapse per-track terminators; remember which track ended
                // last so the final event can carry its identity.
                self.last_track = cursor.index;
                continue;
            }

            // Hand the pending event over, reusing `out`'s buffer as the
            // cursor's next scratch event.
            mem::swap(out, &mut cursor.pending);
            out.delta_ticks = (abs_ticks - self.last_ticks).min(u32::MAX as u64) as u32;
            out.delta_us = 0;
            out.timestamp_us = None;
            out.track = cursor.index;
            self.last_ticks = abs_ticks;
            self.last_track = cursor.index;
            cursor.cum_ticks = abs_ticks;

            // Advance the winning cursor past the emitted event.
            match cursor.parser.read_into(&mut cursor.pending) {
                Ok(true) => {
                    let next_abs = cursor.cum_ticks + cursor.pending.delta_ticks as u64;
                    self.heap.push(Reverse((next_abs, pos)));
                }
                Ok(false) => {}
                Err(e) => {
                    // The emitted event is complete; the failure surfaces on
                    // the next pull and ends the stream with every reader
                    // released.
                    self.failed = true;
                    self.heap.clear();
                    self.cursors.clear();
                    self.pending_error = Some(e);
                }
            }
            return Some(Ok(()));
        }
    }
}

/// The merged stream with tick-to-microsecond conversion applied.
#[derive(Debug)]
pub(crate) struct TimedStream<R> {
    merge: MergeStream<R>,
    tempo_uspqn: u32,
    ppq: u16,
}

impl<R: SourceReader> TimedStream<R> {
    pub fn new(parsers: Vec<(u16, TrackParser<R>)>, ppq: u16) -> Result<TimedStream<R>> {
        Ok(TimedStream {
            merge: MergeStream::new(parsers)?,
            tempo_uspqn: DEFAULT_TEMPO,
            ppq,
        })
    }

    pub fn next_into(&mut self, out: &mut MidiEvent) -> Option<Result<()>> {
        match self.merge.next_into(out)? {
            Ok(()) => {}
            Err(e) => return Some(Err(e)),
        }

        // Convert with the tempo in effect when the event starts, rounding
        // to the nearest microsecond.
        let product = out.delta_ticks as u64 * self.tempo_uspqn as u64;
        out.delta_us = (product + self.ppq as u64 / 2) / self.ppq as u64;

        // The new tempo only applies to events after this one.
        if out.kind() == Some(EventKind::SetTempo) {
            match out.tempo() {
                Ok(tempo) => self.tempo_uspqn = tempo,
                Err(_) => parse_warn!("ignoring set tempo event with short payload"),
            }
        }
        Some(Ok(()))
    }
}

/// An iterator over the time-ordered events of a midi file or track.
///
/// Two access styles are offered:
///
/// - [`next_event`](EventIter::next_event) hands out a borrowed view of one
///   internal event that is overwritten in place on every step. This is the
///   low-overhead form for constrained targets; clone the event before
///   advancing if it must outlive the next step.
/// - The [`Iterator`] implementation yields an independently owned
///   [`MidiEvent`] per step.
///
/// Both styles observe exactly the same sequence of event values.
#[derive(Debug)]
pub struct EventIter<R: SourceReader> {
    timed: TimedStream<R>,
    event: MidiEvent,
}

impl<R: SourceReader> EventIter<R> {
    pub(crate) fn new(timed: TimedStream<R>) -> EventIter<R> {
        EventIter {
            timed,
            event: MidiEvent::default(),
        }
    }

    /// Advance to the next event and borrow it.
    ///
    /// The returned reference points into this iterator and is overwritten
    /// by the next call.
    pub fn next_event(&mut self) -> Option<Result<&MidiEvent>> {
        match self.timed.next_into(&mut self.event)? {
            Ok(()) => Some(Ok(&self.event)),
            Err(e) => Some(Err(e)),
        }
    }
}

impl<R: SourceReader> Iterator for EventIter<R> {
    type Item = Result<MidiEvent>;

    fn next(&mut self) -> Option<Result<MidiEvent>> {
        match self.next_event()? {
            Ok(ev) => Some(Ok(ev.clone())),
            Err(e) => Some(Err(e)),
        }
    }
}
