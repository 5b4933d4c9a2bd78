//! # Overview
//!
//! `midiplay` is a streaming parser and scheduled player for Standard Midi
//! Files (`.mid`), built to run on microcontrollers with tens of kilobytes
//! of RAM and, unchanged, on desktop machines.
//!
//! Instead of loading a file into memory, events are decoded lazily from a
//! small per-track window while iterating, with the tracks of format 1
//! files merged on the fly into a single time-ordered stream. Every event
//! carries its distance to the previous one both in midi ticks and in
//! microseconds, the latter computed from the set tempo events passing
//! through the stream:
//!
//! ```no_run
//! use midiplay::{EventKind, MidiFile};
//!
//! # fn main() -> Result<(), midiplay::Error> {
//! let file = MidiFile::open("example.mid")?;
//! for event in file.play()? {
//!     let event = event?;
//!     let mut buf = [0; 3];
//!     if !event.is_meta() {
//!         // Due right now; forward it to the midi output.
//!         let bytes = event.to_midi(&mut buf)?;
//!         # let _ = bytes;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Parsing from an in-memory buffer works everywhere, including `no_std`
//! targets:
//!
//! ```
//! use midiplay::{EventKind, MidiFile};
//!
//! # fn main() -> Result<(), midiplay::Error> {
//! # let bytes = [
//! #     b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0,
//! #     b'M', b'T', b'r', b'k', 0, 0, 0, 12,
//! #     0x00, 0x90, 0x3C, 0x64, 0x60, 0x80, 0x3C, 0x40, 0x00, 0xFF, 0x2F, 0x00,
//! # ];
//! let file = MidiFile::from_bytes(&bytes)?;
//! let mut events = file.events()?;
//! // The borrowing form reuses one event object, the `Iterator` form
//! // yields owned events; both see the same values.
//! while let Some(event) = events.next_event() {
//!     let event = event?;
//!     if event.kind() == Some(EventKind::NoteOn) {
//!         assert_eq!(event.note()?, 60);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Reading large files on small devices
//!
//! [`MidiFile::open_buffered`] bounds memory usage: each track gets its own
//! reader over the file plus a window of the given size, so files far
//! larger than the available RAM can be played. A buffer size of `0` loads
//! each track into memory once instead, trading RAM for fewer reads.
//!
//! # Scheduling
//!
//! [`MidiFile::play`] wraps the event stream in a drift-compensating
//! scheduler: every event's target time is computed from the start of
//! playback, so sleep overruns never accumulate. Hosts without `std`
//! provide their own [`Timer`], or use [`MidiFile::play_async`] to suspend
//! through an injected asynchronous sleep instead of blocking.
//!
//! # About features
//!
//! - `std` (enabled by default): [`io::FileSource`], [`StdTimer`], and
//!   `std::error::Error` integration. Disabling it makes the crate
//!   `no_std`; an allocator is still required.
//! - `log`: emit diagnostics through the `log` facade when the parser
//!   tolerates a non-conformance (skipped chunks, synthesized end-of-track
//!   events).

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod prelude {
    pub(crate) use crate::error::{Error, ErrorKind, Result};
    #[allow(unused_imports)]
    pub(crate) use alloc::{string::String, vec::Vec};
    #[allow(unused_imports)]
    pub(crate) use core::{fmt, mem};
    #[cfg(feature = "std")]
    #[allow(unused_imports)]
    pub(crate) use std::{
        fs::File,
        path::{Path, PathBuf},
    };
}

#[cfg(feature = "log")]
macro_rules! parse_warn {
    ($($args:tt)*) => { log::warn!($($args)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! parse_warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}

#[cfg(feature = "log")]
macro_rules! parse_debug {
    ($($args:tt)*) => { log::debug!($($args)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! parse_debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}

#[macro_use]
mod error;

mod event;
/// General MIDI name tables.
pub mod gm;
/// The host byte source traits and the windowed chunk reader.
pub mod io;
mod merge;
mod playback;
mod smf;
mod track;

#[cfg(feature = "std")]
pub use crate::playback::StdTimer;
pub use crate::{
    error::{Error, ErrorKind, Result},
    event::{EventKind, Fps, MidiEvent},
    merge::EventIter,
    playback::{AsyncPlayer, Clock, Player, Timer},
    smf::{Format, Header, MidiFile, Track, DEFAULT_BUFFER_SIZE},
};

#[cfg(test)]
mod test;
