//! The file facade: header parsing, chunk location, and iteration entry
//! points.

use crate::{
    io::{ChunkReader, Source, SourceReader},
    merge::{EventIter, TimedStream},
    playback::{AsyncPlayer, Clock, Player, Timer},
    prelude::*,
    track::TrackParser,
};

/// Per-track window size, in bytes, used by the convenience constructors.
///
/// Roughly one refill per hundred events; big enough that window management
/// is noise, small enough for a multi-track file to stay within a few
/// hundred bytes of buffering.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// The track layout declared in the file header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Format {
    /// A single track holding the whole song.
    SingleTrack,
    /// Several tracks played simultaneously; iteration merges them.
    Parallel,
    /// Several independent songs in one file; tracks are iterated one at a
    /// time, never merged.
    Sequential,
    /// A format number this crate does not know. Treated like `Parallel`,
    /// the common behavior of permissive players.
    Unknown(u16),
}

impl Format {
    /// Interpret the 16-bit format field of the header.
    pub fn from_bits(bits: u16) -> Format {
        match bits {
            0 => Format::SingleTrack,
            1 => Format::Parallel,
            2 => Format::Sequential,
            other => Format::Unknown(other),
        }
    }

    /// The raw 16-bit format field.
    pub fn as_bits(&self) -> u16 {
        match *self {
            Format::SingleTrack => 0,
            Format::Parallel => 1,
            Format::Sequential => 2,
            Format::Unknown(other) => other,
        }
    }
}

/// The parsed `MThd` header of a midi file.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Header {
    pub format: Format,
    /// The track count declared in the header. The number of `MTrk` chunks
    /// actually present governs iteration; see
    /// [`MidiFile::num_tracks`](crate::MidiFile::num_tracks).
    pub num_tracks: u16,
    /// Midi ticks per quarter note. Always positive; SMPTE divisions are
    /// rejected when the file is opened.
    pub ppq: u16,
}

/// Location of one `MTrk` chunk's payload within the source.
#[derive(Copy, Clone, Debug)]
struct TrackChunk {
    offset: u64,
    length: u32,
}

/// A parsed midi file, ready to be iterated or played.
///
/// Opening the file parses the 14-byte header and locates every track
/// chunk; events are only decoded while iterating. Each iterator opens its
/// own reader per track, so several iterations (and [`length_us`] calls) can
/// coexist without sharing any mutable state.
///
/// [`length_us`]: MidiFile::length_us
///
/// ```
/// use midiplay::{EventKind, MidiFile};
///
/// // A one-track file: note on, note off 96 ticks later, end of track.
/// let bytes = [
///     b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0,
///     b'M', b'T', b'r', b'k', 0, 0, 0, 12,
///     0x00, 0x90, 0x3C, 0x64,
///     0x60, 0x80, 0x3C, 0x40,
///     0x00, 0xFF, 0x2F, 0x00,
/// ];
/// let file = MidiFile::from_bytes(&bytes)?;
/// assert_eq!(file.length_us()?, 100_000);
/// for event in file.events()? {
///     let event = event?;
///     if event.kind() == Some(EventKind::NoteOn) {
///         println!("note {} at +{}us", event.note()?, event.delta_us);
///     }
/// }
/// # Ok::<(), midiplay::Error>(())
/// ```
#[derive(Debug)]
pub struct MidiFile<S: Source> {
    source: S,
    header: Header,
    tracks: Vec<TrackChunk>,
    buffer_size: usize,
}

#[cfg(feature = "std")]
impl MidiFile<crate::io::FileSource> {
    /// Open a `.mid` file from disk with the default per-track buffering.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_buffered(path, DEFAULT_BUFFER_SIZE)
    }

    /// Open a `.mid` file from disk, keeping `buffer_size` bytes of window
    /// per track. A `buffer_size` of `0` loads each track fully into memory
    /// when iteration begins and retains no file handle for it.
    pub fn open_buffered(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        Self::with_source(crate::io::FileSource::new(path), buffer_size)
    }
}

impl<'a> MidiFile<crate::io::SliceSource<'a>> {
    /// Parse a midi file already held in memory.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::with_source(crate::io::SliceSource::new(bytes), 0)
    }
}

impl<S: Source> MidiFile<S> {
    /// Parse the header and locate tracks through an arbitrary byte source.
    pub fn with_source(source: S, buffer_size: usize) -> Result<MidiFile<S>> {
        let mut reader = source.open_reader()?;
        let (header, tracks) = scan(&mut reader)?;
        parse_debug!(
            "midi file: format {}, {} tracks, {} ticks per quarter",
            header.format.as_bits(),
            tracks.len(),
            header.ppq
        );
        Ok(MidiFile {
            source,
            header,
            tracks,
            buffer_size,
        })
    }

    /// The parsed file header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The declared track layout.
    #[inline]
    pub fn format(&self) -> Format {
        self.header.format
    }

    /// The raw format field: 0, 1 or 2 for conforming files.
    #[inline]
    pub fn format_type(&self) -> u16 {
        self.header.format.as_bits()
    }

    /// Midi ticks per quarter note, from the header.
    #[inline]
    pub fn ppq(&self) -> u16 {
        self.header.ppq
    }

    /// The number of `MTrk` chunks actually found in the file.
    #[inline]
    pub fn num_tracks(&self) -> u16 {
        self.tracks.len() as u16
    }

    /// The per-track window size this file was opened with.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// A handle to track `index`, if it exists.
    pub fn track(&self, index: usize) -> Option<Track<'_, S>> {
        if index < self.tracks.len() {
            Some(Track { file: self, index })
        } else {
            None
        }
    }

    /// Handles to every track, in file order.
    pub fn tracks(&self) -> impl Iterator<Item = Track<'_, S>> + '_ {
        (0..self.tracks.len()).map(move |index| Track { file: self, index })
    }

    fn parser_for(&self, index: usize) -> Result<(u16, TrackParser<S::Reader>)> {
        let chunk = self.tracks[index];
        let reader = self.source.open_reader()?;
        let window = ChunkReader::new(reader, chunk.offset, chunk.length, self.buffer_size)?;
        Ok((index as u16, TrackParser::new(window)))
    }

    /// Cursors over every track, for merged iteration.
    fn merged(&self) -> Result<TimedStream<S::Reader>> {
        ensure!(
            self.header.format != Format::Sequential,
            ErrorKind::Format2RequiresTrackSelection,
            "format 2 tracks are independent songs, iterate one track instead"
        );
        let parsers = (0..self.tracks.len())
            .map(|index| self.parser_for(index))
            .collect::<Result<Vec<_>>>()?;
        TimedStream::new(parsers, self.header.ppq)
    }

    fn single(&self, index: usize) -> Result<TimedStream<S::Reader>> {
        TimedStream::new(alloc::vec![self.parser_for(index)?], self.header.ppq)
    }

    /// Iterate over all tracks merged into one time-ordered stream.
    ///
    /// Format 2 files refuse merged iteration with
    /// [`ErrorKind::Format2RequiresTrackSelection`]; iterate a single
    /// [`track`](MidiFile::track) instead.
    pub fn events(&self) -> Result<EventIter<S::Reader>> {
        Ok(EventIter::new(self.merged()?))
    }

    /// Play the merged stream against the standard monotonic clock.
    #[cfg(feature = "std")]
    pub fn play(&self) -> Result<Player<S::Reader, crate::playback::StdTimer>> {
        self.play_with(crate::playback::StdTimer::new())
    }

    /// Play the merged stream against a host-supplied timer.
    pub fn play_with<T: Timer>(&self, timer: T) -> Result<Player<S::Reader, T>> {
        Ok(Player::new(self.merged()?, timer))
    }

    /// Play the merged stream cooperatively: waits run through the injected
    /// asynchronous `sleep` instead of blocking.
    pub fn play_async<C: Clock, F>(&self, clock: C, sleep: F) -> Result<AsyncPlayer<S::Reader, C, F>> {
        Ok(AsyncPlayer::new(self.merged()?, clock, sleep))
    }

    /// The playing time of the whole file in microseconds.
    ///
    /// Sums the merged stream without scheduling anything, using fresh
    /// readers, so in-flight iterations are unaffected. Format 2 files have
    /// no merged playing time and fail with
    /// [`ErrorKind::Format2NotSupported`].
    pub fn length_us(&self) -> Result<u64> {
        ensure!(
            self.header.format != Format::Sequential,
            ErrorKind::Format2NotSupported,
            "the playing time of a format 2 file is undefined"
        );
        let mut events = self.events()?;
        let mut total = 0u64;
        while let Some(event) = events.next_event() {
            total += event?.delta_us;
        }
        Ok(total)
    }
}

/// A handle to a single track of a [`MidiFile`].
///
/// Iterating one track is the normal way to consume a format 2 file; the
/// tempo map then only sees the set tempo events of that track.
#[derive(Debug)]
pub struct Track<'f, S: Source> {
    file: &'f MidiFile<S>,
    index: usize,
}

impl<'f, S: Source> Track<'f, S> {
    /// File-order index of this track.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Iterate over this track alone, in file order.
    pub fn events(&self) -> Result<EventIter<S::Reader>> {
        Ok(EventIter::new(self.file.single(self.index)?))
    }

    /// Play this track alone against the standard monotonic clock.
    #[cfg(feature = "std")]
    pub fn play(&self) -> Result<Player<S::Reader, crate::playback::StdTimer>> {
        self.play_with(crate::playback::StdTimer::new())
    }

    /// Play this track alone against a host-supplied timer.
    pub fn play_with<T: Timer>(&self, timer: T) -> Result<Player<S::Reader, T>> {
        Ok(Player::new(self.file.single(self.index)?, timer))
    }

    /// Play this track cooperatively through an injected asynchronous sleep.
    pub fn play_async<C: Clock, F>(
        &self,
        clock: C,
        sleep: F,
    ) -> Result<AsyncPlayer<S::Reader, C, F>> {
        Ok(AsyncPlayer::new(self.file.single(self.index)?, clock, sleep))
    }
}

/// Read exactly `buf.len()` bytes at `offset`, mapping a premature eof to
/// the given error kind.
fn read_exact_at<R: SourceReader>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
    eof_kind: ErrorKind,
    eof_msg: &'static str,
) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let n = reader.read_at(offset + got as u64, &mut buf[got..])?;
        ensure!(n > 0, eof_kind, eof_msg);
        got += n;
    }
    Ok(())
}

/// Parse the header chunk and locate every `MTrk` chunk.
fn scan<R: SourceReader>(reader: &mut R) -> Result<(Header, Vec<TrackChunk>)> {
    let file_len = reader.len()?;
    let (start, end) = unwrap_riff(reader, file_len)?;

    // `MThd`, possibly behind the 128-byte MacBinary prefix some old Mac
    // tools prepend.
    let mut pos = start;
    let mut tag = [0u8; 4];
    read_exact_at(reader, pos, &mut tag, ErrorKind::BadMagic, "file too short")?;
    if &tag != b"MThd" {
        if pos + 132 <= end {
            read_exact_at(
                reader,
                pos + 128,
                &mut tag,
                ErrorKind::BadMagic,
                "file too short",
            )?;
        }
        ensure!(&tag == b"MThd", ErrorKind::BadMagic, "missing MThd header");
        pos += 128;
    }

    let mut word = [0u8; 4];
    read_exact_at(
        reader,
        pos + 4,
        &mut word,
        ErrorKind::TruncatedHeader,
        "header chunk has no length",
    )?;
    let header_len = u32::from_be_bytes(word);
    ensure!(
        header_len >= 6,
        ErrorKind::TruncatedHeader,
        "header chunk shorter than 6 bytes"
    );
    // Extra header bytes beyond the 6 defined ones are ignored.
    let mut fields = [0u8; 6];
    read_exact_at(
        reader,
        pos + 8,
        &mut fields,
        ErrorKind::TruncatedHeader,
        "header fields cut short",
    )?;
    let format = Format::from_bits(u16::from_be_bytes([fields[0], fields[1]]));
    let num_tracks = u16::from_be_bytes([fields[2], fields[3]]);
    let division = u16::from_be_bytes([fields[4], fields[5]]);
    ensure!(
        division & 0x8000 == 0,
        ErrorKind::UnsupportedDivision,
        "smpte time divisions are not supported"
    );
    ensure!(
        division != 0,
        ErrorKind::UnsupportedDivision,
        "zero ticks per quarter note"
    );
    pos += 8 + header_len as u64;

    // Walk the chunk headers up to end of file, keeping `MTrk` payloads and
    // skipping anything else by its declared length.
    let mut tracks = Vec::new();
    while pos < end {
        ensure!(
            end - pos >= 8,
            ErrorKind::UnexpectedEof,
            "trailing bytes too short for a chunk header"
        );
        read_exact_at(reader, pos, &mut tag, ErrorKind::UnexpectedEof, "chunk tag")?;
        read_exact_at(
            reader,
            pos + 4,
            &mut word,
            ErrorKind::UnexpectedEof,
            "chunk length",
        )?;
        let length = u32::from_be_bytes(word);
        pos += 8;
        ensure!(
            length as u64 <= end - pos,
            ErrorKind::UnexpectedEof,
            "chunk extends past end of file"
        );
        if &tag == b"MTrk" {
            tracks.push(TrackChunk {
                offset: pos,
                length,
            });
        } else {
            parse_warn!("skipping unknown chunk of {} bytes", length);
        }
        pos += length as u64;
    }

    Ok((
        Header {
            format,
            num_tracks,
            ppq: division,
        },
        tracks,
    ))
}

/// Detect the RIFF/RMID wrapper and return the window holding the embedded
/// SMF data; plain files get the whole stream.
fn unwrap_riff<R: SourceReader>(reader: &mut R, file_len: u64) -> Result<(u64, u64)> {
    let mut tag = [0u8; 4];
    if file_len < 12 {
        return Ok((0, file_len));
    }
    read_exact_at(reader, 0, &mut tag, ErrorKind::UnexpectedEof, "riff tag")?;
    if &tag != b"RIFF" {
        return Ok((0, file_len));
    }
    read_exact_at(
        reader,
        8,
        &mut tag,
        ErrorKind::UnexpectedEof,
        "riff form type",
    )?;
    ensure!(&tag == b"RMID", ErrorKind::BadMagic, "riff file is not rmid");

    // Scan the RIFF sub-chunks (little-endian lengths, odd sizes padded)
    // for the `data` chunk holding the SMF bytes.
    let mut pos = 12u64;
    let mut word = [0u8; 4];
    while pos + 8 <= file_len {
        read_exact_at(reader, pos, &mut tag, ErrorKind::UnexpectedEof, "riff chunk")?;
        read_exact_at(
            reader,
            pos + 4,
            &mut word,
            ErrorKind::UnexpectedEof,
            "riff chunk length",
        )?;
        let length = u32::from_le_bytes(word) as u64;
        pos += 8;
        ensure!(
            length <= file_len - pos,
            ErrorKind::UnexpectedEof,
            "riff chunk extends past end of file"
        );
        if &tag == b"data" {
            return Ok((pos, pos + length));
        }
        pos += length + (length & 1);
    }
    bail!(ErrorKind::BadMagic, "rmid file has no data chunk")
}
