use core::fmt;

/// The result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Broad classification of everything that can go wrong while reading or
/// playing a Standard Midi File.
///
/// Structural kinds (`BadMagic`, `TruncatedTrack`, ...) abort parsing as soon
/// as they are detected. Field kinds (`InvalidFieldForEvent`,
/// `InvalidKeySignature`, ...) are only raised when the offending field is
/// actually accessed, so a file with strange payloads can still be streamed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// The file does not start with an `MThd` header chunk.
    BadMagic,
    /// The header chunk is shorter than the mandatory 6 bytes.
    TruncatedHeader,
    /// The header division is zero or SMPTE-based (high bit set).
    UnsupportedDivision,
    /// The file ended before a declared chunk did.
    UnexpectedEof,
    /// A read crossed the end of a track chunk mid-event.
    TruncatedTrack,
    /// A variable-length quantity spanned more than 4 bytes.
    MalformedVlq,
    /// A data byte appeared where a status byte was expected, with no channel
    /// status seen before on this track.
    RunningStatusWithoutPrior,
    /// A status byte that cannot occur in a Standard Midi File (system
    /// common/realtime), or a meta type byte above `0x7F`.
    UnsupportedStatus,
    /// Merged iteration was requested on a multi-track format 2 file.
    Format2RequiresTrackSelection,
    /// The playing length of a format 2 file is undefined.
    Format2NotSupported,
    /// The accessed field does not exist on this kind of event.
    InvalidFieldForEvent,
    /// A key signature payload outside -7..=7 sharps or major/minor 0/1.
    InvalidKeySignature,
    /// An SMPTE offset payload too short to carry a frame rate.
    InvalidSmpteFrameRate,
    /// `to_midi` was called on a meta, sysex or escape event.
    NotTransmittable,
    /// The host byte source failed.
    Io,
}

impl ErrorKind {
    fn describe(self) -> &'static str {
        match self {
            ErrorKind::BadMagic => "not a midi file",
            ErrorKind::TruncatedHeader => "truncated midi header",
            ErrorKind::UnsupportedDivision => "unsupported time division",
            ErrorKind::UnexpectedEof => "unexpected end of file",
            ErrorKind::TruncatedTrack => "truncated track",
            ErrorKind::MalformedVlq => "malformed variable-length quantity",
            ErrorKind::RunningStatusWithoutPrior => "running status without prior status",
            ErrorKind::UnsupportedStatus => "unsupported status byte",
            ErrorKind::Format2RequiresTrackSelection => "format 2 requires track selection",
            ErrorKind::Format2NotSupported => "format 2 not supported",
            ErrorKind::InvalidFieldForEvent => "field not available for this event",
            ErrorKind::InvalidKeySignature => "invalid key signature",
            ErrorKind::InvalidSmpteFrameRate => "invalid smpte frame rate",
            ErrorKind::NotTransmittable => "event is not transmittable",
            ErrorKind::Io => "byte source error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// An error produced while parsing or playing a midi file.
///
/// Wraps an [`ErrorKind`] together with a non-normative static message
/// describing which part of the format was violated. With the `std` feature
/// enabled, errors raised by the byte source also retain the originating
/// [`std::io::Error`], reachable through `std::error::Error::source`.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
    #[cfg(feature = "std")]
    source: Option<std::io::Error>,
}

impl Error {
    /// Create a new error with the given kind and context message.
    #[inline]
    pub fn new(kind: ErrorKind, message: &'static str) -> Error {
        Error {
            kind,
            message,
            #[cfg(feature = "std")]
            source: None,
        }
    }

    /// More information about the error itself.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The informative message on what exact part of the format was not
    /// respected.
    #[inline]
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        #[cfg(feature = "std")]
        if let Some(io) = &self.source {
            write!(f, " ({})", io)?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|io| io as &(dyn std::error::Error + 'static))
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Error {
        Error {
            kind: ErrorKind::Io,
            message: "i/o error in byte source",
            source: Some(io),
        }
    }
}

macro_rules! err {
    ($kind:expr, $msg:expr) => {
        $crate::error::Error::new($kind, $msg)
    };
}

macro_rules! bail {
    ($kind:expr, $msg:expr) => {
        return Err(err!($kind, $msg))
    };
}

macro_rules! ensure {
    ($cond:expr, $kind:expr, $msg:expr) => {
        if !$cond {
            bail!($kind, $msg);
        }
    };
}
