use core::fmt;

/// Represents an error while decoding a BLE-MIDI packet or reading a variable-length quantity.
///
/// This type wraps an `ErrorKind` along with the chain of contexts it was raised under.
///
/// Note that errors are never surfaced by the recording pipeline itself: the packet decoder and
/// reassembler log them and carry on with the next packet or message.
/// They are only returned by the standalone parsing functions, such as
/// [`PacketHeader::parse`](struct.PacketHeader.html#method.parse) and
/// [`read_varlen`](num/fn.read_varlen.html).
#[derive(Clone)]
pub struct Error {
    kind: &'static ErrorKind,
    src: Option<Box<Error>>,
}
impl Error {
    /// Create a new error with the given `ErrorKind`.
    #[inline]
    pub fn new(kind: &'static ErrorKind) -> Error {
        Error::from(kind)
    }

    /// More information about the error itself.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        *self.kind
    }

    /// The underlying cause for this error.
    #[inline]
    pub fn source(&self) -> Option<&Error> {
        self.src.as_deref()
    }

    fn chain_ctx(self, ctx: &'static ErrorKind) -> Error {
        Error {
            kind: ctx,
            src: Some(Box::new(self)),
        }
    }
}
impl From<&'static ErrorKind> for Error {
    #[inline]
    fn from(kind: &'static ErrorKind) -> Error {
        Error { kind, src: None }
    }
}
impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let mut maybe_src = self.source();
        while let Some(src) = maybe_src {
            writeln!(f)?;
            write!(f, "  caused by: {}", src.kind)?;
            maybe_src = src.source();
        }
        Ok(())
    }
}
impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// The type of error that occurred while decoding.
///
/// Errors are broadly categorized into 2 classes, and specific error info is provided as a
/// non-normative string literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The packet cannot be decoded at all: it is too short or its header byte is invalid.
    ///
    /// The whole packet is dropped and the decoder state is left untouched.
    Malformed(&'static str),

    /// The MIDI data violates the protocol, such as a data byte with no running status or an
    /// end-of-exclusive with no matching start.
    ///
    /// Whatever was decoded before the violation is kept, the remainder is dropped.
    Protocol(&'static str),
}
impl ErrorKind {
    /// Get the informative message on what exact part of the protocol was not respected.
    #[inline]
    pub fn message(&self) -> &'static str {
        match *self {
            ErrorKind::Malformed(msg) => msg,
            ErrorKind::Protocol(msg) => msg,
        }
    }
}
impl fmt::Display for ErrorKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Malformed(msg) => write!(f, "malformed packet: {}", msg),
            ErrorKind::Protocol(msg) => write!(f, "midi protocol violation: {}", msg),
        }
    }
}

macro_rules! err_malformed {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::Malformed($msg);
        ERR_KIND
    }};
}
macro_rules! err_protocol {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::Protocol($msg);
        ERR_KIND
    }};
}

pub(crate) trait ResultExt<T> {
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error>;
}
impl<T> ResultExt<T> for StdResult<T, Error> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| err.chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for StdResult<T, &'static ErrorKind> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|errkind| Error::from(errkind).chain_ctx(ctx))
    }
}

/// The result type used by the decoders.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use core::result::Result as StdResult;
