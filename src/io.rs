//! Provides abstractions over writers, so that SMF files can be written to in-memory buffers and
//! to any `std::io::Write` alike.

use crate::prelude::*;

/// The result of writing to `W`.
pub type IoResult<W> = StdResult<(), <W as Write>::Error>;

/// A generic byte sink that encoded SMF data can be written to.
pub trait Write {
    /// The error produced by the underlying writer.
    type Error;

    /// Write a whole slice of bytes, or fail.
    fn write_all(&mut self, buf: &[u8]) -> IoResult<Self>;

    /// Create an error signalling that the data to write cannot be represented, such as a chunk
    /// larger than 4GB.
    fn invalid_input(msg: &'static str) -> Self::Error;
}

impl Write for Vec<u8> {
    type Error = &'static str;
    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> IoResult<Self> {
        self.extend_from_slice(buf);
        Ok(())
    }
    #[inline]
    fn invalid_input(msg: &'static str) -> &'static str {
        msg
    }
}

/// Adapts any `std::io::Write` type into a [`Write`](trait.Write.html) sink.
pub struct IoWrap<T>(pub T);
impl<T: io::Write> Write for IoWrap<T> {
    type Error = io::Error;
    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, buf)
    }
    #[inline]
    fn invalid_input(msg: &'static str) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, msg)
    }
}
