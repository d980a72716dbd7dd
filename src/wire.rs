//! Framed capture streams.
//!
//! A capture file is a sequence of frames. Each frame is a little-endian
//! `u32` byte length followed by that many bytes of JSON holding one
//! [`CaptureEvent`], tagged by its `kind` field.

use std::io::{self, Read, Write};

use crate::error::WireError;
use crate::events::CaptureEvent;

/// Largest frame accepted by the reader.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// Read as many bytes as are available into `buf`, stopping early only at
/// end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub struct CaptureEventReader<R: Read> {
    reader: R,
    frames: u64,
    buf: Vec<u8>,
}

impl<R: Read> CaptureEventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames: 0,
            buf: Vec::new(),
        }
    }

    /// Frames decoded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The next event, or `None` at a clean end of stream.
    ///
    /// A stream that ends inside a frame is reported as
    /// [`WireError::Truncated`].
    pub fn next_event(&mut self) -> Result<Option<CaptureEvent>, WireError> {
        let mut len_buf = [0u8; LEN_PREFIX];
        let got = read_full(&mut self.reader, &mut len_buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < LEN_PREFIX {
            return Err(WireError::Truncated {
                expected: LEN_PREFIX,
                actual: got,
            });
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        self.buf.resize(len, 0);
        let got = read_full(&mut self.reader, &mut self.buf)?;
        if got < len {
            return Err(WireError::Truncated {
                expected: len,
                actual: got,
            });
        }

        let event = serde_json::from_slice(&self.buf)?;
        self.frames += 1;
        Ok(Some(event))
    }
}

impl<R: Read> Iterator for CaptureEventReader<R> {
    type Item = Result<CaptureEvent, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

pub struct CaptureEventWriter<W: Write> {
    writer: W,
}

impl<W: Write> CaptureEventWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_event(&mut self, event: &CaptureEvent) -> Result<(), WireError> {
        let body = serde_json::to_vec(event)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len: body.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.writer.write_all(&(body.len() as u32).to_le_bytes())?;
        self.writer.write_all(&body)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WireError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
