use std::io::{self, Read, Write};

use log::trace;
use thiserror::Error;

pub const LENGTH_PREFIX_SIZE: usize = size_of::<u32>();

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u32 },
    #[error("stream ended after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },
    #[error("frame IO error: {0}")]
    Io(#[from] io::Error),
}

/// Splits a byte stream into length-prefixed frames.
///
/// Partial reads are reassembled; a caller only ever sees complete frame bodies.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: u32,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: u32) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Reads the next frame body.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary. A
    /// length prefix above the configured maximum is rejected before any body
    /// bytes are allocated.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut prefix = [0; LENGTH_PREFIX_SIZE];
        let read = self.fill(&mut prefix)?;
        if read == 0 {
            return Ok(None);
        }
        if read < LENGTH_PREFIX_SIZE {
            return Err(FrameError::Truncated {
                read,
                expected: LENGTH_PREFIX_SIZE,
            });
        }

        let size = u32::from_be_bytes(prefix);
        if size > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: size.into(),
                max: self.max_frame_size,
            });
        }

        let mut body = vec![0; size as usize];
        let read = self.fill(&mut body)?;
        if read < body.len() {
            return Err(FrameError::Truncated {
                read,
                expected: body.len(),
            });
        }

        trace!("read frame of {size} bytes");
        Ok(Some(body))
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads until `buf` is full or the stream ends; returns the bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Writes `body` as one frame and flushes the writer.
pub fn write_frame<W: Write>(
    writer: &mut W,
    body: &[u8],
    max_frame_size: u32,
) -> Result<(), FrameError> {
    let size = u32::try_from(body.len())
        .ok()
        .filter(|size| *size <= max_frame_size)
        .ok_or(FrameError::TooLarge {
            size: body.len() as u64,
            max: max_frame_size,
        })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(body);

    writer.write_all(&frame)?;
    writer.flush()?;
    trace!("wrote frame of {size} bytes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, thread};

    use crate::buffer::bounded;

    use super::*;

    #[test]
    fn read_write_frames() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"first", 64).unwrap();
        write_frame(&mut stream, b"", 64).unwrap();
        write_frame(&mut stream, b"third", 64).unwrap();

        let mut reader = FrameReader::new(Cursor::new(stream), 64);
        assert_eq!(reader.read_frame().unwrap().unwrap(), b"first");
        assert_eq!(reader.read_frame().unwrap().unwrap(), b"");
        assert_eq!(reader.read_frame().unwrap().unwrap(), b"third");
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn length_prefix_is_big_endian() {
        let mut stream = Vec::new();
        write_frame(&mut stream, &[9; 258], 1024).unwrap();

        assert_eq!(&stream[..4], &[0, 0, 1, 2]);
        assert_eq!(stream.len(), 262);
    }

    #[test]
    fn truncated_prefix() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0]), 64);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated {
                read: 2,
                expected: 4
            })
        ));
    }

    #[test]
    fn truncated_body() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0, 0, 5, 1, 2]), 64);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated {
                read: 2,
                expected: 5
            })
        ));
    }

    #[test]
    fn oversized_prefix_rejected() {
        let mut reader = FrameReader::new(Cursor::new(vec![0xff; 4]), 1024);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::TooLarge {
                size: 0xffff_ffff,
                max: 1024
            })
        ));
        assert_eq!(reader.get_ref().position(), 4);
    }

    #[test]
    fn oversized_body_not_written() {
        let mut stream = Vec::new();
        assert!(matches!(
            write_frame(&mut stream, &[0; 17], 16),
            Err(FrameError::TooLarge { size: 17, max: 16 })
        ));
        assert!(stream.is_empty());
    }

    #[test]
    fn reassembles_byte_by_byte() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"split across many reads", 64).unwrap();
        write_frame(&mut stream, b"and another", 64).unwrap();

        let (mut writer, reader) = bounded(3);
        let producer = thread::spawn(move || {
            for byte in stream {
                writer.write(&[byte]).unwrap();
            }
        });

        let mut frames = FrameReader::new(reader, 64);
        assert_eq!(
            frames.read_frame().unwrap().unwrap(),
            b"split across many reads"
        );
        assert_eq!(frames.read_frame().unwrap().unwrap(), b"and another");
        producer.join().unwrap();
        assert!(frames.read_frame().unwrap().is_none());
    }
}
