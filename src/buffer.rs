//! Bounded blocking byte buffer.
//!
//! A fixed-capacity ring of bytes shared between exactly one producer and one
//! consumer. The pairing is enforced by ownership: [`bounded`] hands out a
//! [`BufferWriter`] and a [`BufferReader`], neither of which can be cloned.
//!
//! # Semantics
//!
//! - [`BufferWriter::write`] blocks while the ring is full and only returns once
//!   every byte has been accepted. Writes larger than the capacity are accepted
//!   incrementally as the reader drains.
//! - [`BufferReader::read`] blocks while the ring is empty and the writer is
//!   still open. It may return fewer bytes than requested.
//! - Once the writer is closed (explicitly or by being dropped), buffered bytes
//!   remain readable and `read` then returns `None` on every further call.
//! - Dropping the reader fails any pending or future write with
//!   [`BufferError::ReaderGone`], so a writer never parks on a vanished peer.
//!
//! Both handles contend on a single mutex with two condition variables,
//! `not_full` and `not_empty`. Every wait re-checks its predicate.
use std::{
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer is closed for writing")]
    Closed,
    #[error("buffer reader has been dropped")]
    ReaderGone,
}

#[derive(Debug)]
struct State {
    ring: Box<[u8]>,
    head: usize,
    len: usize,
    closed: bool,
    reader_gone: bool,
}

impl State {
    fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Copies as much of `src` as fits and returns the number of bytes taken.
    fn push(&mut self, src: &[u8]) -> usize {
        let capacity = self.capacity();
        let n = src.len().min(capacity - self.len);
        let tail = (self.head + self.len) % capacity;
        let first = n.min(capacity - tail);

        self.ring[tail..tail + first].copy_from_slice(&src[..first]);
        self.ring[..n - first].copy_from_slice(&src[first..n]);
        self.len += n;
        n
    }

    fn pop(&mut self, dst: &mut [u8]) -> usize {
        let capacity = self.capacity();
        let n = dst.len().min(self.len);
        let first = n.min(capacity - self.head);

        dst[..first].copy_from_slice(&self.ring[self.head..self.head + first]);
        dst[first..n].copy_from_slice(&self.ring[..n - first]);
        self.head = (self.head + n) % capacity;
        self.len -= n;
        n
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a bounded buffer holding at most `capacity` bytes.
///
/// # Panics
/// If `capacity` is zero.
pub fn bounded(capacity: usize) -> (BufferWriter, BufferReader) {
    assert!(capacity > 0, "buffer capacity must be non-zero");

    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            ring: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            closed: false,
            reader_gone: false,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });

    (
        BufferWriter {
            shared: Arc::clone(&shared),
        },
        BufferReader { shared },
    )
}

/// Producer half of a bounded buffer.
#[derive(Debug)]
pub struct BufferWriter {
    shared: Arc<Shared>,
}

impl BufferWriter {
    /// Writes every byte of `bytes`, blocking while the buffer is full.
    pub fn write(&mut self, mut bytes: &[u8]) -> Result<(), BufferError> {
        let mut state = self.shared.lock();

        while !bytes.is_empty() {
            loop {
                if state.closed {
                    return Err(BufferError::Closed);
                }
                if state.reader_gone {
                    return Err(BufferError::ReaderGone);
                }
                if state.len < state.capacity() {
                    break;
                }
                state = self
                    .shared
                    .not_full
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }

            let n = state.push(bytes);
            bytes = &bytes[n..];
            self.shared.not_empty.notify_one();
        }

        Ok(())
    }

    /// Signals that no further bytes will be written. Calling it again is a no-op.
    pub fn close(&mut self) {
        let mut state = self.shared.lock();
        if !state.closed {
            state.closed = true;
            self.shared.not_empty.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BufferWriter::write(self, buf)
            .map(|_| buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Consumer half of a bounded buffer.
#[derive(Debug)]
pub struct BufferReader {
    shared: Arc<Shared>,
}

impl BufferReader {
    /// Reads up to `dst.len()` bytes, blocking while the buffer is empty.
    ///
    /// Returns `None` once the writer is closed and every buffered byte has
    /// been consumed. An empty `dst` returns `Some(0)` without blocking.
    pub fn read(&mut self, dst: &mut [u8]) -> Option<usize> {
        if dst.is_empty() {
            return Some(0);
        }

        let mut state = self.shared.lock();
        while state.len == 0 {
            if state.closed {
                return None;
            }
            state = self
                .shared
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let n = state.pop(dst);
        self.shared.not_full.notify_one();
        Some(n)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_gone = true;
        self.shared.not_full.notify_all();
    }
}

impl io::Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(BufferReader::read(self, buf).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn read_exact(reader: &mut BufferReader, n: usize) -> Vec<u8> {
        let mut out = vec![0; n];
        let mut filled = 0;
        while filled < n {
            filled += reader.read(&mut out[filled..]).expect("unexpected eof");
        }
        out
    }

    #[test]
    fn write_then_read_preserves_order() {
        let (mut writer, mut reader) = bounded(16);

        writer.write(b"hello").unwrap();
        writer.write(b" world").unwrap();

        assert_eq!(reader.len(), 11);
        assert_eq!(read_exact(&mut reader, 11), b"hello world");
        assert!(reader.is_empty());
    }

    #[test]
    fn wrap_around_with_small_capacity() {
        let (mut writer, mut reader) = bounded(3);
        let mut next = 0u8;

        for size in [1, 2, 3, 1, 3, 3, 2, 1] {
            let chunk: Vec<u8> = (0..size)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();

            writer.write(&chunk).unwrap();
            assert_eq!(read_exact(&mut reader, size), chunk);
        }
    }

    #[test]
    fn concurrent_chunks_with_small_capacity() {
        let sizes = [1, 2, 3, 1, 3, 3, 2, 1];
        let total: usize = sizes.iter().sum();
        let data: Vec<u8> = (0..total as u8).collect();
        let (mut writer, mut reader) = bounded(3);

        let input = data.clone();
        let producer = thread::spawn(move || {
            let mut offset = 0;
            for size in sizes {
                writer.write(&input[offset..offset + size]).unwrap();
                offset += size;
            }
        });

        let mut output = Vec::with_capacity(total);
        for size in sizes {
            output.extend(read_exact(&mut reader, size));
        }
        producer.join().unwrap();

        assert_eq!(output, data);
    }

    #[test]
    fn short_read_returns_available_bytes() {
        let (mut writer, mut reader) = bounded(8);
        writer.write(&[1, 2, 3]).unwrap();

        let mut buf = [0; 10];
        assert_eq!(reader.read(&mut buf), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn empty_destination_does_not_block() {
        let (_writer, mut reader) = bounded(4);
        assert_eq!(reader.read(&mut []), Some(0));
    }

    #[test]
    fn close_drains_then_reports_eof() {
        let (mut writer, mut reader) = bounded(4);
        writer.write(&[7, 8]).unwrap();
        writer.close();
        writer.close();

        assert!(reader.is_closed());
        assert_eq!(read_exact(&mut reader, 2), vec![7, 8]);

        let mut buf = [0; 4];
        assert_eq!(reader.read(&mut buf), None);
        assert_eq!(reader.read(&mut buf), None);
    }

    #[test]
    fn write_after_close_fails() {
        let (mut writer, _reader) = bounded(4);
        writer.close();

        assert_eq!(writer.write(&[1]), Err(BufferError::Closed));
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let (mut writer, mut reader) = bounded(4);

        let consumer = thread::spawn(move || {
            let mut buf = [0; 4];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        writer.close();

        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn dropping_writer_closes_buffer() {
        let (mut writer, mut reader) = bounded(4);
        writer.write(&[1]).unwrap();
        drop(writer);

        let mut buf = [0; 4];
        assert_eq!(reader.read(&mut buf), Some(1));
        assert_eq!(reader.read(&mut buf), None);
    }

    #[test]
    fn dropping_reader_unblocks_writer() {
        let (mut writer, reader) = bounded(2);

        let producer = thread::spawn(move || writer.write(&[0; 10]));

        thread::sleep(Duration::from_millis(50));
        drop(reader);

        assert_eq!(producer.join().unwrap(), Err(BufferError::ReaderGone));
    }

    #[test]
    fn write_larger_than_capacity() {
        let data: Vec<u8> = (0..=255).collect();
        let (mut writer, mut reader) = bounded(5);

        let input = data.clone();
        let producer = thread::spawn(move || {
            writer.write(&input).unwrap();
        });

        let output = read_exact(&mut reader, data.len());
        producer.join().unwrap();

        assert_eq!(output, data);
    }

    #[test]
    fn random_chunks_across_threads() {
        const TOTAL: usize = 100_000;

        for (seed, capacity) in [(1, 1), (2, 7), (3, 64), (4, 4096)] {
            let mut rng = StdRng::seed_from_u64(seed);
            let data: Vec<u8> = (0..TOTAL).map(|_| rng.r#gen()).collect();
            let (mut writer, mut reader) = bounded(capacity);

            let input = data.clone();
            let producer = thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed + 100);
                let mut offset = 0;
                while offset < input.len() {
                    let size = rng.gen_range(1..=97).min(input.len() - offset);
                    writer.write(&input[offset..offset + size]).unwrap();
                    offset += size;
                }
                writer.close();
            });

            let mut output = Vec::with_capacity(TOTAL);
            let mut buf = [0; 128];
            loop {
                let size = rng.gen_range(1..=buf.len());
                match reader.read(&mut buf[..size]) {
                    Some(n) => output.extend_from_slice(&buf[..n]),
                    None => break,
                }
            }
            producer.join().unwrap();

            assert_eq!(output.len(), TOTAL, "capacity {capacity}");
            assert_eq!(output, data, "capacity {capacity}");
        }
    }

    #[test]
    fn io_adapters() {
        use std::io::{Read, Write};

        let (mut writer, mut reader) = bounded(32);
        Write::write_all(&mut writer, b"framed").unwrap();
        drop(writer);

        let mut out = Vec::new();
        Read::read_to_end(&mut reader, &mut out).unwrap();
        assert_eq!(out, b"framed");
    }
}
