//! Background draining of a child process output pipe

use std::io::{self, Read};
use std::thread::{self, JoinHandle};

/// Read size and buffer growth step
pub const CHUNK_SIZE: usize = 4096;

/// Owns the read end of a byte pipe and drains it on its own thread.
///
/// [`open`](Self::open) starts the drain; [`output`](Self::output) waits for
/// end-of-stream and returns everything read. A read error ends the drain the
/// same way end-of-stream does.
pub struct PipeReader<R> {
    source: Option<R>,
    drain: Option<JoinHandle<Vec<u8>>>,
    output: Vec<u8>,
}

impl PipeReader<io::PipeReader> {
    /// Create an OS pipe. Returns the reader and the write end to hand to
    /// the child process.
    pub fn pipe() -> io::Result<(Self, io::PipeWriter)> {
        let (reader, writer) = io::pipe()?;
        Ok((Self::new(reader), writer))
    }
}

impl<R: Read + Send + 'static> PipeReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            drain: None,
            output: Vec::new(),
        }
    }

    /// Start the drain thread. Calling it again once started is a no-op.
    pub fn open(&mut self) -> io::Result<()> {
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        let handle = thread::Builder::new()
            .name("tagwalk-pipe".to_string())
            .spawn(move || drain(source))?;
        self.drain = Some(handle);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.drain.is_some()
    }

    /// Block until the drain has seen end-of-stream, then return the bytes.
    ///
    /// Later calls return the same buffer without reading again. A reader
    /// that was never opened returns an empty buffer.
    pub fn output(&mut self) -> &[u8] {
        if let Some(handle) = self.drain.take() {
            self.output = handle.join().unwrap_or_default();
        }
        &self.output
    }

    /// Like [`output`](Self::output) but hands the buffer over
    pub fn into_output(mut self) -> Vec<u8> {
        self.output();
        std::mem::take(&mut self.output)
    }
}

fn drain<R: Read>(mut source: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut total = 0usize;

    loop {
        if total == buf.len() {
            buf.resize(total + CHUNK_SIZE, 0);
        }
        match source.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::trace!(error = %e, "pipe read failed, treating as end of stream");
                break;
            }
        }
    }

    buf.truncate(total);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("broken pipe"));
            }
            self.served = true;
            buf[..5].copy_from_slice(b"hello");
            Ok(5)
        }
    }

    #[test]
    fn test_drains_until_eof() {
        let data = vec![b'x'; CHUNK_SIZE * 3 + 17];
        let mut reader = PipeReader::new(Cursor::new(data.clone()));
        reader.open().unwrap();
        assert_eq!(reader.output(), data.as_slice());
    }

    #[test]
    fn test_output_is_idempotent() {
        let mut reader = PipeReader::new(Cursor::new(b"abc\n".to_vec()));
        reader.open().unwrap();
        assert_eq!(reader.output(), b"abc\n");
        assert_eq!(reader.output(), b"abc\n");
    }

    #[test]
    fn test_unopened_reader_is_empty() {
        let mut reader = PipeReader::new(Cursor::new(b"ignored".to_vec()));
        assert!(!reader.is_open());
        assert!(reader.output().is_empty());
    }

    #[test]
    fn test_read_error_is_end_of_stream() {
        let mut reader = PipeReader::new(FailingReader { served: false });
        reader.open().unwrap();
        assert_eq!(reader.into_output(), b"hello");
    }

    #[test]
    fn test_os_pipe_sees_eof_after_writer_drop() {
        let (mut reader, mut writer) = PipeReader::pipe().unwrap();
        reader.open().unwrap();
        let producer = std::thread::spawn(move || {
            for _ in 0..100 {
                writer.write_all(b"line\n").unwrap();
            }
        });
        producer.join().unwrap();
        assert_eq!(reader.output().len(), 500);
    }
}
