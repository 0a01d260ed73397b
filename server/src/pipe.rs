//! In-process byte pipe between the transport and a client's decode task.
//!
//! The transport owns the write end and pushes every chunk it reads from the
//! socket. The decode task owns the read end, which behaves like a buffered
//! async reader. Dropping the write end closes the pipe: the reader drains
//! what is left and then reports end of stream.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::io::StreamReader;

/// Read end of a pipe.
pub type PipeReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("pipe is full, {0} bytes dropped")]
    Full(usize),
    #[error("pipe is closed")]
    Closed,
}

/// Write end of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    sender: mpsc::Sender<Bytes>,
}

impl PipeWriter {
    /// Queues `data` for the reader without waiting.
    ///
    /// A full pipe drops the chunk; the decoder resynchronizes on the next
    /// frame start.
    pub fn write(&self, data: Bytes) -> Result<(), PipeError> {
        if data.is_empty() {
            return Ok(());
        }

        self.sender.try_send(data).map_err(|e| match e {
            TrySendError::Full(data) => PipeError::Full(data.len()),
            TrySendError::Closed(_) => PipeError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Creates a pipe holding at most `capacity` unread chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = mpsc::channel::<Bytes>(capacity.max(1));

    let chunks = stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|chunk| (Ok::<_, io::Error>(chunk), receiver))
    })
    .boxed();

    (PipeWriter { sender }, StreamReader::new(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_pipe_transfers_chunks_in_order() {
        let (writer, mut reader) = pipe(8);

        writer.write(Bytes::from_static(b"<id:1;")).unwrap();
        writer.write(Bytes::from_static(b"rid:0;")).unwrap();
        drop(writer);

        let mut received = String::new();
        reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "<id:1;rid:0;");
    }

    #[tokio::test]
    async fn test_pipe_full_drops_chunk() {
        let (writer, _reader) = pipe(1);

        writer.write(Bytes::from_static(b"first")).unwrap();
        assert_eq!(
            writer.write(Bytes::from_static(b"second")),
            Err(PipeError::Full(6))
        );
    }

    #[tokio::test]
    async fn test_pipe_closed_when_reader_dropped() {
        let (writer, reader) = pipe(4);
        drop(reader);

        assert!(writer.is_closed());
        assert_eq!(
            writer.write(Bytes::from_static(b"data")),
            Err(PipeError::Closed)
        );
    }

    #[tokio::test]
    async fn test_empty_write_is_noop() {
        let (writer, _reader) = pipe(1);

        writer.write(Bytes::new()).unwrap();
        writer.write(Bytes::from_static(b"x")).unwrap();
    }
}
