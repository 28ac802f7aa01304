//! Framed channel over any ordered duplex byte stream.
//!
//! The reader and writer halves are independent so the read loop and the
//! sender can run on separate tasks.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::FrameCodec;
use crate::messages::{Frame, Opcode};
use crate::ProtocolError;

/// Read half: yields one decoded frame per call.
pub struct FrameReader<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec),
        }
    }

    /// Wait for the next complete frame.
    ///
    /// End of stream is an error here: the caller always expects another
    /// frame, so a peer that goes away surfaces as `ConnectionClosed`.
    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        match self.inner.next().await {
            Some(result) => result,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Give back the underlying reader. Bytes already buffered are discarded.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Write half: encodes and flushes one frame per call.
pub struct FrameWriter<W> {
    inner: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, FrameCodec),
        }
    }

    /// Encode `text` under `opcode` and flush it to the stream.
    pub async fn write_frame(&mut self, opcode: Opcode, text: &str) -> Result<(), ProtocolError> {
        self.send(Frame::new(opcode, text)).await
    }

    /// Send a prebuilt frame and flush.
    pub async fn send(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        self.inner.send(frame).await
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

/// Both halves of one stream.
pub struct FramedChannel<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, opcode: Opcode, text: &str) -> Result<(), ProtocolError> {
        self.writer.write_frame(opcode, text).await
    }

    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}
