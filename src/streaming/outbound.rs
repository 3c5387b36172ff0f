//! Sending side of a named-state stream.

use super::{StreamError, StreamIds};
use crate::dispatcher::{CallDispatcher, DispatchError, RequestOptions};
use crate::object::ReplicatedObject;
use crate::transport::Address;
use crate::wire::MethodCall;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, trace};

/// Cuts written bytes into fixed-size chunks and sends each one as a one-way
/// call to a fixed set of destinations.
///
/// Opening sends `begin`, closing flushes the partial chunk and sends `end`.
pub struct OutboundStreamWriter {
  dispatcher: CallDispatcher,
  dests: Vec<Address>,
  state_id: String,
  ids: StreamIds,
  chunk_size: usize,
  buffer: BytesMut,
  chunks_sent: usize,
}

impl OutboundStreamWriter {
  /// Opens a stream for `state_id` and sends the begin call.
  pub async fn open(
    dispatcher: CallDispatcher,
    dests: Vec<Address>,
    state_id: impl Into<String>,
    ids: StreamIds,
    chunk_size: usize,
  ) -> Result<Self, DispatchError> {
    let chunk_size = chunk_size.max(1);
    let writer = Self {
      dispatcher,
      dests,
      state_id: state_id.into(),
      ids,
      chunk_size,
      buffer: BytesMut::with_capacity(chunk_size),
      chunks_sent: 0,
    };
    writer
      .send(MethodCall::stream_control(ids.begin, &writer.state_id))
      .await?;
    debug!(state_id = %writer.state_id, peers = writer.dests.len(), "state stream opened");
    Ok(writer)
  }

  async fn send(&self, call: MethodCall) -> Result<(), DispatchError> {
    self
      .dispatcher
      .call(&self.dests, &call, RequestOptions::one_way())
      .await
      .map(|_| ())
  }

  async fn send_chunk(&mut self, len: usize) -> Result<(), DispatchError> {
    let chunk = self.buffer.split_to(len);
    self
      .send(MethodCall::stream_chunk(self.ids.chunk, &self.state_id, &chunk))
      .await?;
    self.chunks_sent += 1;
    trace!(state_id = %self.state_id, bytes = chunk.len(), "chunk sent");
    Ok(())
  }

  /// Buffers `data`, sending every chunk that fills up.
  pub async fn write(&mut self, mut data: &[u8]) -> Result<(), DispatchError> {
    while !data.is_empty() {
      let room = self.chunk_size - self.buffer.len();
      let take = room.min(data.len());
      self.buffer.extend_from_slice(&data[..take]);
      data = &data[take..];
      if self.buffer.len() == self.chunk_size {
        self.send_chunk(self.chunk_size).await?;
      }
    }
    Ok(())
  }

  /// Copies `reader` into the stream until end of input.
  ///
  /// The reader is dropped on return, so a producer writing into its other
  /// end fails instead of blocking when the stream breaks.
  pub async fn pump<R>(&mut self, mut reader: R) -> Result<(), StreamError>
  where
    R: AsyncRead + Unpin,
  {
    let mut scratch = vec![0u8; self.chunk_size];
    loop {
      let read = reader.read(&mut scratch).await?;
      if read == 0 {
        return Ok(());
      }
      self.write(&scratch[..read]).await?;
    }
  }

  /// Sends any partial chunk followed by the end call. Returns the number of
  /// chunks sent.
  pub async fn close(mut self) -> Result<usize, DispatchError> {
    if !self.buffer.is_empty() {
      let len = self.buffer.len();
      self.send_chunk(len).await?;
    }
    self
      .send(MethodCall::stream_control(self.ids.end, &self.state_id))
      .await?;
    debug!(state_id = %self.state_id, chunks = self.chunks_sent, "state stream closed");
    Ok(self.chunks_sent)
  }
}

/// Streams the named state `state_id` of `object` to `dests`.
///
/// The end call is sent even when the object fails to produce its state, so
/// receivers never keep a half-open transfer.
pub async fn push_named_state(
  object: &dyn ReplicatedObject,
  dispatcher: CallDispatcher,
  dests: Vec<Address>,
  state_id: &str,
  ids: StreamIds,
  chunk_size: usize,
) -> Result<usize, StreamError> {
  let mut writer = OutboundStreamWriter::open(dispatcher, dests, state_id, ids, chunk_size).await?;
  let (mut output, input) = tokio::io::duplex(chunk_size.max(1) * 2);

  let produce = async move {
    let produced = object.get_named_state(state_id, &mut output).await;
    let _ = output.shutdown().await;
    produced
  };
  let (produced, pumped) = tokio::join!(produce, writer.pump(input));
  let chunks = writer.close().await?;

  if let Err(e) = &produced {
    error!(state_id = %state_id, error = %e, "failed to produce named state");
  }
  produced?;
  pumped?;
  Ok(chunks)
}
