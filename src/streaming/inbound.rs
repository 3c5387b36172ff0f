//! Receiving side of named-state streams.
//!
//! Every live transfer is keyed by `(state_id, sender)` and owns a bounded
//! chunk queue. A consumer task turns the queue into an [`AsyncRead`] and
//! hands it to the replicated object's `set_named_state`. Ending or
//! force-closing a transfer closes the queue: the reader then sees end of
//! input after whatever bytes were already queued.

use crate::object::{Replicable, ReplicatedObject};
use crate::transport::Address;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, error, trace, warn};

/// Reader handed to `set_named_state` for one inbound transfer.
pub type InboundStreamReader = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// Identity of one inbound transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamKey {
  /// Named state being transferred.
  pub state_id: String,
  /// Member sending it.
  pub sender: Address,
}

impl StreamKey {
  /// Creates a key.
  pub fn new(state_id: impl Into<String>, sender: Address) -> Self {
    Self {
      state_id: state_id.into(),
      sender,
    }
  }
}

impl fmt::Display for StreamKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.state_id, self.sender)
  }
}

/// Producer half of a live transfer. Dropping it ends the stream.
struct InboundStreamBuffer {
  chunks: mpsc::Sender<io::Result<Bytes>>,
}

/// Consumer half of a live transfer, returned by [`InboundStreams::begin`].
pub struct InboundTransfer {
  key: StreamKey,
  reader: InboundStreamReader,
}

impl InboundTransfer {
  /// Key of this transfer.
  pub fn key(&self) -> &StreamKey {
    &self.key
  }

  /// Loads the transfer into `object`. Failures are logged, never returned.
  pub async fn run(self, object: &dyn ReplicatedObject) {
    let Self { key, mut reader } = self;
    match object.set_named_state(&key.state_id, &mut reader).await {
      Ok(()) => debug!(state_id = %key.state_id, peer = %key.sender, "named state loaded"),
      Err(e) => error!(
        state_id = %key.state_id,
        peer = %key.sender,
        error = %e,
        "failed to load streamed state"
      ),
    }
  }
}

/// Spawns the consumer task of `transfer` on `object`.
pub fn spawn_consumer<O: Replicable>(object: Arc<O>, transfer: InboundTransfer) -> JoinHandle<()> {
  tokio::spawn(async move {
    match object.as_replicated() {
      Some(replicated) => transfer.run(replicated).await,
      None => warn!(key = %transfer.key(), "streamed state for object without state transfer"),
    }
  })
}

/// Live inbound transfers of one replicated object.
pub struct InboundStreams {
  live: Mutex<HashMap<StreamKey, InboundStreamBuffer>>,
  capacity: usize,
  stall_timeout: Duration,
}

impl InboundStreams {
  /// Creates an empty table. Each transfer buffers at most `capacity` chunks;
  /// a chunk that cannot be queued within `stall_timeout` force-closes its
  /// transfer.
  pub fn new(capacity: usize, stall_timeout: Duration) -> Self {
    Self {
      live: Mutex::new(HashMap::new()),
      capacity: capacity.max(1),
      stall_timeout,
    }
  }

  /// Starts a transfer for `key`, force-closing any transfer already live
  /// under the same key.
  pub async fn begin(&self, key: StreamKey) -> InboundTransfer {
    let (chunks, rx) = mpsc::channel(self.capacity);
    let stale = self
      .live
      .lock()
      .await
      .insert(key.clone(), InboundStreamBuffer { chunks });
    if stale.is_some() {
      warn!(key = %key, "stream restarted; closing previous transfer");
    }
    trace!(key = %key, "stream begin");

    InboundTransfer {
      key,
      reader: StreamReader::new(ReceiverStream::new(rx)),
    }
  }

  /// Queues one chunk. Chunks for unknown keys are ignored.
  pub async fn chunk(&self, key: &StreamKey, data: Bytes) {
    let Some(chunks) = self.live.lock().await.get(key).map(|b| b.chunks.clone()) else {
      trace!(key = %key, "chunk for unknown stream ignored");
      return;
    };

    match chunks.send_timeout(Ok(data), self.stall_timeout).await {
      Ok(()) => {}
      Err(SendTimeoutError::Timeout(_)) => {
        warn!(
          key = %key,
          timeout_ms = self.stall_timeout.as_millis() as u64,
          "stream consumer stalled; closing transfer"
        );
        self.remove_if_current(key, &chunks).await;
      }
      Err(SendTimeoutError::Closed(_)) => {
        debug!(key = %key, "stream consumer already finished");
        self.remove_if_current(key, &chunks).await;
      }
    }
  }

  async fn remove_if_current(&self, key: &StreamKey, chunks: &mpsc::Sender<io::Result<Bytes>>) {
    let mut live = self.live.lock().await;
    if live
      .get(key)
      .is_some_and(|buffer| buffer.chunks.same_channel(chunks))
    {
      live.remove(key);
    }
  }

  /// Ends the transfer for `key`; its reader sees end of input once the
  /// queued chunks are consumed.
  pub async fn end(&self, key: &StreamKey) {
    if self.live.lock().await.remove(key).is_some() {
      trace!(key = %key, "stream end");
    } else {
      trace!(key = %key, "end for unknown stream ignored");
    }
  }

  /// Closes every live transfer; consumers see end of input.
  pub async fn close_all(&self) {
    let drained: Vec<_> = self.live.lock().await.drain().collect();
    for (key, _buffer) in drained {
      debug!(key = %key, "closing live transfer");
    }
  }

  /// Number of live transfers.
  pub async fn live_count(&self) -> usize {
    self.live.lock().await.len()
  }
}
