// posview/src/feed.rs
// Interface to the live position feed.

//! The live position feed is an external collaborator. It is opened per
//! (login, token) and pushes [`PositionSnapshot`]s into the [`SnapshotSink`] it
//! was given. Wire protocol, reconnection and framing are the feed's business.

use crate::account::{Login, PositionSnapshot};
use crate::base::PosViewError;
use crate::codec;
use crate::subscription::FeedShared;
use log::trace;
use std::fmt;
use std::sync::Arc;

/// Parameters for opening one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
  pub login: Login,
  pub token: String,
}

/// Handle of an open live connection, exclusively owned by the subscription controller.
pub trait FeedHandle: Send {
  /// Closes the connection. Must be idempotent and return immediately; the
  /// network-level close may complete later.
  fn disconnect(&self);
}

/// Opens live connections.
pub trait PositionFeed: Send + Sync {
  /// Opens a connection for `request`. Snapshots must be pushed into `sink`.
  fn open(&self, request: &FeedRequest, sink: SnapshotSink) -> Result<Box<dyn FeedHandle>, PosViewError>;
}

/// Delivery endpoint handed to a connection when it is opened.
///
/// Bound to the controller generation that opened the connection: once the
/// controller tears that connection down, every delivery through this sink
/// is discarded.
#[derive(Clone)]
pub struct SnapshotSink {
  shared: Arc<FeedShared>,
  generation: u64,
}

impl SnapshotSink {
  pub(crate) fn new(shared: Arc<FeedShared>, generation: u64) -> Self {
    SnapshotSink { shared, generation }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Whether deliveries through this sink would still reach the listeners.
  pub fn is_current(&self) -> bool {
    self.shared.is_current(self.generation)
  }

  /// Publishes a snapshot. Returns `false` if it was discarded as stale.
  pub fn deliver(&self, snapshot: PositionSnapshot) -> bool {
    self.shared.deliver(self.generation, snapshot)
  }

  /// Decodes a JSON snapshot frame and delivers it.
  pub fn deliver_json(&self, payload: &str) -> Result<bool, PosViewError> {
    if !self.is_current() {
      trace!("Sink gen {} stale, skipping decode of {} byte frame.", self.generation, payload.len());
      return Ok(false);
    }
    let snapshot = codec::decode_snapshot(payload)?;
    Ok(self.deliver(snapshot))
  }
}

impl fmt::Debug for SnapshotSink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SnapshotSink").field("generation", &self.generation).finish()
  }
}
