// posview/src/feed_mock.rs

//! Scripted in-memory [`PositionFeed`].
//!
//! Every `open` is recorded as a [`ScriptedConnection`] that test code (or the
//! replay binary) drives by hand: it can emit snapshots at any time, including
//! after the connection was torn down, which is how late in-flight frames are
//! simulated.

use crate::account::PositionSnapshot;
use crate::base::PosViewError;
use crate::feed::{FeedHandle, FeedRequest, PositionFeed, SnapshotSink};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct ScriptedConnection {
  id: usize,
  request: FeedRequest,
  sink: SnapshotSink,
  disconnect_calls: AtomicUsize,
}

impl ScriptedConnection {
  pub fn id(&self) -> usize {
    self.id
  }

  pub fn request(&self) -> &FeedRequest {
    &self.request
  }

  /// Pushes a snapshot through this connection's sink, whether or not the
  /// connection has been disconnected. Returns whether it was accepted.
  pub fn emit(&self, snapshot: PositionSnapshot) -> bool {
    trace!("Scripted connection {} emitting snapshot.", self.id);
    self.sink.deliver(snapshot)
  }

  pub fn emit_json(&self, payload: &str) -> Result<bool, PosViewError> {
    self.sink.deliver_json(payload)
  }

  pub fn disconnect(&self) {
    let calls = self.disconnect_calls.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("Scripted connection {} disconnect (call #{}).", self.id, calls);
  }

  pub fn disconnect_calls(&self) -> usize {
    self.disconnect_calls.load(Ordering::SeqCst)
  }

  pub fn is_disconnected(&self) -> bool {
    self.disconnect_calls() > 0
  }
}

struct ScriptedHandle {
  connection: Arc<ScriptedConnection>,
}

impl FeedHandle for ScriptedHandle {
  fn disconnect(&self) {
    self.connection.disconnect();
  }
}

#[derive(Default)]
struct ScriptedFeedState {
  connections: Vec<Arc<ScriptedConnection>>,
  open_failures: VecDeque<PosViewError>,
}

/// Cloneable handle to one scripted feed; clones share their recordings.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
  inner: Arc<Mutex<ScriptedFeedState>>,
}

impl ScriptedFeed {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes the next `open` call fail with `error`. Failures queue up.
  pub fn fail_next_open(&self, error: PosViewError) {
    self.inner.lock().open_failures.push_back(error);
  }

  pub fn connections(&self) -> Vec<Arc<ScriptedConnection>> {
    self.inner.lock().connections.clone()
  }

  pub fn connection(&self, index: usize) -> Option<Arc<ScriptedConnection>> {
    self.inner.lock().connections.get(index).cloned()
  }

  pub fn last_connection(&self) -> Option<Arc<ScriptedConnection>> {
    self.inner.lock().connections.last().cloned()
  }

  pub fn open_count(&self) -> usize {
    self.inner.lock().connections.len()
  }

  /// Connections that received at least one `disconnect`.
  pub fn disconnect_count(&self) -> usize {
    self.inner.lock().connections.iter().filter(|c| c.is_disconnected()).count()
  }

  /// Connections opened and not yet disconnected.
  pub fn live_count(&self) -> usize {
    self.inner.lock().connections.iter().filter(|c| !c.is_disconnected()).count()
  }
}

impl PositionFeed for ScriptedFeed {
  fn open(&self, request: &FeedRequest, sink: SnapshotSink) -> Result<Box<dyn FeedHandle>, PosViewError> {
    let mut state = self.inner.lock();
    if let Some(error) = state.open_failures.pop_front() {
      debug!("Scripted feed failing open for login {}: {}", request.login, error);
      return Err(error);
    }
    let connection = Arc::new(ScriptedConnection {
      id: state.connections.len(),
      request: request.clone(),
      sink,
      disconnect_calls: AtomicUsize::new(0),
    });
    debug!("Scripted feed opened connection {} for login {}.", connection.id, request.login);
    state.connections.push(Arc::clone(&connection));
    Ok(Box::new(ScriptedHandle { connection }))
  }
}
