// posview/src/subscription.rs

//! Lifecycle of the single live position subscription behind the history view.
//!
//! [`SubscriptionController`] is an explicit state machine with one owned
//! connection slot. Callers hand it the current [`FeedInputs`] through
//! [`SubscriptionController::reconcile`]; the controller derives the
//! [`FeedKey`] and opens, keeps, replaces or drops the connection so that
//! at most one connection exists and it always matches the current key.
//!
//! # Stale delivery
//!
//! Every open and every teardown bumps a generation counter. The
//! [`SnapshotSink`] given to a connection remembers the generation it was
//! opened under, and deliveries are accepted only while that generation is
//! still current. The check, the snapshot store and the listener
//! notifications all happen under one lock, so once a teardown has returned
//! nothing from the old connection can reach a listener.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use posview::account::{Login, ViewMode};
//! use posview::feed_mock::ScriptedFeed;
//! use posview::subscription::{FeedInputs, SubscriptionController};
//!
//! let feed = ScriptedFeed::new();
//! let mut controller = SubscriptionController::new(Arc::new(feed.clone()));
//! let inputs = FeedInputs::new(Some(Login::from("1001")), Some("t1".to_string()), ViewMode::Open);
//! controller.reconcile(&inputs).unwrap();
//! assert!(controller.is_loading());
//! ```

use crate::account::{Login, PositionSnapshot, ViewMode};
use crate::base::PosViewError;
use crate::feed::{FeedHandle, FeedRequest, PositionFeed, SnapshotSink};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identity of a subscription. A connection exists only for a valid key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
  pub login: Login,
  pub token: String,
}

/// Plain-value inputs the key is derived from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedInputs {
  pub login: Option<Login>,
  pub token: Option<String>,
  pub mode: ViewMode,
}

impl FeedInputs {
  pub fn new(login: Option<Login>, token: Option<String>, mode: ViewMode) -> Self {
    FeedInputs { login, token, mode }
  }

  /// `Some` iff the login is non-blank, a non-empty token is present and the mode is `Open`.
  pub fn key(&self) -> Option<FeedKey> {
    if self.mode != ViewMode::Open {
      return None;
    }
    let login = self.login.as_ref().filter(|l| !l.is_empty())?;
    let token = self.token.as_ref().filter(|t| !t.is_empty())?;
    Some(FeedKey { login: login.clone(), token: token.clone() })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
  Idle,
  Active,
}

/// What a call to `reconcile` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
  Unchanged,
  Opened,
  Closed,
  Reopened,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
  Opened {
    key: FeedKey,
    generation: u64,
    timestamp: DateTime<Utc>,
  },
  Snapshot {
    login: Login,
    snapshot: PositionSnapshot,
  },
  Closed {
    key: FeedKey,
    timestamp: DateTime<Utc>,
  },
}

/// Listener for accepted snapshots.
///
/// `on_snapshot` runs with the controller's delivery lock held and must not
/// call back into the controller (its accessors take the same lock). The
/// opened/closed callbacks run without it.
pub trait SnapshotObserver: Send + Sync {
  fn on_snapshot(&self, login: &Login, snapshot: &PositionSnapshot);
  fn on_subscription_opened(&self, _key: &FeedKey) {}
  fn on_subscription_closed(&self, _key: &FeedKey) {}
}

#[derive(Debug, Default)]
struct Slot {
  generation: u64,
  key: Option<FeedKey>,
  latest: Option<PositionSnapshot>,
}

/// State shared between the controller and the sinks of its connections.
pub(crate) struct FeedShared {
  slot: Mutex<Slot>,
  observers: RwLock<HashMap<usize, Box<dyn SnapshotObserver>>>,
  next_observer_id: AtomicUsize,
  event_capacity: Option<usize>,
  events: Mutex<Option<Sender<FeedEvent>>>, // Receiver lives with the consumer only
}

impl FeedShared {
  fn new(event_capacity: Option<usize>) -> Self {
    FeedShared {
      slot: Mutex::new(Slot::default()),
      observers: RwLock::new(HashMap::new()),
      next_observer_id: AtomicUsize::new(1),
      event_capacity,
      events: Mutex::new(None),
    }
  }

  pub(crate) fn is_current(&self, generation: u64) -> bool {
    let slot = self.slot.lock();
    slot.generation == generation && slot.key.is_some()
  }

  pub(crate) fn deliver(&self, generation: u64, snapshot: PositionSnapshot) -> bool {
    let mut slot = self.slot.lock();
    if slot.generation != generation {
      trace!("Dropping snapshot from gen {} (current gen {}).", generation, slot.generation);
      return false;
    }
    let login = match slot.key.as_ref() {
      Some(key) => key.login.clone(),
      None => {
        trace!("Dropping snapshot for gen {}: no active subscription.", generation);
        return false;
      }
    };
    trace!("Snapshot for {} accepted ({} positions).", login, snapshot.positions.len());
    slot.latest = Some(snapshot.clone());

    // Still holding `slot`: a concurrent teardown waits until listeners are done.
    for observer in self.observers.read().values() {
      observer.on_snapshot(&login, &snapshot);
    }
    self.send_event(FeedEvent::Snapshot { login, snapshot });
    true
  }

  fn send_event(&self, event: FeedEvent) {
    let mut events = self.events.lock();
    let Some(sender) = events.as_ref() else {
      return;
    };
    match sender.try_send(event) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => warn!("Feed event channel full, dropping event."),
      Err(TrySendError::Disconnected(_)) => {
        debug!("Feed event receiver dropped, closing channel.");
        *events = None;
      }
    }
  }

  fn receiver(&self) -> Receiver<FeedEvent> {
    let (sender, receiver) = match self.event_capacity {
      Some(cap) => crossbeam_channel::bounded(cap),
      None => crossbeam_channel::unbounded(),
    };
    if self.events.lock().replace(sender).is_some() {
      debug!("Feed event channel replaced, previous receiver disconnected.");
    }
    receiver
  }
}

/// Owns the live connection for the history view.
pub struct SubscriptionController {
  feed: Arc<dyn PositionFeed>,
  shared: Arc<FeedShared>,
  handle: Option<Box<dyn FeedHandle>>,
}

impl SubscriptionController {
  pub fn new(feed: Arc<dyn PositionFeed>) -> Self {
    Self::with_event_capacity(feed, None)
  }

  /// Like `new`, with a bounded event channel when `event_capacity` is `Some`.
  pub fn with_event_capacity(feed: Arc<dyn PositionFeed>, event_capacity: Option<usize>) -> Self {
    SubscriptionController {
      feed,
      shared: Arc::new(FeedShared::new(event_capacity)),
      handle: None,
    }
  }

  pub fn state(&self) -> FeedState {
    if self.shared.slot.lock().key.is_some() {
      FeedState::Active
    } else {
      FeedState::Idle
    }
  }

  pub fn current_key(&self) -> Option<FeedKey> {
    self.shared.slot.lock().key.clone()
  }

  pub fn latest_snapshot(&self) -> Option<PositionSnapshot> {
    self.shared.slot.lock().latest.clone()
  }

  /// True while a subscription exists that has not delivered a snapshot yet.
  pub fn is_loading(&self) -> bool {
    let slot = self.shared.slot.lock();
    slot.key.is_some() && slot.latest.is_none()
  }

  pub fn generation(&self) -> u64 {
    self.shared.slot.lock().generation
  }

  /// Brings the connection in line with `inputs`.
  ///
  /// A changed key tears the old connection down before the new one is
  /// opened. Errors from the feed's `open` are returned unchanged; the key is
  /// still recorded, so the same inputs do not retry and loading stays on.
  pub fn reconcile(&mut self, inputs: &FeedInputs) -> Result<Reconciled, PosViewError> {
    let desired = inputs.key();
    let current = self.current_key();
    if desired == current {
      return Ok(Reconciled::Unchanged);
    }

    let had_connection = current.is_some();
    if had_connection {
      self.teardown();
    }
    match desired {
      None => Ok(Reconciled::Closed),
      Some(key) => {
        self.open(key)?;
        Ok(if had_connection { Reconciled::Reopened } else { Reconciled::Opened })
      }
    }
  }

  /// Tears down any active subscription. Used when the consuming view goes away.
  pub fn shutdown(&mut self) {
    if self.state() == FeedState::Active {
      info!("Shutting down position subscription.");
      self.teardown();
    }
  }

  fn open(&mut self, key: FeedKey) -> Result<(), PosViewError> {
    let generation = {
      let mut slot = self.shared.slot.lock();
      slot.generation += 1;
      slot.key = Some(key.clone());
      slot.latest = None;
      slot.generation
    };
    info!("Opening position subscription for login {} (gen {}).", key.login, generation);

    let request = FeedRequest { login: key.login.clone(), token: key.token.clone() };
    let sink = SnapshotSink::new(Arc::clone(&self.shared), generation);
    match self.feed.open(&request, sink) {
      Ok(handle) => {
        self.handle = Some(handle);
        for observer in self.shared.observers.read().values() {
          observer.on_subscription_opened(&key);
        }
        self.shared.send_event(FeedEvent::Opened { key, generation, timestamp: Utc::now() });
        Ok(())
      }
      Err(e) => {
        error!("Failed to open position feed for login {}: {}", request.login, e);
        Err(e)
      }
    }
  }

  fn teardown(&mut self) {
    let key = {
      let mut slot = self.shared.slot.lock();
      slot.generation += 1;
      slot.latest = None;
      slot.key.take()
    };
    let Some(handle) = self.handle.take() else {
      // Open failed for this key; nothing was announced.
      if let Some(key) = key {
        debug!("Dropped failed subscription key for login {}.", key.login);
      }
      return;
    };
    handle.disconnect();
    if let Some(key) = key {
      info!("Closed position subscription for login {}.", key.login);
      for observer in self.shared.observers.read().values() {
        observer.on_subscription_closed(&key);
      }
      self.shared.send_event(FeedEvent::Closed { key, timestamp: Utc::now() });
    }
  }

  /// Registers an observer and returns its ID. See [`SnapshotObserver`] for
  /// what callbacks may do; calling controller accessors from `on_snapshot`
  /// deadlocks.
  pub fn add_observer<T: SnapshotObserver + 'static>(&self, observer: T) -> usize {
    let observer_id = self.shared.next_observer_id.fetch_add(1, Ordering::SeqCst);
    self.shared.observers.write().insert(observer_id, Box::new(observer));
    debug!("Added snapshot observer with ID: {}", observer_id);
    observer_id
  }

  /// Removes a previously registered observer. Returns `false` if the ID was unknown.
  pub fn remove_observer(&self, observer_id: usize) -> bool {
    let removed = self.shared.observers.write().remove(&observer_id).is_some();
    if removed {
      debug!("Removed snapshot observer with ID: {}", observer_id);
    } else {
      warn!("Attempted to remove non-existent observer ID: {}", observer_id);
    }
    removed
  }

  /// Receiver for this controller's [`FeedEvent`]s. Each call starts a new
  /// channel and disconnects the receiver handed out before; events from
  /// before the call are not recorded. Once the receiver is dropped the
  /// controller stops queueing events.
  pub fn events(&self) -> Receiver<FeedEvent> {
    self.shared.receiver()
  }
}

impl Drop for SubscriptionController {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feed_mock::ScriptedFeed;
  use mockall::mock;

  mock! {
    Feed {}
    impl PositionFeed for Feed {
      fn open(&self, request: &FeedRequest, sink: SnapshotSink) -> Result<Box<dyn FeedHandle>, PosViewError>;
    }
  }

  #[derive(Default, Clone)]
  struct Recorder {
    snapshots: Arc<Mutex<Vec<(Login, usize)>>>,
    opened: Arc<Mutex<Vec<FeedKey>>>,
    closed: Arc<Mutex<Vec<FeedKey>>>,
  }

  impl SnapshotObserver for Recorder {
    fn on_snapshot(&self, login: &Login, snapshot: &PositionSnapshot) {
      self.snapshots.lock().push((login.clone(), snapshot.positions.len()));
    }
    fn on_subscription_opened(&self, key: &FeedKey) {
      self.opened.lock().push(key.clone());
    }
    fn on_subscription_closed(&self, key: &FeedKey) {
      self.closed.lock().push(key.clone());
    }
  }

  fn inputs(login: &str, token: &str, mode: ViewMode) -> FeedInputs {
    FeedInputs::new(Some(Login::from(login)), Some(token.to_string()), mode)
  }

  fn setup() -> (ScriptedFeed, SubscriptionController) {
    let feed = ScriptedFeed::new();
    let controller = SubscriptionController::new(Arc::new(feed.clone()));
    (feed, controller)
  }

  #[test]
  fn test_key_validity() {
    assert!(inputs("1001", "t1", ViewMode::Open).key().is_some());
    assert!(inputs("1001", "t1", ViewMode::Closed).key().is_none());
    assert!(inputs("", "t1", ViewMode::Open).key().is_none());
    assert!(inputs("1001", "", ViewMode::Open).key().is_none());
    assert!(FeedInputs::new(Some(Login::from("1001")), None, ViewMode::Open).key().is_none());
    assert!(FeedInputs::default().key().is_none());
  }

  #[test]
  fn test_open_then_snapshot_clears_loading() {
    let (feed, mut controller) = setup();
    assert_eq!(controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap(), Reconciled::Opened);
    assert_eq!(controller.state(), FeedState::Active);
    assert!(controller.is_loading());
    assert_eq!(feed.open_count(), 1);
    assert_eq!(feed.connection(0).unwrap().request().login, Login::from("1001"));

    assert!(feed.connection(0).unwrap().emit(PositionSnapshot::new(vec![])));
    assert!(!controller.is_loading());
    assert!(controller.latest_snapshot().is_some());
  }

  #[test]
  fn test_same_inputs_do_not_resubscribe() {
    let (feed, mut controller) = setup();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    assert_eq!(controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap(), Reconciled::Unchanged);
    assert_eq!(feed.open_count(), 1);
    assert_eq!(feed.disconnect_count(), 0);
  }

  #[test]
  fn test_single_active_subscription_over_key_changes() {
    let (feed, mut controller) = setup();
    let sequence = [
      inputs("1001", "t1", ViewMode::Open),
      inputs("2002", "t1", ViewMode::Open),
      inputs("2002", "t2", ViewMode::Open),
      inputs("2002", "t2", ViewMode::Closed),
      inputs("2002", "t2", ViewMode::Open),
      FeedInputs::new(None, Some("t2".into()), ViewMode::Open),
      inputs("1001", "t2", ViewMode::Open),
    ];
    for step in &sequence {
      controller.reconcile(step).unwrap();
      assert!(feed.live_count() <= 1);
    }
    // Final state has one open connection; every earlier one was disconnected.
    assert_eq!(feed.live_count(), 1);
    assert_eq!(feed.disconnect_count(), feed.open_count() - 1);
    assert_eq!(feed.open_count(), 5);
  }

  #[test]
  fn test_stale_snapshot_not_delivered() {
    let (feed, mut controller) = setup();
    let recorder = Recorder::default();
    controller.add_observer(recorder.clone());

    controller.reconcile(&inputs("A", "t1", ViewMode::Open)).unwrap();
    let conn_a = feed.connection(0).unwrap();
    assert_eq!(controller.reconcile(&inputs("B", "t1", ViewMode::Open)).unwrap(), Reconciled::Reopened);
    assert!(conn_a.is_disconnected());

    // Delayed event from A after the switch.
    assert!(!conn_a.emit(PositionSnapshot::new(vec![])));
    assert!(recorder.snapshots.lock().is_empty());
    assert!(controller.is_loading());
    assert!(controller.latest_snapshot().is_none());

    assert!(feed.connection(1).unwrap().emit(PositionSnapshot::new(vec![])));
    assert_eq!(recorder.snapshots.lock().as_slice(), &[(Login::from("B"), 0)]);
  }

  #[test]
  fn test_teardown_is_idempotent_and_isolated() {
    let (feed, mut controller) = setup();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    controller.reconcile(&inputs("1002", "t1", ViewMode::Open)).unwrap();
    let old = feed.connection(0).unwrap();
    old.disconnect();
    old.disconnect();
    assert_eq!(old.disconnect_calls(), 3);

    let current = feed.connection(1).unwrap();
    assert!(!current.is_disconnected());
    assert!(current.emit(PositionSnapshot::new(vec![])));
    assert_eq!(controller.state(), FeedState::Active);
  }

  #[test]
  fn test_mode_switch_suppresses_subscription() {
    let (feed, mut controller) = setup();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    assert_eq!(controller.reconcile(&inputs("1001", "t1", ViewMode::Closed)).unwrap(), Reconciled::Closed);
    assert_eq!(controller.state(), FeedState::Idle);
    assert!(!controller.is_loading());
    assert_eq!(feed.live_count(), 0);

    // Repeated closed-mode reconciles attempt nothing.
    controller.reconcile(&inputs("1002", "t1", ViewMode::Closed)).unwrap();
    assert_eq!(feed.open_count(), 1);

    controller.reconcile(&inputs("1002", "t1", ViewMode::Open)).unwrap();
    assert_eq!(feed.open_count(), 2);
  }

  #[test]
  fn test_observer_lifecycle_and_events() {
    let (feed, mut controller) = setup();
    let recorder = Recorder::default();
    let id = controller.add_observer(recorder.clone());
    let events = controller.events();

    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    feed.connection(0).unwrap().emit(PositionSnapshot::new(vec![]));
    controller.reconcile(&inputs("1001", "t1", ViewMode::Closed)).unwrap();

    assert_eq!(recorder.opened.lock().len(), 1);
    assert_eq!(recorder.closed.lock().len(), 1);
    assert!(matches!(events.try_recv(), Ok(FeedEvent::Opened { generation: 1, .. })));
    assert!(matches!(events.try_recv(), Ok(FeedEvent::Snapshot { .. })));
    assert!(matches!(events.try_recv(), Ok(FeedEvent::Closed { .. })));
    assert!(events.try_recv().is_err());

    assert!(controller.remove_observer(id));
    assert!(!controller.remove_observer(id));
  }

  #[test]
  fn test_bounded_event_channel_drops_overflow() {
    let feed = ScriptedFeed::new();
    let mut controller = SubscriptionController::with_event_capacity(Arc::new(feed.clone()), Some(1));
    let events = controller.events();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    feed.connection(0).unwrap().emit(PositionSnapshot::new(vec![]));
    assert_eq!(events.len(), 1);
    assert!(matches!(events.try_recv(), Ok(FeedEvent::Opened { .. })));
  }

  #[test]
  fn test_dropped_receiver_stops_queueing() {
    let (feed, mut controller) = setup();
    drop(controller.events());
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    let conn = feed.connection(0).unwrap();
    for _ in 0..100 {
      assert!(conn.emit(PositionSnapshot::new(vec![])));
    }
    assert!(controller.shared.events.lock().is_none());

    // A later consumer gets a fresh channel; the previous receiver is cut off.
    let first = controller.events();
    let second = controller.events();
    conn.emit(PositionSnapshot::new(vec![]));
    assert!(first.try_recv().is_err());
    assert!(matches!(second.try_recv(), Ok(FeedEvent::Snapshot { .. })));
  }

  #[test]
  fn test_failed_open_is_not_announced() {
    let mut mock = MockFeed::new();
    mock.expect_open()
      .times(1)
      .returning(|_, _| Err(PosViewError::ConnectionFailed("auth rejected".to_string())));
    let mut controller = SubscriptionController::new(Arc::new(mock));
    let recorder = Recorder::default();
    controller.add_observer(recorder.clone());
    let events = controller.events();

    assert!(controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).is_err());
    assert_eq!(controller.reconcile(&inputs("1001", "t1", ViewMode::Closed)).unwrap(), Reconciled::Closed);
    assert!(recorder.opened.lock().is_empty());
    assert!(recorder.closed.lock().is_empty());
    assert!(events.try_recv().is_err());
    assert_eq!(controller.state(), FeedState::Idle);
  }

  struct LockState {
    shared: Arc<FeedShared>,
    seen: Arc<Mutex<Vec<(&'static str, bool)>>>,
  }

  impl SnapshotObserver for LockState {
    fn on_snapshot(&self, _login: &Login, _snapshot: &PositionSnapshot) {
      self.seen.lock().push(("snapshot", self.shared.slot.is_locked()));
    }
    fn on_subscription_opened(&self, _key: &FeedKey) {
      self.seen.lock().push(("opened", self.shared.slot.is_locked()));
    }
    fn on_subscription_closed(&self, _key: &FeedKey) {
      self.seen.lock().push(("closed", self.shared.slot.is_locked()));
    }
  }

  #[test]
  fn test_only_snapshot_callback_holds_delivery_lock() {
    let (feed, mut controller) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let id = controller.add_observer(LockState { shared: Arc::clone(&controller.shared), seen: Arc::clone(&seen) });

    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    feed.connection(0).unwrap().emit(PositionSnapshot::new(vec![]));
    controller.shutdown();
    controller.remove_observer(id);

    assert_eq!(seen.lock().as_slice(), &[("opened", false), ("snapshot", true), ("closed", false)]);
  }

  #[test]
  fn test_drop_disconnects() {
    let (feed, mut controller) = setup();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    let sink_conn = feed.connection(0).unwrap();
    drop(controller);
    assert!(sink_conn.is_disconnected());
    assert!(!sink_conn.emit(PositionSnapshot::new(vec![])));
  }

  #[test]
  fn test_open_error_passes_through_without_retry() {
    let mut mock = MockFeed::new();
    mock.expect_open()
      .times(1)
      .returning(|_, _| Err(PosViewError::ConnectionFailed("auth rejected".to_string())));
    let mut controller = SubscriptionController::new(Arc::new(mock));

    let err = controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap_err();
    assert_eq!(err, PosViewError::ConnectionFailed("auth rejected".to_string()));
    assert!(controller.is_loading());
    assert_eq!(controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap(), Reconciled::Unchanged);
  }

  #[test]
  fn test_json_frames_through_sink() {
    let (feed, mut controller) = setup();
    controller.reconcile(&inputs("1001", "t1", ViewMode::Open)).unwrap();
    let conn = feed.connection(0).unwrap();
    assert!(conn.emit_json(r#"{"positions": []}"#).unwrap());
    assert!(conn.emit_json("not json").is_err());
    controller.shutdown();
    assert!(!conn.emit_json("not json").unwrap());
  }
}
