// posview/src/view.rs

//! The position history view: account selection, open/closed toggle, and the
//! data source behind each mode.
//!
//! [`PositionHistoryView`] is the single writer of the selection. Every setter
//! re-derives the subscription inputs and reconciles both data sources, so
//! the live subscription and the closed-position query always follow the
//! current (login, token, mode). [`PositionHistoryView::output`] produces the
//! record handed to the presentation layer.
//!
//! Closed-position requests are not executed by the view itself. Take the
//! pending request with `take_closed_request`, run it, and feed the result back
//! with `complete_closed_fetch` (or use `fetch_closed_positions` to do both
//! synchronously).

use crate::account::{Account, AccountType, ClosedPosition, Login, PositionSnapshot, ViewMode};
use crate::base::PosViewError;
use crate::closed_positions::{ClosedPositionQuery, ClosedPositionRequest, ClosedPositionSource, ClosedPositionTicket};
use crate::config::ViewConfig;
use crate::directory::{AccountDirectory, DirectoryCache};
use crate::feed::PositionFeed;
use crate::selection::{Selection, SelectionChange};
use crate::status::project_loading;
use crate::subscription::{FeedInputs, Reconciled, SubscriptionController};
use log::{debug, info};
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Rows for the current mode. `None` means nothing has arrived yet (or nothing is selected).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "rows", rename_all = "lowercase")]
pub enum PositionData {
  Open(Option<PositionSnapshot>),
  Closed(Option<Vec<ClosedPosition>>),
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOutput {
  pub data: PositionData,
  pub is_loading: bool,
  pub view_mode: ViewMode,
  pub account_type: Option<AccountType>,
  pub selected_login: Option<Login>,
  #[serde(serialize_with = "serialize_error")]
  pub error: Option<PosViewError>,
}

fn serialize_error<S: Serializer>(error: &Option<PosViewError>, serializer: S) -> Result<S::Ok, S::Error> {
  match error {
    Some(e) => serializer.serialize_some(&e.to_string()),
    None => serializer.serialize_none(),
  }
}

pub struct PositionHistoryView {
  accounts: Arc<Vec<Account>>,
  directory_cache: DirectoryCache,
  selection: Selection,
  mode: ViewMode,
  token: Option<String>,
  controller: SubscriptionController,
  closed: ClosedPositionQuery,
  pending_closed: Option<(ClosedPositionTicket, ClosedPositionRequest)>,
  feed_error: Option<PosViewError>,
}

impl PositionHistoryView {
  pub fn new(feed: Arc<dyn PositionFeed>, config: &ViewConfig) -> Self {
    debug!("Creating position history view (mode: {}).", config.default_view_mode);
    PositionHistoryView {
      accounts: Arc::new(Vec::new()),
      directory_cache: DirectoryCache::new(),
      selection: Selection::new(),
      mode: config.default_view_mode,
      token: None,
      controller: SubscriptionController::with_event_capacity(feed, config.event_channel_capacity),
      closed: ClosedPositionQuery::new(),
      pending_closed: None,
      feed_error: None,
    }
  }

  pub fn controller(&self) -> &SubscriptionController {
    &self.controller
  }

  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  pub fn view_mode(&self) -> ViewMode {
    self.mode
  }

  pub fn directory(&self) -> Arc<AccountDirectory> {
    self.directory_cache.current()
  }

  /// Replaces the account list. The directory is rebuilt only for a new list instance.
  pub fn set_accounts(&mut self, accounts: Arc<Vec<Account>>) -> Result<(), PosViewError> {
    self.accounts = accounts;
    let directory = self.directory_cache.get(&self.accounts);
    let change = self.selection.initialize(&directory);
    self.on_selection_change(change);
    self.sync()
  }

  pub fn set_token(&mut self, token: Option<String>) -> Result<(), PosViewError> {
    if self.token != token {
      debug!("Auth token {}.", if token.is_some() { "updated" } else { "cleared" });
      self.token = token;
    }
    self.sync()
  }

  pub fn set_view_mode(&mut self, mode: ViewMode) -> Result<(), PosViewError> {
    if self.mode != mode {
      debug!("View mode {} -> {}.", self.mode, mode);
      self.mode = mode;
    }
    self.sync()
  }

  pub fn toggle_view_mode(&mut self) -> Result<(), PosViewError> {
    self.set_view_mode(self.mode.toggled())
  }

  pub fn set_account_type(&mut self, account_type: AccountType) -> Result<(), PosViewError> {
    let directory = self.directory_cache.current();
    let change = self.selection.set_account_type(account_type, &directory);
    self.on_selection_change(change);
    self.sync()
  }

  pub fn set_account(&mut self, login: Login) -> Result<(), PosViewError> {
    let directory = self.directory_cache.current();
    let change = self.selection.set_account(login, &directory);
    if change == SelectionChange::Unchanged {
      return Ok(());
    }
    self.on_selection_change(change);
    self.sync()
  }

  /// Shows `login` directly, bypassing type and account selection. `None` removes the override.
  pub fn set_login_override(&mut self, login: Option<Login>) -> Result<(), PosViewError> {
    let change = self.selection.set_login_override(login);
    self.on_selection_change(change);
    self.sync()
  }

  fn on_selection_change(&mut self, change: SelectionChange) {
    if change.is_stale() {
      debug!("Selection changed, discarding cached closed positions.");
      self.closed.invalidate();
      self.pending_closed = None;
    }
  }

  fn sync(&mut self) -> Result<(), PosViewError> {
    let login = self.selection.effective_login().cloned();

    if let Some(request) = self.closed.reconcile(login.as_ref(), self.token.as_deref(), self.mode) {
      self.pending_closed = Some(request);
    }
    if !self.closed.in_flight() {
      self.pending_closed = None;
    }

    let inputs = FeedInputs::new(login, self.token.clone(), self.mode);
    match self.controller.reconcile(&inputs) {
      Ok(Reconciled::Unchanged) => Ok(()),
      Ok(_) => {
        self.feed_error = None;
        Ok(())
      }
      Err(e) => {
        self.feed_error = Some(e.clone());
        Err(e)
      }
    }
  }

  /// Takes the closed-position request that is due, if any.
  pub fn take_closed_request(&mut self) -> Option<(ClosedPositionTicket, ClosedPositionRequest)> {
    self.pending_closed.take()
  }

  /// Hands a closed-position response back. Returns `false` if it was stale.
  pub fn complete_closed_fetch(
    &mut self,
    ticket: ClosedPositionTicket,
    result: Result<Vec<ClosedPosition>, PosViewError>,
  ) -> bool {
    self.closed.complete(ticket, result)
  }

  /// Runs the due closed-position request against `source`, if any.
  pub fn fetch_closed_positions(&mut self, source: &dyn ClosedPositionSource) -> bool {
    match self.take_closed_request() {
      Some((ticket, request)) => {
        let result = source.fetch_closed_positions(&request);
        self.complete_closed_fetch(ticket, result)
      }
      None => false,
    }
  }

  /// Re-issues the closed-position request for the current account.
  pub fn refresh_closed(&mut self) {
    if self.mode != ViewMode::Closed {
      return;
    }
    if let Some(request) = self.closed.refresh() {
      self.pending_closed = Some(request);
    }
  }

  pub fn output(&self) -> ViewOutput {
    let (data, error) = match self.mode {
      ViewMode::Open => (PositionData::Open(self.controller.latest_snapshot()), self.feed_error.clone()),
      ViewMode::Closed => (
        PositionData::Closed(self.closed.data().map(|d| d.to_vec())),
        self.closed.error().cloned(),
      ),
    };
    ViewOutput {
      data,
      is_loading: project_loading(self.controller.is_loading(), self.mode, self.closed.in_flight()),
      view_mode: self.mode,
      account_type: self.selection.account_type(),
      selected_login: self.selection.effective_login().cloned(),
      error,
    }
  }

  /// Tears down the live subscription. Also happens on drop.
  pub fn shutdown(&mut self) {
    info!("Position history view shutting down.");
    self.controller.shutdown();
    self.pending_closed = None;
  }
}
