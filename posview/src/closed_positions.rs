// posview/src/closed_positions.rs

//! Request/response query for an account's closed positions.
//!
//! [`ClosedPositionQuery`] only tracks *when* a request is due and which
//! response is still wanted. Issuing the request is the caller's job: it gets
//! a [`ClosedPositionTicket`] from `reconcile`, runs the request against a
//! [`ClosedPositionSource`] and hands the result back with `complete`.
//! Responses carrying an outdated ticket are ignored.

use crate::account::{ClosedPosition, Login, ViewMode};
use crate::base::PosViewError;
use log::{debug, trace, warn};

/// External request interface for closed positions.
pub trait ClosedPositionSource: Send + Sync {
  fn fetch_closed_positions(&self, request: &ClosedPositionRequest) -> Result<Vec<ClosedPosition>, PosViewError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPositionRequest {
  pub login: Login,
  pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedPositionTicket(u64);

#[derive(Debug, Default)]
pub struct ClosedPositionQuery {
  key: Option<ClosedPositionRequest>,
  next_ticket: u64,
  in_flight: Option<ClosedPositionTicket>,
  data: Option<Vec<ClosedPosition>>,
  error: Option<PosViewError>,
}

impl ClosedPositionQuery {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns a ticket if a request for the current inputs must be issued.
  ///
  /// The query is active only in `Closed` mode with a non-blank login and a
  /// non-empty token. Leaving `Closed` mode keeps the cached result for the
  /// same key; a different key discards it.
  pub fn reconcile(
    &mut self,
    login: Option<&Login>,
    token: Option<&str>,
    mode: ViewMode,
  ) -> Option<(ClosedPositionTicket, ClosedPositionRequest)> {
    if mode != ViewMode::Closed {
      if self.in_flight.take().is_some() {
        debug!("Closed position request abandoned, view left closed mode.");
      }
      return None;
    }
    let (login, token) = match (login.filter(|l| !l.is_empty()), token.filter(|t| !t.is_empty())) {
      (Some(login), Some(token)) => (login, token),
      _ => {
        // Nothing to show for an unset login or missing auth.
        self.key = None;
        self.invalidate();
        return None;
      }
    };
    let request = ClosedPositionRequest { login: login.clone(), token: token.to_string() };

    if self.key.as_ref() != Some(&request) {
      self.key = Some(request.clone());
      self.data = None;
      self.error = None;
      self.in_flight = None;
    }
    if self.in_flight.is_some() || self.data.is_some() || self.error.is_some() {
      return None;
    }
    Some((self.issue(), request))
  }

  fn issue(&mut self) -> ClosedPositionTicket {
    self.next_ticket += 1;
    let ticket = ClosedPositionTicket(self.next_ticket);
    self.in_flight = Some(ticket);
    debug!("Issuing closed position request #{}.", self.next_ticket);
    ticket
  }

  /// Stores a response. Returns `false` if the ticket is no longer wanted.
  pub fn complete(&mut self, ticket: ClosedPositionTicket, result: Result<Vec<ClosedPosition>, PosViewError>) -> bool {
    if self.in_flight != Some(ticket) {
      trace!("Ignoring stale closed position response #{}.", ticket.0);
      return false;
    }
    self.in_flight = None;
    match result {
      Ok(positions) => {
        debug!("Closed position request #{} returned {} records.", ticket.0, positions.len());
        self.data = Some(positions);
        self.error = None;
      }
      Err(e) => {
        warn!("Closed position request #{} failed: {}", ticket.0, e);
        self.error = Some(e);
      }
    }
    true
  }

  /// Drops cached data, errors and any outstanding request. The next
  /// `reconcile` in `Closed` mode issues a fresh request.
  pub fn invalidate(&mut self) {
    self.data = None;
    self.error = None;
    self.in_flight = None;
  }

  /// Forces a new request for the current key, if there is one.
  pub fn refresh(&mut self) -> Option<(ClosedPositionTicket, ClosedPositionRequest)> {
    let request = self.key.clone()?;
    self.error = None;
    Some((self.issue(), request))
  }

  pub fn in_flight(&self) -> bool {
    self.in_flight.is_some()
  }

  pub fn data(&self) -> Option<&[ClosedPosition]> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&PosViewError> {
    self.error.as_ref()
  }
}
