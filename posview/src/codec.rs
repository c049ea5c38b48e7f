// posview/src/codec.rs
// JSON payload decoding for account lists, feed frames and closed-position responses.

use crate::account::{Account, ClosedPosition, OpenPosition, PositionSnapshot};
use crate::base::PosViewError;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum AccountsPayload {
  List(Vec<Account>),
  Wrapped { accounts: Vec<Account> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotPayload {
  Envelope(PositionSnapshot),
  Bare(Vec<OpenPosition>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClosedPayload {
  List(Vec<ClosedPosition>),
  Positions { positions: Vec<ClosedPosition> },
  Data { data: Vec<ClosedPosition> },
}

/// Decodes the user's account list: a bare array or `{"accounts": [...]}`.
pub fn decode_accounts(json: &str) -> Result<Vec<Account>, PosViewError> {
  let payload: AccountsPayload = serde_json::from_str(json)
    .map_err(|e| PosViewError::ParseError(format!("Invalid account list: {}", e)))?;
  Ok(match payload {
    AccountsPayload::List(accounts) | AccountsPayload::Wrapped { accounts } => accounts,
  })
}

/// Decodes one live feed frame: `{"positions": [...]}` or a bare array of positions.
/// Frames without a timestamp are stamped with the decode time.
pub fn decode_snapshot(json: &str) -> Result<PositionSnapshot, PosViewError> {
  let payload: SnapshotPayload = serde_json::from_str(json)
    .map_err(|e| PosViewError::ParseError(format!("Invalid snapshot frame: {}", e)))?;
  Ok(match payload {
    SnapshotPayload::Envelope(snapshot) => snapshot,
    SnapshotPayload::Bare(positions) => PositionSnapshot::new(positions),
  })
}

/// Decodes a closed-position response: a bare array, `{"positions": [...]}` or `{"data": [...]}`.
pub fn decode_closed_positions(json: &str) -> Result<Vec<ClosedPosition>, PosViewError> {
  let payload: ClosedPayload = serde_json::from_str(json)
    .map_err(|e| PosViewError::ParseError(format!("Invalid closed position payload: {}", e)))?;
  Ok(match payload {
    ClosedPayload::List(positions)
    | ClosedPayload::Positions { positions }
    | ClosedPayload::Data { data: positions } => positions,
  })
}
