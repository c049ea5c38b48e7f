// posview/src/account.rs
// Account and position data structures

use crate::base::PosViewError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of one trading sub-account.
///
/// The backend sends logins either as JSON strings or as JSON numbers; both
/// are normalized to their decimal text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Login(String);

impl Login {
  pub fn new(login: impl Into<String>) -> Self {
    Login(login.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// A blank login never identifies an account.
  pub fn is_empty(&self) -> bool {
    self.0.trim().is_empty()
  }
}

impl fmt::Display for Login {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for Login {
  fn from(s: &str) -> Self {
    Login(s.to_string())
  }
}

impl From<String> for Login {
  fn from(s: String) -> Self {
    Login(s)
  }
}

impl From<u64> for Login {
  fn from(n: u64) -> Self {
    Login(n.to_string())
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLogin {
  Text(String),
  Number(u64),
}

impl<'de> Deserialize<'de> for Login {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Ok(match RawLogin::deserialize(deserializer)? {
      RawLogin::Text(s) => Login(s),
      RawLogin::Number(n) => Login(n.to_string()),
    })
  }
}

/// Kind of trading account. Fixed when the backend creates the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
  #[serde(alias = "real", alias = "Real")]
  Real,
  #[serde(alias = "demo", alias = "Demo")]
  Demo,
}

impl fmt::Display for AccountType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AccountType::Real => write!(f, "REAL"),
      AccountType::Demo => write!(f, "DEMO"),
    }
  }
}

impl FromStr for AccountType {
  type Err = PosViewError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "REAL" => Ok(AccountType::Real),
      "DEMO" => Ok(AccountType::Demo),
      _ => Err(PosViewError::InvalidParameter(format!("Unknown account type: {}", s))),
    }
  }
}

/// One trading sub-account owned by the user. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
  pub login: Login,
  pub account_type: AccountType,
}

impl Account {
  pub fn new(login: impl Into<Login>, account_type: AccountType) -> Self {
    Account { login: login.into(), account_type }
  }
}

/// Which data source the history view shows: the live feed or the closed-position query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
  #[default]
  Open,
  Closed,
}

impl ViewMode {
  pub fn toggled(self) -> Self {
    match self {
      ViewMode::Open => ViewMode::Closed,
      ViewMode::Closed => ViewMode::Open,
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ViewMode::Open => write!(f, "open"),
      ViewMode::Closed => write!(f, "closed"),
    }
  }
}

impl FromStr for ViewMode {
  type Err = PosViewError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "open" => Ok(ViewMode::Open),
      "closed" => Ok(ViewMode::Closed),
      _ => Err(PosViewError::InvalidParameter(format!("Unknown view mode: {}", s))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
  #[serde(alias = "buy", alias = "Buy")]
  Buy,
  #[serde(alias = "sell", alias = "Sell")]
  Sell,
}

/// Open position as delivered by the live feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
  pub ticket: Login,        // Position ticket, same string-or-number encoding as logins
  pub symbol: String,
  pub side: PositionSide,
  pub volume: f64,
  pub open_price: f64,
  pub current_price: f64,
  pub profit: f64,
  #[serde(default)]
  pub swap: f64,
  #[serde(default)]
  pub open_time: Option<DateTime<Utc>>,
}

/// Historical position record returned by the closed-position query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPosition {
  pub ticket: Login,
  pub symbol: String,
  pub side: PositionSide,
  pub volume: f64,
  pub open_price: f64,
  pub close_price: f64,
  pub profit: f64,
  #[serde(default)]
  pub open_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub close_time: Option<DateTime<Utc>>,
}

/// Full state of the open positions of one account at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
  pub positions: Vec<OpenPosition>,
  #[serde(default = "Utc::now")]
  pub received_at: DateTime<Utc>,
}

impl PositionSnapshot {
  pub fn new(positions: Vec<OpenPosition>) -> Self {
    PositionSnapshot { positions, received_at: Utc::now() }
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  /// Floating profit summed over all positions, swaps included.
  pub fn total_profit(&self) -> f64 {
    self.positions.iter().map(|p| p.profit + p.swap).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_login_accepts_string_and_number() {
    let logins: Vec<Login> = serde_json::from_str(r#"["1001", 2002]"#).unwrap();
    assert_eq!(logins, vec![Login::from("1001"), Login::from(2002u64)]);
    assert_eq!(logins[1].as_str(), "2002");
  }

  #[test]
  fn test_blank_login_is_empty() {
    assert!(Login::new("").is_empty());
    assert!(Login::new("  ").is_empty());
    assert!(!Login::new("7").is_empty());
  }

  #[test]
  fn test_account_type_parsing() {
    assert_eq!("real".parse::<AccountType>().unwrap(), AccountType::Real);
    assert_eq!(" DEMO ".parse::<AccountType>().unwrap(), AccountType::Demo);
    assert!("paper".parse::<AccountType>().is_err());

    let acct: Account = serde_json::from_str(r#"{"login": 42, "accountType": "demo"}"#).unwrap();
    assert_eq!(acct, Account::new("42", AccountType::Demo));
  }

  #[test]
  fn test_view_mode_toggle_and_parse() {
    assert_eq!(ViewMode::default(), ViewMode::Open);
    assert_eq!(ViewMode::Open.toggled(), ViewMode::Closed);
    assert_eq!(ViewMode::Closed.toggled(), ViewMode::Open);
    assert_eq!("Closed".parse::<ViewMode>().unwrap(), ViewMode::Closed);
    assert!("pending".parse::<ViewMode>().is_err());
  }

  #[test]
  fn test_snapshot_total_profit() {
    let json = r#"{"positions": [
      {"ticket": 1, "symbol": "EURUSD", "side": "BUY", "volume": 1.0, "openPrice": 1.1, "currentPrice": 1.2, "profit": 10.0, "swap": -0.5},
      {"ticket": "2", "symbol": "XAUUSD", "side": "sell", "volume": 0.1, "openPrice": 2000.0, "currentPrice": 1990.0, "profit": 5.0}
    ]}"#;
    let snapshot: PositionSnapshot = serde_json::from_str(json).unwrap();
    assert_eq!(snapshot.positions.len(), 2);
    assert_eq!(snapshot.positions[1].side, PositionSide::Sell);
    assert!((snapshot.total_profit() - 14.5).abs() < 1e-9);
  }
}
