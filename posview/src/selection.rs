// posview/src/selection.rs

//! The history view's working selection: which account type and which login
//! are shown.
//!
//! Every mutating call reports a [`SelectionChange`]. `Stale` means the
//! effective login moved and anything derived from the old one (live
//! subscription, cached closed positions) must be discarded.

use crate::account::{AccountType, Login};
use crate::directory::AccountDirectory;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
  Unchanged,
  Stale,
}

impl SelectionChange {
  pub fn is_stale(self) -> bool {
    self == SelectionChange::Stale
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
  account_type: Option<AccountType>,
  selected_login: Option<Login>,
  login_override: Option<Login>,
  accounts_available: bool, // Whether the last initialize() saw a populated directory
}

impl Selection {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn account_type(&self) -> Option<AccountType> {
    self.account_type
  }

  pub fn selected_login(&self) -> Option<&Login> {
    self.selected_login.as_ref()
  }

  pub fn login_override(&self) -> Option<&Login> {
    self.login_override.as_ref()
  }

  /// The login downstream components should use: the override if one is in
  /// effect, the selected login otherwise.
  pub fn effective_login(&self) -> Option<&Login> {
    self.login_override.as_ref().or(self.selected_login.as_ref())
  }

  /// Applies the default pick when the account list goes from empty to
  /// populated: the explicit type if one is set, else REAL if any exist, else
  /// DEMO. While the list stays populated the current choice is kept, unless
  /// the selected login is no longer listed under the selected type; it is
  /// then re-derived as the first login of that type. A no-op while a login
  /// override is in effect.
  pub fn initialize(&mut self, directory: &AccountDirectory) -> SelectionChange {
    let available = !directory.is_empty();
    let transition = available && !self.accounts_available;
    self.accounts_available = available;
    if !available {
      return SelectionChange::Unchanged;
    }
    if self.login_override.is_some() {
      if transition {
        debug!("Selection initialize skipped, login override in effect.");
      }
      return SelectionChange::Unchanged;
    }
    if !transition {
      return self.revalidate(directory);
    }

    let account_type = self.account_type.or_else(|| {
      if !directory.real_logins().is_empty() {
        Some(AccountType::Real)
      } else if !directory.demo_logins().is_empty() {
        Some(AccountType::Demo)
      } else {
        None
      }
    });
    let login = account_type.and_then(|t| directory.first_login(t).cloned());
    debug!("Selection initialized to ({:?}, {:?}).", account_type, login);
    self.apply(account_type, login)
  }

  /// Sets the account type and re-derives the login as the first of that type.
  /// Always `Stale`: picking a type, even the current one, asks for fresh data.
  pub fn set_account_type(&mut self, account_type: AccountType, directory: &AccountDirectory) -> SelectionChange {
    let login = directory.first_login(account_type).cloned();
    debug!("Account type set to {}, login re-derived as {:?}.", account_type, login);
    self.apply(Some(account_type), login);
    SelectionChange::Stale
  }

  /// Selects `login`. Selecting the current login is a no-op. A login that is
  /// not in the directory leaves the selection unset; a login of the other
  /// type moves the account type along with it.
  pub fn set_account(&mut self, login: Login, directory: &AccountDirectory) -> SelectionChange {
    if self.selected_login.as_ref() == Some(&login) {
      return SelectionChange::Unchanged;
    }
    match directory.get(&login) {
      Some(account) => {
        let account_type = account.account_type;
        self.apply(Some(account_type), Some(login))
      }
      None => {
        warn!("Login {} is not in the account list, clearing selection.", login);
        self.apply(self.account_type, None)
      }
    }
  }

  /// Installs or removes a login that bypasses type/account selection.
  pub fn set_login_override(&mut self, login: Option<Login>) -> SelectionChange {
    if self.login_override == login {
      return SelectionChange::Unchanged;
    }
    let before = self.effective_login().cloned();
    self.login_override = login;
    if self.effective_login() == before.as_ref() {
      SelectionChange::Unchanged
    } else {
      SelectionChange::Stale
    }
  }

  // Keeps the selected login only while it is still listed under the selected type.
  fn revalidate(&mut self, directory: &AccountDirectory) -> SelectionChange {
    let Some(login) = self.selected_login.as_ref() else {
      return SelectionChange::Unchanged;
    };
    let listed = directory.get(login).map_or(false, |a| Some(a.account_type) == self.account_type);
    if listed {
      return SelectionChange::Unchanged;
    }
    let replacement = self.account_type.and_then(|t| directory.first_login(t).cloned());
    info!("Selected login {} left the account list, now {:?}.", login, replacement);
    self.apply(self.account_type, replacement)
  }

  fn apply(&mut self, account_type: Option<AccountType>, login: Option<Login>) -> SelectionChange {
    let before = self.effective_login().cloned();
    let changed = self.account_type != account_type || self.selected_login != login;
    self.account_type = account_type;
    self.selected_login = login;
    if changed || self.effective_login() != before.as_ref() {
      SelectionChange::Stale
    } else {
      SelectionChange::Unchanged
    }
  }
}
