// posview/src/directory.rs

//! Derived views over the user's raw account list.
//!
//! [`AccountDirectory`] partitions logins into REAL and DEMO (preserving input
//! order) and indexes accounts by login. [`DirectoryCache`] recomputes the
//! directory only when it is handed a different account list instance.

use crate::account::{Account, AccountType, Login};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountDirectory {
  real_logins: Vec<Login>,
  demo_logins: Vec<Login>,
  by_login: HashMap<Login, Account>,
}

impl AccountDirectory {
  /// Builds the directory. Empty input yields an empty directory.
  pub fn build(accounts: &[Account]) -> Self {
    let mut directory = AccountDirectory::default();
    for account in accounts {
      if directory.by_login.contains_key(&account.login) {
        warn!("Duplicate login {} in account list, keeping first entry.", account.login);
        continue;
      }
      match account.account_type {
        AccountType::Real => directory.real_logins.push(account.login.clone()),
        AccountType::Demo => directory.demo_logins.push(account.login.clone()),
      }
      directory.by_login.insert(account.login.clone(), account.clone());
    }
    directory
  }

  pub fn real_logins(&self) -> &[Login] {
    &self.real_logins
  }

  pub fn demo_logins(&self) -> &[Login] {
    &self.demo_logins
  }

  pub fn logins(&self, account_type: AccountType) -> &[Login] {
    match account_type {
      AccountType::Real => &self.real_logins,
      AccountType::Demo => &self.demo_logins,
    }
  }

  pub fn first_login(&self, account_type: AccountType) -> Option<&Login> {
    self.logins(account_type).first()
  }

  pub fn get(&self, login: &Login) -> Option<&Account> {
    self.by_login.get(login)
  }

  pub fn contains(&self, login: &Login) -> bool {
    self.by_login.contains_key(login)
  }

  pub fn len(&self) -> usize {
    self.by_login.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_login.is_empty()
  }
}

/// Memoizes an [`AccountDirectory`] by the identity of the account list it was built from.
#[derive(Debug, Default)]
pub struct DirectoryCache {
  source: Option<Arc<Vec<Account>>>,
  directory: Arc<AccountDirectory>,
}

impl DirectoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the directory for `accounts`, rebuilding only if `accounts` is not
  /// the same allocation as the previous call's list.
  pub fn get(&mut self, accounts: &Arc<Vec<Account>>) -> Arc<AccountDirectory> {
    let same = self.source.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, accounts));
    if !same {
      debug!("Rebuilding account directory from {} accounts.", accounts.len());
      self.directory = Arc::new(AccountDirectory::build(accounts));
      self.source = Some(Arc::clone(accounts));
    }
    Arc::clone(&self.directory)
  }

  /// Last directory handed out (empty before the first `get`).
  pub fn current(&self) -> Arc<AccountDirectory> {
    Arc::clone(&self.directory)
  }
}
