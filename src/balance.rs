// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Balance store and units of work.
//!
//! The store keeps one non-negative balance per [`AccountId`]. Compound
//! operations go through a [`UnitOfWork`], which holds the row lock of every
//! account it touches until it is committed or dropped.
//!
//! # Locking
//!
//! Rows are always locked in ascending [`AccountId`] order, so two units of
//! work touching overlapping accounts queue behind each other instead of
//! deadlocking. Account handles are cloned out of the [`DashMap`] before any
//! row lock is taken; no shard lock is ever held while waiting on a row.

use crate::account::{Account, AccountData};
use crate::base::AccountId;
use crate::error::LedgerError;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, RawMutex};
use rust_decimal::Decimal;
use tracing::warn;

/// Holds every wallet balance.
#[derive(Debug, Default)]
pub struct BalanceStore {
    accounts: DashMap<AccountId, Account>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Returns the account, creating it with a zero balance if missing.
    pub fn open(&self, account_id: AccountId) -> Account {
        self.accounts
            .entry(account_id)
            .or_insert_with(|| Account::new(account_id))
            .clone()
    }

    pub fn contains(&self, account_id: &AccountId) -> bool {
        self.accounts.contains_key(account_id)
    }

    pub fn account(&self, account_id: &AccountId) -> Option<Account> {
        self.accounts.get(account_id).map(|entry| entry.value().clone())
    }

    /// # Errors
    ///
    /// [`LedgerError::AccountNotFound`] if the account was never opened.
    pub fn get_balance(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        self.account(account_id)
            .map(|account| account.balance())
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Applies a signed delta to a single account and returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `delta` is zero.
    /// - [`LedgerError::InsufficientFunds`] if a debit would go below zero.
    /// - [`LedgerError::AccountNotFound`] if the account was never opened.
    pub fn adjust_balance(
        &self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let mut unit = self.begin(&[account_id])?;
        let balance = unit.apply(account_id, delta)?;
        unit.commit();
        Ok(balance)
    }

    /// Locks the given accounts and opens a unit of work over them.
    ///
    /// Duplicates are ignored. Every account must already exist; nothing is
    /// locked if one is missing.
    pub fn begin(&self, account_ids: &[AccountId]) -> Result<UnitOfWork, LedgerError> {
        let mut ids = account_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let handles = ids
            .iter()
            .map(|id| self.account(id).ok_or(LedgerError::AccountNotFound))
            .collect::<Result<Vec<_>, _>>()?;

        let rows = handles
            .iter()
            .map(|account| {
                let guard = account.lock_row();
                let original = guard.balance;
                Row { guard, original }
            })
            .collect();

        Ok(UnitOfWork {
            rows,
            committed: false,
        })
    }

    /// Snapshot of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<(AccountId, Account)> = self
            .accounts
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        accounts.sort_unstable_by_key(|(id, _)| *id);
        accounts.into_iter().map(|(_, account)| account).collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

struct Row {
    guard: ArcMutexGuard<RawMutex, AccountData>,
    original: Decimal,
}

/// A set of locked balance rows mutated as one.
///
/// Mutations are visible to no one else while the unit is alive. Calling
/// [`commit`](Self::commit) releases the locks and keeps the new balances;
/// dropping the unit without committing restores every original balance.
pub struct UnitOfWork {
    rows: Vec<Row>,
    committed: bool,
}

impl UnitOfWork {
    fn row_mut(&mut self, account_id: AccountId) -> Result<&mut Row, LedgerError> {
        self.rows
            .iter_mut()
            .find(|row| row.guard.account_id == account_id)
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Current (uncommitted) balance of a locked account.
    pub fn balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        self.rows
            .iter()
            .find(|row| row.guard.account_id == account_id)
            .map(|row| row.guard.balance)
            .ok_or(LedgerError::AccountNotFound)
    }

    pub fn debit(&mut self, account_id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.row_mut(account_id)?.guard.debit(amount)
    }

    pub fn credit(&mut self, account_id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.row_mut(account_id)?.guard.credit(amount)
    }

    /// Credits positive deltas and debits negative ones.
    pub fn apply(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, LedgerError> {
        if delta.is_sign_negative() {
            self.debit(account_id, -delta)
        } else {
            self.credit(account_id, delta)
        }
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for row in &mut self.rows {
            if row.guard.balance != row.original {
                warn!(
                    account = %row.guard.account_id,
                    from = %row.guard.balance,
                    to = %row.original,
                    "rolling back uncommitted balance change"
                );
                row.guard.balance = row.original;
            }
        }
    }
}
