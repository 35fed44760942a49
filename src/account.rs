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

//! Wallet accounts.
//!
//! An [`Account`] is a cheap, cloneable handle to one balance row. The row is
//! guarded by a mutex that doubles as the row lock taken by a
//! [`UnitOfWork`](crate::balance::UnitOfWork).
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use consult_ledger::{Account, AccountId};
//!
//! let account = Account::new(AccountId::new_v4());
//! assert_eq!(account.balance(), dec!(0));
//! ```

use crate::base::AccountId;
use crate::error::LedgerError;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct AccountData {
    pub(crate) account_id: AccountId,
    pub(crate) balance: Decimal,
}

impl AccountData {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: Decimal::ZERO,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Increases the balance.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance += amount;
        self.assert_invariants();
        Ok(self.balance)
    }

    /// Decreases the balance. The check and the write happen on the same read.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account: self.account_id,
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(self.balance)
    }
}

/// Wallet account handle.
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<Mutex<AccountData>>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 4;

    pub fn new(account_id: AccountId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AccountData::new(account_id))),
        }
    }

    pub fn id(&self) -> AccountId {
        self.inner.lock().account_id
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Takes the row lock. The guard owns a reference to the row, so it can
    /// be held by a unit of work independently of the store it came from.
    pub(crate) fn lock_row(&self) -> ArcMutexGuard<RawMutex, AccountData> {
        self.inner.lock_arc()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 2)?;
        state.serialize_field("account", &data.account_id)?;
        state.serialize_field(
            "balance",
            &data.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}
