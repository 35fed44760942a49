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

//! Immutable ledger records.
//!
//! A [`Transaction`] is written once, inside the unit of work whose balance
//! changes it describes, and is never edited afterwards. Reversals are new
//! compensating records.

use crate::base::{AccountId, DoctorId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Consultation,
    Transfer,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Consultation => "consultation",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// A record waiting for its id.
///
/// Built by the engine inside a unit of work and handed to
/// [`Ledger::record`](crate::ledger::Ledger::record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub user_id: AccountId,
    pub doctor_id: Option<DoctorId>,
    pub receiver_id: Option<AccountId>,
    /// Portion of `amount` kept by the platform, when any.
    pub commission: Option<Decimal>,
    pub description: String,
}

impl NewTransaction {
    pub(crate) fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            kind: self.kind,
            amount: self.amount,
            user_id: self.user_id,
            doctor_id: self.doctor_id,
            receiver_id: self.receiver_id,
            commission: self.commission,
            description: self.description,
            created_at,
        }
    }
}

/// One committed value movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    /// Initiating account.
    pub user_id: AccountId,
    /// Set for consultations.
    pub doctor_id: Option<DoctorId>,
    /// Counterparty account: transfer receiver, consultation doctor, or the
    /// platform for withdrawals.
    pub receiver_id: Option<AccountId>,
    pub commission: Option<Decimal>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether the account appears on either side of this record.
    pub fn involves(&self, account_id: &AccountId) -> bool {
        self.user_id == *account_id || self.receiver_id.as_ref() == Some(account_id)
    }

    /// Balance deltas this record implies, per account.
    ///
    /// The sum is zero for consultations and transfers. Deposits bring value
    /// in from outside and withdrawals pay the net amount out, so their sum is
    /// `+amount` and `-(amount - commission)` respectively.
    pub fn deltas(&self) -> Vec<(AccountId, Decimal)> {
        match self.kind {
            TransactionKind::Deposit => vec![(self.user_id, self.amount)],
            TransactionKind::Withdraw => {
                let mut deltas = vec![(self.user_id, -self.amount)];
                if let (Some(platform), Some(commission)) = (self.receiver_id, self.commission) {
                    deltas.push((platform, commission));
                }
                deltas
            }
            TransactionKind::Consultation | TransactionKind::Transfer => {
                let mut deltas = vec![(self.user_id, -self.amount)];
                if let Some(receiver) = self.receiver_id {
                    deltas.push((receiver, self.amount));
                }
                deltas
            }
        }
    }

    /// Value that entered (positive) or left (negative) the ledger.
    pub fn external_flow(&self) -> Decimal {
        self.deltas().iter().map(|(_, delta)| *delta).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(kind: TransactionKind, amount: Decimal) -> Transaction {
        NewTransaction {
            kind,
            amount,
            user_id: AccountId::new_v4(),
            doctor_id: None,
            receiver_id: Some(AccountId::new_v4()),
            commission: None,
            description: String::new(),
        }
        .into_transaction(TransactionId("ABCD1234".into()), Utc::now())
    }

    #[test]
    fn transfers_conserve_value() {
        let tx = record(TransactionKind::Transfer, dec!(42.5));
        assert_eq!(tx.external_flow(), Decimal::ZERO);
        assert!(tx.involves(&tx.user_id));
        assert!(tx.involves(&tx.receiver_id.unwrap()));
        assert!(!tx.involves(&AccountId::new_v4()));
    }

    #[test]
    fn withdraw_pays_out_net_amount() {
        let mut tx = record(TransactionKind::Withdraw, dec!(100));
        tx.receiver_id = Some(AccountId::PLATFORM);
        tx.commission = Some(dec!(10));
        assert_eq!(tx.external_flow(), dec!(-90));
    }

    #[test]
    fn deposit_brings_value_in() {
        let mut tx = record(TransactionKind::Deposit, dec!(25));
        tx.receiver_id = None;
        assert_eq!(tx.deltas(), vec![(tx.user_id, dec!(25))]);
    }

    #[test]
    fn kind_serializes_as_type_field() {
        let tx = record(TransactionKind::Consultation, dec!(30));
        let json: serde_json::Value = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "consultation");
        assert_eq!(json["amount"], "30");
        assert_eq!(json["id"], "ABCD1234");
    }
}
