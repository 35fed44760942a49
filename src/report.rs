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

//! Moderator reports: CSV exports and platform statistics.

use crate::base::AccountId;
use crate::engine::Engine;
use crate::moderation::{RequestFilter, RequestStatus};
use crate::transaction::TransactionKind;
use csv::Writer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Write account balances to a CSV writer.
///
/// # CSV Format
///
/// Columns: `account, balance`
///
/// ```csv
/// account,balance
/// 00000000-0000-0000-0000-000000000000,10
/// 5b0c3a8e-43f7-4e59-a1a6-0f3cf2f0b0a1,70.0000
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in engine.accounts() {
        wtr.serialize(&account)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: TransactionKind,
    amount: Decimal,
    user_id: AccountId,
    receiver_id: Option<AccountId>,
    commission: Option<Decimal>,
    description: &'a str,
    created_at: String,
}

/// Write the full ledger, in commit order, to a CSV writer.
///
/// Columns: `id, type, amount, user_id, receiver_id, commission,
/// description, created_at` (RFC 3339).
pub fn write_transactions<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for tx in engine.transactions() {
        wtr.serialize(TransactionRow {
            id: tx.id.as_str(),
            kind: tx.kind,
            amount: tx.amount,
            user_id: tx.user_id,
            receiver_id: tx.receiver_id,
            commission: tx.commission,
            description: &tx.description,
            created_at: tx.created_at.to_rfc3339(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Dashboard figures for moderators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformStats {
    pub profiles: usize,
    pub doctors: usize,
    pub transactions: usize,
    pub consultations: usize,
    pub consultation_volume: Decimal,
    pub approved_deposits: Decimal,
    pub pending_deposits: usize,
    pub pending_withdrawals: usize,
    /// Balance of the platform account.
    pub commission_earned: Decimal,
}

pub fn platform_stats(engine: &Engine) -> PlatformStats {
    let transactions = engine.transactions();
    let consultations: Vec<_> = transactions
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Consultation)
        .collect();
    let approved_deposits = transactions
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Deposit)
        .map(|tx| tx.amount)
        .sum();
    let pending = RequestFilter {
        status: Some(RequestStatus::Pending),
        owner: None,
    };

    PlatformStats {
        // Every account but the platform's belongs to a profile.
        profiles: engine.accounts().len().saturating_sub(1),
        doctors: engine.doctors().len(),
        transactions: transactions.len(),
        consultations: consultations.len(),
        consultation_volume: consultations.iter().map(|tx| tx.amount).sum(),
        approved_deposits,
        pending_deposits: engine.deposit_requests(pending).len(),
        pending_withdrawals: engine.withdraw_requests(pending).len(),
        commission_earned: engine
            .balance(&AccountId::PLATFORM)
            .unwrap_or(Decimal::ZERO),
    }
}
