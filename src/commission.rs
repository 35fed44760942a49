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

//! Withdrawal commission.
//!
//! The platform keeps a fixed share of every gross withdrawal. Doctors ask for
//! the net amount they want paid out; the gross total is grossed up so that
//! `commission / total == rate`:
//!
//! ```text
//! commission = net / (1 - rate) * rate
//! total      = net + commission
//! ```
//!
//! The split is computed once, when the request is submitted, and stored on
//! the request.

use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Money is settled in hundredths of a point.
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawSplit {
    pub net_amount: Decimal,
    pub commission: Decimal,
    pub total_amount: Decimal,
}

impl WithdrawSplit {
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `net_amount` is not positive.
    /// - [`LedgerError::InvalidArgument`] if `rate` is outside `[0, 1)`.
    pub fn from_net(net_amount: Decimal, rate: Decimal) -> Result<Self, LedgerError> {
        if net_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(LedgerError::InvalidArgument(format!(
                "commission rate {rate} outside [0, 1)"
            )));
        }
        // Stored figures carry no trailing zeros: 10, not 10.0.
        let commission = (net_amount / (Decimal::ONE - rate) * rate)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
            .normalize();
        Ok(Self {
            net_amount,
            commission,
            total_amount: (net_amount + commission).normalize(),
        })
    }
}
