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

//! Runtime configuration.

use crate::base::AccountId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// HTTP listen address (e.g. "127.0.0.1:3000")
    pub listen_addr: SocketAddr,
    /// Platform share of a gross withdrawal, in `[0, 1)`
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    /// Length of generated transaction codes
    #[serde(default = "default_tx_code_length")]
    pub tx_code_length: usize,
    /// How many codes to try before giving up on a collision
    #[serde(default = "default_tx_id_attempts")]
    pub tx_id_attempts: usize,
    /// Account that becomes a moderator when it signs up. Further
    /// moderators are granted by existing ones.
    #[serde(default)]
    pub bootstrap_moderator: Option<AccountId>,
}

fn default_commission_rate() -> Decimal {
    dec!(0.10)
}

const fn default_tx_code_length() -> usize {
    8
}

const fn default_tx_id_attempts() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            commission_rate: default_commission_rate(),
            tx_code_length: default_tx_code_length(),
            tx_id_attempts: default_tx_id_attempts(),
            bootstrap_moderator: None,
        }
    }
}

impl Config {
    /// Reads `LEDGER_*` variables, falling back to defaults for anything
    /// missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let config = Self {
            listen_addr: parse_or(&lookup, "LEDGER_LISTEN_ADDR", defaults.listen_addr),
            commission_rate: parse_or(&lookup, "LEDGER_COMMISSION_RATE", defaults.commission_rate),
            tx_code_length: parse_or(&lookup, "LEDGER_TX_CODE_LENGTH", defaults.tx_code_length),
            tx_id_attempts: parse_or(&lookup, "LEDGER_TX_ID_ATTEMPTS", defaults.tx_id_attempts),
            bootstrap_moderator: parse_opt(&lookup, "LEDGER_BOOTSTRAP_MODERATOR"),
        };
        config.sanitized()
    }

    /// Replaces out-of-range values with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            warn!(rate = %self.commission_rate, "commission rate out of range, using default");
            self.commission_rate = defaults.commission_rate;
        }
        if self.tx_code_length < 6 {
            warn!(length = self.tx_code_length, "transaction code too short, using default");
            self.tx_code_length = defaults.tx_code_length;
        }
        if self.tx_id_attempts == 0 {
            self.tx_id_attempts = defaults.tx_id_attempts;
        }
        self
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn parse_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unparsable setting");
    }
    parsed
}
