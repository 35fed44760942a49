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

//! Object storage paths.
//!
//! Uploads live under `{accountId}/{category}/{timestamp}.{ext}`. Rows store
//! the path only; turning it into a viewable URL happens at display time.

use crate::base::AccountId;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageCategory {
    DepositProofs,
    Documents,
}

impl StorageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepositProofs => "deposit-proofs",
            Self::Documents => "documents",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "deposit-proofs" => Some(Self::DepositProofs),
            "documents" => Some(Self::Documents),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePath {
    pub owner: AccountId,
    pub category: StorageCategory,
    /// Upload time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub extension: String,
}

impl StoragePath {
    pub fn new(
        owner: AccountId,
        category: StorageCategory,
        timestamp: i64,
        extension: &str,
    ) -> Result<Self, LedgerError> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty() || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid(&extension));
        }
        Ok(Self {
            owner,
            category,
            timestamp,
            extension,
        })
    }

    /// Parses a stored path back into its parts.
    pub fn parse(path: &str) -> Result<Self, LedgerError> {
        let mut segments = path.split('/');
        let (Some(owner), Some(category), Some(file), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid(path));
        };

        let owner: AccountId = owner.parse().map_err(|_| invalid(path))?;
        let category = StorageCategory::parse(category).ok_or_else(|| invalid(path))?;
        let (stamp, extension) = file.split_once('.').ok_or_else(|| invalid(path))?;
        let timestamp: i64 = stamp.parse().map_err(|_| invalid(path))?;
        if extension != extension.to_ascii_lowercase() {
            return Err(invalid(path));
        }
        Self::new(owner, category, timestamp, extension).map_err(|_| invalid(path))
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}.{}",
            self.owner,
            self.category.as_str(),
            self.timestamp,
            self.extension
        )
    }
}

fn invalid(path: &str) -> LedgerError {
    LedgerError::InvalidArgument(format!("invalid storage path: {path}"))
}
