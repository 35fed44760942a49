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

//! Append-only transaction ledger.
//!
//! Combines a [`DashMap`] index for O(1) lookup by transaction id with an
//! append log that preserves commit order. Records are shared as
//! [`Arc<Transaction>`] and are never mutated once inserted.

use crate::base::{AccountId, TransactionId};
use crate::error::LedgerError;
use crate::transaction::{NewTransaction, Transaction};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of candidate transaction ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> TransactionId;
}

/// Random uppercase alphanumeric codes of a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct RandomCode {
    length: usize,
}

impl RandomCode {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl IdGenerator for RandomCode {
    fn next_id(&self) -> TransactionId {
        let mut rng = rand::thread_rng();
        let code = (0..self.length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        TransactionId(code)
    }
}

/// Ledger writer and reader.
pub struct Ledger {
    /// Records indexed by id.
    index: DashMap<TransactionId, Arc<Transaction>>,
    /// Records in commit order.
    log: RwLock<Vec<Arc<Transaction>>>,
    ids: Box<dyn IdGenerator>,
    max_attempts: usize,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("len", &self.index.len())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Ledger {
    pub fn new(ids: Box<dyn IdGenerator>, max_attempts: usize) -> Self {
        Self {
            index: DashMap::new(),
            log: RwLock::new(Vec::new()),
            ids,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Appends a record under a freshly generated id.
    ///
    /// Must be called from inside the unit of work whose balance changes the
    /// record describes, after those changes were applied.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::IdCollision`] if every attempt produced an id
    /// that already exists. Nothing is appended in that case.
    pub fn record(&self, transaction: NewTransaction) -> Result<Arc<Transaction>, LedgerError> {
        for attempt in 1..=self.max_attempts {
            let id = self.ids.next_id();

            // Entry API: check-and-insert is atomic per id.
            match self.index.entry(id.clone()) {
                Entry::Occupied(_) => {
                    warn!(%id, attempt, "transaction id collision, retrying");
                }
                Entry::Vacant(slot) => {
                    let record = Arc::new(transaction.into_transaction(id, Utc::now()));
                    slot.insert(Arc::clone(&record));
                    self.log.write().push(Arc::clone(&record));
                    info!(
                        id = %record.id,
                        kind = %record.kind,
                        amount = %record.amount,
                        user = %record.user_id,
                        "transaction recorded"
                    );
                    return Ok(record);
                }
            }
        }
        Err(LedgerError::IdCollision)
    }

    /// Looks a record up by its (case-insensitive) reference.
    pub fn get(&self, reference: &str) -> Option<Arc<Transaction>> {
        let id = TransactionId::normalized(reference);
        self.index.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every record involving the account, newest first.
    pub fn history(&self, account_id: &AccountId) -> Vec<Arc<Transaction>> {
        self.log
            .read()
            .iter()
            .rev()
            .filter(|tx| tx.involves(account_id))
            .cloned()
            .collect()
    }

    /// Every record in commit order.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.log.read().clone()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
