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

//! # Consult Ledger
//!
//! Points ledger for a patient/doctor consultation marketplace. Patients top
//! up their wallet through moderated deposit requests, pay doctors for
//! consultations, and transfer points to each other; doctors cash out
//! through moderated withdraw requests, which is where the platform takes
//! its commission.
//!
//! ## Core Components
//!
//! - [`Engine`]: atomic operations (`perform_consultation`,
//!   `perform_transfer`) and request moderation
//! - [`BalanceStore`] / [`UnitOfWork`]: row-locked balances with rollback
//! - [`Ledger`]: append-only transaction log with shareable ids
//! - [`Dispatcher`]: fire-and-forget notifications
//! - [`LedgerError`]: error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use consult_ledger::{AccountId, Engine, PayoutDetails, Role};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let moderator = AccountId::new_v4();
//! let patient = AccountId::new_v4();
//! let doctor = AccountId::new_v4();
//! engine.register_profile(moderator, "Mo", "mo@example.com", Role::Moderator).unwrap();
//! engine.register_profile(patient, "Pat", "pat@example.com", Role::Patient).unwrap();
//! engine.register_profile(doctor, "Dr. Lee", "lee@example.com", Role::Doctor).unwrap();
//! let listing = engine.register_doctor(doctor, "cardiology", dec!(30)).unwrap();
//!
//! // Top up through a moderated deposit
//! let proof = format!("{patient}/deposit-proofs/1760000000000.png");
//! let request = engine.submit_deposit(patient, dec!(100), &proof).unwrap();
//! engine.approve_deposit(moderator, request.id, None).unwrap();
//!
//! // Pay for a consultation
//! let receipt = engine.perform_consultation(patient, listing.id).unwrap();
//! assert_eq!(receipt.balance_after, dec!(70));
//! assert_eq!(engine.balance(&doctor).unwrap(), dec!(30));
//! assert!(engine.transaction(receipt.transaction_id.as_str()).is_ok());
//!
//! // Doctor cashes out 27 net: 3 commission, 30 gross
//! let payout = PayoutDetails { method: "bank".into(), destination: "DE89...".into() };
//! let withdraw = engine.submit_withdraw(doctor, dec!(27), payout).unwrap();
//! engine.approve_withdraw(moderator, withdraw.id, None).unwrap();
//! assert_eq!(engine.balance(&doctor).unwrap(), dec!(0));
//! assert_eq!(engine.balance(&AccountId::PLATFORM).unwrap(), dec!(3));
//! ```
//!
//! ## Thread Safety
//!
//! Every operation takes `&self`. Operations on disjoint accounts run in
//! parallel; operations sharing an account serialize on that account's row
//! lock.

pub mod account;
pub mod api;
pub mod balance;
mod base;
pub mod commission;
pub mod config;
pub mod directory;
mod engine;
pub mod error;
pub mod ledger;
pub mod moderation;
pub mod notify;
pub mod report;
pub mod storage;
mod transaction;

pub use account::Account;
pub use balance::{BalanceStore, UnitOfWork};
pub use base::{AccountId, DoctorId, RequestId, TransactionId};
pub use commission::WithdrawSplit;
pub use config::Config;
pub use directory::{Doctor, Profile, Role};
pub use engine::{Engine, Receipt};
pub use error::{ErrorKind, LedgerError, NotificationError};
pub use ledger::{IdGenerator, Ledger, RandomCode};
pub use moderation::{
    DepositRequest, PayoutDetails, RequestFilter, RequestStatus, Review, WithdrawRequest,
};
pub use notify::{Dispatcher, EventType, LogNotifier, Notification, NotificationData, Notifier};
pub use storage::{StorageCategory, StoragePath};
pub use transaction::{NewTransaction, Transaction, TransactionKind};
