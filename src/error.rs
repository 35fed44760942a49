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

//! Error types for ledger operations.
//!
//! Every [`LedgerError`] is raised before a unit of work commits, so callers
//! never observe a partially applied operation. [`ErrorKind`] groups the
//! variants into the classes surfaced to end users.

use crate::base::AccountId;
use crate::moderation::RequestStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// A debit would drive the balance below zero
    #[error("insufficient funds: account {account} has {balance}, needs {required}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        required: Decimal,
    },

    /// Sender and receiver are the same account
    #[error("cannot transfer to the same account")]
    SelfTransfer,

    /// A doctor tried to pay for their own consultation
    #[error("cannot book a consultation with yourself")]
    SelfConsultation,

    /// Doctor exists but is not taking consultations
    #[error("doctor is not accepting consultations")]
    DoctorUnavailable,

    /// Malformed input that is not covered by a more specific variant
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced account does not exist
    #[error("account not found")]
    AccountNotFound,

    /// Referenced doctor does not exist
    #[error("doctor not found")]
    DoctorNotFound,

    /// Referenced request does not exist
    #[error("request not found")]
    RequestNotFound,

    /// Referenced transaction does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Profile or doctor listing already registered for this account
    #[error("already registered")]
    AlreadyExists,

    /// Request has already been approved or rejected
    #[error("request already {0}")]
    AlreadyFinalized(RequestStatus),

    /// Caller lacks the role required for the operation
    #[error("operation not permitted")]
    Forbidden,

    /// Transaction id generation kept colliding with existing records
    #[error("could not allocate a unique transaction id")]
    IdCollision,
}

/// User-facing error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InsufficientFunds,
    InvalidArgument,
    NotFound,
    AlreadyFinalized,
    Forbidden,
    Conflict,
    Unavailable,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidAmount
            | Self::SelfTransfer
            | Self::SelfConsultation
            | Self::DoctorUnavailable
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AccountNotFound
            | Self::DoctorNotFound
            | Self::RequestNotFound
            | Self::TransactionNotFound => ErrorKind::NotFound,
            Self::AlreadyFinalized(_) => ErrorKind::AlreadyFinalized,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::AlreadyExists => ErrorKind::Conflict,
            Self::IdCollision => ErrorKind::Unavailable,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::SelfTransfer => "SELF_TRANSFER",
            Self::SelfConsultation => "SELF_CONSULTATION",
            Self::DoctorUnavailable => "DOCTOR_UNAVAILABLE",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::DoctorNotFound => "DOCTOR_NOT_FOUND",
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::IdCollision => "ID_COLLISION",
        }
    }
}

/// Failure reported by a [`Notifier`](crate::notify::Notifier).
///
/// Only ever logged by the dispatcher; never returned from a ledger operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification timed out")]
    Timeout,

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                account: AccountId::PLATFORM,
                balance: dec!(10),
                required: dec!(30),
            }
            .to_string(),
            "insufficient funds: account 00000000-0000-0000-0000-000000000000 has 10, needs 30"
        );
        assert_eq!(
            LedgerError::SelfTransfer.to_string(),
            "cannot transfer to the same account"
        );
        assert_eq!(LedgerError::DoctorNotFound.to_string(), "doctor not found");
        assert_eq!(
            LedgerError::AlreadyFinalized(RequestStatus::Approved).to_string(),
            "request already approved"
        );
        assert_eq!(
            LedgerError::InvalidArgument("admin notes are required".into()).to_string(),
            "invalid argument: admin notes are required"
        );
    }

    #[test]
    fn errors_map_to_user_facing_kinds() {
        assert_eq!(
            LedgerError::InsufficientFunds {
                account: AccountId::PLATFORM,
                balance: dec!(0),
                required: dec!(1),
            }
            .kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(LedgerError::SelfTransfer.kind(), ErrorKind::InvalidArgument);
        assert_eq!(LedgerError::InvalidAmount.kind(), ErrorKind::InvalidArgument);
        assert_eq!(LedgerError::RequestNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(
            LedgerError::AlreadyFinalized(RequestStatus::Rejected).kind(),
            ErrorKind::AlreadyFinalized
        );
        assert_eq!(LedgerError::IdCollision.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::DoctorUnavailable;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
