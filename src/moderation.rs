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

//! Deposit and withdraw request moderation.
//!
//! Requests follow a state machine with two terminal states:
//!
//! ```text
//! Pending ──approve──► Approved   (balance effect + ledger record)
//!    │
//!    └─────reject────► Rejected   (no balance effect, notes required)
//! ```
//!
//! A transition holds the request's lock from the status check until the new
//! status is written, so two moderators racing on the same request cannot
//! both apply it: the loser sees [`LedgerError::AlreadyFinalized`]. If the
//! balance effect fails the request stays `Pending`.

use crate::base::{AccountId, RequestId, TransactionId};
use crate::commission::WithdrawSplit;
use crate::engine::Engine;
use crate::error::LedgerError;
use crate::notify::EventType;
use crate::storage::{StorageCategory, StoragePath};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Moderation outcome shared by both request kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub status: RequestStatus,
    pub admin_notes: Option<String>,
    pub reviewed_by: Option<AccountId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Ledger record written on approval.
    pub transaction_id: Option<TransactionId>,
}

impl Review {
    fn pending() -> Self {
        Self {
            status: RequestStatus::Pending,
            admin_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            transaction_id: None,
        }
    }

    fn ensure_pending(&self) -> Result<(), LedgerError> {
        match self.status {
            RequestStatus::Pending => Ok(()),
            finalized => Err(LedgerError::AlreadyFinalized(finalized)),
        }
    }

    fn finalize(
        &mut self,
        status: RequestStatus,
        moderator: AccountId,
        notes: Option<String>,
        transaction_id: Option<TransactionId>,
    ) {
        self.status = status;
        self.admin_notes = notes;
        self.reviewed_by = Some(moderator);
        self.reviewed_at = Some(Utc::now());
        self.transaction_id = transaction_id;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositRequest {
    pub id: RequestId,
    pub account_id: AccountId,
    pub amount: Decimal,
    /// Storage path of the proof-of-payment upload.
    pub proof_path: String,
    #[serde(flatten)]
    pub review: Review,
    pub created_at: DateTime<Utc>,
}

/// Where a doctor wants a withdrawal paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutDetails {
    pub method: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub id: RequestId,
    pub account_id: AccountId,
    /// Frozen at submission; a later rate change does not alter it.
    #[serde(flatten)]
    pub split: WithdrawSplit,
    pub payout: PayoutDetails,
    #[serde(flatten)]
    pub review: Review,
    pub created_at: DateTime<Utc>,
}

/// Listing filter. `None` matches everything.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub owner: Option<AccountId>,
}

impl RequestFilter {
    fn matches(&self, owner: &AccountId, review: &Review) -> bool {
        self.status.is_none_or(|status| status == review.status)
            && self.owner.is_none_or(|wanted| wanted == *owner)
    }
}

/// Requests keyed by id; each row carries its own lock.
#[derive(Debug, Default)]
pub(crate) struct RequestBook {
    deposits: DashMap<RequestId, Arc<Mutex<DepositRequest>>>,
    withdrawals: DashMap<RequestId, Arc<Mutex<WithdrawRequest>>>,
}

impl RequestBook {
    fn deposit(&self, id: &RequestId) -> Result<Arc<Mutex<DepositRequest>>, LedgerError> {
        self.deposits
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::RequestNotFound)
    }

    fn withdrawal(&self, id: &RequestId) -> Result<Arc<Mutex<WithdrawRequest>>, LedgerError> {
        self.withdrawals
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::RequestNotFound)
    }
}

fn approval_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|notes| notes.trim().to_string())
        .filter(|notes| !notes.is_empty())
}

fn rejection_notes(notes: &str) -> Result<String, LedgerError> {
    let notes = notes.trim();
    if notes.is_empty() {
        return Err(LedgerError::InvalidArgument(
            "admin notes are required to reject a request".into(),
        ));
    }
    Ok(notes.to_string())
}

impl Engine {
    // === Submission ===

    /// Files a deposit request backed by an uploaded proof of payment.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::AccountNotFound`] if the submitter has no profile.
    /// - [`LedgerError::InvalidArgument`] if `proof_path` is not a deposit
    ///   proof uploaded by the submitter.
    pub fn submit_deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        proof_path: &str,
    ) -> Result<DepositRequest, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.profile(&account_id).is_none() {
            return Err(LedgerError::AccountNotFound);
        }
        let proof = StoragePath::parse(proof_path)?;
        if proof.owner != account_id || proof.category != StorageCategory::DepositProofs {
            return Err(LedgerError::InvalidArgument(
                "proof of payment must be the submitter's own deposit proof".into(),
            ));
        }

        let request = DepositRequest {
            id: RequestId::new_v4(),
            account_id,
            amount,
            proof_path: proof.to_string(),
            review: Review::pending(),
            created_at: Utc::now(),
        };
        self.requests
            .deposits
            .insert(request.id, Arc::new(Mutex::new(request.clone())));
        info!(request = %request.id, account = %account_id, %amount, "deposit request submitted");
        Ok(request)
    }

    /// Files a withdraw request for `net_amount`, freezing the commission
    /// split at the current rate.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] if the account is not a listed doctor.
    /// - [`LedgerError::InvalidAmount`] if `net_amount <= 0`.
    /// - [`LedgerError::InvalidArgument`] for blank payout details.
    /// - [`LedgerError::InsufficientFunds`] if the doctor's balance does not
    ///   currently cover the gross total.
    pub fn submit_withdraw(
        &self,
        account_id: AccountId,
        net_amount: Decimal,
        payout: PayoutDetails,
    ) -> Result<WithdrawRequest, LedgerError> {
        if self.doctor_by_account(&account_id).is_none() {
            return Err(LedgerError::Forbidden);
        }
        let split = WithdrawSplit::from_net(net_amount, self.config().commission_rate)?;
        let payout = PayoutDetails {
            method: payout.method.trim().to_string(),
            destination: payout.destination.trim().to_string(),
        };
        if payout.method.is_empty() || payout.destination.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "payout method and destination are required".into(),
            ));
        }
        let balance = self.balance(&account_id)?;
        if balance < split.total_amount {
            return Err(LedgerError::InsufficientFunds {
                account: account_id,
                balance,
                required: split.total_amount,
            });
        }

        let request = WithdrawRequest {
            id: RequestId::new_v4(),
            account_id,
            split,
            payout,
            review: Review::pending(),
            created_at: Utc::now(),
        };
        self.requests
            .withdrawals
            .insert(request.id, Arc::new(Mutex::new(request.clone())));
        info!(
            request = %request.id,
            account = %account_id,
            net = %split.net_amount,
            commission = %split.commission,
            total = %split.total_amount,
            "withdraw request submitted"
        );
        Ok(request)
    }

    // === Moderation ===

    /// Approves a pending deposit and credits the submitter.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] if `moderator` is not a moderator.
    /// - [`LedgerError::RequestNotFound`] for an unknown id.
    /// - [`LedgerError::AlreadyFinalized`] if the request left `pending`.
    pub fn approve_deposit(
        &self,
        moderator: AccountId,
        request_id: RequestId,
        notes: Option<String>,
    ) -> Result<DepositRequest, LedgerError> {
        self.ensure_moderator(&moderator)?;
        let slot = self.requests.deposit(&request_id)?;
        let mut request = slot.lock();
        request.review.ensure_pending()?;

        let record = self.settle_deposit(request.account_id, request.amount, request.id)?;
        request.review.finalize(
            RequestStatus::Approved,
            moderator,
            approval_notes(notes),
            Some(record.id.clone()),
        );
        let request = {
            let snapshot = request.clone();
            drop(request);
            snapshot
        };

        info!(request = %request.id, tx = %record.id, %moderator, "deposit approved");
        self.notify_owner(
            EventType::DepositApproved,
            &request.account_id,
            request.amount,
            Some(record.id.clone()),
            request.review.admin_notes.clone(),
        );
        Ok(request)
    }

    /// Rejects a pending deposit. No balance changes.
    pub fn reject_deposit(
        &self,
        moderator: AccountId,
        request_id: RequestId,
        notes: &str,
    ) -> Result<DepositRequest, LedgerError> {
        self.ensure_moderator(&moderator)?;
        let notes = rejection_notes(notes)?;
        let slot = self.requests.deposit(&request_id)?;
        let mut request = slot.lock();
        request.review.ensure_pending()?;

        request
            .review
            .finalize(RequestStatus::Rejected, moderator, Some(notes), None);
        let request = {
            let snapshot = request.clone();
            drop(request);
            snapshot
        };

        info!(request = %request.id, %moderator, "deposit rejected");
        self.notify_owner(
            EventType::DepositRejected,
            &request.account_id,
            request.amount,
            None,
            request.review.admin_notes.clone(),
        );
        Ok(request)
    }

    /// Approves a pending withdrawal: debits the doctor the frozen gross
    /// total and credits the platform the commission.
    ///
    /// # Errors
    ///
    /// As [`approve_deposit`](Self::approve_deposit), plus
    /// [`LedgerError::InsufficientFunds`] if the doctor's balance no longer
    /// covers the total. The request then stays `pending`.
    pub fn approve_withdraw(
        &self,
        moderator: AccountId,
        request_id: RequestId,
        notes: Option<String>,
    ) -> Result<WithdrawRequest, LedgerError> {
        self.ensure_moderator(&moderator)?;
        let slot = self.requests.withdrawal(&request_id)?;
        let mut request = slot.lock();
        request.review.ensure_pending()?;

        let record = self.settle_withdrawal(request.account_id, &request.split, request.id)?;
        request.review.finalize(
            RequestStatus::Approved,
            moderator,
            approval_notes(notes),
            Some(record.id.clone()),
        );
        let request = {
            let snapshot = request.clone();
            drop(request);
            snapshot
        };

        info!(request = %request.id, tx = %record.id, %moderator, "withdrawal approved");
        self.notify_owner(
            EventType::WithdrawApproved,
            &request.account_id,
            request.split.net_amount,
            Some(record.id.clone()),
            request.review.admin_notes.clone(),
        );
        Ok(request)
    }

    /// Rejects a pending withdrawal. No balance changes.
    pub fn reject_withdraw(
        &self,
        moderator: AccountId,
        request_id: RequestId,
        notes: &str,
    ) -> Result<WithdrawRequest, LedgerError> {
        self.ensure_moderator(&moderator)?;
        let notes = rejection_notes(notes)?;
        let slot = self.requests.withdrawal(&request_id)?;
        let mut request = slot.lock();
        request.review.ensure_pending()?;

        request
            .review
            .finalize(RequestStatus::Rejected, moderator, Some(notes), None);
        let request = {
            let snapshot = request.clone();
            drop(request);
            snapshot
        };

        info!(request = %request.id, %moderator, "withdrawal rejected");
        self.notify_owner(
            EventType::WithdrawRejected,
            &request.account_id,
            request.split.net_amount,
            None,
            request.review.admin_notes.clone(),
        );
        Ok(request)
    }

    // === Reads ===

    pub fn deposit_request(&self, request_id: &RequestId) -> Result<DepositRequest, LedgerError> {
        Ok(self.requests.deposit(request_id)?.lock().clone())
    }

    pub fn withdraw_request(&self, request_id: &RequestId) -> Result<WithdrawRequest, LedgerError> {
        Ok(self.requests.withdrawal(request_id)?.lock().clone())
    }

    /// Matching deposit requests, newest first.
    pub fn deposit_requests(&self, filter: RequestFilter) -> Vec<DepositRequest> {
        let slots: Vec<_> = self
            .requests
            .deposits
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut requests: Vec<DepositRequest> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(|request| filter.matches(&request.account_id, &request.review))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }

    /// Matching withdraw requests, newest first.
    pub fn withdraw_requests(&self, filter: RequestFilter) -> Vec<WithdrawRequest> {
        let slots: Vec<_> = self
            .requests
            .withdrawals
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut requests: Vec<WithdrawRequest> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(|request| filter.matches(&request.account_id, &request.review))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn review_starts_pending() {
        let review = Review::pending();
        assert_eq!(review.status, RequestStatus::Pending);
        assert!(review.ensure_pending().is_ok());
    }

    #[test]
    fn finalized_review_refuses_second_transition() {
        let mut review = Review::pending();
        review.finalize(RequestStatus::Rejected, AccountId::new_v4(), Some("blurry".into()), None);
        assert_eq!(
            review.ensure_pending(),
            Err(LedgerError::AlreadyFinalized(RequestStatus::Rejected))
        );
        assert!(review.reviewed_at.is_some());
    }

    #[test]
    fn rejection_requires_notes() {
        assert!(rejection_notes("   ").is_err());
        assert_eq!(rejection_notes(" wrong amount ").unwrap(), "wrong amount");
        assert_eq!(approval_notes(Some("  ".into())), None);
        assert_eq!(approval_notes(Some(" ok ".into())), Some("ok".into()));
    }

    #[test]
    fn filter_matches_status_and_owner() {
        let owner = AccountId::new_v4();
        let review = Review::pending();
        assert!(RequestFilter::default().matches(&owner, &review));
        assert!(
            RequestFilter {
                status: Some(RequestStatus::Pending),
                owner: Some(owner)
            }
            .matches(&owner, &review)
        );
        assert!(
            !RequestFilter {
                status: Some(RequestStatus::Approved),
                owner: None
            }
            .matches(&owner, &review)
        );
        assert!(
            !RequestFilter {
                status: None,
                owner: Some(AccountId::new_v4())
            }
            .matches(&owner, &review)
        );
    }

    #[test]
    fn withdraw_request_serializes_flat() {
        let request = WithdrawRequest {
            id: RequestId::new_v4(),
            account_id: AccountId::new_v4(),
            split: WithdrawSplit::from_net(dec!(90), dec!(0.1)).unwrap(),
            payout: PayoutDetails {
                method: "bank".into(),
                destination: "IBAN".into(),
            },
            review: Review::pending(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["net_amount"], "90");
        assert_eq!(json["commission"], "10");
        assert_eq!(json["total_amount"], "100");
    }
}
