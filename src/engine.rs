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

//! Atomic operation engine.
//!
//! The [`Engine`] is the central component of the ledger. It owns the
//! balance store, the transaction ledger, the profile directory, the request
//! book and the notification dispatcher, and exposes every balance-changing
//! operation as a single unit of work.
//!
//! # Operations
//!
//! - **Consultation**: debit the patient the doctor's fee, credit the doctor
//!   the full fee, record a `consultation` transaction.
//! - **Transfer**: debit the sender, credit the receiver, record a
//!   `transfer` transaction.
//! - **Deposit / withdraw settlement**: driven by request moderation, see
//!   [`crate::moderation`].
//!
//! # Atomicity
//!
//! Each operation locks the rows of every account it touches (in id order),
//! applies its balance changes, writes its ledger record, and only then
//! commits. Any error before the commit, including a ledger write failure,
//! drops the [`UnitOfWork`](crate::balance::UnitOfWork) and restores every
//! balance. Notifications are queued after the commit and cannot undo it.

use crate::account::Account;
use crate::balance::BalanceStore;
use crate::base::{AccountId, DoctorId, RequestId, TransactionId};
use crate::commission::WithdrawSplit;
use crate::config::Config;
use crate::directory::{Directory, Doctor, Profile, Role};
use crate::error::LedgerError;
use crate::ledger::{IdGenerator, Ledger, RandomCode};
use crate::moderation::RequestBook;
use crate::notify::{Dispatcher, EventType, LogNotifier, Notification, NotificationData, Notifier};
use crate::transaction::{NewTransaction, Transaction, TransactionKind};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a committed balance-changing operation.
///
/// The transaction id is the caller's proof of payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    #[serde(rename = "tx_id")]
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    /// Caller's balance after the operation.
    pub balance_after: Decimal,
}

/// Ledger engine.
///
/// # Invariants
///
/// - No balance is ever negative.
/// - Every balance change is paired with exactly one ledger record written in
///   the same unit of work.
/// - Ledger records are never modified or removed.
/// - A request leaves `pending` at most once.
pub struct Engine {
    config: Config,
    balances: BalanceStore,
    ledger: Ledger,
    directory: Directory,
    pub(crate) requests: RequestBook,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Engine with default configuration that logs notifications.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(config: Config, notifier: Arc<dyn Notifier>) -> Self {
        let ids = Box::new(RandomCode::new(config.tx_code_length));
        Self::with_parts(config, notifier, ids)
    }

    /// Fully injected constructor.
    pub fn with_parts(
        config: Config,
        notifier: Arc<dyn Notifier>,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        let config = config.sanitized();
        let balances = BalanceStore::new();
        balances.open(AccountId::PLATFORM);

        Engine {
            ledger: Ledger::new(ids, config.tx_id_attempts),
            balances,
            directory: Directory::new(),
            requests: RequestBook::default(),
            dispatcher: Dispatcher::spawn(notifier),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // === Profiles ===

    /// Registers a profile and opens its zero-balance wallet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyExists`] if the account is already registered.
    /// - [`LedgerError::InvalidArgument`] for the platform account, a blank
    ///   name or a malformed email.
    pub fn register_profile(
        &self,
        account_id: AccountId,
        full_name: &str,
        email: &str,
        role: Role,
    ) -> Result<Profile, LedgerError> {
        if account_id == AccountId::PLATFORM {
            return Err(LedgerError::InvalidArgument(
                "the platform account cannot hold a profile".into(),
            ));
        }
        let profile = Profile {
            account_id,
            full_name: full_name.trim().to_string(),
            email: email.trim().to_ascii_lowercase(),
            role,
            created_at: Utc::now(),
        };
        self.directory.insert_profile(profile.clone())?;
        self.balances.open(account_id);
        info!(account = %account_id, ?role, "profile registered");
        Ok(profile)
    }

    /// Self-service registration. Everyone signs up as a patient except the
    /// configured bootstrap account, which signs up as a moderator.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::register_profile`].
    pub fn sign_up(
        &self,
        account_id: AccountId,
        full_name: &str,
        email: &str,
    ) -> Result<Profile, LedgerError> {
        let role = if self.config.bootstrap_moderator == Some(account_id) {
            Role::Moderator
        } else {
            Role::Patient
        };
        self.register_profile(account_id, full_name, email, role)
    }

    /// Promotes an existing profile to moderator on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] unless `caller` is a moderator.
    /// - [`LedgerError::AccountNotFound`] if `account_id` has no profile.
    pub fn grant_moderator(
        &self,
        caller: AccountId,
        account_id: AccountId,
    ) -> Result<Profile, LedgerError> {
        self.ensure_moderator(&caller)?;
        let profile = self.directory.grant_moderator(&account_id)?;
        info!(account = %account_id, by = %caller, "moderator granted");
        Ok(profile)
    }

    /// Lists an existing profile as a doctor.
    pub fn register_doctor(
        &self,
        account_id: AccountId,
        specialty: &str,
        consultation_fee: Decimal,
    ) -> Result<Doctor, LedgerError> {
        let doctor = Doctor {
            id: DoctorId::new_v4(),
            account_id,
            specialty: specialty.trim().to_string(),
            consultation_fee,
            available: true,
        };
        self.directory.insert_doctor(doctor.clone())?;
        info!(doctor = %doctor.id, account = %account_id, fee = %consultation_fee, "doctor listed");
        Ok(doctor)
    }

    /// Opens or closes a doctor's consultation book. Only the doctor or a
    /// moderator may do this.
    pub fn set_doctor_availability(
        &self,
        caller: AccountId,
        doctor_id: DoctorId,
        available: bool,
    ) -> Result<Doctor, LedgerError> {
        let doctor = self.directory.doctor(&doctor_id).ok_or(LedgerError::DoctorNotFound)?;
        if doctor.account_id != caller && !self.directory.is_moderator(&caller) {
            return Err(LedgerError::Forbidden);
        }
        self.directory.set_doctor_availability(&doctor_id, available)?;
        self.directory.doctor(&doctor_id).ok_or(LedgerError::DoctorNotFound)
    }

    pub fn profile(&self, account_id: &AccountId) -> Option<Profile> {
        self.directory.profile(account_id)
    }

    pub fn doctor(&self, doctor_id: &DoctorId) -> Option<Doctor> {
        self.directory.doctor(doctor_id)
    }

    pub fn doctor_by_account(&self, account_id: &AccountId) -> Option<Doctor> {
        self.directory.doctor_by_account(account_id)
    }

    pub fn doctors(&self) -> Vec<Doctor> {
        self.directory.doctors()
    }

    pub(crate) fn ensure_moderator(&self, account_id: &AccountId) -> Result<(), LedgerError> {
        if self.directory.is_moderator(account_id) {
            Ok(())
        } else {
            Err(LedgerError::Forbidden)
        }
    }

    fn ensure_profile(&self, account_id: &AccountId) -> Result<Profile, LedgerError> {
        self.directory
            .profile(account_id)
            .ok_or(LedgerError::AccountNotFound)
    }

    // === Balances & ledger reads ===

    pub fn balance(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        self.balances.get_balance(account_id)
    }

    pub fn account(&self, account_id: &AccountId) -> Option<Account> {
        self.balances.account(account_id)
    }

    /// Every account including the platform's, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        self.balances.accounts()
    }

    /// Looks a transaction up by the reference a patient shared.
    pub fn transaction(&self, reference: &str) -> Result<Arc<Transaction>, LedgerError> {
        self.ledger
            .get(reference)
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// Transactions involving the account, newest first.
    pub fn history(&self, account_id: &AccountId) -> Vec<Arc<Transaction>> {
        self.ledger.history(account_id)
    }

    /// Every transaction in commit order.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.ledger.transactions()
    }

    // === Atomic operations ===

    /// Pays for a consultation with `doctor_id` from the patient's wallet.
    ///
    /// The doctor is credited the full fee; the platform's share is taken
    /// when the doctor withdraws.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DoctorNotFound`] / [`LedgerError::AccountNotFound`].
    /// - [`LedgerError::DoctorUnavailable`] if the doctor is not booking.
    /// - [`LedgerError::SelfConsultation`] if the patient is the doctor.
    /// - [`LedgerError::InsufficientFunds`] if the balance is below the fee.
    /// - [`LedgerError::IdCollision`] if no transaction id could be allocated.
    pub fn perform_consultation(
        &self,
        patient: AccountId,
        doctor_id: DoctorId,
    ) -> Result<Receipt, LedgerError> {
        self.consultation(patient, doctor_id).inspect_err(|error| {
            debug!(%patient, doctor = %doctor_id, %error, "consultation rejected");
        })
    }

    fn consultation(&self, patient: AccountId, doctor_id: DoctorId) -> Result<Receipt, LedgerError> {
        let patient_profile = self.ensure_profile(&patient)?;
        let doctor = self.directory.doctor(&doctor_id).ok_or(LedgerError::DoctorNotFound)?;
        if !doctor.available {
            return Err(LedgerError::DoctorUnavailable);
        }
        if doctor.account_id == patient {
            return Err(LedgerError::SelfConsultation);
        }
        let fee = doctor.consultation_fee;

        let mut unit = self.balances.begin(&[patient, doctor.account_id])?;
        let balance_after = unit.debit(patient, fee)?;
        unit.credit(doctor.account_id, fee)?;
        let record = self.ledger.record(NewTransaction {
            kind: TransactionKind::Consultation,
            amount: fee,
            user_id: patient,
            doctor_id: Some(doctor.id),
            receiver_id: Some(doctor.account_id),
            commission: None,
            description: format!(
                "Consultation with {}",
                self.directory.display_name(&doctor.account_id)
            ),
        })?;
        unit.commit();

        if let Some(doctor_profile) = self.directory.profile(&doctor.account_id) {
            self.notify(
                EventType::ConsultationPaid,
                doctor_profile.email,
                fee,
                patient_profile.full_name,
                &record,
                None,
            );
        }

        Ok(Receipt {
            transaction_id: record.id.clone(),
            amount: fee,
            balance_after,
        })
    }

    /// Moves `amount` points from `sender` to `receiver`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::SelfTransfer`] if both sides are the same account.
    /// - [`LedgerError::AccountNotFound`] if either side has no profile.
    /// - [`LedgerError::InsufficientFunds`] if the sender cannot cover it.
    /// - [`LedgerError::IdCollision`] if no transaction id could be allocated.
    pub fn perform_transfer(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
    ) -> Result<Receipt, LedgerError> {
        self.transfer(sender, receiver, amount).inspect_err(|error| {
            debug!(%sender, %receiver, %amount, %error, "transfer rejected");
        })
    }

    fn transfer(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
    ) -> Result<Receipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if sender == receiver {
            return Err(LedgerError::SelfTransfer);
        }
        let sender_profile = self.ensure_profile(&sender)?;
        let receiver_profile = self.ensure_profile(&receiver)?;

        let mut unit = self.balances.begin(&[sender, receiver])?;
        let balance_after = unit.debit(sender, amount)?;
        unit.credit(receiver, amount)?;
        let record = self.ledger.record(NewTransaction {
            kind: TransactionKind::Transfer,
            amount,
            user_id: sender,
            doctor_id: None,
            receiver_id: Some(receiver),
            commission: None,
            description: format!("Transfer to {}", receiver_profile.full_name),
        })?;
        unit.commit();

        self.notify(
            EventType::TransferReceived,
            receiver_profile.email,
            amount,
            sender_profile.full_name,
            &record,
            None,
        );

        Ok(Receipt {
            transaction_id: record.id.clone(),
            amount,
            balance_after,
        })
    }

    /// Credits an approved deposit. Called with the request lock held.
    pub(crate) fn settle_deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        request_id: RequestId,
    ) -> Result<Arc<Transaction>, LedgerError> {
        let mut unit = self.balances.begin(&[account_id])?;
        unit.credit(account_id, amount)?;
        let record = self.ledger.record(NewTransaction {
            kind: TransactionKind::Deposit,
            amount,
            user_id: account_id,
            doctor_id: None,
            receiver_id: None,
            commission: None,
            description: format!("Deposit request {request_id}"),
        })?;
        unit.commit();
        Ok(record)
    }

    /// Debits an approved withdrawal and books its commission. Called with
    /// the request lock held.
    pub(crate) fn settle_withdrawal(
        &self,
        account_id: AccountId,
        split: &WithdrawSplit,
        request_id: RequestId,
    ) -> Result<Arc<Transaction>, LedgerError> {
        let mut unit = self.balances.begin(&[account_id, AccountId::PLATFORM])?;
        unit.debit(account_id, split.total_amount)?;
        if split.commission > Decimal::ZERO {
            unit.credit(AccountId::PLATFORM, split.commission)?;
        }
        let record = self.ledger.record(NewTransaction {
            kind: TransactionKind::Withdraw,
            amount: split.total_amount,
            user_id: account_id,
            doctor_id: self.directory.doctor_by_account(&account_id).map(|d| d.id),
            receiver_id: Some(AccountId::PLATFORM),
            commission: Some(split.commission),
            description: format!(
                "Withdraw request {request_id}: net {} + commission {}",
                split.net_amount, split.commission
            ),
        })?;
        unit.commit();
        Ok(record)
    }

    // === Notifications ===

    pub(crate) fn notify(
        &self,
        event: EventType,
        to: String,
        amount: Decimal,
        name: String,
        record: &Transaction,
        notes: Option<String>,
    ) {
        self.dispatcher.notify(Notification {
            event,
            to,
            data: NotificationData {
                amount,
                name,
                transaction_id: Some(record.id.clone()),
                notes,
            },
        });
    }

    pub(crate) fn notify_owner(
        &self,
        event: EventType,
        owner: &AccountId,
        amount: Decimal,
        transaction_id: Option<TransactionId>,
        notes: Option<String>,
    ) {
        let Some(profile) = self.directory.profile(owner) else {
            return;
        };
        self.dispatcher.notify(Notification {
            event,
            to: profile.email,
            data: NotificationData {
                amount,
                name: profile.full_name,
                transaction_id,
                notes,
            },
        });
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
