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

//! Profiles and doctor listings.
//!
//! Non-financial data: reads here carry no locking requirement beyond what
//! [`DashMap`] provides, and listings may race with registrations.

use crate::base::{AccountId, DoctorId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Moderator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub account_id: AccountId,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Doctor {
    pub id: DoctorId,
    /// Wallet credited for consultations.
    pub account_id: AccountId,
    pub specialty: String,
    pub consultation_fee: Decimal,
    pub available: bool,
}

#[derive(Debug, Default)]
pub struct Directory {
    profiles: DashMap<AccountId, Profile>,
    doctors: DashMap<DoctorId, Doctor>,
    doctors_by_account: DashMap<AccountId, DoctorId>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] for a blank name or malformed email.
    /// - [`LedgerError::AlreadyExists`] if the account already has a profile.
    pub fn insert_profile(&self, profile: Profile) -> Result<(), LedgerError> {
        if profile.full_name.trim().is_empty() {
            return Err(LedgerError::InvalidArgument("full name is required".into()));
        }
        if !looks_like_email(&profile.email) {
            return Err(LedgerError::InvalidArgument(format!(
                "invalid email address: {}",
                profile.email
            )));
        }
        match self.profiles.entry(profile.account_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(profile);
                Ok(())
            }
        }
    }

    /// Lists the account as a doctor. The account keeps one listing at most.
    pub fn insert_doctor(&self, doctor: Doctor) -> Result<(), LedgerError> {
        if doctor.consultation_fee <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if !self.profiles.contains_key(&doctor.account_id) {
            return Err(LedgerError::AccountNotFound);
        }
        match self.doctors_by_account.entry(doctor.account_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(doctor.id);
                if let Some(mut profile) = self.profiles.get_mut(&doctor.account_id) {
                    if profile.role == Role::Patient {
                        profile.role = Role::Doctor;
                    }
                }
                self.doctors.insert(doctor.id, doctor);
                Ok(())
            }
        }
    }

    pub fn profile(&self, account_id: &AccountId) -> Option<Profile> {
        self.profiles.get(account_id).map(|entry| entry.value().clone())
    }

    pub fn doctor(&self, doctor_id: &DoctorId) -> Option<Doctor> {
        self.doctors.get(doctor_id).map(|entry| entry.value().clone())
    }

    pub fn doctor_by_account(&self, account_id: &AccountId) -> Option<Doctor> {
        let doctor_id = *self.doctors_by_account.get(account_id)?;
        self.doctor(&doctor_id)
    }

    /// Every listed doctor, ordered by specialty then fee.
    pub fn doctors(&self) -> Vec<Doctor> {
        let mut doctors: Vec<Doctor> = self
            .doctors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        doctors.sort_by(|a, b| {
            a.specialty
                .cmp(&b.specialty)
                .then(a.consultation_fee.cmp(&b.consultation_fee))
        });
        doctors
    }

    pub fn set_doctor_availability(
        &self,
        doctor_id: &DoctorId,
        available: bool,
    ) -> Result<(), LedgerError> {
        let mut doctor = self
            .doctors
            .get_mut(doctor_id)
            .ok_or(LedgerError::DoctorNotFound)?;
        doctor.available = available;
        Ok(())
    }

    /// Promotes a profile to moderator and returns the updated profile.
    pub fn grant_moderator(&self, account_id: &AccountId) -> Result<Profile, LedgerError> {
        let mut profile = self
            .profiles
            .get_mut(account_id)
            .ok_or(LedgerError::AccountNotFound)?;
        profile.role = Role::Moderator;
        Ok(profile.clone())
    }

    pub fn is_moderator(&self, account_id: &AccountId) -> bool {
        self.profiles
            .get(account_id)
            .is_some_and(|profile| profile.role == Role::Moderator)
    }

    /// Display name used in notifications, falling back to the account id.
    pub fn display_name(&self, account_id: &AccountId) -> String {
        self.profiles
            .get(account_id)
            .map(|profile| profile.full_name.clone())
            .unwrap_or_else(|| account_id.to_string())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
