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

//! Property-based tests for the ledger engine.
//!
//! Any interleaving of deposits, transfers, consultations and withdrawals
//! must keep every wallet non-negative, and replaying the ledger must land on
//! exactly the balances the store holds.

use consult_ledger::{AccountId, Doctor, Engine, PayoutDetails, Role, WithdrawSplit};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.01 to 500.00).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=50_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn arb_rate() -> impl Strategy<Value = Decimal> {
    (0i64..=50i64).prop_map(|percent| Decimal::new(percent, 2))
}

#[derive(Debug, Clone)]
enum Op {
    Deposit { who: usize, amount: Decimal, approve: bool },
    Transfer { from: usize, to: usize, amount: Decimal },
    Consultation { patient: usize },
    Withdraw { net: Decimal, approve: bool },
}

const WALLETS: usize = 4;

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WALLETS, arb_amount(), any::<bool>())
            .prop_map(|(who, amount, approve)| Op::Deposit { who, amount, approve }),
        (0..WALLETS, 0..WALLETS, arb_amount())
            .prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
        (0..WALLETS - 1).prop_map(|patient| Op::Consultation { patient }),
        (arb_amount(), any::<bool>()).prop_map(|(net, approve)| Op::Withdraw { net, approve }),
    ]
}

// =============================================================================
// Harness
// =============================================================================

/// Three patients plus one doctor at the last index.
struct World {
    engine: Engine,
    moderator: AccountId,
    wallets: Vec<AccountId>,
    doctor: Doctor,
}

impl World {
    fn new(fee: Decimal) -> Self {
        let engine = Engine::new();
        let register = |role: Role| {
            let id = AccountId::new_v4();
            let email = format!("{}@example.com", id.0.simple());
            engine.register_profile(id, "Prop", &email, role).unwrap();
            id
        };
        let moderator = register(Role::Moderator);
        let mut wallets: Vec<_> = (0..WALLETS - 1).map(|_| register(Role::Patient)).collect();
        let doctor_account = register(Role::Doctor);
        wallets.push(doctor_account);
        let doctor = engine.register_doctor(doctor_account, "general", fee).unwrap();
        Self {
            engine,
            moderator,
            wallets,
            doctor,
        }
    }

    fn apply(&self, op: &Op) {
        // Failures are expected; the invariants must hold either way.
        match *op {
            Op::Deposit { who, amount, approve } => {
                let account = self.wallets[who];
                let proof = format!("{account}/deposit-proofs/42.pdf");
                let request = self.engine.submit_deposit(account, amount, &proof).unwrap();
                if approve {
                    self.engine
                        .approve_deposit(self.moderator, request.id, None)
                        .unwrap();
                } else {
                    self.engine
                        .reject_deposit(self.moderator, request.id, "unreadable proof")
                        .unwrap();
                }
            }
            Op::Transfer { from, to, amount } => {
                let _ = self
                    .engine
                    .perform_transfer(self.wallets[from], self.wallets[to], amount);
            }
            Op::Consultation { patient } => {
                let _ = self
                    .engine
                    .perform_consultation(self.wallets[patient], self.doctor.id);
            }
            Op::Withdraw { net, approve } => {
                let payout = PayoutDetails {
                    method: "bank transfer".into(),
                    destination: "GB33 BUKB 2020 1555 5555 55".into(),
                };
                let Ok(request) = self
                    .engine
                    .submit_withdraw(self.doctor.account_id, net, payout)
                else {
                    return;
                };
                if approve {
                    let _ = self
                        .engine
                        .approve_withdraw(self.moderator, request.id, None);
                } else {
                    let _ = self
                        .engine
                        .reject_withdraw(self.moderator, request.id, "bank details mismatch");
                }
            }
        }
    }

    /// Balances rebuilt from the ledger alone.
    fn replay(&self) -> HashMap<AccountId, Decimal> {
        let mut balances = HashMap::new();
        for tx in self.engine.transactions() {
            for (account, delta) in tx.deltas() {
                *balances.entry(account).or_insert(Decimal::ZERO) += delta;
            }
        }
        balances
    }
}

// =============================================================================
// Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// No sequence of operations drives a wallet negative.
    #[test]
    fn balances_never_negative(
        fee in arb_amount(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let world = World::new(fee);
        for op in &ops {
            world.apply(op);
            for account in world.engine.accounts() {
                prop_assert!(account.balance() >= Decimal::ZERO, "{:?} after {:?}", account, op);
            }
        }
    }

    /// Every committed balance change has exactly one ledger record behind it.
    #[test]
    fn ledger_replay_matches_balances(
        fee in arb_amount(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let world = World::new(fee);
        for op in &ops {
            world.apply(op);
        }

        let replayed = world.replay();
        for account in world.engine.accounts() {
            let expected = replayed.get(&account.id()).copied().unwrap_or(Decimal::ZERO);
            prop_assert_eq!(account.balance(), expected);
        }
    }

    /// Points in the system equal approved deposits minus paid-out nets.
    #[test]
    fn value_is_conserved(
        fee in arb_amount(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let world = World::new(fee);
        for op in &ops {
            world.apply(op);
        }

        let total: Decimal = world.engine.accounts().iter().map(|a| a.balance()).sum();
        let external: Decimal = world.engine.transactions().iter().map(|tx| tx.external_flow()).sum();
        prop_assert_eq!(total, external);
    }

    /// The commission split always adds up and never exceeds the total.
    #[test]
    fn withdraw_split_is_consistent(net in arb_amount(), rate in arb_rate()) {
        let split = WithdrawSplit::from_net(net, rate).unwrap();
        prop_assert_eq!(split.total_amount, split.net_amount + split.commission);
        prop_assert!(split.commission >= Decimal::ZERO);
        prop_assert!(split.commission < split.total_amount);
        prop_assert_eq!(split.commission.scale() <= 2, true);
        if rate == Decimal::ZERO {
            prop_assert_eq!(split.commission, Decimal::ZERO);
        }
    }

    /// The commission is within half a cent of `total * rate`.
    #[test]
    fn commission_tracks_rate(net in arb_amount(), rate in arb_rate()) {
        let split = WithdrawSplit::from_net(net, rate).unwrap();
        let exact = split.total_amount * rate;
        prop_assert!((split.commission - exact).abs() <= dec!(0.01));
    }
}
