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

//! Concurrency tests for the engine's row locking, run under parking_lot's
//! deadlock detector.
//!
//! Every unit of work locks its rows in account-id order, so transfers in
//! opposite directions, consultations and withdraw approvals can interleave
//! freely. The detector thread flags any cycle in the lock graph.

use consult_ledger::{AccountId, Doctor, Engine, LedgerError, PayoutDetails, Role};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// === Detector ===

struct Detector {
    running: Arc<AtomicBool>,
    found: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Starts a background thread that checks for deadlocks every 100ms.
fn start_deadlock_detector() -> Detector {
    let running = Arc::new(AtomicBool::new(true));
    let found = Arc::new(AtomicBool::new(false));
    let (running_clone, found_clone) = (running.clone(), found.clone());

    let handle = thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                found_clone.store(true, Ordering::SeqCst);
                return;
            }
        }
    });

    Detector {
        running,
        found,
        handle,
    }
}

/// Stops the detector and fails the test if it saw a cycle.
fn stop_deadlock_detector(detector: Detector) {
    detector.running.store(false, Ordering::SeqCst);
    detector.handle.join().expect("Detector thread panicked");
    assert!(
        !detector.found.load(Ordering::SeqCst),
        "Deadlock detected! See output above for details."
    );
}

// === Fixture ===

fn moderator(engine: &Engine) -> AccountId {
    register(engine, Role::Moderator)
}

fn register(engine: &Engine, role: Role) -> AccountId {
    let id = AccountId::new_v4();
    let email = format!("{}@example.com", id.0.simple());
    engine.register_profile(id, "Load Test", &email, role).unwrap();
    id
}

fn funded(engine: &Engine, moderator: AccountId, role: Role, funds: Decimal) -> AccountId {
    let id = register(engine, role);
    if funds > Decimal::ZERO {
        let proof = format!("{id}/deposit-proofs/1.png");
        let request = engine.submit_deposit(id, funds, &proof).unwrap();
        engine.approve_deposit(moderator, request.id, None).unwrap();
    }
    id
}

fn listed_doctor(engine: &Engine, moderator: AccountId, fee: Decimal, funds: Decimal) -> Doctor {
    let account = funded(engine, moderator, Role::Doctor, funds);
    engine.register_doctor(account, "cardiology", fee).unwrap()
}

fn total_points(engine: &Engine) -> Decimal {
    engine.accounts().iter().map(|a| a.balance()).sum()
}

// === Tests ===

/// Concurrent spends from one wallet: exactly floor(balance / amount) win.
#[test]
fn no_overspend_under_contention() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let moderator = moderator(&engine);
    let sender = funded(&engine, moderator, Role::Patient, dec!(100));
    let receiver = register(&engine, Role::Patient);

    const NUM_THREADS: usize = 40;
    let successes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let successes = Arc::clone(&successes);
            thread::spawn(move || match engine.perform_transfer(sender, receiver, dec!(7)) {
                Ok(_) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    assert_eq!(successes.load(Ordering::SeqCst), 14);
    assert_eq!(engine.balance(&sender).unwrap(), dec!(2));
    assert_eq!(engine.balance(&receiver).unwrap(), dec!(98));
    assert_eq!(engine.history(&sender).len(), 15);
}

/// A -> B and B -> A at the same time, repeatedly.
#[test]
fn no_deadlock_opposite_transfers() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let moderator = moderator(&engine);
    let alice = funded(&engine, moderator, Role::Patient, dec!(500));
    let bob = funded(&engine, moderator, Role::Patient, dec!(500));

    const NUM_THREADS: usize = 16;
    const ROUNDS: usize = 200;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let (from, to) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    match engine.perform_transfer(from, to, dec!(1)) {
                        Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    let alice_balance = engine.balance(&alice).unwrap();
    let bob_balance = engine.balance(&bob).unwrap();
    assert!(alice_balance >= Decimal::ZERO);
    assert!(bob_balance >= Decimal::ZERO);
    assert_eq!(alice_balance + bob_balance, dec!(1000));
}

/// Transfers around a ring of wallets, so every lock pair is contended from
/// both ends.
#[test]
fn no_deadlock_transfer_ring() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let moderator = moderator(&engine);
    let ring: Arc<Vec<AccountId>> = Arc::new(
        (0..6)
            .map(|_| funded(&engine, moderator, Role::Patient, dec!(50)))
            .collect(),
    );

    let handles: Vec<_> = (0..ring.len())
        .map(|i| {
            let engine = Arc::clone(&engine);
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for round in 0..150 {
                    let from = ring[(i + round) % ring.len()];
                    let to = ring[(i + round + 1) % ring.len()];
                    let _ = engine.perform_transfer(from, to, dec!(3));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    assert_eq!(total_points(&engine), dec!(300));
    for account in ring.iter() {
        assert!(engine.balance(account).unwrap() >= Decimal::ZERO);
    }
}

/// Consultations into a doctor racing the doctor's own withdraw approvals.
#[test]
fn no_deadlock_consultations_and_withdrawals() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let moderator = moderator(&engine);
    let doctor = listed_doctor(&engine, moderator, dec!(10), dec!(900));
    let patients: Vec<_> = (0..8)
        .map(|_| funded(&engine, moderator, Role::Patient, dec!(100)))
        .collect();

    let withdrawals: Vec<_> = (0..10)
        .map(|_| {
            engine
                .submit_withdraw(
                    doctor.account_id,
                    dec!(90),
                    PayoutDetails {
                        method: "bank transfer".into(),
                        destination: "NL91 ABNA 0417 1643 00".into(),
                    },
                )
                .unwrap()
                .id
        })
        .collect();

    let mut handles = Vec::new();
    for patient in patients.clone() {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                engine.perform_consultation(patient, doctor.id).unwrap();
            }
        }));
    }
    {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for request in withdrawals {
                match engine.approve_withdraw(moderator, request, None) {
                    Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    for patient in &patients {
        assert_eq!(engine.balance(patient).unwrap(), Decimal::ZERO);
    }
    // 900 funded + 800 earned; every approved withdrawal moved 100 out of the
    // doctor's wallet, 10 of it to the platform.
    let doctor_balance = engine.balance(&doctor.account_id).unwrap();
    let platform = engine.balance(&AccountId::PLATFORM).unwrap();
    let approved = platform / dec!(10);
    assert_eq!(doctor_balance + approved * dec!(100), dec!(1700));
    assert!(doctor_balance >= Decimal::ZERO);
    // 10 requests of 100 against 1700 total: the funds always suffice at the
    // end, so at least the initial 9 must have gone through.
    assert!(approved >= dec!(9));
}

/// Snapshot reads while balances move.
#[test]
fn no_deadlock_reads_during_mutation() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let moderator = moderator(&engine);
    let accounts: Arc<Vec<AccountId>> = Arc::new(
        (0..4)
            .map(|_| funded(&engine, moderator, Role::Patient, dec!(100)))
            .collect(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let accounts = Arc::clone(&accounts);
            thread::spawn(move || {
                for round in 0..300 {
                    let from = accounts[(i + round) % 4];
                    let to = accounts[(i + round + 2) % 4];
                    let _ = engine.perform_transfer(from, to, dec!(1));
                }
            })
        })
        .collect();
    let reader = {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut reads = 0usize;
            while !stop.load(Ordering::SeqCst) {
                for account in engine.accounts() {
                    assert!(account.balance() >= Decimal::ZERO);
                }
                let _ = engine.transactions().len();
                reads += 1;
            }
            reads
        })
    };

    for writer in writers {
        writer.join().expect("Thread panicked");
    }
    stop.store(true, Ordering::SeqCst);
    let reads = reader.join().expect("Reader panicked");
    stop_deadlock_detector(detector);

    assert!(reads > 0);
    assert_eq!(total_points(&engine), dec!(400));
}
