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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests verify that the locking patterns of the ledger — one mutex per
//! account, two mutexes in ascending user-id order inside the transfer
//! engine — do not lead to deadlocks under concurrent access.
//!
//! The tests use parking_lot with the `deadlock_detection` feature to
//! automatically detect cycles in the lock graph.

use fc_ledger::{EntryType, LedgerStore, TransferEngine, UserId};
use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
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
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

fn seeded_ledger(users: u64, amount: i64) -> Arc<LedgerStore> {
    let ledger = Arc::new(LedgerStore::new());
    for user in 1..=users {
        ledger
            .credit(
                UserId(user),
                amount,
                EntryType::Deposit,
                "card",
                &format!("seed_{user}"),
                None,
            )
            .unwrap();
    }
    ledger
}

// === Tests ===

#[test]
fn no_deadlock_high_contention_single_account() {
    let detector = start_deadlock_detector();
    let ledger = seeded_ledger(1, 1_000_000);

    let mut handles = Vec::new();
    for worker in 0..8u64 {
        let ledger = Arc::clone(&ledger);
        handles.push(thread::spawn(move || {
            for i in 0..200u64 {
                let ref_id = format!("op_{worker}_{i}");
                match i % 4 {
                    0 => {
                        let _ = ledger.credit(
                            UserId(1),
                            10,
                            EntryType::WagerCredit,
                            "match",
                            &ref_id,
                            None,
                        );
                    }
                    1 => {
                        let _ = ledger.debit(
                            UserId(1),
                            10,
                            EntryType::WagerDebit,
                            "match",
                            &ref_id,
                            None,
                        );
                    }
                    2 => {
                        if let Ok(lock) =
                            ledger.lock_funds(UserId(1), 10, "withdrawal", &ref_id, None)
                        {
                            let _ = ledger.unlock_funds(UserId(1), lock.id);
                        }
                    }
                    _ => {
                        if let Ok(lock) = ledger.lock_funds(UserId(1), 10, "match", &ref_id, None)
                        {
                            let _ = ledger.settle_lock(
                                UserId(1),
                                lock.id,
                                EntryType::WagerDebit,
                                None,
                            );
                        }
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let balance = ledger.balance(UserId(1)).unwrap();
    assert_eq!(
        ledger.replay_balance(UserId(1)).unwrap(),
        balance.available_minor + balance.locked_minor
    );
    stop_deadlock_detector(detector);
}

#[test]
fn no_deadlock_opposing_transfers() {
    let detector = start_deadlock_detector();
    let ledger = seeded_ledger(2, 100_000);
    let transfers = Arc::new(TransferEngine::new(Arc::clone(&ledger)));

    let mut handles = Vec::new();
    for direction in 0..2u64 {
        let transfers = Arc::clone(&transfers);
        handles.push(thread::spawn(move || {
            let (from, to) = if direction == 0 { (1, 2) } else { (2, 1) };
            for _ in 0..1000 {
                let _ = transfers.transfer(UserId(from), UserId(to), 5, None);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    stop_deadlock_detector(detector);
}

#[test]
fn no_deadlock_transfers_mixed_with_account_operations() {
    let detector = start_deadlock_detector();
    let ledger = seeded_ledger(4, 50_000);
    let transfers = Arc::new(TransferEngine::new(Arc::clone(&ledger)));

    let mut handles = Vec::new();

    // Ring of transfers across all pairs.
    for user in 1..=4u64 {
        let transfers = Arc::clone(&transfers);
        handles.push(thread::spawn(move || {
            let next = user % 4 + 1;
            for _ in 0..500 {
                let _ = transfers.transfer(UserId(user), UserId(next), 3, None);
                let _ = transfers.transfer(UserId(next), UserId(user), 2, None);
            }
        }));
    }

    // Single-account churn on the same users.
    for user in 1..=4u64 {
        let ledger = Arc::clone(&ledger);
        handles.push(thread::spawn(move || {
            for i in 0..500u64 {
                let ref_id = format!("churn_{user}_{i}");
                if let Ok(lock) = ledger.lock_funds(UserId(user), 7, "withdrawal", &ref_id, None) {
                    let _ = ledger.unlock_funds(UserId(user), lock.id);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // The global sum is conserved: transfers are zero-sum and every lock was
    // compensated.
    let total: i64 = ledger.balances().iter().map(|b| b.available_minor).sum();
    assert_eq!(total, 4 * 50_000);
    stop_deadlock_detector(detector);
}
