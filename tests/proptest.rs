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

//! Property-based tests for the ledger.
//!
//! These verify invariants that must hold for any sequence of operations:
//! conservation (the projection always equals the replayed entry log),
//! non-negative balances, exact lock/unlock symmetry, and zero-sum transfers.

use fc_ledger::{EntryId, EntryType, LedgerStore, TransferEngine, UserId};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// One single-account operation.
#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Debit(i64),
    Lock(i64),
    UnlockOldest,
    SettleOldest,
}

fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=10_000
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_amount().prop_map(Op::Deposit),
        arb_amount().prop_map(Op::Debit),
        arb_amount().prop_map(Op::Lock),
        Just(Op::UnlockOldest),
        Just(Op::SettleOldest),
    ]
}

/// Applies a sequence of operations to one account, tolerating rejections.
fn apply_ops(ledger: &LedgerStore, user: UserId, ops: &[Op]) {
    let mut pending: VecDeque<EntryId> = VecDeque::new();
    for (i, op) in ops.iter().enumerate() {
        let ref_id = format!("op_{i}");
        match op {
            Op::Deposit(amount) => {
                let _ = ledger.credit(user, *amount, EntryType::Deposit, "card", &ref_id, None);
            }
            Op::Debit(amount) => {
                let _ = ledger.debit(user, *amount, EntryType::WagerDebit, "match", &ref_id, None);
            }
            Op::Lock(amount) => {
                if let Ok(entry) = ledger.lock_funds(user, *amount, "withdrawal", &ref_id, None) {
                    pending.push_back(entry.id);
                }
            }
            Op::UnlockOldest => {
                if let Some(id) = pending.pop_front() {
                    ledger.unlock_funds(user, id).unwrap();
                }
            }
            Op::SettleOldest => {
                if let Some(id) = pending.pop_front() {
                    ledger
                        .settle_lock(user, id, EntryType::Withdrawal, None)
                        .unwrap();
                }
            }
        }
    }
}

// =============================================================================
// Conservation and Balance Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The projection always equals the sum of COMPLETED entries, even with
    /// locks left pending.
    #[test]
    fn conservation_holds_for_any_operation_sequence(
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let ledger = LedgerStore::new();
        let user = UserId(1);
        apply_ops(&ledger, user, &ops);

        if ledger.account_exists(user) {
            let balance = ledger.balance(user).unwrap();
            prop_assert_eq!(
                ledger.replay_balance(user).unwrap(),
                balance.available_minor + balance.locked_minor
            );
        }
    }

    /// Available and locked balances never go negative.
    #[test]
    fn balances_never_negative(
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let ledger = LedgerStore::new();
        let user = UserId(1);
        apply_ops(&ledger, user, &ops);

        if ledger.account_exists(user) {
            let balance = ledger.balance(user).unwrap();
            prop_assert!(balance.available_minor >= 0);
            prop_assert!(balance.locked_minor >= 0);
        }
    }

    /// Locking then failing settlement restores available exactly.
    #[test]
    fn lock_unlock_symmetry(
        deposit in arb_amount(),
        lock in arb_amount(),
    ) {
        let ledger = LedgerStore::new();
        let user = UserId(1);
        ledger.credit(user, deposit, EntryType::Deposit, "card", "seed", None).unwrap();

        if let Ok(entry) = ledger.lock_funds(user, lock, "withdrawal", "w", None) {
            ledger.unlock_funds(user, entry.id).unwrap();
        }

        let balance = ledger.balance(user).unwrap();
        prop_assert_eq!(balance.available_minor, deposit);
        prop_assert_eq!(balance.locked_minor, 0);
    }

    /// A settled withdrawal debits exactly the locked amount, once.
    #[test]
    fn lock_settle_debits_exactly_once(
        deposit in arb_amount(),
        lock in arb_amount(),
    ) {
        let ledger = LedgerStore::new();
        let user = UserId(1);
        ledger.credit(user, deposit, EntryType::Deposit, "card", "seed", None).unwrap();

        let locked = match ledger.lock_funds(user, lock, "withdrawal", "w", None) {
            Ok(entry) => {
                ledger.settle_lock(user, entry.id, EntryType::Withdrawal, None).unwrap();
                lock
            }
            Err(_) => 0,
        };

        let balance = ledger.balance(user).unwrap();
        prop_assert_eq!(balance.available_minor, deposit - locked);
        prop_assert_eq!(balance.total_withdrawn_minor, locked);
        prop_assert_eq!(balance.locked_minor, 0);
    }
}

// =============================================================================
// Transfer Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Transfers conserve the combined total and record a zero-sum pair.
    #[test]
    fn transfers_conserve_the_pair_total(
        seed_a in arb_amount(),
        seed_b in arb_amount(),
        amounts in prop::collection::vec(arb_amount(), 1..20),
    ) {
        let ledger = Arc::new(LedgerStore::new());
        ledger.credit(UserId(1), seed_a, EntryType::Deposit, "card", "seed_a", None).unwrap();
        ledger.credit(UserId(2), seed_b, EntryType::Deposit, "card", "seed_b", None).unwrap();
        let transfers = TransferEngine::new(Arc::clone(&ledger));

        for (i, amount) in amounts.iter().enumerate() {
            let (from, to) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
            if let Ok(receipt) = transfers.transfer(UserId(from), UserId(to), *amount, None) {
                prop_assert_eq!(
                    receipt.out_entry.amount_minor + receipt.in_entry.amount_minor,
                    0
                );
            }
        }

        let total = ledger.balance(UserId(1)).unwrap().available_minor
            + ledger.balance(UserId(2)).unwrap().available_minor;
        prop_assert_eq!(total, seed_a + seed_b);
    }
}

// =============================================================================
// Fee Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Fee splits always reassemble to the original amount.
    #[test]
    fn fee_splits_reassemble(amount in arb_amount()) {
        let split = fc_ledger::fees::match_fee(amount);
        prop_assert_eq!(split.fee + split.net, amount);
        prop_assert!(split.fee >= 1);

        let vig = fc_ledger::fees::prop_vig(amount);
        prop_assert_eq!(vig.vig + vig.net, amount);
        prop_assert!(vig.vig >= 1);
    }

    /// Processor fees are monotone in the amount.
    #[test]
    fn processor_fee_is_monotone(a in arb_amount(), b in arb_amount()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            fc_ledger::fees::processor_fee(lo).total <= fc_ledger::fees::processor_fee(hi).total
        );
    }
}
