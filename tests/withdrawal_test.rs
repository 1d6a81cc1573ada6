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

//! Withdrawal workflow integration tests.

use fc_ledger::{
    EntryType, LedgerConfig, LedgerError, LedgerResult, LedgerStore, PayoutRail, PayoutStatus,
    UserId, WithdrawalState, WithdrawalWorkflow,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Payout rail double: fails the first `failures` sends, then succeeds.
struct ScriptedRail {
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedRail {
    fn succeeding() -> Self {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PayoutRail for ScriptedRail {
    fn send_transaction(
        &self,
        chain: &str,
        _to_address: &str,
        _amount_minor: i64,
    ) -> LedgerResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(LedgerError::Provider("rail unavailable".to_string()))
        } else {
            Ok(format!("0x{chain}{call:08x}"))
        }
    }

    fn transaction_status(&self, _tx_hash: &str, _chain: &str) -> LedgerResult<PayoutStatus> {
        Ok(PayoutStatus::Confirmed)
    }

    fn validate_address(&self, address: &str, _chain: &str) -> bool {
        address.len() >= 8
    }
}

fn workflow_with(rail: Arc<ScriptedRail>, config: LedgerConfig) -> (Arc<WithdrawalWorkflow>, Arc<LedgerStore>) {
    let ledger = Arc::new(LedgerStore::new());
    ledger
        .credit(UserId(1), 1000, EntryType::Deposit, "card", "evt_1", None)
        .unwrap();
    let workflow = Arc::new(WithdrawalWorkflow::new(Arc::clone(&ledger), rail, config));
    (workflow, ledger)
}

#[test]
fn successful_withdrawal_settles_the_lock() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, ledger) = workflow_with(Arc::clone(&rail), LedgerConfig::default());

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    assert_eq!(withdrawal.state, WithdrawalState::Pending);

    // Request path stops at the lock.
    let balance = ledger.balance(UserId(1)).unwrap();
    assert_eq!(balance.available_minor, 600);
    assert_eq!(balance.locked_minor, 400);

    let settled = workflow.settle(withdrawal.id).unwrap();
    assert_eq!(settled.state, WithdrawalState::Completed);
    assert!(settled.tx_hash.is_some());
    assert_eq!(settled.attempts, 1);

    let balance = ledger.balance(UserId(1)).unwrap();
    assert_eq!(balance.available_minor, 600);
    assert_eq!(balance.locked_minor, 0);
    assert_eq!(balance.total_withdrawn_minor, 400);
}

#[test]
fn failed_payout_dead_letters_and_restores_balance() {
    let rail = Arc::new(ScriptedRail::failing(u32::MAX));
    let (workflow, ledger) = workflow_with(Arc::clone(&rail), LedgerConfig::default());

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    let settled = workflow.settle(withdrawal.id).unwrap();

    assert_eq!(settled.state, WithdrawalState::Failed);
    assert_eq!(settled.tx_hash, None);
    assert_eq!(
        rail.call_count(),
        LedgerConfig::default().max_settlement_attempts
    );

    // Funds restored exactly; nothing stuck in locked.
    let balance = ledger.balance(UserId(1)).unwrap();
    assert_eq!(balance.available_minor, 1000);
    assert_eq!(balance.locked_minor, 0);
    assert_eq!(balance.total_withdrawn_minor, 0);
    assert_eq!(ledger.replay_balance(UserId(1)).unwrap(), 1000);
}

#[test]
fn transient_failures_are_retried() {
    let rail = Arc::new(ScriptedRail::failing(2));
    let config = LedgerConfig {
        max_settlement_attempts: 3,
        ..LedgerConfig::default()
    };
    let (workflow, ledger) = workflow_with(Arc::clone(&rail), config);

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    let settled = workflow.settle(withdrawal.id).unwrap();

    assert_eq!(settled.state, WithdrawalState::Completed);
    assert_eq!(settled.attempts, 3);
    assert_eq!(rail.call_count(), 3);
    assert_eq!(ledger.balance(UserId(1)).unwrap().total_withdrawn_minor, 400);
}

#[test]
fn settle_is_idempotent() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, ledger) = workflow_with(Arc::clone(&rail), LedgerConfig::default());

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    workflow.settle(withdrawal.id).unwrap();
    let again = workflow.settle(withdrawal.id).unwrap();

    assert_eq!(again.state, WithdrawalState::Completed);
    assert_eq!(rail.call_count(), 1, "a settled withdrawal must not resend");
    assert_eq!(ledger.balance(UserId(1)).unwrap().total_withdrawn_minor, 400);
}

#[test]
fn invalid_address_is_rejected_before_locking() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, ledger) = workflow_with(rail, LedgerConfig::default());

    let err = workflow
        .request_withdrawal(UserId(1), "polygon", "xyz", 400)
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InvalidAddress {
            chain: "polygon".to_string(),
            address: "xyz".to_string(),
        }
    );
    assert_eq!(ledger.balance(UserId(1)).unwrap().locked_minor, 0);
    assert_eq!(ledger.entries(UserId(1)).unwrap().len(), 1);
}

#[test]
fn insufficient_balance_is_rejected_without_entries() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, ledger) = workflow_with(rail, LedgerConfig::default());

    let err = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 5000)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(ledger.entries(UserId(1)).unwrap().len(), 1);
}

#[test]
fn daily_cap_applies_to_withdrawal_requests() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let config = LedgerConfig {
        daily_withdrawal_cap_minor: 500,
        ..LedgerConfig::default()
    };
    let (workflow, ledger) = workflow_with(rail, config);

    workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 300)
        .unwrap();
    let err = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 300)
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::LimitExceeded {
            limit: 500,
            attempted: 600
        }
    );
    assert_eq!(ledger.balance(UserId(1)).unwrap().locked_minor, 300);
}

#[test]
fn dead_lettered_withdrawal_releases_its_cap_share() {
    let rail = Arc::new(ScriptedRail::failing(u32::MAX));
    let config = LedgerConfig {
        daily_withdrawal_cap_minor: 500,
        max_settlement_attempts: 1,
        ..LedgerConfig::default()
    };
    let (workflow, _ledger) = workflow_with(Arc::clone(&rail), config);

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    workflow.settle(withdrawal.id).unwrap();

    // The failed attempt was compensated, so the cap is free again.
    workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
}

#[test]
fn worker_settles_in_background() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, ledger) = workflow_with(rail, LedgerConfig::default());
    let completions = workflow.completions();
    let worker = workflow.spawn_worker();

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();

    let notice = completions
        .recv_timeout(Duration::from_secs(5))
        .expect("worker must publish a terminal notice");
    assert_eq!(notice.id, withdrawal.id);
    assert_eq!(notice.state, WithdrawalState::Completed);

    assert_eq!(
        workflow.withdrawal(withdrawal.id).unwrap().state,
        WithdrawalState::Completed
    );
    assert_eq!(ledger.balance(UserId(1)).unwrap().total_withdrawn_minor, 400);

    workflow.shutdown();
    worker.join().unwrap();
}

#[test]
fn unknown_withdrawal_lookup_errors() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, _) = workflow_with(rail, LedgerConfig::default());
    assert!(matches!(
        workflow.withdrawal(uuid::Uuid::new_v4()),
        Err(LedgerError::WithdrawalNotFound(_))
    ));
}

#[test]
fn rail_status_is_queryable_after_settlement() {
    let rail = Arc::new(ScriptedRail::succeeding());
    let (workflow, _) = workflow_with(Arc::clone(&rail), LedgerConfig::default());

    let withdrawal = workflow
        .request_withdrawal(UserId(1), "polygon", "0xabcdef99", 400)
        .unwrap();
    let settled = workflow.settle(withdrawal.id).unwrap();
    let tx_hash = settled.tx_hash.unwrap();

    assert_eq!(
        rail.transaction_status(&tx_hash, "polygon").unwrap(),
        PayoutStatus::Confirmed
    );
}
