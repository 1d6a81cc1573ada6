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

//! Account state and the primitive balance operations.
//!
//! Every mutation validates first and only then touches state, so a rejected
//! operation leaves the account byte-for-byte unchanged. All mutations on one
//! account are serialized by the [`parking_lot::Mutex`] inside [`Account`].

use crate::base::{EntryId, UserId};
use crate::entry::{EntryState, EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

/// Point-in-time balance snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub user_id: UserId,
    pub available_minor: i64,
    pub locked_minor: i64,
    pub total_deposited_minor: i64,
    pub total_withdrawn_minor: i64,
}

#[derive(Debug)]
pub(crate) struct AccountData {
    user_id: UserId,
    available_minor: i64,
    locked_minor: i64,
    total_deposited_minor: i64,
    total_withdrawn_minor: i64,
    /// This account's slice of the append-only entry log.
    entries: Vec<LedgerEntry>,
}

impl AccountData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            available_minor: 0,
            locked_minor: 0,
            total_deposited_minor: 0,
            total_withdrawn_minor: 0,
            entries: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available_minor >= 0,
            "Invariant violated: available balance went negative: {}",
            self.available_minor
        );
        debug_assert!(
            self.locked_minor >= 0,
            "Invariant violated: locked balance went negative: {}",
            self.locked_minor
        );
        debug_assert_eq!(
            self.available_minor + self.locked_minor,
            self.completed_sum(),
            "Invariant violated: projected balance diverged from the entry log"
        );
    }

    pub(crate) fn balance(&self) -> Balance {
        Balance {
            user_id: self.user_id,
            available_minor: self.available_minor,
            locked_minor: self.locked_minor,
            total_deposited_minor: self.total_deposited_minor,
            total_withdrawn_minor: self.total_withdrawn_minor,
        }
    }

    pub(crate) fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Sum of COMPLETED entry amounts: the replayable balance.
    pub(crate) fn completed_sum(&self) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.is_settled())
            .map(|e| e.amount_minor)
            .sum()
    }

    /// Today's net withdrawal lock volume (locks minus compensating unlocks),
    /// used for the daily cap. A failed, fully-compensated withdrawal releases
    /// its share of the cap.
    pub(crate) fn withdrawal_volume_today(&self, now: DateTime<Utc>) -> i64 {
        let today = now.date_naive();
        self.entries
            .iter()
            .filter(|e| e.ref_type == "withdrawal" && e.created_at.date_naive() == today)
            .map(|e| match e.entry_type {
                // A lock consumes cap (+amount), its unlock releases it.
                EntryType::Lock | EntryType::Unlock => -e.amount_minor,
                _ => 0,
            })
            .sum()
    }

    fn push_entry(
        &mut self,
        id: EntryId,
        entry_type: EntryType,
        amount_minor: i64,
        state: EntryState,
        ref_type: &str,
        ref_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id,
            account_id: self.user_id,
            entry_type,
            amount_minor,
            state,
            ref_type: ref_type.to_string(),
            ref_id: ref_id.to_string(),
            created_at: Utc::now(),
            metadata,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Increases the available balance and appends a COMPLETED credit entry.
    pub(crate) fn credit(
        &mut self,
        id: EntryId,
        entry_type: EntryType,
        amount: i64,
        ref_type: &str,
        ref_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let new_available = self
            .available_minor
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;

        self.available_minor = new_available;
        if entry_type == EntryType::Deposit {
            self.total_deposited_minor += amount;
        }
        let entry = self.push_entry(
            id,
            entry_type,
            amount,
            EntryState::Completed,
            ref_type,
            ref_id,
            metadata,
        );
        self.assert_invariants();
        Ok(entry)
    }

    /// Decreases the available balance and appends a COMPLETED debit entry.
    pub(crate) fn debit(
        &mut self,
        id: EntryId,
        entry_type: EntryType,
        amount: i64,
        ref_type: &str,
        ref_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.available_minor < amount {
            return Err(LedgerError::InsufficientBalance {
                available: self.available_minor,
                required: amount,
            });
        }
        self.available_minor -= amount;
        if entry_type == EntryType::Withdrawal {
            self.total_withdrawn_minor += amount;
        }
        let entry = self.push_entry(
            id,
            entry_type,
            -amount,
            EntryState::Completed,
            ref_type,
            ref_id,
            metadata,
        );
        self.assert_invariants();
        Ok(entry)
    }

    /// Moves funds from available to locked and appends a PENDING lock entry.
    ///
    /// `daily_cap`, when present, is evaluated here — inside the same critical
    /// section as the mutation it gates.
    pub(crate) fn lock(
        &mut self,
        id: EntryId,
        amount: i64,
        ref_type: &str,
        ref_id: &str,
        daily_cap: Option<i64>,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.available_minor < amount {
            return Err(LedgerError::InsufficientBalance {
                available: self.available_minor,
                required: amount,
            });
        }
        if let Some(cap) = daily_cap {
            let attempted = self.withdrawal_volume_today(Utc::now()) + amount;
            if attempted > cap {
                return Err(LedgerError::LimitExceeded {
                    limit: cap,
                    attempted,
                });
            }
        }
        self.available_minor -= amount;
        self.locked_minor += amount;
        let entry = self.push_entry(
            id,
            EntryType::Lock,
            -amount,
            EntryState::Pending,
            ref_type,
            ref_id,
            None,
        );
        self.assert_invariants();
        Ok(entry)
    }

    fn pending_lock_index(&self, lock_entry_id: EntryId) -> LedgerResult<usize> {
        self.entries
            .iter()
            .rposition(|e| {
                e.id == lock_entry_id
                    && e.entry_type == EntryType::Lock
                    && e.state == EntryState::Pending
            })
            .ok_or(LedgerError::EntryNotFound(lock_entry_id))
    }

    /// Releases a pending lock, restoring the available balance exactly.
    ///
    /// The lock completes together with its matching UNLOCK entry; the pair
    /// nets to zero in the replayable balance.
    pub(crate) fn unlock(&mut self, unlock_id: EntryId, lock_entry_id: EntryId) -> LedgerResult<LedgerEntry> {
        let idx = self.pending_lock_index(lock_entry_id)?;
        let amount = -self.entries[idx].amount_minor;
        let (ref_type, ref_id) = (
            self.entries[idx].ref_type.clone(),
            self.entries[idx].ref_id.clone(),
        );

        self.locked_minor -= amount;
        self.available_minor += amount;
        self.entries[idx].state = EntryState::Completed;
        let entry = self.push_entry(
            unlock_id,
            EntryType::Unlock,
            amount,
            EntryState::Completed,
            &ref_type,
            &ref_id,
            None,
        );
        self.assert_invariants();
        Ok(entry)
    }

    /// Converts a pending lock into a permanent debit.
    ///
    /// The reservation is cancelled and the terminal entry (WITHDRAWAL or
    /// WAGER_DEBIT) becomes the COMPLETED record of the movement.
    pub(crate) fn settle(
        &mut self,
        debit_id: EntryId,
        lock_entry_id: EntryId,
        entry_type: EntryType,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        let idx = self.pending_lock_index(lock_entry_id)?;
        let amount = -self.entries[idx].amount_minor;
        let (ref_type, ref_id) = (
            self.entries[idx].ref_type.clone(),
            self.entries[idx].ref_id.clone(),
        );

        self.locked_minor -= amount;
        self.entries[idx].state = EntryState::Cancelled;
        if entry_type == EntryType::Withdrawal {
            self.total_withdrawn_minor += amount;
        }
        let entry = self.push_entry(
            debit_id,
            entry_type,
            -amount,
            EntryState::Completed,
            &ref_type,
            &ref_id,
            metadata,
        );
        self.assert_invariants();
        Ok(entry)
    }
}

/// Ledger account: per-account state behind a mutex.
///
/// The mutex is the unit of mutual exclusion for all money movement touching
/// this account; [`LedgerStore`](crate::LedgerStore) and
/// [`TransferEngine`](crate::TransferEngine) never mutate outside it.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user_id)),
        }
    }

    pub fn balance(&self) -> Balance {
        self.inner.lock().balance()
    }

    pub fn available_minor(&self) -> i64 {
        self.inner.lock().balance().available_minor
    }

    pub fn locked_minor(&self) -> i64 {
        self.inner.lock().balance().locked_minor
    }

    pub(crate) fn lock_data(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}
