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

//! The ledger store: single source of truth for balances and entries.
//!
//! Each operation is one atomic unit — the balance delta and the entry append
//! happen under the owning account's mutex, or not at all. Accounts are
//! created lazily on first credit; debits and locks against an unknown account
//! fail with [`LedgerError::AccountNotFound`].
//!
//! Per-account balances are a denormalized projection of the entry log;
//! [`LedgerStore::replay_balance`] recomputes the projection from COMPLETED
//! entries for audit and replay.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`] of [`Arc<Account>`]; operations on different
//! accounts proceed in parallel while all mutations of one account are
//! linearized by its mutex.

use crate::account::{Account, Balance};
use crate::base::{EntryId, UserId};
use crate::entry::{EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Durable per-account balances plus the append-only entry log.
pub struct LedgerStore {
    /// Accounts indexed by user id.
    accounts: DashMap<UserId, Arc<Account>>,
    /// Global entry id counter; ids are unique across accounts.
    next_entry_id: AtomicU64,
}

impl LedgerStore {
    /// Creates an empty store with no accounts or entries.
    pub fn new() -> Self {
        LedgerStore {
            accounts: DashMap::new(),
            next_entry_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> EntryId {
        EntryId(self.next_entry_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Fetches an account handle, creating the account if `create` is set.
    ///
    /// The handle is cloned out of the map so no map shard lock is held while
    /// the account mutex is taken.
    fn account(&self, user_id: UserId, create: bool) -> LedgerResult<Arc<Account>> {
        if create {
            Ok(Arc::clone(
                &self
                    .accounts
                    .entry(user_id)
                    .or_insert_with(|| Arc::new(Account::new(user_id))),
            ))
        } else {
            self.accounts
                .get(&user_id)
                .map(|a| Arc::clone(a.value()))
                .ok_or(LedgerError::AccountNotFound(user_id))
        }
    }

    pub(crate) fn existing_account(&self, user_id: UserId) -> LedgerResult<Arc<Account>> {
        self.account(user_id, false)
    }

    /// Returns the projected balance for a user.
    pub fn balance(&self, user_id: UserId) -> LedgerResult<Balance> {
        Ok(self.account(user_id, false)?.balance())
    }

    /// Whether an account exists for the user.
    pub fn account_exists(&self, user_id: UserId) -> bool {
        self.accounts.contains_key(&user_id)
    }

    /// Credits `amount` to the user, creating the account on first credit.
    ///
    /// `entry_type` must be a credit-like type ([`EntryType::is_credit`]) or
    /// an ADMIN_ADJUSTMENT.
    pub fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        entry_type: EntryType,
        ref_type: &str,
        ref_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        debug_assert!(
            entry_type.is_credit() || entry_type == EntryType::AdminAdjustment,
            "credit takes a credit-like entry type, got {entry_type}"
        );
        let account = self.account(user_id, true)?;
        let entry = account
            .lock_data()
            .credit(self.next_id(), entry_type, amount, ref_type, ref_id, metadata)?;
        debug!(user = %user_id, amount, %entry_type, ref_id, "credited");
        Ok(entry)
    }

    /// Debits `amount` from the user's available balance.
    pub fn debit(
        &self,
        user_id: UserId,
        amount: i64,
        entry_type: EntryType,
        ref_type: &str,
        ref_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        let account = self.account(user_id, false)?;
        let entry = account
            .lock_data()
            .debit(self.next_id(), entry_type, amount, ref_type, ref_id, metadata)?;
        debug!(user = %user_id, amount, %entry_type, ref_id, "debited");
        Ok(entry)
    }

    /// Moves `amount` from available to locked, pending an uncertain outcome.
    ///
    /// When `daily_cap` is given, today's withdrawal volume plus `amount` must
    /// not exceed it; the aggregate is read inside the same critical section
    /// as the lock append, so concurrent requests cannot both pass the check.
    pub fn lock_funds(
        &self,
        user_id: UserId,
        amount: i64,
        ref_type: &str,
        ref_id: &str,
        daily_cap: Option<i64>,
    ) -> LedgerResult<LedgerEntry> {
        let account = self.account(user_id, false)?;
        let entry = account
            .lock_data()
            .lock(self.next_id(), amount, ref_type, ref_id, daily_cap)?;
        debug!(user = %user_id, amount, ref_id, "locked funds");
        Ok(entry)
    }

    /// Releases a pending lock, restoring available to its pre-lock value.
    pub fn unlock_funds(&self, user_id: UserId, lock_entry_id: EntryId) -> LedgerResult<LedgerEntry> {
        let account = self.account(user_id, false)?;
        let entry = account.lock_data().unlock(self.next_id(), lock_entry_id)?;
        debug!(user = %user_id, lock = %lock_entry_id, "unlocked funds");
        Ok(entry)
    }

    /// Converts a pending lock into a permanent debit.
    ///
    /// `entry_type` must be [`EntryType::Withdrawal`] or
    /// [`EntryType::WagerDebit`]; the terminal entry is the COMPLETED record
    /// of the movement and the reservation is cancelled.
    pub fn settle_lock(
        &self,
        user_id: UserId,
        lock_entry_id: EntryId,
        entry_type: EntryType,
        metadata: Option<serde_json::Value>,
    ) -> LedgerResult<LedgerEntry> {
        debug_assert!(
            matches!(entry_type, EntryType::Withdrawal | EntryType::WagerDebit),
            "settle_lock takes a terminal debit type, got {entry_type}"
        );
        let account = self.account(user_id, false)?;
        let entry = account
            .lock_data()
            .settle(self.next_id(), lock_entry_id, entry_type, metadata)?;
        debug!(user = %user_id, lock = %lock_entry_id, %entry_type, "settled lock");
        Ok(entry)
    }

    /// Returns a copy of the user's entries, in append order.
    pub fn entries(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>> {
        let account = self.account(user_id, false)?;
        let data = account.lock_data();
        Ok(data.entries().to_vec())
    }

    /// Recomputes `available + locked` from COMPLETED entries.
    ///
    /// The result must always equal the projected balance; a divergence means
    /// the log and the projection have drifted and is reported loudly.
    pub fn replay_balance(&self, user_id: UserId) -> LedgerResult<i64> {
        let account = self.account(user_id, false)?;
        let data = account.lock_data();
        let replayed = data.completed_sum();
        let projected = data.balance();
        if replayed != projected.available_minor + projected.locked_minor {
            warn!(
                user = %user_id,
                replayed,
                available = projected.available_minor,
                locked = projected.locked_minor,
                "entry log diverged from projected balance"
            );
        }
        Ok(replayed)
    }

    /// Snapshot of every account's balance, for reports.
    pub fn balances(&self) -> Vec<Balance> {
        self.accounts.iter().map(|r| r.value().balance()).collect()
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
