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

//! Ledger entries: the append-only record of every balance-affecting event.
//!
//! Entries follow a small state machine:
//! - credits, debits, and transfer legs are appended [`Completed`] and are
//!   immutable from that point on;
//! - a LOCK is appended [`Pending`] while its outcome is uncertain. A failed
//!   settlement completes the lock together with its matching UNLOCK (the pair
//!   nets to zero); a successful settlement cancels the reservation in favour
//!   of the terminal debit entry.
//!
//! The conservation invariant — `available + locked == Σ amount over COMPLETED
//! entries` — holds at every point of that lifecycle and is recomputable from
//! the log alone.
//!
//! [`Pending`]: EntryState::Pending
//! [`Completed`]: EntryState::Completed

use crate::base::{EntryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Balance-affecting event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    Lock,
    Unlock,
    TransferIn,
    TransferOut,
    AdminAdjustment,
    WagerDebit,
    WagerCredit,
}

impl EntryType {
    /// Credit-like types never fail an available-balance check.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            EntryType::Deposit
                | EntryType::Unlock
                | EntryType::TransferIn
                | EntryType::WagerCredit
        )
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
            EntryType::Lock => "lock",
            EntryType::Unlock => "unlock",
            EntryType::TransferIn => "transfer_in",
            EntryType::TransferOut => "transfer_out",
            EntryType::AdminAdjustment => "admin_adjustment",
            EntryType::WagerDebit => "wager_debit",
            EntryType::WagerCredit => "wager_credit",
        };
        write!(f, "{name}")
    }
}

/// Entry lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// One immutable, append-only record of a balance-affecting event.
///
/// `amount_minor` is signed: credits are positive, debits negative. `ref_type`
/// and `ref_id` link the entry to the operation that produced it (a provider
/// event, a withdrawal, a transfer, an admin action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: UserId,
    pub entry_type: EntryType,
    pub amount_minor: i64,
    pub state: EntryState,
    pub ref_type: String,
    pub ref_id: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl LedgerEntry {
    /// Whether this entry counts toward the replayable balance.
    pub fn is_settled(&self) -> bool {
        self.state == EntryState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_types_classified() {
        assert!(EntryType::Deposit.is_credit());
        assert!(EntryType::Unlock.is_credit());
        assert!(EntryType::TransferIn.is_credit());
        assert!(EntryType::WagerCredit.is_credit());
        assert!(!EntryType::Withdrawal.is_credit());
        assert!(!EntryType::Lock.is_credit());
        assert!(!EntryType::TransferOut.is_credit());
        assert!(!EntryType::AdminAdjustment.is_credit());
        assert!(!EntryType::WagerDebit.is_credit());
    }

    #[test]
    fn entry_type_display_is_snake_case() {
        assert_eq!(EntryType::Deposit.to_string(), "deposit");
        assert_eq!(EntryType::TransferOut.to_string(), "transfer_out");
        assert_eq!(EntryType::AdminAdjustment.to_string(), "admin_adjustment");
        assert_eq!(EntryType::WagerDebit.to_string(), "wager_debit");
    }

    #[test]
    fn only_completed_entries_are_settled() {
        let mut entry = LedgerEntry {
            id: EntryId(1),
            account_id: UserId(1),
            entry_type: EntryType::Lock,
            amount_minor: -100,
            state: EntryState::Pending,
            ref_type: "withdrawal".to_string(),
            ref_id: "w-1".to_string(),
            created_at: Utc::now(),
            metadata: None,
        };
        assert!(!entry.is_settled());
        entry.state = EntryState::Completed;
        assert!(entry.is_settled());
        entry.state = EntryState::Cancelled;
        assert!(!entry.is_settled());
    }
}
