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

//! Atomic two-sided transfers between users.
//!
//! The engine is the only component that holds two account mutexes at once.
//! Mutexes are always taken in ascending user-id order, so two concurrent
//! transfers between the same pair cannot deadlock. All validation happens
//! before the first mutation; either both entries of the pair persist or
//! neither does.

use crate::base::UserId;
use crate::entry::{EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerStore;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The matched entry pair recorded for one transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub out_entry: LedgerEntry,
    pub in_entry: LedgerEntry,
}

/// Moves funds between two users as one atomic unit.
pub struct TransferEngine {
    ledger: Arc<LedgerStore>,
}

impl TransferEngine {
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Transfers `amount_minor` from `from` to `to`.
    ///
    /// Rejects self-transfers, unknown accounts on either side, and amounts
    /// exceeding the sender's available balance. The TRANSFER_OUT and
    /// TRANSFER_IN entries share one transfer id and sum to zero.
    pub fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount_minor: i64,
        note: Option<&str>,
    ) -> LedgerResult<TransferReceipt> {
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }
        if amount_minor <= 0 {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }
        // Recipients are never created implicitly: crediting a mistyped id
        // would strand the funds.
        let sender = self.ledger.existing_account(from)?;
        let recipient = self.ledger.existing_account(to)?;

        let transfer_id = Uuid::new_v4();
        let metadata = note.map(|n| json!({ "note": n }));

        // Both mutexes are taken in ascending user-id order; the handles were
        // cloned out of the map, so no map shard lock is held here.
        let (mut sender_data, mut recipient_data) = if from < to {
            let sender_data = sender.lock_data();
            let recipient_data = recipient.lock_data();
            (sender_data, recipient_data)
        } else {
            let recipient_data = recipient.lock_data();
            let sender_data = sender.lock_data();
            (sender_data, recipient_data)
        };

        // Validate the credit side before mutating the debit side, so a
        // failure cannot leave the pair half-applied.
        if recipient_data
            .balance()
            .available_minor
            .checked_add(amount_minor)
            .is_none()
        {
            return Err(LedgerError::BalanceOverflow);
        }

        let out_entry = sender_data.debit(
            self.ledger.next_id(),
            EntryType::TransferOut,
            amount_minor,
            "transfer",
            &transfer_id.to_string(),
            metadata.clone(),
        )?;
        let in_entry = recipient_data.credit(
            self.ledger.next_id(),
            EntryType::TransferIn,
            amount_minor,
            "transfer",
            &transfer_id.to_string(),
            metadata,
        )?;

        info!(%from, %to, amount_minor, %transfer_id, "transfer applied");
        Ok(TransferReceipt {
            transfer_id,
            out_entry,
            in_entry,
        })
    }
}
