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

//! # FC Ledger
//!
//! The wallet ledger and money-movement core: tracks user balances in
//! FlockNode Credits (integer minor units), credits deposits, locks and
//! settles withdrawals, executes inter-user transfers, and applies audited
//! administrative adjustments. Externally triggered events (payment webhooks,
//! payout confirmations) are applied exactly once; client-retried requests
//! are idempotent.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: balances plus the append-only entry log; every mutation
//!   is atomic per account
//! - [`DepositSessionManager`] and [`WebhookProcessor`]: provider checkout
//!   sessions and exactly-once crediting
//! - [`WithdrawalWorkflow`]: lock → payout → settle/fail state machine with a
//!   background settlement worker
//! - [`TransferEngine`]: atomic two-sided transfers
//! - [`AdminAdjustmentService`]: role-gated adjustments with an audit trail
//! - [`IdempotencyGuard`]: operation dedup with a bounded TTL
//! - [`fees`]: pure integer fee calculations
//!
//! ## Example
//!
//! ```
//! use fc_ledger::{EntryType, LedgerStore, TransferEngine, UserId};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(LedgerStore::new());
//!
//! // Credit a deposit; the account is created lazily.
//! ledger
//!     .credit(UserId(1), 5_000, EntryType::Deposit, "card", "evt_1", None)
//!     .unwrap();
//! ledger
//!     .credit(UserId(2), 1_000, EntryType::Deposit, "card", "evt_2", None)
//!     .unwrap();
//!
//! // Move funds between users as one atomic unit.
//! let transfers = TransferEngine::new(Arc::clone(&ledger));
//! transfers.transfer(UserId(1), UserId(2), 2_000, Some("settle up")).unwrap();
//!
//! assert_eq!(ledger.balance(UserId(1)).unwrap().available_minor, 3_000);
//! assert_eq!(ledger.balance(UserId(2)).unwrap().available_minor, 3_000);
//!
//! // The projection is recomputable from the entry log.
//! assert_eq!(ledger.replay_balance(UserId(1)).unwrap(), 3_000);
//! ```
//!
//! ## Thread Safety
//!
//! Accounts are serialized individually: all ledger-affecting operations on
//! one account are linearized by its mutex while operations on different
//! accounts run in parallel. [`TransferEngine`] is the only two-account
//! holder and takes mutexes in ascending user-id order.

pub mod account;
pub mod admin;
mod base;
pub mod config;
pub mod deposit;
pub mod entry;
pub mod error;
pub mod fees;
pub mod idempotency;
mod ledger;
pub mod providers;
mod transfer;
pub mod webhook;
pub mod withdrawal;

pub use account::Balance;
pub use admin::{Actor, AdminAdjustmentService, AuditLog, AuditRecord, Role};
pub use base::{EntryId, UserId};
pub use config::LedgerConfig;
pub use deposit::{DepositSession, DepositSessionManager, DepositSessionState};
pub use entry::{EntryState, EntryType, LedgerEntry};
pub use error::{LedgerError, LedgerResult};
pub use idempotency::{Begin, IdempotencyGuard};
pub use ledger::LedgerStore;
pub use providers::{CheckoutSession, PaymentProvider, ProviderKind, ProviderRegistry};
pub use transfer::{TransferEngine, TransferReceipt};
pub use webhook::{WebhookOutcome, WebhookProcessor};
pub use withdrawal::{
    PayoutRail, PayoutStatus, Withdrawal, WithdrawalNotice, WithdrawalState, WithdrawalWorkflow,
};
