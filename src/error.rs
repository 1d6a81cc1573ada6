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

//! Error types for ledger operations.

use crate::base::{EntryId, UserId};
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative where a positive amount is required
    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    /// Payout address failed validation for the given chain
    #[error("invalid address '{address}' for chain '{chain}'")]
    InvalidAddress { chain: String, address: String },

    /// Sender and recipient are the same account
    #[error("cannot transfer to self")]
    SelfTransfer,

    /// Debit would drive the available balance negative
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },

    /// No account exists for the user
    #[error("account not found for user {0}")]
    AccountNotFound(UserId),

    /// No deposit session with the given id
    #[error("deposit session not found: {0}")]
    SessionNotFound(String),

    /// No withdrawal with the given id
    #[error("withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    /// Referenced ledger entry does not exist or is not in the expected state
    #[error("ledger entry not found: {0}")]
    EntryNotFound(EntryId),

    /// A duplicate of an in-flight operation was rejected
    #[error("duplicate operation in flight for key '{0}'")]
    DuplicateInFlight(String),

    /// Webhook signature, payload, or payout-rail fault
    #[error("provider error: {0}")]
    Provider(String),

    /// Daily cap would be exceeded
    #[error("daily limit exceeded: limit {limit}, attempted {attempted}")]
    LimitExceeded { limit: i64, attempted: i64 },

    /// Caller lacks the required role
    #[error("forbidden: actor {0} lacks required role")]
    Forbidden(UserId),

    /// Balance arithmetic would overflow
    #[error("balance overflow")]
    BalanceOverflow,
}

impl LedgerError {
    /// Client-safe message that does not leak internal identifiers.
    ///
    /// Provider faults are sanitized because they may embed upstream
    /// response bodies; not-found variants are collapsed so callers cannot
    /// probe for which ids exist.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Provider(_) => "payment provider error".to_string(),
            LedgerError::AccountNotFound(_) => "account not found".to_string(),
            LedgerError::SessionNotFound(_) => "deposit session not found".to_string(),
            LedgerError::WithdrawalNotFound(_) => "withdrawal not found".to_string(),
            LedgerError::EntryNotFound(_) => "ledger entry not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
