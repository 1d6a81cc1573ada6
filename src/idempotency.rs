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

//! Operation deduplication keyed by caller-supplied tokens.
//!
//! A caller brackets a side-effecting operation with [`begin`] and
//! [`complete`]/[`fail`]. Re-running a DONE key returns the stored result
//! instead of re-executing; a concurrent duplicate of an in-flight key is
//! rejected. Records expire after a bounded TTL, after which a retried key is
//! treated as new — retries older than the TTL re-execute.
//!
//! [`begin`]: IdempotencyGuard::begin
//! [`complete`]: IdempotencyGuard::complete
//! [`fail`]: IdempotencyGuard::fail

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// Record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Done,
}

/// Stored state for one idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    pub result: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of [`IdempotencyGuard::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum Begin {
    /// First time this key is seen (or its prior record expired); the caller
    /// must execute the operation and finish with `complete` or `fail`.
    New,
    /// The operation already ran; the caller must return this result
    /// unchanged instead of re-executing.
    Replayed(serde_json::Value),
}

/// Deduplicates operations by key with a bounded TTL.
#[derive(Debug)]
pub struct IdempotencyGuard {
    records: DashMap<String, IdempotencyRecord>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Claims a key for execution.
    ///
    /// Uses the map's entry API so check-and-claim is atomic: two concurrent
    /// callers with the same key cannot both observe it as new.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateInFlight`] when the key is claimed by an
    /// operation that has not yet completed or failed.
    pub fn begin(&self, key: &str) -> LedgerResult<Begin> {
        let now = Utc::now();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    // Expired: the retry runs as a fresh operation.
                    occupied.insert(self.in_progress_record(now));
                    return Ok(Begin::New);
                }
                match occupied.get().status {
                    IdempotencyStatus::Done => Ok(Begin::Replayed(
                        occupied
                            .get()
                            .result
                            .clone()
                            .unwrap_or(serde_json::Value::Null),
                    )),
                    IdempotencyStatus::InProgress => {
                        Err(LedgerError::DuplicateInFlight(key.to_string()))
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.in_progress_record(now));
                Ok(Begin::New)
            }
        }
    }

    fn in_progress_record(&self, now: DateTime<Utc>) -> IdempotencyRecord {
        IdempotencyRecord {
            status: IdempotencyStatus::InProgress,
            result: None,
            expires_at: now + self.ttl,
        }
    }

    /// Finalizes a key with the operation's durable result.
    pub fn complete(&self, key: &str, result: serde_json::Value) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.status = IdempotencyStatus::Done;
            record.result = Some(result);
        }
    }

    /// Releases a key after a failed operation so a retry can run.
    pub fn fail(&self, key: &str) {
        self.records.remove(key);
    }

    /// Drops expired records to bound storage.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.records.retain(|_, record| record.expires_at > now);
    }

    #[cfg(test)]
    fn force_expire(&self, key: &str) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}
