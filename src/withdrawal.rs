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

//! Withdrawal workflow.
//!
//! State machine: `PENDING → PROCESSING → {COMPLETED | FAILED}` (terminal).
//!
//! The request path is synchronous up to the LOCK: funds move from available
//! to locked and the call returns. The payout-rail call happens off the
//! request path on the settlement worker, with a bounded retry policy. On
//! success the lock converts into a permanent WITHDRAWAL debit; on exhausted
//! retries the withdrawal dead-letters as FAILED and the funds unlock,
//! restoring the available balance to its pre-lock value exactly. Callers
//! observe the terminal state by polling [`WithdrawalWorkflow::withdrawal`]
//! or through the completion channel.

use crate::base::{EntryId, UserId};
use crate::config::LedgerConfig;
use crate::entry::EntryType;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerStore;
use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Withdrawal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One withdrawal request and its settlement progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: UserId,
    pub chain: String,
    pub address: String,
    pub amount_minor: i64,
    pub state: WithdrawalState,
    pub tx_hash: Option<String>,
    pub lock_entry_id: EntryId,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Payout transaction status as reported by the rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Confirmed,
    Failed,
}

/// External payout rail (blockchain network) seam.
pub trait PayoutRail: Send + Sync {
    /// Submits a transfer and returns its transaction hash.
    fn send_transaction(
        &self,
        chain: &str,
        to_address: &str,
        amount_minor: i64,
    ) -> LedgerResult<String>;

    fn transaction_status(&self, tx_hash: &str, chain: &str) -> LedgerResult<PayoutStatus>;

    fn validate_address(&self, address: &str, chain: &str) -> bool;
}

/// Terminal-state notification published on the completion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalNotice {
    pub id: Uuid,
    pub state: WithdrawalState,
    pub tx_hash: Option<String>,
}

enum Job {
    Settle(Uuid),
    Shutdown,
}

/// Drives withdrawals from request through settlement.
pub struct WithdrawalWorkflow {
    ledger: Arc<LedgerStore>,
    rail: Arc<dyn PayoutRail>,
    withdrawals: DashMap<Uuid, Withdrawal>,
    jobs: Sender<Job>,
    job_queue: Receiver<Job>,
    notices: Sender<WithdrawalNotice>,
    notice_queue: Receiver<WithdrawalNotice>,
    config: LedgerConfig,
}

impl WithdrawalWorkflow {
    pub fn new(ledger: Arc<LedgerStore>, rail: Arc<dyn PayoutRail>, config: LedgerConfig) -> Self {
        let (jobs, job_queue) = unbounded();
        let (notices, notice_queue) = unbounded();
        Self {
            ledger,
            rail,
            withdrawals: DashMap::new(),
            jobs,
            job_queue,
            notices,
            notice_queue,
            config,
        }
    }

    /// Channel carrying terminal-state notifications, for callers that prefer
    /// push over polling.
    pub fn completions(&self) -> Receiver<WithdrawalNotice> {
        self.notice_queue.clone()
    }

    /// Locks the funds and records a PENDING withdrawal; settlement happens
    /// off the request path.
    ///
    /// The daily withdrawal cap is evaluated atomically with the LOCK append.
    pub fn request_withdrawal(
        &self,
        user_id: UserId,
        chain: &str,
        address: &str,
        amount_minor: i64,
    ) -> LedgerResult<Withdrawal> {
        if amount_minor <= 0 {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }
        if !self.rail.validate_address(address, chain) {
            return Err(LedgerError::InvalidAddress {
                chain: chain.to_string(),
                address: address.to_string(),
            });
        }

        let id = Uuid::new_v4();
        let lock = self.ledger.lock_funds(
            user_id,
            amount_minor,
            "withdrawal",
            &id.to_string(),
            Some(self.config.daily_withdrawal_cap_minor),
        )?;

        let withdrawal = Withdrawal {
            id,
            user_id,
            chain: chain.to_string(),
            address: address.to_string(),
            amount_minor,
            state: WithdrawalState::Pending,
            tx_hash: None,
            lock_entry_id: lock.id,
            attempts: 0,
            created_at: Utc::now(),
        };
        self.withdrawals.insert(id, withdrawal.clone());
        info!(user = %user_id, %id, amount_minor, chain, "withdrawal requested");

        if self.jobs.send(Job::Settle(id)).is_err() {
            // No worker is attached; settlement must be driven explicitly.
            warn!(%id, "settlement queue closed, withdrawal awaits manual settle");
        }
        Ok(withdrawal)
    }

    /// Looks up a withdrawal by id.
    pub fn withdrawal(&self, id: Uuid) -> LedgerResult<Withdrawal> {
        self.withdrawals
            .get(&id)
            .map(|w| w.clone())
            .ok_or_else(|| LedgerError::WithdrawalNotFound(id.to_string()))
    }

    /// Runs settlement for one withdrawal to a terminal state.
    ///
    /// Idempotent: a withdrawal that already left PENDING is returned as-is,
    /// so a redelivered job cannot double-settle.
    pub fn settle(&self, id: Uuid) -> LedgerResult<Withdrawal> {
        let (user_id, chain, address, amount_minor, lock_entry_id) = {
            let mut w = self
                .withdrawals
                .get_mut(&id)
                .ok_or_else(|| LedgerError::WithdrawalNotFound(id.to_string()))?;
            if w.state != WithdrawalState::Pending {
                return Ok(w.clone());
            }
            w.state = WithdrawalState::Processing;
            (
                w.user_id,
                w.chain.clone(),
                w.address.clone(),
                w.amount_minor,
                w.lock_entry_id,
            )
        };

        let max_attempts = self.config.max_settlement_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.rail.send_transaction(&chain, &address, amount_minor) {
                Ok(tx_hash) => {
                    return self.complete(id, user_id, lock_entry_id, tx_hash, attempt);
                }
                Err(err) => {
                    warn!(%id, attempt, max_attempts, %err, "payout attempt failed");
                    if attempt < max_attempts {
                        std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                    }
                }
            }
        }
        self.dead_letter(id, user_id, lock_entry_id, max_attempts)
    }

    fn complete(
        &self,
        id: Uuid,
        user_id: UserId,
        lock_entry_id: EntryId,
        tx_hash: String,
        attempts: u32,
    ) -> LedgerResult<Withdrawal> {
        self.ledger.settle_lock(
            user_id,
            lock_entry_id,
            EntryType::Withdrawal,
            Some(json!({ "tx_hash": tx_hash })),
        )?;
        let updated = {
            let mut w = self
                .withdrawals
                .get_mut(&id)
                .ok_or_else(|| LedgerError::WithdrawalNotFound(id.to_string()))?;
            w.state = WithdrawalState::Completed;
            w.tx_hash = Some(tx_hash);
            w.attempts = attempts;
            w.clone()
        };
        info!(%id, user = %user_id, tx = ?updated.tx_hash, "withdrawal completed");
        let _ = self.notices.send(WithdrawalNotice {
            id,
            state: WithdrawalState::Completed,
            tx_hash: updated.tx_hash.clone(),
        });
        Ok(updated)
    }

    fn dead_letter(
        &self,
        id: Uuid,
        user_id: UserId,
        lock_entry_id: EntryId,
        attempts: u32,
    ) -> LedgerResult<Withdrawal> {
        // The compensating unlock must land; a failure here would strand
        // locked funds and is reported as loudly as possible.
        if let Err(err) = self.ledger.unlock_funds(user_id, lock_entry_id) {
            error!(%id, user = %user_id, %err, "failed to unlock funds for dead-lettered withdrawal");
            return Err(err);
        }
        let updated = {
            let mut w = self
                .withdrawals
                .get_mut(&id)
                .ok_or_else(|| LedgerError::WithdrawalNotFound(id.to_string()))?;
            w.state = WithdrawalState::Failed;
            w.attempts = attempts;
            w.clone()
        };
        warn!(%id, user = %user_id, attempts, "withdrawal dead-lettered, funds unlocked");
        let _ = self.notices.send(WithdrawalNotice {
            id,
            state: WithdrawalState::Failed,
            tx_hash: None,
        });
        Ok(updated)
    }

    /// Spawns the settlement worker thread.
    ///
    /// The worker drains settlement jobs until [`shutdown`] is called.
    ///
    /// [`shutdown`]: WithdrawalWorkflow::shutdown
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let workflow = Arc::clone(self);
        let queue = self.job_queue.clone();
        std::thread::Builder::new()
            .name("withdrawal-settlement".to_string())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    match job {
                        Job::Settle(id) => {
                            if let Err(err) = workflow.settle(id) {
                                error!(%id, %err, "settlement job failed");
                            }
                        }
                        Job::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn settlement worker")
    }

    /// Asks the settlement worker to stop after draining queued jobs.
    pub fn shutdown(&self) {
        let _ = self.jobs.send(Job::Shutdown);
    }
}
