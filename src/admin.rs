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

//! Privileged balance adjustments with an append-only audit trail.
//!
//! Authentication is a collaborator concern: callers arrive with a verified
//! [`Actor`] and this service only checks the role. Adjustments cannot drive
//! a balance negative — an overdrawing negative delta is rejected with
//! `InsufficientBalance` and the operator issues a smaller adjustment.

use crate::base::UserId;
use crate::entry::{EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

/// Roles granted by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Admin,
}

/// A verified caller, as supplied by the authentication collaborator.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            roles: vec![Role::Admin],
        }
    }

    pub fn player(user_id: UserId) -> Self {
        Self {
            user_id,
            roles: vec![Role::Player],
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

/// One audit trail record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: u64,
    pub actor_id: UserId,
    pub action: String,
    pub entity_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit trail. Records are never deleted.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    next_id: AtomicU64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        actor_id: UserId,
        action: &str,
        entity_id: &str,
        metadata: serde_json::Value,
    ) -> AuditRecord {
        let record = AuditRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            actor_id,
            action: action.to_string(),
            entity_id: entity_id.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.records.lock().push(record.clone());
        record
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

/// Applies audited, role-gated balance adjustments.
pub struct AdminAdjustmentService {
    ledger: Arc<LedgerStore>,
    audit: Arc<AuditLog>,
}

impl AdminAdjustmentService {
    pub fn new(ledger: Arc<LedgerStore>, audit: Arc<AuditLog>) -> Self {
        Self { ledger, audit }
    }

    /// Adjusts a user's balance by `delta_minor` (positive credits, negative
    /// debits) and records the action in the audit trail.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] when the actor lacks the admin role.
    /// - [`LedgerError::InvalidAmount`] for a zero delta.
    /// - [`LedgerError::InsufficientBalance`] when a negative delta would
    ///   overdraw the account.
    pub fn adjust(
        &self,
        actor: &Actor,
        user_id: UserId,
        delta_minor: i64,
        reason: &str,
    ) -> LedgerResult<LedgerEntry> {
        if !actor.is_admin() {
            return Err(LedgerError::Forbidden(actor.user_id));
        }
        if delta_minor == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }

        let adjustment_id = Uuid::new_v4().to_string();
        let metadata = json!({ "reason": reason, "admin_id": actor.user_id });
        let entry = if delta_minor > 0 {
            self.ledger.credit(
                user_id,
                delta_minor,
                EntryType::AdminAdjustment,
                "admin",
                &adjustment_id,
                Some(metadata),
            )?
        } else {
            self.ledger.debit(
                user_id,
                -delta_minor,
                EntryType::AdminAdjustment,
                "admin",
                &adjustment_id,
                Some(metadata),
            )?
        };

        self.audit.append(
            actor.user_id,
            "wallet.adjust",
            &user_id.to_string(),
            json!({
                "reason": reason,
                "delta_minor": delta_minor,
                "entry_id": entry.id,
                "adjustment_id": adjustment_id,
            }),
        );
        info!(admin = %actor.user_id, user = %user_id, delta_minor, reason, "admin adjustment applied");
        Ok(entry)
    }
}
