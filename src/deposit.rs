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

//! Deposit checkout sessions.
//!
//! A session is idempotent per `(user, amount, provider, day)`: retrying the
//! same request on the same day returns the existing session unchanged
//! instead of opening a second checkout. Sessions never touch the ledger —
//! crediting happens only on the webhook path once the provider confirms
//! payment.

use crate::base::UserId;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::providers::{ProviderKind, ProviderRegistry};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositSessionState {
    Pending,
    Credited,
    Expired,
}

/// One checkout session with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositSession {
    pub id: String,
    pub user_id: UserId,
    pub provider: ProviderKind,
    pub amount_minor: i64,
    /// FC credited when the provider confirms; pegged 1:1 to the minor unit.
    pub fc_amount: i64,
    pub state: DepositSessionState,
    pub idempotency_key: String,
    pub provider_session_id: String,
    pub checkout_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Creates and tracks provider checkout sessions.
pub struct DepositSessionManager {
    sessions: DashMap<String, DepositSession>,
    /// Idempotency key -> session id.
    by_key: DashMap<String, String>,
    /// Provider's session id -> session id, for webhook correlation.
    by_provider_session: DashMap<String, String>,
    /// Serializes session creation per user so the daily-cap read and the
    /// session insert form one critical section.
    creation_locks: DashMap<UserId, Arc<Mutex<()>>>,
    registry: Arc<ProviderRegistry>,
    config: LedgerConfig,
}

impl DepositSessionManager {
    pub fn new(registry: Arc<ProviderRegistry>, config: LedgerConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            by_key: DashMap::new(),
            by_provider_session: DashMap::new(),
            creation_locks: DashMap::new(),
            registry,
            config,
        }
    }

    fn idempotency_key(user_id: UserId, amount_minor: i64, provider: ProviderKind) -> String {
        let day = Utc::now().date_naive();
        format!("dep:{user_id}:{amount_minor}:{provider}:{day}")
    }

    /// Today's session volume counted against the daily deposit cap.
    ///
    /// Expired sessions release their share; pending ones hold it until they
    /// expire or credit.
    fn deposited_today(&self, user_id: UserId, now: DateTime<Utc>) -> i64 {
        let today = now.date_naive();
        self.sessions
            .iter()
            .filter(|s| {
                s.user_id == user_id
                    && s.state != DepositSessionState::Expired
                    && s.created_at.date_naive() == today
            })
            .map(|s| s.amount_minor)
            .sum()
    }

    /// Creates a checkout session, or returns the existing one for the same
    /// `(user, amount, provider, day)` unchanged.
    pub fn create_session(
        &self,
        user_id: UserId,
        provider: ProviderKind,
        amount_minor: i64,
        currency: &str,
    ) -> LedgerResult<DepositSession> {
        if amount_minor <= 0 {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }
        let adapter = self.registry.get(provider);
        if amount_minor < adapter.min_amount_minor() {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }

        let creation_lock = self
            .creation_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = creation_lock.lock();

        let key = Self::idempotency_key(user_id, amount_minor, provider);
        if let Some(id) = self.by_key.get(&key) {
            if let Some(existing) = self.sessions.get(id.value()) {
                let live = match existing.state {
                    DepositSessionState::Credited => true,
                    DepositSessionState::Pending => existing.expires_at > Utc::now(),
                    DepositSessionState::Expired => false,
                };
                if live {
                    return Ok(existing.clone());
                }
            }
        }

        let now = Utc::now();
        let attempted = self.deposited_today(user_id, now) + amount_minor;
        if attempted > self.config.daily_deposit_cap_minor {
            return Err(LedgerError::LimitExceeded {
                limit: self.config.daily_deposit_cap_minor,
                attempted,
            });
        }

        let checkout = adapter.create_checkout_session(
            amount_minor,
            currency,
            &json!({ "user_id": user_id, "idempotency_key": key }),
        )?;

        let session = DepositSession {
            id: Uuid::new_v4().to_string(),
            user_id,
            provider,
            amount_minor,
            fc_amount: amount_minor,
            state: DepositSessionState::Pending,
            idempotency_key: key.clone(),
            provider_session_id: checkout.session_id.clone(),
            checkout_url: checkout.url,
            created_at: now,
            expires_at: now + Duration::minutes(self.config.session_ttl_minutes),
        };
        self.by_key.insert(key, session.id.clone());
        self.by_provider_session
            .insert(checkout.session_id, session.id.clone());
        self.sessions.insert(session.id.clone(), session.clone());
        info!(user = %user_id, %provider, amount_minor, session = %session.id, "deposit session created");
        Ok(session)
    }

    /// Looks up a session by its internal id.
    pub fn session(&self, id: &str) -> LedgerResult<DepositSession> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| LedgerError::SessionNotFound(id.to_string()))
    }

    /// Marks the session matching a provider's session id as CREDITED.
    ///
    /// Called from the webhook path after the ledger credit lands; unknown
    /// ids are reported, not ignored, so a misrouted webhook is visible.
    pub fn mark_credited(&self, provider_session_id: &str) -> LedgerResult<DepositSession> {
        let id = self
            .by_provider_session
            .get(provider_session_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| LedgerError::SessionNotFound(provider_session_id.to_string()))?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::SessionNotFound(provider_session_id.to_string()))?;
        session.state = DepositSessionState::Credited;
        Ok(session.clone())
    }

    /// Expires pending sessions past their TTL.
    pub fn expire_stale(&self) {
        let now = Utc::now();
        for mut session in self.sessions.iter_mut() {
            if session.state == DepositSessionState::Pending && session.expires_at <= now {
                session.state = DepositSessionState::Expired;
            }
        }
    }
}
