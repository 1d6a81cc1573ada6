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

//! Provider webhook processing: verify, dedup, credit exactly once.
//!
//! Delivery is at-least-once and may be out of order; the event id is the
//! dedup key, so redelivery returns the stored outcome without a second
//! ledger entry. Nothing is mutated before the signature verifies and the
//! payload parses.

use crate::base::{EntryId, UserId};
use crate::deposit::DepositSessionManager;
use crate::entry::EntryType;
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::{Begin, IdempotencyGuard};
use crate::ledger::LedgerStore;
use crate::providers::{ProviderKind, ProviderRegistry};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex HMAC-SHA256 signature a provider attaches to a payload.
///
/// Exposed for webhook simulators and tests; the processor itself only ever
/// verifies.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex HMAC-SHA256 signature in constant time.
fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(provided.as_slice()).into()
}

/// Parsed provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub user_id: UserId,
    pub amount_minor: i64,
    #[serde(default)]
    pub provider_session_id: Option<String>,
}

/// Durable result of processing one provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub event_id: String,
    pub entry_id: EntryId,
    pub credited_minor: i64,
    /// Set on redelivery: the stored outcome was replayed, nothing changed.
    pub duplicate: bool,
}

/// Verifies signed provider callbacks and credits the ledger exactly once
/// per event id.
pub struct WebhookProcessor {
    ledger: Arc<LedgerStore>,
    sessions: Arc<DepositSessionManager>,
    guard: Arc<IdempotencyGuard>,
    registry: Arc<ProviderRegistry>,
}

impl WebhookProcessor {
    pub fn new(
        ledger: Arc<LedgerStore>,
        sessions: Arc<DepositSessionManager>,
        guard: Arc<IdempotencyGuard>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            ledger,
            sessions,
            guard,
            registry,
        }
    }

    /// Handles one webhook delivery.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Provider`] for a bad signature, malformed payload, or
    ///   non-positive amount — state is untouched.
    /// - [`LedgerError::DuplicateInFlight`] when the same event id is being
    ///   processed concurrently.
    pub fn handle_event(
        &self,
        provider: ProviderKind,
        signature: &str,
        payload: &[u8],
    ) -> LedgerResult<WebhookOutcome> {
        let adapter = self.registry.get(provider);
        if !verify_signature(adapter.webhook_secret(), payload, signature) {
            warn!(%provider, "webhook signature verification failed");
            return Err(LedgerError::Provider("invalid webhook signature".to_string()));
        }

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| LedgerError::Provider(format!("malformed webhook payload: {e}")))?;
        if event.amount_minor <= 0 {
            return Err(LedgerError::Provider(format!(
                "non-positive webhook amount: {}",
                event.amount_minor
            )));
        }

        let key = format!("{provider}:{}", event.event_id);
        match self.guard.begin(&key)? {
            Begin::Replayed(stored) => {
                let mut outcome: WebhookOutcome = serde_json::from_value(stored)
                    .map_err(|e| LedgerError::Provider(format!("corrupt stored outcome: {e}")))?;
                outcome.duplicate = true;
                info!(%provider, event = %event.event_id, "webhook redelivery replayed");
                Ok(outcome)
            }
            Begin::New => match self.apply(provider, &event) {
                Ok(outcome) => {
                    self.guard.complete(&key, json!(&outcome));
                    Ok(outcome)
                }
                Err(err) => {
                    // Release the key so the provider's retry can run.
                    self.guard.fail(&key);
                    Err(err)
                }
            },
        }
    }

    fn apply(&self, provider: ProviderKind, event: &WebhookEvent) -> LedgerResult<WebhookOutcome> {
        let metadata = event
            .provider_session_id
            .as_ref()
            .map(|id| json!({ "provider_session_id": id }));
        let entry = self.ledger.credit(
            event.user_id,
            event.amount_minor,
            EntryType::Deposit,
            &provider.to_string(),
            &event.event_id,
            metadata,
        )?;

        if let Some(provider_session_id) = &event.provider_session_id {
            // The credit stands even when the session reference is stale;
            // surface the mismatch instead of failing a settled payment.
            if let Err(err) = self.sessions.mark_credited(provider_session_id) {
                warn!(
                    %provider,
                    event = %event.event_id,
                    session = %provider_session_id,
                    %err,
                    "credited deposit references unknown session"
                );
            }
        }

        info!(
            %provider,
            event = %event.event_id,
            user = %event.user_id,
            amount = event.amount_minor,
            "deposit credited"
        );
        Ok(WebhookOutcome {
            event_id: event.event_id.clone(),
            entry_id: entry.id,
            credited_minor: event.amount_minor,
            duplicate: false,
        })
    }
}
