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

//! Payment-provider adapters.
//!
//! Each provider is one implementation of [`PaymentProvider`], selected from
//! the [`ProviderRegistry`] by [`ProviderKind`]. Adding a provider means
//! adding a variant and an adapter, not editing call sites.
//!
//! The built-in adapters mint order ids locally (sandbox style); an adapter
//! backed by a real processor API slots in behind the same trait.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::fees;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Supported payment processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Card,
    Wallet,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Card => write!(f, "card"),
            ProviderKind::Wallet => write!(f, "wallet"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(ProviderKind::Card),
            "wallet" => Ok(ProviderKind::Wallet),
            other => Err(LedgerError::Provider(format!("unknown provider '{other}'"))),
        }
    }
}

/// Hosted checkout created by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// External payment processor seam.
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Creates a hosted checkout for the amount; the provider later reports
    /// the outcome through its signed webhook.
    fn create_checkout_session(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &serde_json::Value,
    ) -> LedgerResult<CheckoutSession>;

    /// Shared secret for verifying this provider's webhook signatures.
    fn webhook_secret(&self) -> &[u8];

    /// Smallest amount this provider accepts; fee-derived so the net credited
    /// amount after processor fees is never negative.
    fn min_amount_minor(&self) -> i64 {
        fees::min_deposit_minor()
    }
}

/// Card-processor adapter.
pub struct CardProcessor {
    secret: Vec<u8>,
    checkout_base: String,
}

impl CardProcessor {
    pub fn new(secret: &str, checkout_base: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            checkout_base: checkout_base.to_string(),
        }
    }
}

impl PaymentProvider for CardProcessor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Card
    }

    fn create_checkout_session(
        &self,
        amount_minor: i64,
        _currency: &str,
        _metadata: &serde_json::Value,
    ) -> LedgerResult<CheckoutSession> {
        if amount_minor < self.min_amount_minor() {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }
        let session_id = format!("cs_{}", Uuid::new_v4().simple());
        let url = format!("{}/{}", self.checkout_base, session_id);
        Ok(CheckoutSession { session_id, url })
    }

    fn webhook_secret(&self) -> &[u8] {
        &self.secret
    }
}

/// Wallet-processor adapter.
pub struct WalletProcessor {
    secret: Vec<u8>,
    checkout_base: String,
}

impl WalletProcessor {
    pub fn new(secret: &str, checkout_base: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            checkout_base: checkout_base.to_string(),
        }
    }
}

impl PaymentProvider for WalletProcessor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Wallet
    }

    fn create_checkout_session(
        &self,
        amount_minor: i64,
        _currency: &str,
        _metadata: &serde_json::Value,
    ) -> LedgerResult<CheckoutSession> {
        if amount_minor < self.min_amount_minor() {
            return Err(LedgerError::InvalidAmount(amount_minor));
        }
        let session_id = format!("wo_{}", Uuid::new_v4().simple());
        let url = format!("{}/{}", self.checkout_base, session_id);
        Ok(CheckoutSession { session_id, url })
    }

    fn webhook_secret(&self) -> &[u8] {
        &self.secret
    }
}

/// Configuration-selected set of provider adapters.
pub struct ProviderRegistry {
    card: Arc<dyn PaymentProvider>,
    wallet: Arc<dyn PaymentProvider>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            card: Arc::new(CardProcessor::new(
                &config.card_webhook_secret,
                &config.card_checkout_base,
            )),
            wallet: Arc::new(WalletProcessor::new(
                &config.wallet_webhook_secret,
                &config.wallet_checkout_base,
            )),
        }
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn PaymentProvider> {
        match kind {
            ProviderKind::Card => Arc::clone(&self.card),
            ProviderKind::Wallet => Arc::clone(&self.wallet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_kind_round_trips_display_and_parse() {
        for kind in [ProviderKind::Card, ProviderKind::Wallet] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
        assert!("paypal".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn checkout_session_embeds_session_id_in_url() {
        let provider = CardProcessor::new("secret", "https://checkout.test/session");
        let session = provider
            .create_checkout_session(5000, "usd", &json!({}))
            .unwrap();
        assert!(session.session_id.starts_with("cs_"));
        assert!(session.url.ends_with(&session.session_id));
    }

    #[test]
    fn below_minimum_amount_is_rejected() {
        let provider = WalletProcessor::new("secret", "https://pay.test/order");
        let min = provider.min_amount_minor();
        assert!(provider
            .create_checkout_session(min - 1, "usd", &json!({}))
            .is_err());
        assert!(provider
            .create_checkout_session(min, "usd", &json!({}))
            .is_ok());
    }

    #[test]
    fn registry_selects_adapter_by_kind() {
        let registry = ProviderRegistry::from_config(&LedgerConfig::default());
        assert_eq!(registry.get(ProviderKind::Card).kind(), ProviderKind::Card);
        assert_eq!(
            registry.get(ProviderKind::Wallet).kind(),
            ProviderKind::Wallet
        );
    }
}
