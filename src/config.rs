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

//! Ledger configuration: caps, TTLs, retry policy, provider secrets.

use serde::Deserialize;

/// Tunables for the money-movement core.
///
/// Defaults are production-shaped; [`LedgerConfig::from_env`] overrides them
/// from the environment for deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Daily withdrawal cap per account, in minor units.
    pub daily_withdrawal_cap_minor: i64,
    /// Daily deposit cap per account, in minor units.
    pub daily_deposit_cap_minor: i64,
    /// Idempotency record lifetime, in hours.
    pub idempotency_ttl_hours: i64,
    /// Deposit session lifetime, in minutes.
    pub session_ttl_minutes: i64,
    /// Payout attempts before a withdrawal dead-letters as FAILED.
    pub max_settlement_attempts: u32,
    /// Shared secret for card-processor webhooks.
    pub card_webhook_secret: String,
    /// Shared secret for wallet-processor webhooks.
    pub wallet_webhook_secret: String,
    /// Base URL the card processor hosts checkouts under.
    pub card_checkout_base: String,
    /// Base URL the wallet processor hosts checkouts under.
    pub wallet_checkout_base: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            daily_withdrawal_cap_minor: 500_000,
            daily_deposit_cap_minor: 1_000_000,
            idempotency_ttl_hours: 24,
            session_ttl_minutes: 60,
            max_settlement_attempts: 3,
            card_webhook_secret: "card-webhook-secret-dev".to_string(),
            wallet_webhook_secret: "wallet-webhook-secret-dev".to_string(),
            card_checkout_base: "https://checkout.cardflow.example/session".to_string(),
            wallet_checkout_base: "https://pay.walletgo.example/order".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Builds a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        }

        Self {
            daily_withdrawal_cap_minor: parse(
                "LEDGER_DAILY_WITHDRAWAL_CAP",
                defaults.daily_withdrawal_cap_minor,
            ),
            daily_deposit_cap_minor: parse(
                "LEDGER_DAILY_DEPOSIT_CAP",
                defaults.daily_deposit_cap_minor,
            ),
            idempotency_ttl_hours: parse(
                "LEDGER_IDEMPOTENCY_TTL_HOURS",
                defaults.idempotency_ttl_hours,
            ),
            session_ttl_minutes: parse("LEDGER_SESSION_TTL_MINUTES", defaults.session_ttl_minutes),
            max_settlement_attempts: parse(
                "LEDGER_MAX_SETTLEMENT_ATTEMPTS",
                defaults.max_settlement_attempts,
            ),
            card_webhook_secret: parse("CARD_WEBHOOK_SECRET", defaults.card_webhook_secret),
            wallet_webhook_secret: parse("WALLET_WEBHOOK_SECRET", defaults.wallet_webhook_secret),
            card_checkout_base: parse("CARD_CHECKOUT_BASE", defaults.card_checkout_base),
            wallet_checkout_base: parse("WALLET_CHECKOUT_BASE", defaults.wallet_checkout_base),
        }
    }
}
