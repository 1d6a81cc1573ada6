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

//! Demo REST server wiring the wallet core together.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /deposits/sessions` - Create a provider checkout session
//! - `POST /webhooks/{provider}` - Signed provider callback (X-Signature header)
//! - `POST /withdrawals` - Request a withdrawal
//! - `GET  /withdrawals/{id}` - Poll a withdrawal
//! - `POST /transfers` - Transfer between users
//! - `POST /admin/adjust` - Audited admin adjustment
//! - `GET  /accounts` - List all balances
//! - `GET  /accounts/{id}` - Get a balance
//!
//! The payout rail is a local stub that always confirms, so requested
//! withdrawals settle a moment after they are created.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Duration;
use fc_ledger::{
    Actor, AdminAdjustmentService, AuditLog, DepositSessionManager, IdempotencyGuard,
    LedgerConfig, LedgerError, LedgerResult, LedgerStore, PayoutRail, PayoutStatus, ProviderKind,
    ProviderRegistry, TransferEngine, UserId, WebhookProcessor, WithdrawalWorkflow,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

// === Payout rail stub ===

/// Always-confirming rail for local demos.
struct DemoRail;

impl PayoutRail for DemoRail {
    fn send_transaction(
        &self,
        _chain: &str,
        _to_address: &str,
        _amount_minor: i64,
    ) -> LedgerResult<String> {
        Ok(format!("0x{}", Uuid::new_v4().simple()))
    }

    fn transaction_status(&self, _tx_hash: &str, _chain: &str) -> LedgerResult<PayoutStatus> {
        Ok(PayoutStatus::Confirmed)
    }

    fn validate_address(&self, address: &str, _chain: &str) -> bool {
        address.len() >= 8 && address.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

// === Request DTOs ===

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: u64,
    provider: ProviderKind,
    amount_minor: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawalRequest {
    user_id: u64,
    chain: String,
    address: String,
    amount_minor: i64,
}

#[derive(Debug, Deserialize)]
struct TransferRequest {
    from: u64,
    to: u64,
    amount_minor: i64,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdjustRequest {
    admin_id: u64,
    user_id: u64,
    delta_minor: i64,
    reason: String,
}

// === Application State ===

#[derive(Clone)]
struct AppState {
    ledger: Arc<LedgerStore>,
    sessions: Arc<DepositSessionManager>,
    webhooks: Arc<WebhookProcessor>,
    withdrawals: Arc<WithdrawalWorkflow>,
    transfers: Arc<TransferEngine>,
    admin: Arc<AdminAdjustmentService>,
}

// === Error Handling ===

struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::InvalidAddress { .. } => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            LedgerError::SelfTransfer => (StatusCode::BAD_REQUEST, "SELF_TRANSFER"),
            LedgerError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            LedgerError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            LedgerError::WithdrawalNotFound(_) => (StatusCode::NOT_FOUND, "WITHDRAWAL_NOT_FOUND"),
            LedgerError::EntryNotFound(_) => (StatusCode::NOT_FOUND, "ENTRY_NOT_FOUND"),
            LedgerError::DuplicateInFlight(_) => (StatusCode::CONFLICT, "DUPLICATE_IN_FLIGHT"),
            LedgerError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            LedgerError::LimitExceeded { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "LIMIT_EXCEEDED")
            }
            LedgerError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            LedgerError::BalanceOverflow => (StatusCode::UNPROCESSABLE_ENTITY, "BALANCE_OVERFLOW"),
        };

        (
            status,
            Json(json!({
                "error": self.0.client_message(),
                "code": code,
            })),
        )
            .into_response()
    }
}

// === Handlers ===

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.create_session(
        UserId(request.user_id),
        request.provider,
        request.amount_minor,
        &request.currency,
    )?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let provider: ProviderKind = provider.parse()?;
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LedgerError::Provider("missing X-Signature header".to_string()))?;
    let outcome = state.webhooks.handle_event(provider, signature, &body)?;
    Ok(Json(outcome))
}

async fn request_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let withdrawal = state.withdrawals.request_withdrawal(
        UserId(request.user_id),
        &request.chain,
        &request.address,
        request.amount_minor,
    )?;
    Ok((StatusCode::ACCEPTED, Json(withdrawal)))
}

async fn get_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.withdrawals.withdrawal(id)?))
}

async fn create_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.transfers.transfer(
        UserId(request.from),
        UserId(request.to),
        request.amount_minor,
        request.note.as_deref(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "transfer_id": receipt.transfer_id,
            "out_entry": receipt.out_entry,
            "in_entry": receipt.in_entry,
        })),
    ))
}

async fn admin_adjust(
    State(state): State<AppState>,
    Json(request): Json<AdjustRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Stand-in for the authentication collaborator: the demo trusts the
    // declared admin id.
    let actor = Actor::admin(UserId(request.admin_id));
    let entry = state.admin.adjust(
        &actor,
        UserId(request.user_id),
        request.delta_minor,
        &request.reason,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.balance(UserId(id))?))
}

async fn list_accounts(State(state): State<AppState>) -> impl IntoResponse {
    let mut balances = state.ledger.balances();
    balances.sort_by_key(|b| b.user_id);
    Json(balances)
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/deposits/sessions", post(create_session))
        .route("/webhooks/{provider}", post(handle_webhook))
        .route("/withdrawals", post(request_withdrawal))
        .route("/withdrawals/{id}", get(get_withdrawal))
        .route("/transfers", post(create_transfer))
        .route("/admin/adjust", post(admin_adjust))
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}", get(get_account))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = LedgerConfig::from_env();
    let ledger = Arc::new(LedgerStore::new());
    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let sessions = Arc::new(DepositSessionManager::new(
        Arc::clone(&registry),
        config.clone(),
    ));
    let guard = Arc::new(IdempotencyGuard::new(Duration::hours(
        config.idempotency_ttl_hours,
    )));
    let webhooks = Arc::new(WebhookProcessor::new(
        Arc::clone(&ledger),
        Arc::clone(&sessions),
        Arc::clone(&guard),
        Arc::clone(&registry),
    ));
    let withdrawals = Arc::new(WithdrawalWorkflow::new(
        Arc::clone(&ledger),
        Arc::new(DemoRail),
        config.clone(),
    ));
    let _worker = withdrawals.spawn_worker();
    let transfers = Arc::new(TransferEngine::new(Arc::clone(&ledger)));
    let admin = Arc::new(AdminAdjustmentService::new(
        Arc::clone(&ledger),
        Arc::new(AuditLog::new()),
    ));

    let state = AppState {
        ledger,
        sessions,
        webhooks,
        withdrawals,
        transfers,
        admin,
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("FC ledger demo server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /deposits/sessions  - Create a checkout session");
    println!("  POST /webhooks/:provider - Signed provider callback");
    println!("  POST /withdrawals        - Request a withdrawal");
    println!("  GET  /withdrawals/:id    - Poll a withdrawal");
    println!("  POST /transfers          - Transfer between users");
    println!("  POST /admin/adjust       - Audited adjustment");
    println!("  GET  /accounts           - List balances");

    axum::serve(listener, app).await.unwrap();
}
