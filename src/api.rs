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

//! HTTP surface.
//!
//! The caller's identity arrives in the `x-account-id` header, set by the
//! authentication gateway in front of this service and trusted as-is.
//!
//! ## Endpoints
//!
//! - `POST /profiles`, `POST /doctors`, `GET /doctors`,
//!   `PATCH /doctors/{id}` (availability)
//! - `GET /wallet`, `GET /transactions`, `GET /transactions/{id}`
//! - `POST /rpc/perform_consultation`, `POST /rpc/perform_transfer`
//! - `POST|GET /deposit-requests`, `PATCH /deposit-requests/{id}`
//! - `POST|GET /withdraw-requests`, `PATCH /withdraw-requests/{id}`
//! - `GET /admin/stats`, `GET /admin/accounts.csv`, `GET /admin/transactions.csv`
//! - `POST /admin/moderators`
//!
//! Self-registration always creates a patient. The account named by
//! `LEDGER_BOOTSTRAP_MODERATOR` signs up as the first moderator, and
//! moderators promote others through `POST /admin/moderators`.
//!
//! Money-moving handlers run on the blocking pool: they hold row locks for
//! the length of a unit of work and must not stall the async workers.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/rpc/perform_transfer \
//!   -H "x-account-id: 5b0c3a8e-43f7-4e59-a1a6-0f3cf2f0b0a1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"receiver_id": "0d9f7c1e-7d2b-4c47-9a51-3f4f5e6a7b8c", "amount": "25.00"}'
//! ```

use crate::base::{AccountId, DoctorId, RequestId};
use crate::directory::{Doctor, Profile};
use crate::engine::{Engine, Receipt};
use crate::error::{ErrorKind, LedgerError};
use crate::moderation::{
    DepositRequest, PayoutDetails, RequestFilter, RequestStatus, WithdrawRequest,
};
use crate::report::{self, PlatformStats};
use crate::transaction::Transaction;
use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::error;

pub const ACCOUNT_HEADER: &str = "x-account-id";

// === Request/Response DTOs ===

/// Self-registration body. The role is never caller-supplied.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterProfileRequest {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantModeratorRequest {
    pub account_id: AccountId,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDoctorRequest {
    pub specialty: String,
    pub consultation_fee: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConsultationRequest {
    pub doctor_id: DoctorId,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub receiver_id: AccountId,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DepositSubmission {
    pub amount: Decimal,
    pub proof_path: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawSubmission {
    pub net_amount: Decimal,
    pub payout: PayoutDetails,
}

/// Moderator update: only `status` and `admin_notes` are writable.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewUpdate {
    pub status: RequestStatus,
    #[serde(default)]
    pub admin_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub account: AccountId,
    pub balance: Decimal,
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// HTTP error wrapper.
#[derive(Debug)]
pub enum AppError {
    Ledger(LedgerError),
    Unauthenticated,
    BadRequest(String),
    Export(String),
    Internal(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Ledger(err) => {
                let status = match err.kind() {
                    ErrorKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::AlreadyFinalized | ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                    ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code(), err.to_string())
            }
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                format!("missing or malformed {ACCOUNT_HEADER} header"),
            ),
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message.clone())
            }
            AppError::Export(message) => {
                error!(%message, "export failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "EXPORT_FAILED",
                    "export failed".to_string(),
                )
            }
            AppError::Internal(message) => {
                error!(%message, "handler task failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "internal error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Identity ===

/// Authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub AccountId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<AccountId>().ok())
            .map(Caller)
            .ok_or(AppError::Unauthenticated)
    }
}

// === Extractors ===

/// `Json` whose rejections render as [`AppError`].
#[derive(Debug)]
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `Path` whose rejections render as [`AppError`].
#[derive(Debug)]
pub struct AppPath<T>(pub T);

impl<T, S> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `Query` whose rejections render as [`AppError`].
#[derive(Debug)]
pub struct AppQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Runs a ledger call on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?
        .map_err(AppError::from)
}

// === Handlers ===

/// POST /profiles
async fn register_profile(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<RegisterProfileRequest>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    let profile = state.engine.sign_up(caller, &body.full_name, &body.email)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// POST /doctors
async fn register_doctor(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<RegisterDoctorRequest>,
) -> Result<(StatusCode, Json<Doctor>), AppError> {
    let doctor = state
        .engine
        .register_doctor(caller, &body.specialty, body.consultation_fee)?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// GET /doctors
async fn list_doctors(State(state): State<AppState>) -> Json<Vec<Doctor>> {
    Json(state.engine.doctors())
}

/// PATCH /doctors/{id}
async fn set_availability(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppPath(id): AppPath<DoctorId>,
    AppJson(body): AppJson<AvailabilityRequest>,
) -> Result<Json<Doctor>, AppError> {
    Ok(Json(state.engine.set_doctor_availability(caller, id, body.available)?))
}

/// GET /wallet
async fn wallet(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<WalletResponse>, AppError> {
    Ok(Json(WalletResponse {
        account: caller,
        balance: state.engine.balance(&caller)?,
    }))
}

/// GET /transactions - caller's history, newest first.
async fn history(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Json<Vec<Transaction>> {
    Json(
        state
            .engine
            .history(&caller)
            .iter()
            .map(|tx| Transaction::clone(tx))
            .collect(),
    )
}

/// GET /transactions/{id} - visible to the parties and to moderators.
async fn transaction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppPath(reference): AppPath<String>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state.engine.transaction(&reference)?;
    if !tx.involves(&caller) && state.engine.ensure_moderator(&caller).is_err() {
        // Indistinguishable from a missing id for outsiders.
        return Err(LedgerError::TransactionNotFound.into());
    }
    Ok(Json(Transaction::clone(&tx)))
}

/// POST /rpc/perform_consultation
async fn perform_consultation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<ConsultationRequest>,
) -> Result<Json<Receipt>, AppError> {
    let engine = Arc::clone(&state.engine);
    let receipt =
        run_blocking(move || engine.perform_consultation(caller, body.doctor_id)).await?;
    Ok(Json(receipt))
}

/// POST /rpc/perform_transfer
async fn perform_transfer(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<TransferRequest>,
) -> Result<Json<Receipt>, AppError> {
    let engine = Arc::clone(&state.engine);
    let receipt =
        run_blocking(move || engine.perform_transfer(caller, body.receiver_id, body.amount))
            .await?;
    Ok(Json(receipt))
}

/// POST /deposit-requests
async fn submit_deposit(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<DepositSubmission>,
) -> Result<(StatusCode, Json<DepositRequest>), AppError> {
    let request = state
        .engine
        .submit_deposit(caller, body.amount, &body.proof_path)?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Moderators see every request; everyone else only their own.
fn scoped_filter(engine: &Engine, caller: AccountId, query: ListQuery) -> RequestFilter {
    let owner = match engine.ensure_moderator(&caller) {
        Ok(()) => None,
        Err(_) => Some(caller),
    };
    RequestFilter {
        status: query.status,
        owner,
    }
}

/// GET /deposit-requests?status=pending
async fn list_deposits(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppQuery(query): AppQuery<ListQuery>,
) -> Json<Vec<DepositRequest>> {
    let filter = scoped_filter(&state.engine, caller, query);
    Json(state.engine.deposit_requests(filter))
}

/// PATCH /deposit-requests/{id}
async fn review_deposit(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppPath(id): AppPath<RequestId>,
    AppJson(body): AppJson<ReviewUpdate>,
) -> Result<Json<DepositRequest>, AppError> {
    ensure_final_status(&body)?;
    let engine = Arc::clone(&state.engine);
    let request = run_blocking(move || match body.status {
        RequestStatus::Approved => engine.approve_deposit(caller, id, body.admin_notes),
        _ => engine.reject_deposit(caller, id, body.admin_notes.as_deref().unwrap_or_default()),
    })
    .await?;
    Ok(Json(request))
}

fn ensure_final_status(update: &ReviewUpdate) -> Result<(), AppError> {
    if update.status == RequestStatus::Pending {
        return Err(AppError::BadRequest(
            "status must be approved or rejected".into(),
        ));
    }
    Ok(())
}

/// POST /withdraw-requests
async fn submit_withdraw(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<WithdrawSubmission>,
) -> Result<(StatusCode, Json<WithdrawRequest>), AppError> {
    let request = state
        .engine
        .submit_withdraw(caller, body.net_amount, body.payout)?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /withdraw-requests?status=pending
async fn list_withdrawals(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppQuery(query): AppQuery<ListQuery>,
) -> Json<Vec<WithdrawRequest>> {
    let filter = scoped_filter(&state.engine, caller, query);
    Json(state.engine.withdraw_requests(filter))
}

/// PATCH /withdraw-requests/{id}
async fn review_withdraw(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppPath(id): AppPath<RequestId>,
    AppJson(body): AppJson<ReviewUpdate>,
) -> Result<Json<WithdrawRequest>, AppError> {
    ensure_final_status(&body)?;
    let engine = Arc::clone(&state.engine);
    let request = run_blocking(move || match body.status {
        RequestStatus::Approved => engine.approve_withdraw(caller, id, body.admin_notes),
        _ => engine.reject_withdraw(caller, id, body.admin_notes.as_deref().unwrap_or_default()),
    })
    .await?;
    Ok(Json(request))
}

/// GET /admin/stats
async fn stats(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<PlatformStats>, AppError> {
    state.engine.ensure_moderator(&caller)?;
    Ok(Json(report::platform_stats(&state.engine)))
}

/// POST /admin/moderators
async fn grant_moderator(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AppJson(body): AppJson<GrantModeratorRequest>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.engine.grant_moderator(caller, body.account_id)?))
}

fn csv_response(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()
}

/// GET /admin/accounts.csv
async fn export_accounts(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Response, AppError> {
    state.engine.ensure_moderator(&caller)?;
    let mut body = Vec::new();
    report::write_accounts(&state.engine, &mut body)
        .map_err(|err| AppError::Export(err.to_string()))?;
    Ok(csv_response(body))
}

/// GET /admin/transactions.csv
async fn export_transactions(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Response, AppError> {
    state.engine.ensure_moderator(&caller)?;
    let mut body = Vec::new();
    report::write_transactions(&state.engine, &mut body)
        .map_err(|err| AppError::Export(err.to_string()))?;
    Ok(csv_response(body))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/profiles", post(register_profile))
        .route("/doctors", post(register_doctor).get(list_doctors))
        .route("/doctors/{id}", patch(set_availability))
        .route("/wallet", get(wallet))
        .route("/transactions", get(history))
        .route("/transactions/{id}", get(transaction))
        .route("/rpc/perform_consultation", post(perform_consultation))
        .route("/rpc/perform_transfer", post(perform_transfer))
        .route("/deposit-requests", post(submit_deposit).get(list_deposits))
        .route("/deposit-requests/{id}", patch(review_deposit))
        .route("/withdraw-requests", post(submit_withdraw).get(list_withdrawals))
        .route("/withdraw-requests/{id}", patch(review_withdraw))
        .route("/admin/stats", get(stats))
        .route("/admin/accounts.csv", get(export_accounts))
        .route("/admin/transactions.csv", get(export_transactions))
        .route("/admin/moderators", post(grant_moderator))
        .with_state(state)
}
