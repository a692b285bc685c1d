//! Gateway entry points.
//!
//! Browser-facing callbacks always answer with a redirect to the shopper
//! site; API endpoints answer with JSON or an error status.

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::payments::{
    EsewaCallbackQuery, InitiatePaymentRequest, KhaltiCallbackQuery, KhaltiVerifyRequest,
    PaymentVerificationResponse,
};
use crate::middleware::CurrentPrincipal;
use crate::services::gateways::KhaltiInitiateResponse;
use crate::services::payments::{EsewaInitiation, ReconcileOutcome};
use crate::AppState;

pub async fn esewa_initiate(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<EsewaInitiation>, AppError> {
    payload.validate()?;
    let initiation = state
        .payments
        .initiate_esewa(&payload.order_id, &principal)
        .await?;
    Ok(Json(initiation))
}

/// eSewa success redirect carrying the base64 `data` payload.
pub async fn esewa_callback(
    State(state): State<AppState>,
    Query(query): Query<EsewaCallbackQuery>,
) -> Redirect {
    let Some(data) = query.data.filter(|d| !d.is_empty()) else {
        tracing::warn!("eSewa callback without payload");
        return Redirect::to(&state.payments.failure_redirect(None, "missing_payload"));
    };

    match state.payments.confirm_esewa(&data).await {
        Ok(outcome) => Redirect::to(&state.payments.success_redirect(&outcome.order().id)),
        Err(e) => Redirect::to(&state.payments.failure_redirect(None, e.reason())),
    }
}

pub async fn khalti_initiate(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<KhaltiInitiateResponse>, AppError> {
    payload.validate()?;
    let initiated = state
        .payments
        .initiate_khalti(&payload.order_id, &principal)
        .await?;
    Ok(Json(initiated))
}

/// Khalti return URL. The query string is only used to find the order and
/// the `pidx`; the payment state comes from the lookup API.
pub async fn khalti_callback(
    State(state): State<AppState>,
    Query(query): Query<KhaltiCallbackQuery>,
) -> Redirect {
    let (Some(pidx), Some(order_id)) = (query.pidx, query.purchase_order_id) else {
        tracing::warn!("Khalti callback without pidx or purchase_order_id");
        return Redirect::to(&state.payments.failure_redirect(None, "missing_parameters"));
    };
    tracing::debug!(
        order_id = %order_id,
        reported_status = ?query.status,
        transaction_id = ?query.transaction_id,
        "Khalti callback received"
    );

    match state.payments.confirm_khalti(&pidx, &order_id).await {
        Ok(outcome) => Redirect::to(&state.payments.success_redirect(&outcome.order().id)),
        Err(e) => Redirect::to(&state.payments.failure_redirect(Some(&order_id), e.reason())),
    }
}

/// In-app confirmation: same lookup and transition as the redirect callback.
pub async fn khalti_verify(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<KhaltiVerifyRequest>,
) -> Result<Json<PaymentVerificationResponse>, AppError> {
    payload.validate()?;

    // Ownership check before talking to the gateway.
    state
        .orders
        .get_order(&payload.purchase_order_id, &principal)
        .await?;

    let outcome = state
        .payments
        .confirm_khalti(&payload.pidx, &payload.purchase_order_id)
        .await?;

    Ok(Json(verification_response(outcome)))
}

fn verification_response(outcome: ReconcileOutcome) -> PaymentVerificationResponse {
    let already_paid = outcome.already_paid();
    let order = outcome.order();
    PaymentVerificationResponse {
        success: true,
        order_id: order.id.clone(),
        already_paid,
        status: order.status,
        message: if already_paid {
            "Payment already confirmed".to_string()
        } else {
            "Payment confirmed".to_string()
        },
    }
}
