use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{CouponResponse, CreateCouponRequest};
use crate::dtos::orders::{ValidateCouponRequest, ValidateCouponResponse};
use crate::middleware::{AdminPrincipal, CurrentPrincipal};
use crate::models::{Coupon, DiscountType};
use crate::AppState;

/// Check a coupon against a proposed order amount without consuming it.
pub async fn validate_coupon(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, AppError> {
    payload.validate()?;

    let decision = state
        .coupons
        .evaluate(&payload.code, payload.order_amount, &principal.user_id)
        .await?;

    Ok(Json(ValidateCouponResponse::from_decision(
        &payload.code,
        payload.order_amount,
        decision,
    )))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<CouponResponse>), AppError> {
    payload.validate()?;

    if payload.discount_type == DiscountType::Percentage
        && payload.discount_value > rust_decimal::Decimal::ONE_HUNDRED
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Percentage discount cannot exceed 100"
        )));
    }

    let coupon = Coupon {
        id: Uuid::new_v4().to_string(),
        code: Coupon::normalize_code(&payload.code),
        discount_type: payload.discount_type,
        discount_value: payload.discount_value,
        min_order_amount: payload.min_order_amount,
        max_uses: payload.max_uses,
        uses_per_user: payload.uses_per_user,
        expires_at: payload.expires_at,
        is_active: payload.is_active,
        created_at: Utc::now(),
    };

    state
        .repositories
        .coupons
        .insert_coupon(coupon.clone())
        .await?;

    tracing::info!(code = %coupon.code, admin = %admin.user_id, "Coupon created");
    Ok((StatusCode::CREATED, Json(coupon.into())))
}
