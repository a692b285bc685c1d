use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::orders::{CheckoutRequest, OrderResponse};
use crate::middleware::CurrentPrincipal;
use crate::AppState;

/// Checkout. Prices, discount and shipping are computed server-side.
pub async fn place_order(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    payload.validate()?;

    let order = state.orders.place_order(&principal, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

pub async fn my_orders(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = state.orders.list_for_user(&principal).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

/// Visible to the owner and to administrators.
pub async fn get_order(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.get_order(&id, &principal).await?;
    Ok(Json(order.into()))
}
