//! Administrator endpoints: order lifecycle and the notification inbox.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::dtos::admin::{
    ListOrdersQuery, NotificationListResponse, UpdateOrderStatusRequest,
};
use crate::dtos::orders::OrderResponse;
use crate::middleware::AdminPrincipal;
use crate::AppState;

const DEFAULT_ORDER_LIMIT: i64 = 100;
const MAX_ORDER_LIMIT: i64 = 500;

pub async fn list_orders(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ORDER_LIMIT)
        .clamp(1, MAX_ORDER_LIMIT);
    let orders = state.orders.list_all(limit).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path(id): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.update_status(&id, payload.status).await?;
    tracing::info!(
        order_id = %id,
        admin = %admin.user_id,
        status = %order.status,
        "Order updated by admin"
    );
    Ok(Json(order.into()))
}

pub async fn issue_label(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.issue_label(&id).await?;
    Ok(Json(order.into()))
}

/// Newest first, with the unread total.
pub async fn list_notifications(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
) -> Result<Json<NotificationListResponse>, AppError> {
    let (notifications, unread_count) = state.inbox.list().await?;
    Ok(Json(NotificationListResponse {
        notifications: notifications.into_iter().map(Into::into).collect(),
        unread_count,
    }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.inbox.mark_read(&id).await?;
    Ok(Json(json!({ "id": id, "is_read": true })))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
) -> Result<Json<Value>, AppError> {
    let updated = state.inbox.mark_all_read().await?;
    Ok(Json(json!({ "updated": updated })))
}
