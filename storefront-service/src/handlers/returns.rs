use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::returns::{CreateReturnRequest, ReturnResponse, ReviewReturnRequest};
use crate::middleware::{AdminPrincipal, CurrentPrincipal};
use crate::services::returns::ReturnReview;
use crate::AppState;

pub async fn create_return(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<ReturnResponse>), AppError> {
    payload.validate()?;

    let request = state
        .returns
        .create(
            &principal,
            &payload.order_id,
            payload.items.into_iter().map(Into::into).collect(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// Own requests for shoppers, all requests for administrators.
pub async fn list_returns(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<Vec<ReturnResponse>>, AppError> {
    let requests = state.returns.list(&principal).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

pub async fn review_return(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path(id): Path<String>,
    Json(payload): Json<ReviewReturnRequest>,
) -> Result<Json<ReturnResponse>, AppError> {
    payload.validate()?;

    let review = ReturnReview {
        status: payload.status,
        refund_amount: payload.refund_amount,
        admin_note: payload.admin_note,
    };
    let request = state.returns.review(&id, review).await?;
    tracing::info!(return_id = %id, admin = %admin.user_id, "Return review recorded");
    Ok(Json(request.into()))
}
