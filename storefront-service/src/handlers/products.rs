use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{CreateProductRequest, ProductResponse};
use crate::middleware::AdminPrincipal;
use crate::models::{Product, Variant};
use crate::AppState;

/// Catalog read: current price and per-variant stock.
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, AppError> {
    let product = state
        .repositories
        .products
        .get_product(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product {} not found", id)))?;

    Ok(Json(product.into()))
}

pub async fn create_product(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    payload.validate()?;

    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: payload.name,
        image: payload.image,
        price: payload.price,
        variants: payload
            .variants
            .into_iter()
            .map(|v| Variant {
                size: v.size,
                color: v.color,
                stock: v.stock,
            })
            .collect(),
        created_at: Utc::now(),
    };

    state
        .repositories
        .products
        .insert_product(product.clone())
        .await?;

    tracing::info!(product_id = %product.id, admin = %admin.user_id, "Product created");
    Ok((StatusCode::CREATED, Json(product.into())))
}
