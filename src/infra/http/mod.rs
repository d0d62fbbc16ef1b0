//! HTTP surface.
//!
//! Deliberately thin: handlers translate between the wire and the
//! application services and nothing else. The marketplace's CRUD breadth
//! lives in the services; the gate and cache policies are exercised through
//! these few routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::application::context::RequestContext;
use crate::application::error::AppError;
use crate::application::flash_sale::{Admission, FlashSaleService};
use crate::application::shops::ShopService;
use crate::domain::entities::{FlashSaleVoucherRecord, ShopRecord};
use crate::domain::error::DomainError;

#[derive(Clone)]
pub struct HttpState {
    pub shops: ShopService,
    pub flash_sale: FlashSaleService,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shops/{id}", get(get_shop).put(put_shop))
        .route("/vouchers", post(publish_voucher))
        .route("/vouchers/{id}", get(get_voucher))
        .route("/vouchers/{id}/orders", post(place_order))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn get_shop(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Json<ShopRecord>, AppError> {
    state
        .shops
        .shop_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| DomainError::not_found("shop").into())
}

async fn put_shop(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(shop): Json<ShopRecord>,
) -> Result<StatusCode, AppError> {
    if shop.id != id {
        return Err(DomainError::validation("path and body ids disagree").into());
    }
    state.shops.update_shop(&shop).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_voucher(
    State(state): State<HttpState>,
    Json(voucher): Json<FlashSaleVoucherRecord>,
) -> Result<StatusCode, AppError> {
    state.flash_sale.publish_voucher(voucher).await?;
    Ok(StatusCode::CREATED)
}

async fn get_voucher(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Json<FlashSaleVoucherRecord>, AppError> {
    state
        .flash_sale
        .voucher_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| DomainError::not_found("voucher").into())
}

#[derive(Serialize)]
struct OrderAccepted {
    order_id: u64,
}

async fn place_order(
    State(state): State<HttpState>,
    ctx: RequestContext,
    Path(voucher_id): Path<u64>,
) -> Result<Response, AppError> {
    let response = match state.flash_sale.place_order(ctx, voucher_id).await? {
        Admission::Admitted { order_id } => {
            (StatusCode::OK, Json(OrderAccepted { order_id })).into_response()
        }
        Admission::OutOfStock => (StatusCode::CONFLICT, "Sold out").into_response(),
        Admission::AlreadyOrdered => (StatusCode::CONFLICT, "Already ordered").into_response(),
    };
    Ok(response)
}
