use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{PaymentMethod, PaymentStatus},
    errors::ServiceError,
    handlers::{validation_messages, AppState},
    repositories::{OrderFilter, PageRequest},
    services::{
        orders::{parse_order_status, parse_payment_method, OrderResponse, UpdateOrderStatusRequest},
        payments::PaymentResponse,
    },
    ApiResponse, ApiResult, PaginatedResponse,
};

/// Query string of `GET /admin/orders`. Empty values mean "any".
#[derive(Debug, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_method: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AdminOrderQuery {
    fn filter(&self) -> Result<OrderFilter, ServiceError> {
        Ok(OrderFilter {
            user_id: None,
            status: non_empty(&self.status).map(parse_order_status).transpose()?,
            payment_status: non_empty(&self.payment_status)
                .map(|raw| {
                    PaymentStatus::from_str(raw).map_err(|_| {
                        ServiceError::InvalidInput(format!("Invalid payment status '{}'", raw))
                    })
                })
                .transpose()?,
            payment_method: non_empty(&self.payment_method)
                .map(parse_payment_method)
                .transpose()?,
        })
    }
}

/// Every order in the shop, filterable by status, payment status and method.
pub async fn list_all_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.limit);
    let (items, total) = state.orders.list_all_orders(filter, page).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page,
    ))))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(
                &validation_errors,
            ))),
        ));
    }

    let status = parse_order_status(&request.status)?;
    let order = state.orders.update_order_status(id, status).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(order))))
}

/// Records cash collected by the courier.
pub async fn confirm_cod_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state.payments.confirm_cod_payment(id).await?;
    Ok(Json(ApiResponse::success(payment)))
}
