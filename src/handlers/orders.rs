use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::{validation_messages, AppState},
    repositories::PageRequest,
    services::orders::{CancelOrderRequest, CreateOrderRequest, OrderResponse},
    ApiResponse, ApiResult, ListQuery, PaginatedResponse,
};

/// Checks out the caller's cart.
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(
                &validation_errors,
            ))),
        ));
    }

    let order = state
        .orders
        .create_order_from_cart(auth_user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// The caller's own orders, newest first.
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let page = PageRequest::from(&query);
    let (items, total) = state
        .orders
        .list_user_orders(auth_user.user_id, page)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page,
    ))))
}

pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.orders.get_order(&auth_user, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Get order by its public order code
pub async fn get_order_by_code(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(code): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state.orders.get_order_by_code(&auth_user, &code).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order that has not shipped yet; stock goes back on the shelf.
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(
                &validation_errors,
            ))),
        ));
    }

    let order = state
        .orders
        .cancel_order(&auth_user, id, &request.reason)
        .await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(order))))
}
