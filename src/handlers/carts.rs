use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    errors::ApiError,
    services::commerce::{AddItemInput, CreateCartInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_to_cart))
        .route("/:id/items/:item_id", put(update_cart_item))
        .route("/:id/items/:item_id", delete(remove_cart_item))
        .route("/:id/clear", post(clear_cart))
        .route("/:id/discounts", post(apply_discount))
        .route("/:id/discounts/:code", delete(remove_discount))
        .route("/:id/gift-cards", post(apply_gift_card))
        .route("/:id/gift-cards/:code", delete(remove_gift_card))
        .route("/:id/validate-stock", post(validate_stock))
        .route("/:id/merge", post(merge_guest_cart))
}

/// Create a new cart
async fn create_cart(
    State(state): State<AppState>,
    Json(payload): Json<CreateCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let input = CreateCartInput {
        session_id: payload.session_id,
        customer_id: payload.customer_id,
        currency: payload.currency,
        metadata: payload.metadata,
    };

    let cart = state
        .services
        .cart
        .create_cart(input)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(cart))
}

/// Get cart with items and applied codes
async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let detail = state
        .services
        .cart
        .get_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(detail))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = AddItemInput {
        product_id: payload.product_id,
        variant_id: payload.variant_id,
        quantity: payload.quantity,
        personalization: payload.personalization,
        metadata: payload.metadata,
    };

    let cart = state
        .services
        .cart
        .add_item(cart_id, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Update cart item quantity; zero or negative removes the line
async fn update_cart_item(
    State(state): State<AppState>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .update_item_quantity(cart_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(cart_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Clear all items and codes from a cart
async fn clear_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .clear_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Apply a discount code
async fn apply_discount(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyCodeRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .apply_discount(cart_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a discount code
async fn remove_discount(
    State(state): State<AppState>,
    Path((cart_id, code)): Path<(Uuid, String)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_discount(cart_id, &code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Apply a gift card
async fn apply_gift_card(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyCodeRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .apply_gift_card(cart_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a gift card
async fn remove_gift_card(
    State(state): State<AppState>,
    Path((cart_id, code)): Path<(Uuid, String)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_gift_card(cart_id, &code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Authoritative stock check; the checkout gate.
async fn validate_stock(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let shortfalls = state
        .services
        .cart
        .validate_stock(cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(StockValidationResponse {
        valid: shortfalls.is_empty(),
        shortfalls,
    }))
}

/// Merge a guest cart into a customer's cart on login
async fn merge_guest_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<MergeCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .merge_guest_cart(cart_id, payload.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

// Request/response DTOs

#[derive(Debug, Deserialize)]
pub struct CreateCartRequest {
    pub session_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub currency: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub personalization: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCodeRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeCartRequest {
    pub customer_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StockValidationResponse {
    pub valid: bool,
    pub shortfalls: Vec<crate::errors::StockShortfall>,
}
