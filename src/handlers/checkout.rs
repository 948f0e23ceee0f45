use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input,
};
use crate::{
    errors::ApiError,
    services::commerce::{Address, CreateIntentInput, ShippingMethod},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_intent))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/shipping", put(update_shipping))
        .route("/orders/:id/cancel", post(cancel_order))
}

/// Create an order and a payment intent from a cart
async fn create_intent(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let receipt = state
        .services
        .checkout
        .create_intent(payload.into_input())
        .await
        .map_err(map_service_error)?;

    Ok(created_response(receipt))
}

/// Fetch an order with its line snapshots
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .services
        .checkout
        .get_order(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(detail))
}

/// Change the shipping method before payment completes
async fn update_shipping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateShippingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = state
        .services
        .checkout
        .update_shipping(id, payload.shipping_method)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(update))
}

/// Cancel a pending or confirmed order
async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .checkout
        .cancel_order(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddressRequest {
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
    pub company: Option<String>,
    #[validate(length(min = 1))]
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub province: String,
    #[validate(length(equal = 2))]
    pub country_code: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    pub phone: Option<String>,
}

impl From<AddressRequest> for Address {
    fn from(req: AddressRequest) -> Self {
        Address {
            first_name: req.first_name,
            last_name: req.last_name,
            company: req.company,
            address_line_1: req.address_line_1,
            address_line_2: req.address_line_2,
            city: req.city,
            province: req.province,
            country_code: req.country_code,
            postal_code: req.postal_code,
            phone: req.phone,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntentRequest {
    pub cart_id: Uuid,
    #[validate(email)]
    pub email: String,
    pub customer_id: Option<Uuid>,
    #[validate]
    pub shipping_address: AddressRequest,
    #[validate]
    pub billing_address: Option<AddressRequest>,
    pub shipping_method: ShippingMethod,
    pub discount_codes: Option<Vec<String>>,
    pub gift_card_codes: Option<Vec<String>>,
}

impl CreateIntentRequest {
    pub fn into_input(self) -> CreateIntentInput {
        CreateIntentInput {
            cart_id: self.cart_id,
            email: self.email,
            customer_id: self.customer_id,
            shipping_address: self.shipping_address.into(),
            billing_address: self.billing_address.map(Into::into),
            shipping_method: self.shipping_method,
            discount_codes: self.discount_codes,
            gift_card_codes: self.gift_card_codes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateShippingRequest {
    pub shipping_method: ShippingMethod,
}
