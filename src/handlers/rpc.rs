//! RPC transport binding for checkout.
//!
//! The storefront's server runtime calls checkout over an internal RPC
//! channel; browsers use the REST routes. Both adapters decode, validate,
//! and delegate to the same `CheckoutService` functions, so the business
//! logic is never duplicated per transport.

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::handlers::checkout::CreateIntentRequest;
use crate::services::commerce::ShippingMethod;
use crate::AppState;

pub fn rpc_routes() -> Router<AppState> {
    Router::new().route("/", post(dispatch))
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

const INVALID_PARAMS: i64 = -32602;
const METHOD_NOT_FOUND: i64 = -32601;

impl RpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i64, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
        }
    }

    fn from_service_error(id: Option<Value>, err: ServiceError) -> Self {
        let code = err.status_code().as_u16() as i64;
        let data = err.details();
        Self::error(id, code, err.response_message(), data)
    }
}

#[derive(Debug, Deserialize)]
struct UpdateShippingParams {
    order_id: Uuid,
    shipping_method: ShippingMethod,
}

async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<RpcRequest>,
) -> impl IntoResponse {
    let RpcRequest { id, method, params } = request;

    let response = match method.as_str() {
        "checkout.create_intent" => create_intent(&state, id.clone(), params).await,
        "checkout.update_shipping" => update_shipping(&state, id.clone(), params).await,
        other => RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", other),
            None,
        ),
    };

    Json(response)
}

async fn create_intent(state: &AppState, id: Option<Value>, params: Value) -> RpcResponse {
    let request: CreateIntentRequest = match serde_json::from_value(params) {
        Ok(request) => request,
        Err(err) => {
            return RpcResponse::error(id, INVALID_PARAMS, err.to_string(), None);
        }
    };
    if let Err(err) = request.validate() {
        return RpcResponse::error(id, INVALID_PARAMS, err.to_string(), None);
    }

    match state.services.checkout.create_intent(request.into_input()).await {
        Ok(receipt) => RpcResponse::result(
            id,
            serde_json::to_value(receipt).unwrap_or(Value::Null),
        ),
        Err(err) => RpcResponse::from_service_error(id, err),
    }
}

async fn update_shipping(state: &AppState, id: Option<Value>, params: Value) -> RpcResponse {
    let params: UpdateShippingParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => {
            return RpcResponse::error(id, INVALID_PARAMS, err.to_string(), None);
        }
    };

    match state
        .services
        .checkout
        .update_shipping(params.order_id, params.shipping_method)
        .await
    {
        Ok(update) => RpcResponse::result(
            id,
            serde_json::to_value(update).unwrap_or(Value::Null),
        ),
        Err(err) => RpcResponse::from_service_error(id, err),
    }
}
