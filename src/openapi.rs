//! OpenAPI document for the public surface.

use utoipa::OpenApi;

use crate::errors::{ErrorResponse, StockShortfall};
use crate::services::commerce::checkout_service::{
    Address, CheckoutReceipt, ShippingMethod, ShippingUpdate, SkippedCodeView,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Atelier Commerce API",
        description = "Carts, checkout, inventory reservation, and payment-intent orchestration for the Atelier storefront",
        license(name = "MIT")
    ),
    components(schemas(
        ErrorResponse,
        StockShortfall,
        Address,
        ShippingMethod,
        CheckoutReceipt,
        SkippedCodeView,
        ShippingUpdate,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds_and_serializes() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).expect("openapi doc should serialize");
        assert!(json.contains("Atelier Commerce API"));
        assert!(json.contains("StockShortfall"));
    }
}
