//! Integration tests for the checkout orchestrator: reservation,
//! authoritative pricing, soft coupon evaluation, gift cards, shipping
//! updates, and cancellation.
//!
//! Run with `cargo test --features db-tests`.

mod common;

use chrono::Utc;
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use atelier_api::entities::commerce::{product_variant, CouponKind};
use atelier_api::entities::inventory_reservation::{self, ReservationStatus};
use atelier_api::entities::order::OrderStatus;
use atelier_api::entities::{InventoryReservation, Order};
use atelier_api::errors::ServiceError;
use atelier_api::services::commerce::{
    AddItemInput, Address, CreateCartInput, CreateIntentInput, ShippingMethod,
};

fn test_address() -> Address {
    Address {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        company: None,
        address_line_1: "12 Rue de la Paix".into(),
        address_line_2: None,
        city: "Paris".into(),
        province: "IDF".into(),
        country_code: "FR".into(),
        postal_code: "75002".into(),
        phone: None,
    }
}

fn intent_input(cart_id: Uuid) -> CreateIntentInput {
    CreateIntentInput {
        cart_id,
        email: "ada@example.com".into(),
        customer_id: None,
        shipping_address: test_address(),
        billing_address: None,
        shipping_method: ShippingMethod::Standard,
        discount_codes: None,
        gift_card_codes: None,
    }
}

async fn cart_with_variant(
    app: &TestApp,
    price: Decimal,
    quantity: i32,
    stock: i32,
) -> (Uuid, Uuid) {
    let product = app.seed_product("Grained Calfskin Bag", price).await;
    let variant = app.seed_variant(product.id, price, stock).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(
            cart.id,
            AddItemInput {
                product_id: product.id,
                variant_id: Some(variant.id),
                quantity,
                personalization: None,
                metadata: None,
            },
        )
        .await
        .unwrap();

    (cart.id, variant.id)
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn simple_checkout_freezes_totals_and_reserves_stock() {
    let app = TestApp::new().await;
    let (cart_id, variant_id) = cart_with_variant(&app, dec!(50), 2, 10).await;

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(intent_input(cart_id))
        .await
        .unwrap();

    // subtotal 100, free shipping at the threshold, 8% tax.
    assert_eq!(receipt.amount, dec!(108.00));
    assert!(receipt.client_secret.is_some());
    assert!(receipt.order_number.starts_with("ATL-"));
    assert!(receipt.skipped_codes.is_empty());

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.subtotal, dec!(100));
    assert_eq!(detail.order.tax_total, dec!(8.00));
    assert_eq!(detail.order.shipping_total, Decimal::ZERO);
    assert_eq!(detail.order.total, dec!(108.00));
    assert!(detail.order.payment_intent_id.is_some());
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].quantity, 2);
    assert_eq!(detail.items[0].unit_price, dec!(50));

    // Reservation, not deduction.
    let variant = atelier_api::entities::commerce::ProductVariant::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.inventory_reserved, 2);
    assert_eq!(variant.inventory_quantity, 10);

    // The cart has converted.
    let cart = app
        .state
        .services
        .cart
        .get_cart_model(cart_id)
        .await
        .unwrap();
    assert_eq!(
        cart.status,
        atelier_api::entities::commerce::CartStatus::Converted
    );
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn out_of_stock_checkout_aborts_without_side_effects() {
    let app = TestApp::new().await;
    let (cart_id, variant_id) = cart_with_variant(&app, dec!(120), 1, 0).await;

    let err = app
        .state
        .services
        .checkout
        .create_intent(intent_input(cart_id))
        .await
        .unwrap_err();

    match err {
        ServiceError::InsufficientStock(shortfalls) => {
            assert_eq!(shortfalls.len(), 1);
            assert_eq!(shortfalls[0].variant_id, Some(variant_id));
            assert_eq!(shortfalls[0].available, 0);
        }
        other => panic!("expected stock conflict, got {:?}", other),
    }

    // All-or-nothing: no order row, no reservation, counter untouched.
    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert!(orders.is_empty());
    let reservations = InventoryReservation::find().all(&*app.state.db).await.unwrap();
    assert!(reservations.is_empty());
    let variant = atelier_api::entities::commerce::ProductVariant::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.inventory_reserved, 0);

    // The cart survives for a retry.
    let cart = app
        .state
        .services
        .cart
        .get_cart_model(cart_id)
        .await
        .unwrap();
    assert_eq!(
        cart.status,
        atelier_api::entities::commerce::CartStatus::Active
    );
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn catalog_price_change_beyond_tolerance_is_a_conflict() {
    let app = TestApp::new().await;
    let (cart_id, variant_id) = cart_with_variant(&app, dec!(200), 1, 5).await;

    // Reprice the variant after the cart captured 200.
    product_variant::ActiveModel {
        id: Set(variant_id),
        price: Set(dec!(250)),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .update(&*app.state.db)
    .await
    .unwrap();

    let err = app
        .state
        .services
        .checkout
        .create_intent(intent_input(cart_id))
        .await
        .unwrap_err();

    match err {
        ServiceError::PriceConflict {
            cart_price,
            catalog_price,
            ..
        } => {
            assert_eq!(cart_price, dec!(200));
            assert_eq!(catalog_price, dec!(250));
        }
        other => panic!("expected price conflict, got {:?}", other),
    }

    // The conflict aborts the transaction, including the reservation.
    let variant = atelier_api::entities::commerce::ProductVariant::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.inventory_reserved, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn failing_coupons_are_skipped_not_fatal() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(50), 2, 10).await;
    app.seed_coupon("SPEND500", CouponKind::Fixed, dec!(100), Some(dec!(500)))
        .await;

    let mut input = intent_input(cart_id);
    input.discount_codes = Some(vec!["SPEND500".into(), "NOSUCHCODE".into()]);

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(input)
        .await
        .unwrap();

    // Both codes fail; the order proceeds unaffected.
    assert_eq!(receipt.amount, dec!(108.00));
    assert_eq!(receipt.skipped_codes.len(), 2);

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.discount_total, Decimal::ZERO);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn valid_coupon_reduces_the_charge() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(100), 2, 10).await;
    app.seed_coupon("TEN", CouponKind::Percentage, dec!(10), None)
        .await;

    let mut input = intent_input(cart_id);
    input.discount_codes = Some(vec!["TEN".into()]);

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(input)
        .await
        .unwrap();

    // subtotal 200, discount 20, taxable 180, tax 14.40, free shipping.
    assert_eq!(receipt.amount, dec!(194.40));

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.discount_total, dec!(20));
    assert_eq!(detail.order.tax_total, dec!(14.40));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn gift_card_reduces_charge_and_is_debited() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(50), 2, 10).await;
    let card = app.seed_gift_card("GC-TWENTY", dec!(20)).await;

    let mut input = intent_input(cart_id);
    input.gift_card_codes = Some(vec!["GC-TWENTY".into()]);

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(input)
        .await
        .unwrap();

    // total 108 minus the 20 gift card.
    assert_eq!(receipt.amount, dec!(88.00));

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.gift_card_total, dec!(20));
    assert_eq!(detail.order.total, dec!(108.00));

    let card = atelier_api::entities::commerce::GiftCard::find_by_id(card.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card.balance, Decimal::ZERO);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn fully_gift_funded_order_needs_no_payment_intent() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(50), 1, 10).await;
    app.seed_gift_card("GC-BIG", dec!(500)).await;

    let mut input = intent_input(cart_id);
    input.gift_card_codes = Some(vec!["GC-BIG".into()]);

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(input)
        .await
        .unwrap();

    assert_eq!(receipt.amount, Decimal::ZERO);
    assert!(receipt.client_secret.is_none());

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Confirmed);
    assert!(detail.order.payment_intent_id.is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn shipping_update_recomputes_total_before_payment() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(50), 2, 10).await;

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(intent_input(cart_id))
        .await
        .unwrap();
    assert_eq!(receipt.amount, dec!(108.00));

    let update = app
        .state
        .services
        .checkout
        .update_shipping(receipt.order_id, ShippingMethod::Express)
        .await
        .unwrap();

    assert!(update.success);
    assert_eq!(update.shipping_total, dec!(25));
    // Frozen subtotal 100 + tax 8 + new shipping 25.
    assert_eq!(update.new_total, dec!(133.00));

    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.shipping_method, "express");
    assert_eq!(detail.order.total, dec!(133.00));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn cancellation_releases_holds_and_restores_gift_cards() {
    let app = TestApp::new().await;
    let (cart_id, variant_id) = cart_with_variant(&app, dec!(50), 2, 10).await;
    let card = app.seed_gift_card("GC-CANCEL", dec!(30)).await;

    let mut input = intent_input(cart_id);
    input.gift_card_codes = Some(vec!["GC-CANCEL".into()]);
    let receipt = app
        .state
        .services
        .checkout
        .create_intent(input)
        .await
        .unwrap();

    let cancelled = app
        .state
        .services
        .checkout
        .cancel_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let variant = atelier_api::entities::commerce::ProductVariant::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.inventory_reserved, 0);

    let card = atelier_api::entities::commerce::GiftCard::find_by_id(card.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card.balance, dec!(30));

    let reservations = InventoryReservation::find()
        .filter(inventory_reservation::Column::OrderId.eq(receipt.order_id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(reservations
        .iter()
        .all(|r| r.status == ReservationStatus::Released));

    // A cancelled order cannot be cancelled again.
    let err = app
        .state
        .services
        .checkout
        .cancel_order(receipt.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn expired_pending_reservations_are_swept() {
    let app = TestApp::new().await;
    let (cart_id, variant_id) = cart_with_variant(&app, dec!(50), 1, 5).await;

    let receipt = app
        .state
        .services
        .checkout
        .create_intent(intent_input(cart_id))
        .await
        .unwrap();

    // Force the reservation into the past.
    let reservation = InventoryReservation::find()
        .filter(inventory_reservation::Column::OrderId.eq(receipt.order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    inventory_reservation::ActiveModel {
        id: Set(reservation.id),
        expires_at: Set(Utc::now() - chrono::Duration::minutes(5)),
        ..Default::default()
    }
    .update(&*app.state.db)
    .await
    .unwrap();

    let result = app
        .state
        .services
        .checkout
        .release_expired_reservations()
        .await
        .unwrap();

    assert_eq!(result.released_orders, 1);
    assert_eq!(result.released_quantity, 1);

    let variant = atelier_api::entities::commerce::ProductVariant::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.inventory_reserved, 0);

    // The order itself stays Pending; abandoned-order cleanup is an
    // operational concern, the stock is what must come back.
    let detail = app
        .state
        .services
        .checkout
        .get_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn rpc_binding_reaches_the_same_orchestrator() {
    let app = TestApp::new().await;
    let (cart_id, _) = cart_with_variant(&app, dec!(50), 2, 10).await;

    let response = app
        .request(
            axum::http::Method::POST,
            "/api/v1/rpc",
            Some(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "checkout.create_intent",
                "params": {
                    "cart_id": cart_id,
                    "email": "ada@example.com",
                    "shipping_address": {
                        "first_name": "Ada",
                        "last_name": "Lovelace",
                        "address_line_1": "12 Rue de la Paix",
                        "city": "Paris",
                        "province": "IDF",
                        "country_code": "FR",
                        "postal_code": "75002"
                    },
                    "shipping_method": "standard"
                }
            })),
        )
        .await;

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert!(body["error"].is_null());
    let amount: Decimal = body["result"]["amount"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(amount, dec!(108.00));
    assert!(body["result"]["order_number"]
        .as_str()
        .unwrap()
        .starts_with("ATL-"));
}
