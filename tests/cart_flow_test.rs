//! Integration tests for the cart engine: deterministic line identity,
//! derived totals, discount gating, and guest-cart merge.
//!
//! These tests require the in-memory SQLite database; run them with
//! `cargo test --features db-tests`.

mod common;

use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use atelier_api::entities::commerce::CouponKind;
use atelier_api::errors::ServiceError;
use atelier_api::services::commerce::{AddItemInput, CreateCartInput};

fn add_input(product_id: Uuid, variant_id: Option<Uuid>, quantity: i32) -> AddItemInput {
    AddItemInput {
        product_id,
        variant_id,
        quantity,
        personalization: None,
        metadata: None,
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn adding_same_variant_twice_bumps_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cashmere Throw", dec!(95)).await;
    let variant = app.seed_variant(product.id, dec!(95), 10).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();

    cart_service
        .add_item(cart.id, add_input(product.id, Some(variant.id), 1))
        .await
        .unwrap();
    let updated = cart_service
        .add_item(cart.id, add_input(product.id, Some(variant.id), 1))
        .await
        .unwrap();

    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert_eq!(detail.items.len(), 1, "same line must collapse, not duplicate");
    assert_eq!(detail.items[0].quantity, 2);
    assert_eq!(updated.item_count, 2);
    assert_eq!(updated.subtotal, dec!(190));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn personalization_creates_a_distinct_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Leather Tote", dec!(450)).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();

    cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();
    cart_service
        .add_item(
            cart.id,
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 1,
                personalization: Some(json!({"monogram": "AB"})),
                metadata: None,
            },
        )
        .await
        .unwrap();

    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert_eq!(detail.items.len(), 2);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn zero_or_negative_quantity_removes_the_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Silk Scarf", dec!(120)).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, None, 2))
        .await
        .unwrap();

    let detail = cart_service.get_cart(cart.id).await.unwrap();
    let item_id = detail.items[0].id;

    let updated = cart_service
        .update_item_quantity(cart.id, item_id, 0)
        .await
        .unwrap();
    assert_eq!(updated.item_count, 0);
    assert_eq!(updated.subtotal, Decimal::ZERO);

    // Re-add and drive below zero; never a negative-quantity line.
    cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();
    let detail = cart_service.get_cart(cart.id).await.unwrap();
    let item_id = detail.items[0].id;
    cart_service
        .update_item_quantity(cart.id, item_id, -1)
        .await
        .unwrap();
    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert!(detail.items.is_empty());
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn totals_track_threshold_and_tax() {
    let app = TestApp::new().await;
    let product = app.seed_product("Wool Coat", dec!(99.99)).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();

    // Under the threshold: flat shipping.
    let updated = cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();
    assert_eq!(updated.shipping_total, dec!(10));

    // A second unit crosses the threshold: free shipping, tax on the
    // full subtotal.
    let updated = cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();
    assert_eq!(updated.subtotal, dec!(199.98));
    assert_eq!(updated.shipping_total, Decimal::ZERO);
    assert_eq!(updated.tax_total, dec!(16.00));
    assert_eq!(
        updated.total,
        updated.subtotal - updated.discount_total + updated.tax_total + updated.shipping_total
    );
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn discount_below_minimum_is_rejected_at_apply_time() {
    let app = TestApp::new().await;
    let product = app.seed_product("Candle", dec!(60)).await;
    app.seed_coupon("SPEND200", CouponKind::Fixed, dec!(50), Some(dec!(200)))
        .await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();

    let err = cart_service
        .apply_discount(cart.id, "SPEND200")
        .await
        .unwrap_err();
    match err {
        ServiceError::CouponRejected { code, reason } => {
            assert_eq!(code, "SPEND200");
            assert!(reason.contains("minimum"));
        }
        other => panic!("expected coupon rejection, got {:?}", other),
    }

    // The cart is untouched by the failed apply.
    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert!(detail.discounts.is_empty());
    assert_eq!(detail.cart.discount_total, Decimal::ZERO);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn applied_discount_contributes_zero_when_cart_shrinks_below_minimum() {
    let app = TestApp::new().await;
    let product = app.seed_product("Blazer", dec!(150)).await;
    app.seed_coupon("SPEND200", CouponKind::Fixed, dec!(50), Some(dec!(200)))
        .await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, None, 2))
        .await
        .unwrap();

    let updated = cart_service.apply_discount(cart.id, "SPEND200").await.unwrap();
    assert_eq!(updated.discount_total, dec!(50));

    // Dropping to one unit puts the subtotal below the minimum; the
    // code stays applied but contributes nothing.
    let detail = cart_service.get_cart(cart.id).await.unwrap();
    let item_id = detail.items[0].id;
    let updated = cart_service
        .update_item_quantity(cart.id, item_id, 1)
        .await
        .unwrap();
    assert_eq!(updated.subtotal, dec!(150));
    assert_eq!(updated.discount_total, Decimal::ZERO);

    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert_eq!(detail.discounts.len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn fixed_discount_never_drives_total_negative() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pocket Square", dec!(40)).await;
    app.seed_coupon("BIGSAVE", CouponKind::Fixed, dec!(500), None)
        .await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();

    let updated = cart_service.apply_discount(cart.id, "BIGSAVE").await.unwrap();
    assert_eq!(updated.discount_total, dec!(40));
    assert_eq!(updated.tax_total, Decimal::ZERO);
    // Only shipping survives on a fully discounted cart.
    assert_eq!(updated.total, dec!(10));
    assert!(updated.total >= Decimal::ZERO);
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn validate_stock_reports_per_line_shortfalls() {
    let app = TestApp::new().await;
    let product = app.seed_product("Limited Clutch", dec!(800)).await;
    let variant = app.seed_variant(product.id, dec!(800), 1).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, Some(variant.id), 3))
        .await
        .unwrap();

    let shortfalls = cart_service.validate_stock(cart.id).await.unwrap();
    assert_eq!(shortfalls.len(), 1);
    assert_eq!(shortfalls[0].requested, 3);
    assert_eq!(shortfalls[0].available, 1);
    assert_eq!(shortfalls[0].variant_id, Some(variant.id));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn guest_cart_merges_without_duplicating_existing_lines() {
    let app = TestApp::new().await;
    let product_a = app.seed_product("Product A", dec!(100)).await;
    let product_b = app.seed_product("Product B", dec!(50)).await;
    let customer = app.seed_customer("vip@example.com", None).await;

    let cart_service = &app.state.services.cart;

    // The customer already has B in their cart.
    let customer_cart = cart_service
        .create_cart(CreateCartInput {
            customer_id: Some(customer.id),
            ..Default::default()
        })
        .await
        .unwrap();
    cart_service
        .add_item(customer_cart.id, add_input(product_b.id, None, 1))
        .await
        .unwrap();

    // The guest cart holds A and B.
    let guest_cart = cart_service
        .create_cart(CreateCartInput {
            session_id: Some("guest-session".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    cart_service
        .add_item(guest_cart.id, add_input(product_a.id, None, 1))
        .await
        .unwrap();
    cart_service
        .add_item(guest_cart.id, add_input(product_b.id, None, 4))
        .await
        .unwrap();

    let merged = cart_service
        .merge_guest_cart(guest_cart.id, customer.id)
        .await
        .unwrap();
    assert_eq!(merged.id, customer_cart.id);

    let detail = cart_service.get_cart(customer_cart.id).await.unwrap();
    assert_eq!(detail.items.len(), 2, "A moved over; B not duplicated");

    let b_line = detail
        .items
        .iter()
        .find(|item| item.product_id == product_b.id)
        .unwrap();
    assert_eq!(
        b_line.quantity, 1,
        "the customer's existing line wins over the guest's"
    );

    // The guest cart is no longer active.
    let guest = cart_service.get_cart_model(guest_cart.id).await.unwrap();
    assert_ne!(
        guest.status,
        atelier_api::entities::commerce::CartStatus::Active
    );
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn merge_reowns_guest_cart_when_customer_has_none() {
    let app = TestApp::new().await;
    let product = app.seed_product("Belt", dec!(75)).await;
    let customer = app.seed_customer("new@example.com", None).await;

    let cart_service = &app.state.services.cart;
    let guest_cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(guest_cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();

    let merged = cart_service
        .merge_guest_cart(guest_cart.id, customer.id)
        .await
        .unwrap();
    assert_eq!(merged.id, guest_cart.id);
    assert_eq!(merged.customer_id, Some(customer.id));
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn clear_cart_empties_lines_and_codes() {
    let app = TestApp::new().await;
    let product = app.seed_product("Scented Candle", dec!(300)).await;
    app.seed_coupon("TEN", CouponKind::Percentage, dec!(10), None)
        .await;
    app.seed_gift_card("GC-CLEAR", dec!(25)).await;

    let cart_service = &app.state.services.cart;
    let cart = cart_service
        .create_cart(CreateCartInput::default())
        .await
        .unwrap();
    cart_service
        .add_item(cart.id, add_input(product.id, None, 1))
        .await
        .unwrap();
    cart_service.apply_discount(cart.id, "TEN").await.unwrap();
    cart_service.apply_gift_card(cart.id, "GC-CLEAR").await.unwrap();

    let cleared = cart_service.clear_cart(cart.id).await.unwrap();
    assert_eq!(cleared.subtotal, Decimal::ZERO);
    assert_eq!(cleared.total, Decimal::ZERO);
    assert_eq!(cleared.item_count, 0);

    let detail = cart_service.get_cart(cart.id).await.unwrap();
    assert!(detail.items.is_empty());
    assert!(detail.discounts.is_empty());
    assert!(detail.gift_cards.is_empty());
}

#[tokio::test]
#[cfg_attr(not(feature = "db-tests"), ignore)]
async fn cart_routes_round_trip_over_http() {
    let app = TestApp::new().await;
    let product = app.seed_product("Trench Coat", dec!(95)).await;

    let response = app
        .request(axum::http::Method::POST, "/api/v1/carts", Some(json!({})))
        .await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    let cart = TestApp::body_json(response).await;
    let cart_id = cart["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            Some(json!({"product_id": product.id, "quantity": 2})),
        )
        .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let updated = TestApp::body_json(response).await;
    assert_eq!(updated["item_count"], 2);

    let response = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/carts/{}/validate-stock", cart_id),
            None,
        )
        .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let validation = TestApp::body_json(response).await;
    assert_eq!(validation["valid"], true);
}
