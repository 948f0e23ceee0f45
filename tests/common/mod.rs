use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use atelier_api::{
    config::AppConfig,
    db,
    entities::commerce::{coupon, customer, gift_card, product, product_variant, CouponKind},
    events::{self, EventSender},
    handlers::AppServices,
    payments::SandboxGateway,
    AppState,
};

/// Helper harness spinning up application state backed by an in-memory
/// SQLite database with migrations applied.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single pooled connection keeps the in-memory database shared
        // across all queries.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let cfg = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            Arc::new(SandboxGateway),
            cfg.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", atelier_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Decode a response body as JSON.
    pub async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        serde_json::from_slice(&bytes).expect("response body was not valid json")
    }

    /// Seed a product without variants.
    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            sku: Set(format!("SKU-{}", id.simple())),
            description: Set(None),
            price: Set(price),
            compare_at_price: Set(None),
            currency: Set("USD".to_string()),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    /// Seed a tracked variant with the given stock level.
    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        price: Decimal,
        stock: i32,
    ) -> product_variant::Model {
        let id = Uuid::new_v4();
        product_variant::ActiveModel {
            id: Set(id),
            product_id: Set(product_id),
            sku: Set(format!("VAR-{}", id.simple())),
            name: Set("Test Variant".to_string()),
            price: Set(price),
            compare_at_price: Set(None),
            options: Set(serde_json::json!({})),
            inventory_quantity: Set(stock),
            inventory_reserved: Set(0),
            inventory_tracking: Set(true),
            position: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed variant for tests")
    }

    /// Seed a customer projection.
    pub async fn seed_customer(&self, email: &str, tier: Option<&str>) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            membership_tier: Set(tier.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer for tests")
    }

    /// Seed an active coupon.
    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: CouponKind,
        value: Decimal,
        minimum_order_amount: Option<Decimal>,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            value: Set(value),
            minimum_order_amount: Set(minimum_order_amount),
            starts_at: Set(None),
            ends_at: Set(None),
            usage_limit: Set(None),
            usage_count: Set(0),
            per_customer_limit: Set(None),
            first_purchase_only: Set(false),
            membership_tier: Set(None),
            active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon for tests")
    }

    /// Seed a funded gift card.
    pub async fn seed_gift_card(&self, code: &str, balance: Decimal) -> gift_card::Model {
        gift_card::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            balance: Set(balance),
            currency: Set("USD".to_string()),
            active: Set(true),
            expires_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed gift card for tests")
    }
}
