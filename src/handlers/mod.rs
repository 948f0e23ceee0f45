pub mod carts;
pub mod checkout;
pub mod common;
pub mod rpc;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payments::PaymentGateway;
use crate::services::commerce::{CartService, CheckoutService, DiscountService};
use crate::services::inventory::InventoryService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub discounts: Arc<DiscountService>,
    pub inventory: Arc<InventoryService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        let inventory = Arc::new(InventoryService::new(db.clone()));
        let discounts = Arc::new(DiscountService::new());
        let cart = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            inventory.clone(),
            discounts.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db,
            event_sender,
            gateway,
            inventory.clone(),
            discounts.clone(),
            config,
        ));

        Self {
            cart,
            checkout,
            discounts,
            inventory,
        }
    }
}
