/// Commerce services module: the cart engine, discount evaluation, and
/// checkout orchestration.
pub mod cart_service;
pub mod checkout_service;
pub mod discount_service;
pub mod pricing;

// Re-export services for convenience
pub use cart_service::{AddItemInput, CartDetail, CartService, CreateCartInput};
pub use checkout_service::{
    Address, CheckoutReceipt, CheckoutService, CreateIntentInput, ShippingMethod, ShippingUpdate,
};
pub use discount_service::DiscountService;
