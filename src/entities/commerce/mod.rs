/// Commerce entities module
pub mod cart;
pub mod cart_discount;
pub mod cart_gift_card;
pub mod cart_item;
pub mod coupon;
pub mod coupon_usage;
pub mod customer;
pub mod gift_card;
pub mod gift_card_redemption;
pub mod product;
pub mod product_variant;

// Re-export entities
pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_discount::{Entity as CartDiscount, Model as CartDiscountModel};
pub use cart_gift_card::{Entity as CartGiftCard, Model as CartGiftCardModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{CouponKind, Entity as Coupon, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsage, Model as CouponUsageModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use gift_card::{Entity as GiftCard, Model as GiftCardModel};
pub use gift_card_redemption::{Entity as GiftCardRedemption, Model as GiftCardRedemptionModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
