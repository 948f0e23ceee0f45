//! Shopping cart engine.
//!
//! The cart is a state container: every command mutates persisted state,
//! synchronously recomputes the derived totals from scratch, and emits an
//! event. Notification copy lives in the observer, never here.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::commerce::{
    cart, cart_discount, cart_gift_card, cart_item, Cart, CartDiscountModel, CartGiftCardModel,
    CartItem, CartItemModel, CartModel, Product, ProductVariant,
};
use crate::errors::{ServiceError, StockShortfall};
use crate::events::{Event, EventSender};
use crate::services::commerce::pricing::{
    self, derive_totals, CartTotals, DiscountTerms, LineAmounts, PricingSettings,
};
use crate::services::inventory::{InventoryService, StockRequest};

const CART_TTL_DAYS: i64 = 30;

/// Input for creating a cart
#[derive(Debug, Default, Deserialize)]
pub struct CreateCartInput {
    pub session_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub currency: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for adding an item to a cart
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub personalization: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// Cart with its lines and applied codes
#[derive(Debug, Serialize)]
pub struct CartDetail {
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
    pub discounts: Vec<CartDiscountModel>,
    pub gift_cards: Vec<CartGiftCardModel>,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    inventory: Arc<InventoryService>,
    discounts: Arc<crate::services::commerce::discount_service::DiscountService>,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        inventory: Arc<InventoryService>,
        discounts: Arc<crate::services::commerce::discount_service::DiscountService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            inventory,
            discounts,
            config,
        }
    }

    fn pricing_settings(&self) -> PricingSettings {
        PricingSettings::from(&self.config.commerce)
    }

    /// Creates a new cart with zeroed totals and a 30-day expiry.
    #[instrument(skip(self))]
    pub async fn create_cart(&self, input: CreateCartInput) -> Result<CartModel, ServiceError> {
        let cart_id = Uuid::new_v4();
        let now = Utc::now();

        let cart = cart::ActiveModel {
            id: Set(cart_id),
            session_id: Set(input.session_id),
            customer_id: Set(input.customer_id),
            currency: Set(input
                .currency
                .unwrap_or_else(|| self.config.commerce.currency.clone())),
            subtotal: Set(Decimal::ZERO),
            discount_total: Set(Decimal::ZERO),
            tax_total: Set(Decimal::ZERO),
            shipping_total: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            item_count: Set(0),
            metadata: Set(input.metadata),
            status: Set(cart::CartStatus::Active),
            expires_at: Set(now + Duration::days(CART_TTL_DAYS)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let cart = cart.insert(&*self.db).await?;
        self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;

        info!(%cart_id, "Created cart");
        Ok(cart)
    }

    /// Loads a cart with its lines and applied codes.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartDetail, ServiceError> {
        let cart = self.get_cart_model(cart_id).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;
        let discounts = cart
            .find_related(crate::entities::commerce::CartDiscount)
            .all(&*self.db)
            .await?;
        let gift_cards = cart
            .find_related(crate::entities::commerce::CartGiftCard)
            .all(&*self.db)
            .await?;

        Ok(CartDetail {
            cart,
            items,
            discounts,
            gift_cards,
        })
    }

    pub async fn get_cart_model(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
    }

    async fn active_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if cart.status != cart::CartStatus::Active {
            return Err(ServiceError::InvalidOperation(
                "Cart is not active".to_string(),
            ));
        }
        Ok(cart)
    }

    /// Adds an item, or bumps the quantity of the line with the same
    /// deterministic identity (product, variant, personalization).
    #[instrument(skip(self, input))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartModel, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        self.active_cart(&txn, cart_id).await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        // Price is captured server-side at add time; the variant's price
        // wins over the product's when a variant is chosen.
        let (unit_price, compare_at_price) = match input.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Variant {} not found", variant_id))
                    })?;
                if variant.product_id != product.id {
                    return Err(ServiceError::InvalidOperation(
                        "Variant does not belong to this product".to_string(),
                    ));
                }
                (variant.price, variant.compare_at_price)
            }
            None => (product.price, product.compare_at_price),
        };

        let line_key = pricing::line_key(
            input.product_id,
            input.variant_id,
            input.personalization.as_ref(),
        );
        let now = Utc::now();

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::LineKey.eq(line_key.clone()))
            .one(&txn)
            .await?;

        let (item_id, quantity) = if let Some(item) = existing {
            let new_quantity = item.quantity + input.quantity;
            let unit_price = item.unit_price;
            let item_id = item.id;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(new_quantity);
            item.line_total = Set(unit_price * Decimal::from(new_quantity));
            item.updated_at = Set(now);
            item.update(&txn).await?;
            (item_id, new_quantity)
        } else {
            let item_id = Uuid::new_v4();
            cart_item::ActiveModel {
                id: Set(item_id),
                cart_id: Set(cart_id),
                line_key: Set(line_key),
                product_id: Set(input.product_id),
                variant_id: Set(input.variant_id),
                quantity: Set(input.quantity),
                unit_price: Set(unit_price),
                compare_at_price: Set(compare_at_price),
                line_total: Set(unit_price * Decimal::from(input.quantity)),
                personalization: Set(input.personalization),
                metadata: Set(input.metadata),
                added_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            (item_id, input.quantity)
        };

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                item_id,
                product_name: product.name,
                quantity,
            })
            .await;

        Ok(updated)
    }

    /// Updates a line's quantity; zero or negative removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(cart_id, item_id).await;
        }

        let txn = self.db.begin().await?;
        self.active_cart(&txn, cart_id).await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if item.cart_id != cart_id {
            return Err(ServiceError::InvalidOperation(
                "Item does not belong to this cart".to_string(),
            ));
        }

        let unit_price = item.unit_price;
        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.line_total = Set(unit_price * Decimal::from(quantity));
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id,
                item_id,
                quantity,
            })
            .await;

        Ok(updated)
    }

    /// Removes a line entirely.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        self.active_cart(&txn, cart_id).await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if item.cart_id != cart_id {
            return Err(ServiceError::InvalidOperation(
                "Item does not belong to this cart".to_string(),
            ));
        }

        let product_name = Product::find_by_id(item.product_id)
            .one(&txn)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| "Item".to_string());

        CartItem::delete_by_id(item_id).exec(&txn).await?;

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id,
                item_id,
                product_name,
            })
            .await;

        Ok(updated)
    }

    /// Empties the cart: lines, discount codes, and gift cards.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        self.active_cart(&txn, cart_id).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
        crate::entities::commerce::CartDiscount::delete_many()
            .filter(cart_discount::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
        crate::entities::commerce::CartGiftCard::delete_many()
            .filter(cart_gift_card::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        info!(%cart_id, "Cleared cart");
        Ok(updated)
    }

    /// Applies a discount code. Validation is a hard gate: on failure the
    /// cart is untouched and the rejection reason surfaces to the caller.
    #[instrument(skip(self))]
    pub async fn apply_discount(
        &self,
        cart_id: Uuid,
        raw_code: &str,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.active_cart(&txn, cart_id).await?;

        let terms = self
            .discounts
            .validate_coupon(&txn, raw_code, cart.customer_id, cart.subtotal)
            .await?;

        let already_applied = crate::entities::commerce::CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart_id))
            .filter(cart_discount::Column::Code.eq(terms.code.clone()))
            .one(&txn)
            .await?;
        if already_applied.is_some() {
            return Err(ServiceError::CouponRejected {
                code: terms.code,
                reason: "code is already applied".into(),
            });
        }

        cart_discount::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            code: Set(terms.code.clone()),
            kind: Set(terms.kind),
            value: Set(terms.value),
            minimum_order_amount: Set(terms.minimum_order_amount),
            applied_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::DiscountApplied {
                cart_id,
                code: terms.code,
            })
            .await;

        Ok(updated)
    }

    /// Removes an applied discount code.
    #[instrument(skip(self))]
    pub async fn remove_discount(
        &self,
        cart_id: Uuid,
        raw_code: &str,
    ) -> Result<CartModel, ServiceError> {
        let code =
            crate::services::commerce::discount_service::DiscountService::normalize_code(raw_code);

        let txn = self.db.begin().await?;
        self.active_cart(&txn, cart_id).await?;

        let deleted = crate::entities::commerce::CartDiscount::delete_many()
            .filter(cart_discount::Column::CartId.eq(cart_id))
            .filter(cart_discount::Column::Code.eq(code.clone()))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Code {} is not applied to this cart",
                code
            )));
        }

        let updated = self.recalculate_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::DiscountRemoved { cart_id, code })
            .await;

        Ok(updated)
    }

    /// Attaches a gift card after an authoritative balance check. Gift
    /// cards never change cart totals; they reduce the charged amount at
    /// checkout.
    #[instrument(skip(self))]
    pub async fn apply_gift_card(
        &self,
        cart_id: Uuid,
        raw_code: &str,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.active_cart(&txn, cart_id).await?;

        let card = self.discounts.validate_gift_card(&txn, raw_code).await?;

        let already_applied = crate::entities::commerce::CartGiftCard::find()
            .filter(cart_gift_card::Column::CartId.eq(cart_id))
            .filter(cart_gift_card::Column::Code.eq(card.code.clone()))
            .one(&txn)
            .await?;
        if already_applied.is_some() {
            return Err(ServiceError::GiftCardRejected {
                code: card.code,
                reason: "gift card is already applied".into(),
            });
        }

        cart_gift_card::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            code: Set(card.code.clone()),
            applied_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::GiftCardApplied {
                cart_id,
                code: card.code,
            })
            .await;

        Ok(cart)
    }

    /// Detaches a gift card from the cart.
    #[instrument(skip(self))]
    pub async fn remove_gift_card(
        &self,
        cart_id: Uuid,
        raw_code: &str,
    ) -> Result<CartModel, ServiceError> {
        let code =
            crate::services::commerce::discount_service::DiscountService::normalize_code(raw_code);

        let cart = self.get_cart_model(cart_id).await?;
        let deleted = crate::entities::commerce::CartGiftCard::delete_many()
            .filter(cart_gift_card::Column::CartId.eq(cart_id))
            .filter(cart_gift_card::Column::Code.eq(code.clone()))
            .exec(&*self.db)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Gift card {} is not applied to this cart",
                code
            )));
        }

        self.event_sender
            .send_or_log(Event::GiftCardRemoved { cart_id, code })
            .await;

        Ok(cart)
    }

    /// Authoritative stock check of every line. An empty result means the
    /// cart can proceed to checkout; otherwise each unavailable line is
    /// reported with its current availability.
    #[instrument(skip(self))]
    pub async fn validate_stock(
        &self,
        cart_id: Uuid,
    ) -> Result<Vec<StockShortfall>, ServiceError> {
        let cart = self.get_cart_model(cart_id).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;

        let requests: Vec<StockRequest> = items
            .iter()
            .map(|item| StockRequest {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect();

        let shortfalls = self.inventory.check_lines(&*self.db, &requests).await?;
        if !shortfalls.is_empty() {
            self.event_sender
                .send_or_log(Event::StockValidationFailed {
                    cart_id,
                    lines: shortfalls.clone(),
                })
                .await;
        }

        Ok(shortfalls)
    }

    /// Merges a guest cart into a customer's cart on login. Guest lines
    /// whose (product, variant) pair already exists in the customer cart
    /// are dropped; the customer's lines win. When the customer has no
    /// active cart, the guest cart is simply re-owned.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        guest_cart_id: Uuid,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        let guest_cart = self.active_cart(&txn, guest_cart_id).await?;

        let customer_cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .filter(cart::Column::Id.ne(guest_cart_id))
            .one(&txn)
            .await?;

        let Some(customer_cart) = customer_cart else {
            // No existing cart: the guest cart becomes the customer's.
            let mut active: cart::ActiveModel = guest_cart.into();
            active.customer_id = Set(Some(customer_id));
            active.updated_at = Set(Utc::now());
            let updated = active.update(&txn).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::CartsMerged {
                    guest_cart_id,
                    customer_cart_id: guest_cart_id,
                    moved_lines: 0,
                })
                .await;
            return Ok(updated);
        };

        let guest_items = guest_cart.find_related(CartItem).all(&txn).await?;
        let customer_items = customer_cart.find_related(CartItem).all(&txn).await?;

        let existing_pairs: Vec<(Uuid, Option<Uuid>)> = customer_items
            .iter()
            .map(|item| (item.product_id, item.variant_id))
            .collect();

        let now = Utc::now();
        let mut moved_lines = 0usize;
        for item in guest_items {
            if existing_pairs.contains(&(item.product_id, item.variant_id)) {
                continue;
            }

            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(customer_cart.id),
                line_key: Set(item.line_key.clone()),
                product_id: Set(item.product_id),
                variant_id: Set(item.variant_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                compare_at_price: Set(item.compare_at_price),
                line_total: Set(item.line_total),
                personalization: Set(item.personalization.clone()),
                metadata: Set(item.metadata.clone()),
                added_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            moved_lines += 1;
        }

        let mut guest_active: cart::ActiveModel = guest_cart.into();
        guest_active.status = Set(cart::CartStatus::Merged);
        guest_active.updated_at = Set(now);
        guest_active.update(&txn).await?;

        let customer_cart_id = customer_cart.id;
        let updated = self.recalculate_totals(&txn, customer_cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_cart_id,
                customer_cart_id,
                moved_lines,
            })
            .await;

        info!(%guest_cart_id, %customer_cart_id, moved_lines, "Merged guest cart");
        Ok(updated)
    }

    /// Recomputes and stores the cart's derived totals from its lines and
    /// applied discounts. Also pushes the expiry window forward: a cart
    /// being mutated is not abandoned.
    async fn recalculate_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;
        let discounts = crate::entities::commerce::CartDiscount::find()
            .filter(cart_discount::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let lines: Vec<LineAmounts> = items
            .iter()
            .map(|item| LineAmounts {
                quantity: item.quantity,
                line_total: item.line_total,
            })
            .collect();
        let terms: Vec<DiscountTerms> = discounts.iter().map(DiscountTerms::from).collect();

        let totals: CartTotals = derive_totals(&lines, &terms, &self.pricing_settings());

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        let now = Utc::now();
        cart.subtotal = Set(totals.subtotal);
        cart.discount_total = Set(totals.discount_total);
        cart.tax_total = Set(totals.tax_total);
        cart.shipping_total = Set(totals.shipping_total);
        cart.total = Set(totals.total);
        cart.item_count = Set(totals.item_count);
        cart.expires_at = Set(now + Duration::days(CART_TTL_DAYS));
        cart.updated_at = Set(now);

        Ok(cart.update(conn).await?)
    }
}
