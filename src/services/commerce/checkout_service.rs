//! Checkout orchestration: one internal function turns a cart into a
//! priced, inventory-backed order with an external payment intent.
//!
//! Both transport adapters (REST and RPC) call [`CheckoutService::create_intent`];
//! the business logic exists exactly once. Inventory reservation and
//! order persistence commit in a single transaction *before* the gateway
//! call, so no lock is held across the network; a gateway failure leaves
//! a Pending order whose holds the expiry sweep reclaims.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, ModelTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::commerce::{cart, CartItemModel, Product, ProductVariant};
use crate::entities::order::{self, OrderStatus};
use crate::entities::{order_item, Order, OrderItemModel, OrderModel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{IntentMetadata, PaymentGateway};
use crate::services::commerce::discount_service::DiscountService;
use crate::services::commerce::pricing::{
    derive_totals_with_shipping, CartTotals, DiscountTerms, LineAmounts, PricingSettings,
};
use crate::services::inventory::{InventoryService, StockRequest};

/// Postal address snapshot frozen onto the order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub province: String,
    pub country_code: String,
    pub postal_code: String,
    pub phone: Option<String>,
}

/// Shipping methods with server-side quotes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ShippingMethod {
    Standard,
    Express,
    Overnight,
}

impl ShippingMethod {
    /// Quoted price for this method. Only the standard method is free
    /// above the threshold.
    pub fn quote(&self, config: &crate::config::CommerceConfig, subtotal: Decimal) -> Decimal {
        match self {
            ShippingMethod::Standard => {
                if subtotal >= config.free_shipping_threshold {
                    Decimal::ZERO
                } else {
                    config.flat_shipping_rate
                }
            }
            ShippingMethod::Express => config.express_shipping_rate,
            ShippingMethod::Overnight => config.overnight_shipping_rate,
        }
    }

    pub fn estimated_days(&self) -> u32 {
        match self {
            ShippingMethod::Standard => 5,
            ShippingMethod::Express => 2,
            ShippingMethod::Overnight => 1,
        }
    }
}

/// Input to `create_intent`.
#[derive(Debug, Deserialize)]
pub struct CreateIntentInput {
    pub cart_id: Uuid,
    pub email: String,
    pub customer_id: Option<Uuid>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: ShippingMethod,
    pub discount_codes: Option<Vec<String>>,
    pub gift_card_codes: Option<Vec<String>>,
}

/// What the client needs to complete payment out-of-band.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    /// Absent when gift cards covered the whole charge.
    pub client_secret: Option<String>,
    /// Amount the payment intent will capture.
    pub amount: Decimal,
    /// Codes that were requested but could not be applied, with reasons.
    pub skipped_codes: Vec<SkippedCodeView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SkippedCodeView {
    pub code: String,
    pub reason: String,
}

/// Result of `update_shipping`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ShippingUpdate {
    pub success: bool,
    pub shipping_total: Decimal,
    pub new_total: Decimal,
}

/// Result of one reservation sweep run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub released_orders: usize,
    pub released_quantity: i32,
    pub restored_gift_amount: Decimal,
    pub swept_at: DateTime<Utc>,
}

/// Order with its line snapshots.
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    inventory: Arc<InventoryService>,
    discounts: Arc<DiscountService>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        inventory: Arc<InventoryService>,
        discounts: Arc<DiscountService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            inventory,
            discounts,
            config,
        }
    }

    fn pricing_settings(&self) -> PricingSettings {
        PricingSettings::from(&self.config.commerce)
    }

    /// Creates a Pending order from a cart and requests a payment intent.
    ///
    /// Steps inside one transaction: atomic check-and-reserve of every
    /// tracked line (all-or-nothing), server-authoritative re-pricing
    /// with a tolerance gate, soft coupon evaluation, tax and shipping,
    /// order + line snapshots, gift-card debits. The gateway call happens
    /// after commit; its failure propagates while the order stays Pending
    /// for the sweep to reclaim.
    #[instrument(skip(self, input), fields(cart_id = %input.cart_id))]
    pub async fn create_intent(
        &self,
        input: CreateIntentInput,
    ) -> Result<CheckoutReceipt, ServiceError> {
        if !validator::validate_email(&input.email) {
            return Err(ServiceError::ValidationError(
                "A valid email is required".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let cart_model = cart::Entity::find_by_id(input.cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart {} not found", input.cart_id))
            })?;
        if cart_model.status != cart::CartStatus::Active {
            return Err(ServiceError::InvalidOperation(
                "Cart is not active".to_string(),
            ));
        }

        let items = cart_model
            .find_related(crate::entities::commerce::CartItem)
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        // 1. Atomic check-and-reserve. Any shortfall aborts the whole
        //    transaction; the error names every offending line.
        let requests: Vec<StockRequest> = items
            .iter()
            .map(|item| StockRequest {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect();
        let ttl = Duration::seconds(self.config.commerce.reservation_ttl_secs as i64);
        let reserved_lines = self
            .inventory
            .reserve_for_order(&txn, order_id, &requests, ttl)
            .await?;

        // 2. Server-authoritative pricing. The cart's captured price is a
        //    hint; material divergence from the catalog aborts.
        let priced = self.price_lines(&txn, &items).await?;

        // 3. Soft coupon evaluation against the server-derived subtotal.
        let subtotal: Decimal = priced.iter().map(|line| line.amounts.line_total).sum();
        let discount_codes = match &input.discount_codes {
            Some(codes) => codes.clone(),
            None => cart_model
                .find_related(crate::entities::commerce::CartDiscount)
                .all(&txn)
                .await?
                .iter()
                .map(|d| d.code.clone())
                .collect(),
        };
        let (applied, skipped) = self
            .discounts
            .evaluate_for_checkout(&txn, &discount_codes, input.customer_id, subtotal)
            .await?;

        // 4. Tax on the discounted subtotal; shipping from the chosen
        //    method's quote.
        let settings = self.pricing_settings();
        let shipping_total = input.shipping_method.quote(&self.config.commerce, subtotal);
        let amounts: Vec<LineAmounts> = priced.iter().map(|line| line.amounts).collect();
        let terms: Vec<DiscountTerms> = applied.clone();
        let totals: CartTotals =
            derive_totals_with_shipping(&amounts, &terms, &settings, shipping_total);

        // 5. Persist the frozen order and line snapshots.
        let order_number = format!("ATL-{}", &order_id.simple().to_string()[..8].to_uppercase());
        let billing = input
            .billing_address
            .clone()
            .unwrap_or_else(|| input.shipping_address.clone());

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            status: Set(OrderStatus::Pending),
            customer_id: Set(input.customer_id),
            email: Set(input.email.clone()),
            currency: Set(cart_model.currency.clone()),
            subtotal: Set(totals.subtotal),
            discount_total: Set(totals.discount_total),
            tax_total: Set(totals.tax_total),
            shipping_total: Set(totals.shipping_total),
            gift_card_total: Set(Decimal::ZERO),
            total: Set(totals.total),
            shipping_address: Set(serde_json::to_value(&input.shipping_address)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            billing_address: Set(serde_json::to_value(&billing)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            shipping_method: Set(input.shipping_method.to_string()),
            payment_intent_id: Set(None),
            tracking_number: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        order_model.insert(&txn).await?;

        for line in &priced {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.item.product_id),
                variant_id: Set(line.item.variant_id),
                sku: Set(line.sku.clone()),
                name: Set(line.name.clone()),
                quantity: Set(line.item.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.amounts.line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        // 6. Gift-card debits, recorded for possible reversal.
        let gift_card_codes = match &input.gift_card_codes {
            Some(codes) => codes.clone(),
            None => cart_model
                .find_related(crate::entities::commerce::CartGiftCard)
                .all(&txn)
                .await?
                .iter()
                .map(|g| g.code.clone())
                .collect(),
        };
        let redeemed = self
            .discounts
            .redeem_gift_cards(&txn, &gift_card_codes, order_id, totals.total)
            .await?;
        if redeemed > Decimal::ZERO {
            order::ActiveModel {
                id: Set(order_id),
                gift_card_total: Set(redeemed),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&txn)
            .await?;
        }

        // 7. The cart converts; its lines survive as order snapshots.
        let mut cart_update: cart::ActiveModel = cart_model.into();
        cart_update.status = Set(cart::CartStatus::Converted);
        cart_update.updated_at = Set(Utc::now());
        cart_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::InventoryReserved {
                order_id,
                line_count: reserved_lines,
            })
            .await;
        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        // 8. External payment intent, after commit. No database lock is
        //    held across this call.
        let charge = (totals.total - redeemed).max(Decimal::ZERO);
        let client_secret = if charge > Decimal::ZERO {
            let customer = self
                .gateway
                .get_or_create_customer(&input.email)
                .await
                .map_err(ServiceError::from)?;
            let intent = self
                .gateway
                .create_payment_intent(
                    charge,
                    &settings.currency,
                    Some(customer.id.clone()),
                    IntentMetadata {
                        order_id,
                        item_count: totals.item_count,
                        shipping_method: input.shipping_method.to_string(),
                    },
                )
                .await
                .map_err(ServiceError::from)?;

            order::ActiveModel {
                id: Set(order_id),
                payment_intent_id: Set(Some(intent.id.clone())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&*self.db)
            .await?;

            self.event_sender
                .send_or_log(Event::PaymentIntentCreated {
                    order_id,
                    intent_id: intent.id,
                    amount: charge,
                })
                .await;

            Some(intent.client_secret)
        } else {
            // Fully funded by gift cards: no capture needed.
            self.transition(order_id, OrderStatus::PaymentProcessing).await?;
            self.transition(order_id, OrderStatus::Confirmed).await?;
            None
        };

        // 9. Usage counters, authenticated customers only.
        if let Some(customer_id) = input.customer_id {
            self.discounts
                .record_usage(&*self.db, &applied, customer_id, order_id)
                .await?;
        }

        info!(%order_id, %order_number, %charge, "Checkout intent created");
        Ok(CheckoutReceipt {
            order_id,
            order_number,
            client_secret,
            amount: charge,
            skipped_codes: skipped
                .into_iter()
                .map(|s| SkippedCodeView {
                    code: s.code,
                    reason: s.reason,
                })
                .collect(),
        })
    }

    /// Changes the shipping method of an order whose payment has not
    /// completed. Recomputes the total from the frozen subtotal, discount,
    /// and tax plus the new quote, and pushes the new amount to the
    /// existing payment intent.
    #[instrument(skip(self))]
    pub async fn update_shipping(
        &self,
        order_id: Uuid,
        method: ShippingMethod,
    ) -> Result<ShippingUpdate, ServiceError> {
        let order = self.order_model(order_id).await?;
        if !order.status.accepts_amount_updates() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} can no longer change shipping",
                order.order_number
            )));
        }

        let shipping_total = method.quote(&self.config.commerce, order.subtotal);
        let taxable = (order.subtotal - order.discount_total).max(Decimal::ZERO);
        let new_total = (taxable + order.tax_total + shipping_total).max(Decimal::ZERO);
        let charge = (new_total - order.gift_card_total).max(Decimal::ZERO);

        let payment_intent_id = order.payment_intent_id.clone();
        let item_count = order
            .find_related(crate::entities::OrderItem)
            .all(&*self.db)
            .await?
            .iter()
            .map(|item| item.quantity)
            .sum();

        let mut update: order::ActiveModel = order.into();
        update.shipping_method = Set(method.to_string());
        update.shipping_total = Set(shipping_total);
        update.total = Set(new_total);
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;

        if let Some(intent_id) = payment_intent_id {
            if charge > Decimal::ZERO {
                let intent = self
                    .gateway
                    .update_payment_intent(
                        &intent_id,
                        charge,
                        IntentMetadata {
                            order_id,
                            item_count,
                            shipping_method: method.to_string(),
                        },
                    )
                    .await
                    .map_err(ServiceError::from)?;

                self.event_sender
                    .send_or_log(Event::PaymentIntentAmountUpdated {
                        order_id,
                        intent_id: intent.id,
                        amount: charge,
                    })
                    .await;
            }
        }

        self.event_sender
            .send_or_log(Event::ShippingMethodUpdated {
                order_id,
                method: method.to_string(),
                new_total,
            })
            .await;

        Ok(ShippingUpdate {
            success: true,
            shipping_total,
            new_total,
        })
    }

    /// Cancels a Pending or Confirmed order, releasing its inventory and
    /// restoring gift-card balances.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.order_model(order_id).await?;
        let from = order.status;
        if !from.can_transition_to(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidStatus(format!(
                "{} -> cancelled is not allowed",
                from
            )));
        }

        let txn = self.db.begin().await?;
        let released = self.inventory.release_for_order(&txn, order_id).await?;
        let restored = self.discounts.reverse_redemptions(&txn, order_id).await?;

        let mut update: order::ActiveModel = order.into();
        update.status = Set(OrderStatus::Cancelled);
        update.updated_at = Set(Utc::now());
        let updated = update.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                from,
                to: OrderStatus::Cancelled,
            })
            .await;
        self.event_sender
            .send_or_log(Event::ReservationsReleased {
                order_id,
                quantity: released,
            })
            .await;
        self.event_sender.send_or_log(Event::OrderCancelled(order_id)).await;

        info!(%order_id, released, %restored, "Order cancelled");
        Ok(updated)
    }

    /// Validated status transition.
    pub async fn transition(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.order_model(order_id).await?;
        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidStatus(format!(
                "{} -> {} is not allowed",
                from, to
            )));
        }

        let mut update: order::ActiveModel = order.into();
        update.status = Set(to);
        update.updated_at = Set(Utc::now());
        let updated = update.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                from,
                to,
            })
            .await;

        Ok(updated)
    }

    /// Loads an order with its line snapshots.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.order_model(order_id).await?;
        let items = order
            .find_related(crate::entities::OrderItem)
            .all(&*self.db)
            .await?;
        Ok(OrderDetail { order, items })
    }

    async fn order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Releases the holds of Pending orders whose reservations expired:
    /// inventory back to the pool, gift-card balances restored. Closes
    /// the reservation-before-payment gap left by a gateway failure or an
    /// abandoned payment.
    #[instrument(skip(self))]
    pub async fn release_expired_reservations(&self) -> Result<SweepResult, ServiceError> {
        let now = Utc::now();
        let expired = self.inventory.expired_reservations(now).await?;

        let by_order: BTreeSet<Uuid> = expired.iter().map(|r| r.order_id).collect();

        let mut released_orders = 0usize;
        let mut released_quantity = 0i32;
        let mut restored_gift_amount = Decimal::ZERO;

        for &order_id in by_order.iter() {
            let Some(order) = Order::find_by_id(order_id).one(&*self.db).await? else {
                warn!(%order_id, "Expired reservation references a missing order");
                continue;
            };
            if order.status != OrderStatus::Pending {
                // Payment is progressing; the hold stays until fulfillment.
                continue;
            }

            let txn = self.db.begin().await?;
            let released = self.inventory.release_for_order(&txn, order_id).await?;
            let restored = self.discounts.reverse_redemptions(&txn, order_id).await?;
            txn.commit().await?;

            released_orders += 1;
            released_quantity += released;
            restored_gift_amount += restored;

            self.event_sender
                .send_or_log(Event::ReservationsReleased {
                    order_id,
                    quantity: released,
                })
                .await;
        }

        if released_orders > 0 {
            info!(
                released_orders,
                released_quantity,
                %restored_gift_amount,
                "Reservation sweep released expired holds"
            );
        }

        Ok(SweepResult {
            released_orders,
            released_quantity,
            restored_gift_amount,
            swept_at: now,
        })
    }

    async fn price_lines(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        items: &[CartItemModel],
    ) -> Result<Vec<PricedLine>, ServiceError> {
        let tolerance = self.config.commerce.price_tolerance;
        let mut priced = Vec::with_capacity(items.len());

        for item in items {
            let product = Product::find_by_id(item.product_id)
                .one(txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;

            let (catalog_price, sku, name) = match item.variant_id {
                Some(variant_id) => {
                    let variant = ProductVariant::find_by_id(variant_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Variant {} not found", variant_id))
                        })?;
                    let name = format!("{} ({})", product.name, variant.name);
                    (variant.price, variant.sku, name)
                }
                None => (product.price, product.sku.clone(), product.name.clone()),
            };

            if (catalog_price - item.unit_price).abs() > tolerance {
                return Err(ServiceError::PriceConflict {
                    product_id: item.product_id,
                    cart_price: item.unit_price,
                    catalog_price,
                });
            }

            priced.push(PricedLine {
                item: item.clone(),
                unit_price: catalog_price,
                amounts: LineAmounts {
                    quantity: item.quantity,
                    line_total: catalog_price * Decimal::from(item.quantity),
                },
                sku,
                name,
            });
        }

        Ok(priced)
    }
}

struct PricedLine {
    item: CartItemModel,
    unit_price: Decimal,
    amounts: LineAmounts,
    sku: String,
    name: String,
}

/// Spawns the background reservation sweep.
pub fn spawn_reservation_sweeper(service: Arc<CheckoutService>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = service.release_expired_reservations().await {
                warn!("Reservation sweep failed: {}", err);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommerceConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn standard_shipping_is_free_over_threshold() {
        let cfg = CommerceConfig::default();
        assert_eq!(
            ShippingMethod::Standard.quote(&cfg, dec!(99.99)),
            dec!(10)
        );
        assert_eq!(
            ShippingMethod::Standard.quote(&cfg, dec!(100.00)),
            Decimal::ZERO
        );
    }

    #[test]
    fn premium_methods_always_charge() {
        let cfg = CommerceConfig::default();
        assert_eq!(ShippingMethod::Express.quote(&cfg, dec!(5000)), dec!(25));
        assert_eq!(ShippingMethod::Overnight.quote(&cfg, dec!(5000)), dec!(50));
    }

    #[test]
    fn method_names_round_trip() {
        use std::str::FromStr;
        for method in [
            ShippingMethod::Standard,
            ShippingMethod::Express,
            ShippingMethod::Overnight,
        ] {
            let name = method.to_string();
            assert_eq!(ShippingMethod::from_str(&name).unwrap(), method);
        }
        assert_eq!(
            ShippingMethod::from_str("EXPRESS").unwrap(),
            ShippingMethod::Express
        );
    }
}
