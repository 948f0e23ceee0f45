use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity. Monetary fields and item snapshots are frozen at
/// creation; only status and shipping/tracking fields mutate afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub status: OrderStatus,
    #[sea_orm(nullable)]
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub gift_card_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json")]
    pub billing_address: Json,
    pub shipping_method: String,
    #[sea_orm(nullable)]
    pub payment_intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::inventory_reservation::Entity")]
    Reservations,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::inventory_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Amount the customer is actually charged: the order total minus
    /// redeemed gift-card value, floored at zero.
    pub fn charge_amount(&self) -> Decimal {
        (self.total - self.gift_card_total).max(Decimal::ZERO)
    }
}

/// Order status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "payment_processing")]
    PaymentProcessing,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "returned")]
    Returned,
}

impl OrderStatus {
    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, PaymentProcessing)
                | (Pending, PaymentFailed)
                | (Pending, Cancelled)
                | (PaymentProcessing, Confirmed)
                | (PaymentProcessing, PaymentFailed)
                | (PaymentFailed, PaymentProcessing)
                | (Confirmed, Processing)
                | (Confirmed, Cancelled)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Delivered, Refunded)
                | (Delivered, Returned)
        )
    }

    pub fn is_terminal(self) -> bool {
        use OrderStatus::*;
        matches!(self, Delivered | Cancelled | Refunded | Returned)
    }

    /// Whether the order's payment intent can still change (amount
    /// updates, shipping changes).
    pub fn accepts_amount_updates(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PaymentProcessing)
    }
}
