use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amount debited from a gift card for one order. Reversed when the
/// reservation sweep releases an abandoned order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gift_card_redemptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub gift_card_id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    pub reversed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gift_card::Entity",
        from = "Column::GiftCardId",
        to = "super::gift_card::Column::Id"
    )]
    GiftCard,
}

impl Related<super::gift_card::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GiftCard.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
