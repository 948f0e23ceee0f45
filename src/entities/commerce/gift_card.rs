use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored-value gift card
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gift_cards")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub balance: Decimal,
    pub currency: String,
    pub active: bool,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::gift_card_redemption::Entity")]
    Redemptions,
}

impl Related<super::gift_card_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A card is redeemable when it is active, unexpired, and funded.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.balance > Decimal::ZERO
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn card(balance: Decimal, active: bool, expires_at: Option<DateTime<Utc>>) -> Model {
        Model {
            id: Uuid::new_v4(),
            code: "GC-TEST".into(),
            balance,
            currency: "USD".into(),
            active,
            expires_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn redeemable_requires_active_funded_unexpired() {
        let now = Utc::now();
        assert!(card(dec!(25), true, None).is_redeemable(now));
        assert!(!card(Decimal::ZERO, true, None).is_redeemable(now));
        assert!(!card(dec!(25), false, None).is_redeemable(now));
        assert!(!card(dec!(25), true, Some(now - chrono::Duration::days(1))).is_redeemable(now));
        assert!(card(dec!(25), true, Some(now + chrono::Duration::days(1))).is_redeemable(now));
    }
}
