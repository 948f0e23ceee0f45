//! Coupon and gift-card validation.
//!
//! Validation is authoritative and server-side: expiry windows, global
//! and per-customer usage limits, minimum order amount, first-purchase
//! gating, and membership-tier gating. Apply-time validation is a hard
//! gate; checkout evaluation is soft (failing codes are skipped, the
//! order proceeds).

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::commerce::{
    coupon, coupon_usage, gift_card, gift_card_redemption, Coupon, CouponUsage, Customer,
    GiftCard, GiftCardModel, GiftCardRedemption,
};
use crate::entities::{order, Order};
use crate::errors::ServiceError;
use crate::services::commerce::pricing::DiscountTerms;

static CODE_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9_-]{2,31}$").expect("static regex"));

fn rejected(code: &str, reason: impl Into<String>) -> ServiceError {
    ServiceError::CouponRejected {
        code: code.to_string(),
        reason: reason.into(),
    }
}

/// Codes a checkout attempted but could not apply, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedCode {
    pub code: String,
    pub reason: String,
}

/// Stateless evaluator: every operation runs against the caller's
/// connection, so cart application and checkout share the surrounding
/// transaction.
#[derive(Clone, Default)]
pub struct DiscountService;

impl DiscountService {
    pub fn new() -> Self {
        Self
    }

    /// Normalizes a user-entered code: trimmed, uppercased.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Validates a coupon code against the full rule set and returns its
    /// normalized terms. `subtotal` is the amount the minimum-order gate
    /// is checked against.
    #[instrument(skip(self, conn))]
    pub async fn validate_coupon<C: ConnectionTrait>(
        &self,
        conn: &C,
        raw_code: &str,
        customer_id: Option<Uuid>,
        subtotal: Decimal,
    ) -> Result<DiscountTerms, ServiceError> {
        let code = Self::normalize_code(raw_code);
        if !CODE_FORMAT.is_match(&code) {
            return Err(rejected(&code, "not a valid code"));
        }

        let now = Utc::now();
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| rejected(&code, "unknown code"))?;

        if !coupon.active {
            return Err(rejected(&code, "code is no longer active"));
        }
        if let Some(starts_at) = coupon.starts_at {
            if now < starts_at {
                return Err(rejected(&code, "code is not yet active"));
            }
        }
        if let Some(ends_at) = coupon.ends_at {
            if now > ends_at {
                return Err(rejected(&code, "code has expired"));
            }
        }
        if let Some(limit) = coupon.usage_limit {
            if coupon.usage_count >= limit {
                return Err(rejected(&code, "code has reached its usage limit"));
            }
        }
        if let Some(minimum) = coupon.minimum_order_amount {
            if subtotal < minimum {
                return Err(rejected(
                    &code,
                    format!("order minimum of {} not met", minimum),
                ));
            }
        }

        let customer = match customer_id {
            Some(id) => Customer::find_by_id(id).one(conn).await?,
            None => None,
        };

        if let Some(required_tier) = &coupon.membership_tier {
            let tier_matches = customer
                .as_ref()
                .and_then(|c| c.membership_tier.as_ref())
                .map(|tier| tier.eq_ignore_ascii_case(required_tier))
                .unwrap_or(false);
            if !tier_matches {
                return Err(rejected(
                    &code,
                    format!("reserved for {} members", required_tier),
                ));
            }
        }

        if coupon.first_purchase_only {
            match &customer {
                None => return Err(rejected(&code, "sign in to use this code")),
                Some(c) => {
                    let prior_orders = Order::find()
                        .filter(order::Column::CustomerId.eq(c.id))
                        .count(conn)
                        .await?;
                    if prior_orders > 0 {
                        return Err(rejected(&code, "valid on a first purchase only"));
                    }
                }
            }
        }

        if let (Some(limit), Some(c)) = (coupon.per_customer_limit, &customer) {
            let used = CouponUsage::find()
                .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                .filter(coupon_usage::Column::CustomerId.eq(c.id))
                .count(conn)
                .await?;
            if used >= limit as u64 {
                return Err(rejected(&code, "you have already used this code"));
            }
        }

        Ok(DiscountTerms::from(&coupon))
    }

    /// Soft evaluation for checkout: failing codes are skipped with a
    /// reason instead of aborting the order.
    pub async fn evaluate_for_checkout<C: ConnectionTrait>(
        &self,
        conn: &C,
        codes: &[String],
        customer_id: Option<Uuid>,
        subtotal: Decimal,
    ) -> Result<(Vec<DiscountTerms>, Vec<SkippedCode>), ServiceError> {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for raw_code in codes {
            match self
                .validate_coupon(conn, raw_code, customer_id, subtotal)
                .await
            {
                Ok(terms) => applied.push(terms),
                Err(ServiceError::CouponRejected { code, reason }) => {
                    debug!(%code, %reason, "Skipping coupon at checkout");
                    skipped.push(SkippedCode { code, reason });
                }
                Err(other) => return Err(other),
            }
        }

        Ok((applied, skipped))
    }

    /// Records coupon usage for an order. Called only after the order is
    /// persisted and only for authenticated customers.
    pub async fn record_usage<C: ConnectionTrait>(
        &self,
        conn: &C,
        applied: &[DiscountTerms],
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        for terms in applied {
            let Some(coupon) = Coupon::find()
                .filter(coupon::Column::Code.eq(terms.code.clone()))
                .one(conn)
                .await?
            else {
                warn!(code = %terms.code, "Applied coupon vanished before usage recording");
                continue;
            };

            Coupon::update_many()
                .col_expr(
                    coupon::Column::UsageCount,
                    Expr::col(coupon::Column::UsageCount).add(1),
                )
                .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
                .filter(coupon::Column::Id.eq(coupon.id))
                .exec(conn)
                .await?;

            coupon_usage::ActiveModel {
                id: Set(Uuid::new_v4()),
                coupon_id: Set(coupon.id),
                customer_id: Set(customer_id),
                order_id: Set(order_id),
                used_at: Set(now),
            }
            .insert(conn)
            .await?;
        }
        Ok(())
    }

    /// Validates a gift card for application to a cart.
    #[instrument(skip(self, conn))]
    pub async fn validate_gift_card<C: ConnectionTrait>(
        &self,
        conn: &C,
        raw_code: &str,
    ) -> Result<GiftCardModel, ServiceError> {
        let code = Self::normalize_code(raw_code);
        let card = GiftCard::find()
            .filter(gift_card::Column::Code.eq(code.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::GiftCardRejected {
                code: code.clone(),
                reason: "unknown gift card".into(),
            })?;

        if !card.is_redeemable(Utc::now()) {
            return Err(ServiceError::GiftCardRejected {
                code,
                reason: "gift card is expired or has no balance".into(),
            });
        }

        Ok(card)
    }

    /// Debits gift cards against a charge inside the order transaction.
    /// Cards are drawn in the order given; each redemption is recorded so
    /// the sweep can reverse it. Returns the total redeemed.
    pub async fn redeem_gift_cards<C: ConnectionTrait>(
        &self,
        txn: &C,
        codes: &[String],
        order_id: Uuid,
        charge: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let now = Utc::now();
        let mut remaining = charge;
        let mut redeemed_total = Decimal::ZERO;

        for raw_code in codes {
            if remaining <= Decimal::ZERO {
                break;
            }

            let card = match self.validate_gift_card(txn, raw_code).await {
                Ok(card) => card,
                Err(ServiceError::GiftCardRejected { code, reason }) => {
                    debug!(%code, %reason, "Skipping gift card at checkout");
                    continue;
                }
                Err(other) => return Err(other),
            };

            let amount = card.balance.min(remaining);

            // Guarded decrement: a concurrent redemption of the same card
            // must not drive the balance negative.
            let result = GiftCard::update_many()
                .col_expr(
                    gift_card::Column::Balance,
                    Expr::col(gift_card::Column::Balance).sub(amount),
                )
                .col_expr(gift_card::Column::UpdatedAt, Expr::value(now))
                .filter(gift_card::Column::Id.eq(card.id))
                .filter(gift_card::Column::Balance.gte(amount))
                .exec(txn)
                .await?;

            if result.rows_affected == 0 {
                debug!(code = %card.code, "Gift card balance changed mid-checkout; skipping");
                continue;
            }

            gift_card_redemption::ActiveModel {
                id: Set(Uuid::new_v4()),
                gift_card_id: Set(card.id),
                order_id: Set(order_id),
                amount: Set(amount),
                reversed: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(txn)
            .await?;

            remaining -= amount;
            redeemed_total += amount;
        }

        Ok(redeemed_total)
    }

    /// Credits back every unreversed redemption of an order. Used on
    /// cancellation and by the reservation sweep. Returns the restored
    /// amount.
    pub async fn reverse_redemptions<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let redemptions = GiftCardRedemption::find()
            .filter(gift_card_redemption::Column::OrderId.eq(order_id))
            .filter(gift_card_redemption::Column::Reversed.eq(false))
            .all(conn)
            .await?;

        let now = Utc::now();
        let mut restored = Decimal::ZERO;

        for redemption in redemptions {
            GiftCard::update_many()
                .col_expr(
                    gift_card::Column::Balance,
                    Expr::col(gift_card::Column::Balance).add(redemption.amount),
                )
                .col_expr(gift_card::Column::UpdatedAt, Expr::value(now))
                .filter(gift_card::Column::Id.eq(redemption.gift_card_id))
                .exec(conn)
                .await?;

            restored += redemption.amount;

            let mut active: gift_card_redemption::ActiveModel = redemption.into();
            active.reversed = Set(true);
            active.updated_at = Set(now);
            active.update(conn).await?;
        }

        Ok(restored)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalized_to_uppercase() {
        assert_eq!(DiscountService::normalize_code("  welcome15 "), "WELCOME15");
    }

    #[test]
    fn code_format_accepts_typical_codes() {
        for code in ["WELCOME15", "VIP-25", "FIRST_ORDER", "A1B2C3"] {
            assert!(CODE_FORMAT.is_match(code), "{code} should be valid");
        }
    }

    #[test]
    fn code_format_rejects_garbage() {
        for code in ["", "ab", "has space", "ümlaut", "-LEADING"] {
            assert!(
                !CODE_FORMAT.is_match(&DiscountService::normalize_code(code)),
                "{code} should be rejected"
            );
        }
    }
}
