//! Pure pricing derivations for carts and checkout.
//!
//! Subtotal, discount, tax, shipping, and total are never incrementally
//! maintained; every mutation recomputes them from the line set and the
//! applied discount terms. Checkout reuses the same functions so cart
//! preview and order pricing cannot drift.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::CommerceConfig;
use crate::entities::commerce::coupon::CouponKind;
use crate::entities::commerce::{CartDiscountModel, CouponModel};

/// Settings the derivation depends on, extracted from `CommerceConfig`.
#[derive(Debug, Clone)]
pub struct PricingSettings {
    pub currency: String,
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_rate: Decimal,
}

impl From<&CommerceConfig> for PricingSettings {
    fn from(cfg: &CommerceConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            tax_rate: cfg.tax_rate,
            free_shipping_threshold: cfg.free_shipping_threshold,
            flat_shipping_rate: cfg.flat_shipping_rate,
        }
    }
}

/// Normalized discount terms, decoupled from where the code came from
/// (cart snapshot or coupon record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountTerms {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub minimum_order_amount: Option<Decimal>,
}

impl From<&CartDiscountModel> for DiscountTerms {
    fn from(model: &CartDiscountModel) -> Self {
        Self {
            code: model.code.clone(),
            kind: model.kind,
            value: model.value,
            minimum_order_amount: model.minimum_order_amount,
        }
    }
}

impl From<&CouponModel> for DiscountTerms {
    fn from(model: &CouponModel) -> Self {
        Self {
            code: model.code.clone(),
            kind: model.kind,
            value: model.value,
            minimum_order_amount: model.minimum_order_amount,
        }
    }
}

/// Quantity and line total of one cart or order line.
#[derive(Debug, Clone, Copy)]
pub struct LineAmounts {
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Derived cart totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub total: Decimal,
    pub item_count: i32,
}

impl CartTotals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            shipping_total: Decimal::ZERO,
            total: Decimal::ZERO,
            item_count: 0,
        }
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Contribution of one discount against the original subtotal. A code
/// below its minimum-order gate contributes zero; percentage codes are
/// evaluated at derivation time, so the amount moves with the cart.
pub fn discount_contribution(terms: &DiscountTerms, subtotal: Decimal) -> Decimal {
    if let Some(minimum) = terms.minimum_order_amount {
        if subtotal < minimum {
            return Decimal::ZERO;
        }
    }

    let raw = match terms.kind {
        CouponKind::Percentage => round_money(subtotal * terms.value / Decimal::ONE_HUNDRED),
        CouponKind::Fixed => terms.value,
    };

    raw.max(Decimal::ZERO).min(subtotal)
}

/// Derives all cart totals from the line set and applied discounts.
///
/// Each discount is evaluated independently against the original subtotal
/// (not chained); the aggregate is clamped so the taxable amount never
/// goes negative. Shipping is free at or above the threshold, zero for an
/// empty cart, and the flat rate otherwise.
pub fn derive_totals(
    lines: &[LineAmounts],
    discounts: &[DiscountTerms],
    settings: &PricingSettings,
) -> CartTotals {
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

    let shipping_total = if subtotal >= settings.free_shipping_threshold {
        Decimal::ZERO
    } else if subtotal > Decimal::ZERO {
        settings.flat_shipping_rate
    } else {
        Decimal::ZERO
    };

    derive_totals_with_shipping(lines, discounts, settings, shipping_total)
}

/// Same derivation with an externally quoted shipping amount. Checkout
/// uses this with the chosen method's quote so cart preview and order
/// pricing share one code path.
pub fn derive_totals_with_shipping(
    lines: &[LineAmounts],
    discounts: &[DiscountTerms],
    settings: &PricingSettings,
    shipping_total: Decimal,
) -> CartTotals {
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
    let item_count: i32 = lines.iter().map(|l| l.quantity).sum();

    let discount_total = discounts
        .iter()
        .map(|terms| discount_contribution(terms, subtotal))
        .sum::<Decimal>()
        .min(subtotal);

    let taxable = (subtotal - discount_total).max(Decimal::ZERO);
    let tax_total = round_money(taxable * settings.tax_rate);

    let total = (taxable + tax_total + shipping_total).max(Decimal::ZERO);

    CartTotals {
        subtotal,
        discount_total,
        tax_total,
        shipping_total,
        total,
        item_count,
    }
}

/// JSON canonicalization with sorted object keys, so personalization maps
/// hash identically regardless of key order.
fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical_json(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Deterministic cart line identity: (product, variant or "default",
/// personalization hash). Adds with the same key collapse into one line.
pub fn line_key(
    product_id: Uuid,
    variant_id: Option<Uuid>,
    personalization: Option<&serde_json::Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_id.as_bytes());
    hasher.update(b"|");
    match variant_id {
        Some(variant) => hasher.update(variant.as_bytes()),
        None => hasher.update(b"default"),
    }
    if let Some(value) = personalization.filter(|v| !v.is_null()) {
        let mut canonical = String::new();
        write_canonical_json(value, &mut canonical);
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}
