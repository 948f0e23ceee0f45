//! User-visible notification copy, derived from engine events.
//!
//! The cart engine and checkout orchestrator emit [`Event`]s and never
//! render messages themselves; this observer owns the wording. UI layers
//! subscribe to the same stream and present these as toasts.

use serde::{Deserialize, Serialize};

use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            message: message.into(),
        }
    }
}

/// Maps engine events to storefront notification copy. Events with no
/// user-facing consequence return `None` and are only logged.
#[derive(Debug, Default, Clone)]
pub struct Notifier;

impl Notifier {
    pub fn notification_for(&self, event: &Event) -> Option<Notification> {
        match event {
            Event::CartItemAdded {
                product_name,
                quantity,
                ..
            } => Some(Notification::success(if *quantity == 1 {
                format!("{} added to your cart", product_name)
            } else {
                format!("{} ({}x) added to your cart", product_name, quantity)
            })),
            Event::CartItemRemoved { product_name, .. } => {
                Some(Notification::info(format!(
                    "{} removed from your cart",
                    product_name
                )))
            }
            Event::CartCleared(_) => Some(Notification::info("Your cart has been cleared")),
            Event::DiscountApplied { code, .. } => {
                Some(Notification::success(format!("Code {} applied", code)))
            }
            Event::DiscountRemoved { code, .. } => {
                Some(Notification::info(format!("Code {} removed", code)))
            }
            Event::GiftCardApplied { code, .. } => {
                Some(Notification::success(format!("Gift card {} applied", code)))
            }
            Event::GiftCardRemoved { code, .. } => {
                Some(Notification::info(format!("Gift card {} removed", code)))
            }
            Event::StockValidationFailed { lines, .. } => {
                let first = lines.first()?;
                Some(Notification::warning(if first.available > 0 {
                    format!(
                        "An item in your cart is low on stock: only {} available",
                        first.available
                    )
                } else {
                    "An item in your cart is out of stock".to_string()
                }))
            }
            Event::OrderCreated(_) => Some(Notification::success("Your order has been placed")),
            Event::OrderCancelled(_) => Some(Notification::info("Your order has been cancelled")),
            Event::ShippingMethodUpdated { new_total, .. } => Some(Notification::info(format!(
                "Shipping updated; new total {}",
                new_total
            ))),
            _ => None,
        }
    }
}
