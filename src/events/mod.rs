use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the cart engine and checkout orchestrator. The
/// engine never renders user-facing copy itself; the notification
/// observer consumes this stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        item_id: Uuid,
        product_name: String,
        quantity: i32,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
        product_name: String,
    },
    CartCleared(Uuid),
    DiscountApplied {
        cart_id: Uuid,
        code: String,
    },
    DiscountRemoved {
        cart_id: Uuid,
        code: String,
    },
    GiftCardApplied {
        cart_id: Uuid,
        code: String,
    },
    GiftCardRemoved {
        cart_id: Uuid,
        code: String,
    },
    StockValidationFailed {
        cart_id: Uuid,
        lines: Vec<crate::errors::StockShortfall>,
    },
    CartsMerged {
        guest_cart_id: Uuid,
        customer_cart_id: Uuid,
        moved_lines: usize,
    },

    // Checkout / order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled(Uuid),
    PaymentIntentCreated {
        order_id: Uuid,
        intent_id: String,
        amount: Decimal,
    },
    PaymentIntentAmountUpdated {
        order_id: Uuid,
        intent_id: String,
        amount: Decimal,
    },
    ShippingMethodUpdated {
        order_id: Uuid,
        method: String,
        new_total: Decimal,
    },

    // Inventory events
    InventoryReserved {
        order_id: Uuid,
        line_count: usize,
    },
    ReservationsReleased {
        order_id: Uuid,
        quantity: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, failing if the channel is closed or full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event; a closed channel is logged, never surfaced.
    /// Commands must not fail because nobody is listening.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event).await {
            warn!("Event dropped: {}", err);
        }
    }
}

/// Event processing loop. Forwards every event to the notification
/// observer and logs the transition.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    let notifier = crate::notifications::Notifier::default();
    while let Some(event) = rx.recv().await {
        if let Some(notification) = notifier.notification_for(&event) {
            info!(
                target: "atelier_api::notifications",
                kind = %notification.kind,
                "{}",
                notification.message
            );
        } else {
            info!(?event, "Event processed");
        }
    }

    info!("Event channel closed; processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or error.
        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let cart_id = Uuid::new_v4();
        sender.send(Event::CartCleared(cart_id)).await.unwrap();
        match rx.recv().await {
            Some(Event::CartCleared(id)) => assert_eq!(id, cart_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
