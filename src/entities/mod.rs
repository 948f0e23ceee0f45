pub mod commerce;
pub mod inventory_reservation;
pub mod order;
pub mod order_item;

pub use inventory_reservation::{
    Entity as InventoryReservation, Model as InventoryReservationModel, ReservationStatus,
};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
