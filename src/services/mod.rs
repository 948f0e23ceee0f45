pub mod commerce;
pub mod inventory;

pub use inventory::{InventoryService, StockRequest, StockStatus};
