//! Inventory reads, atomic reservation, and release.
//!
//! `inventory_reserved` on a variant is the only cross-request mutable
//! shared state in the system. Every write goes through the guarded
//! UPDATE in [`InventoryService::reserve_for_order`], which increments
//! the counter only where enough stock remains, so concurrent checkouts
//! for the last unit cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::commerce::{product_variant, ProductVariant};
use crate::entities::inventory_reservation::{self, ReservationStatus};
use crate::entities::InventoryReservation;
use crate::errors::{ServiceError, StockShortfall};

/// Availability of one variant, computed on demand from the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockStatus {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub in_stock: bool,
    pub available_quantity: i32,
}

/// One line to check or reserve.
#[derive(Debug, Clone)]
pub struct StockRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Current availability of a variant.
    #[instrument(skip(self))]
    pub async fn stock_status(&self, variant_id: Uuid) -> Result<StockStatus, ServiceError> {
        let variant = ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;

        let available = variant.available_quantity();
        Ok(StockStatus {
            product_id: variant.product_id,
            variant_id,
            in_stock: !variant.inventory_tracking || available > 0,
            available_quantity: available,
        })
    }

    /// Authoritative availability check of a set of lines. Returns one
    /// shortfall per line that cannot be satisfied; an empty result means
    /// the whole set is available. Lines without a variant, or whose
    /// variant does not track inventory, are always satisfiable.
    pub async fn check_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[StockRequest],
    ) -> Result<Vec<StockShortfall>, ServiceError> {
        let mut shortfalls = Vec::new();

        for line in lines {
            let Some(variant_id) = line.variant_id else {
                continue;
            };

            match ProductVariant::find_by_id(variant_id).one(conn).await? {
                Some(variant) if !variant.inventory_tracking => {}
                Some(variant) => {
                    let available = variant.available_quantity();
                    if available < line.quantity {
                        shortfalls.push(StockShortfall {
                            product_id: line.product_id,
                            variant_id: Some(variant_id),
                            requested: line.quantity,
                            available: available.max(0),
                        });
                    }
                }
                None => shortfalls.push(StockShortfall {
                    product_id: line.product_id,
                    variant_id: Some(variant_id),
                    requested: line.quantity,
                    available: 0,
                }),
            }
        }

        Ok(shortfalls)
    }

    /// Atomically reserves every tracked line for an order, or fails with
    /// the full set of offending lines. Must run inside the checkout
    /// transaction: the caller rolls everything back by dropping the
    /// transaction on error, so no partial reservation survives.
    ///
    /// The availability check and the counter increment are a single
    /// guarded UPDATE (`inventory_reserved += q WHERE quantity - reserved
    /// >= q`), which is what makes concurrent checkouts race-safe.
    #[instrument(skip(self, txn, lines))]
    pub async fn reserve_for_order<C: ConnectionTrait>(
        &self,
        txn: &C,
        order_id: Uuid,
        lines: &[StockRequest],
        ttl: Duration,
    ) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let mut shortfalls = Vec::new();
        let mut reserved = 0usize;

        for line in lines {
            let Some(variant_id) = line.variant_id else {
                continue;
            };

            let variant = ProductVariant::find_by_id(variant_id)
                .one(txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Variant {} not found", variant_id))
                })?;

            if !variant.inventory_tracking {
                continue;
            }

            let result = ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::InventoryReserved,
                    Expr::col(product_variant::Column::InventoryReserved).add(line.quantity),
                )
                .col_expr(
                    product_variant::Column::UpdatedAt,
                    Expr::value(now),
                )
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(
                    Expr::col(product_variant::Column::InventoryQuantity)
                        .sub(Expr::col(product_variant::Column::InventoryReserved))
                        .gte(line.quantity),
                )
                .exec(txn)
                .await?;

            if result.rows_affected == 0 {
                shortfalls.push(StockShortfall {
                    product_id: line.product_id,
                    variant_id: Some(variant_id),
                    requested: line.quantity,
                    available: variant.available_quantity().max(0),
                });
                continue;
            }

            inventory_reservation::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                variant_id: Set(variant_id),
                quantity: Set(line.quantity),
                status: Set(ReservationStatus::Active),
                expires_at: Set(expires_at),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(txn)
            .await?;
            reserved += 1;
        }

        if !shortfalls.is_empty() {
            return Err(ServiceError::InsufficientStock(shortfalls));
        }

        info!(%order_id, reserved, "Reserved inventory for order");
        Ok(reserved)
    }

    /// Releases every active reservation of an order, returning the total
    /// quantity handed back. Used on cancellation and by the expiry
    /// sweep.
    pub async fn release_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<i32, ServiceError> {
        let reservations = InventoryReservation::find()
            .filter(inventory_reservation::Column::OrderId.eq(order_id))
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
            .all(conn)
            .await?;

        let now = Utc::now();
        let mut released_quantity = 0;

        for reservation in reservations {
            ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::InventoryReserved,
                    Expr::col(product_variant::Column::InventoryReserved)
                        .sub(reservation.quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(reservation.variant_id))
                .exec(conn)
                .await?;

            released_quantity += reservation.quantity;

            let mut active: inventory_reservation::ActiveModel = reservation.into();
            active.status = Set(ReservationStatus::Released);
            active.updated_at = Set(now);
            active.update(conn).await?;
        }

        Ok(released_quantity)
    }

    /// Active reservations past their expiry, oldest first. The checkout
    /// sweep resolves each against its order's status.
    pub async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        Ok(InventoryReservation::find()
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(inventory_reservation::Column::ExpiresAt.lt(now))
            .order_by_asc(inventory_reservation::Column::ExpiresAt)
            .all(&*self.db)
            .await?)
    }
}
