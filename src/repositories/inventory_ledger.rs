use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

use super::{InventoryLedger, ProductWithVariants, SeaOrmStore};
use crate::entities::commerce::{product, product_variant};
use crate::errors::ServiceError;

#[async_trait]
impl<C> InventoryLedger for SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn find_product_with_variants(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductWithVariants>, ServiceError> {
        let Some(product) = product::Entity::find_by_id(product_id)
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .all(&self.conn)
            .await?;

        Ok(Some(ProductWithVariants { product, variants }))
    }

    // UPDATE product_variants SET stock_quantity = stock_quantity - $qty
    //  WHERE id = $id AND stock_quantity >= $qty
    async fn try_deduct_stock(&self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::StockQuantity.gte(quantity))
            .exec(&self.conn)
            .await?;

        debug!(%variant_id, quantity, rows = result.rows_affected, "stock deduction attempted");
        Ok(result.rows_affected == 1)
    }

    async fn restore_stock(&self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::StockQuantity,
                Expr::col(product_variant::Column::StockQuantity).add(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(&self.conn)
            .await?;

        debug!(%variant_id, quantity, rows = result.rows_affected, "stock restore attempted");
        Ok(result.rows_affected == 1)
    }
}
