use async_trait::async_trait;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use super::{CartRepository, CartWithItems, SeaOrmStore};
use crate::entities::commerce::{cart, cart_item};
use crate::errors::ServiceError;

#[async_trait]
impl<C> CartRepository for SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn find_cart_with_items(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(Some(CartWithItems { cart, items }))
    }

    async fn clear_cart(&self, cart_id: Uuid) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
