use async_trait::async_trait;
use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

use super::{AddressRepository, SeaOrmStore};
use crate::entities::commerce::customer_address;
use crate::errors::ServiceError;

#[async_trait]
impl<C> AddressRepository for SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn find_address(
        &self,
        address_id: Uuid,
    ) -> Result<Option<customer_address::Model>, ServiceError> {
        Ok(customer_address::Entity::find_by_id(address_id)
            .one(&self.conn)
            .await?)
    }
}
