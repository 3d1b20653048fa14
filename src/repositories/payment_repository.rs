use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::{PaymentRepository, SeaOrmStore};
use crate::entities::payment;
use crate::errors::ServiceError;

#[async_trait]
impl<C> PaymentRepository for SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn find_payment_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        // Oldest row wins if a race ever produced two.
        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .one(&self.conn)
            .await?)
    }

    async fn insert_payment(&self, payment: payment::Model) -> Result<(), ServiceError> {
        let model = payment::ActiveModel {
            id: Set(payment.id),
            order_id: Set(payment.order_id),
            payment_method: Set(payment.payment_method),
            payment_status: Set(payment.payment_status),
            amount: Set(payment.amount),
            transaction_id: Set(payment.transaction_id),
            gateway_response: Set(payment.gateway_response),
            paid_at: Set(payment.paid_at),
            created_at: Set(payment.created_at),
            updated_at: Set(payment.updated_at),
        };
        payment::Entity::insert(model)
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    async fn update_payment(&self, payment: &payment::Model) -> Result<(), ServiceError> {
        payment::ActiveModel {
            id: Set(payment.id),
            payment_status: Set(payment.payment_status),
            transaction_id: Set(payment.transaction_id.clone()),
            gateway_response: Set(payment.gateway_response.clone()),
            paid_at: Set(payment.paid_at),
            updated_at: Set(payment.updated_at),
            ..Default::default()
        }
        .update(&self.conn)
        .await?;
        Ok(())
    }
}
