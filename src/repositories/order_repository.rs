use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Select, Set,
};
use std::collections::HashMap;
use uuid::Uuid;

use super::{OrderFilter, OrderRepository, OrderWithItems, PageRequest, SeaOrmStore};
use crate::entities::{order, order_item};
use crate::errors::ServiceError;

fn new_order(m: &order::Model) -> order::ActiveModel {
    order::ActiveModel {
        id: Set(m.id),
        order_code: Set(m.order_code.clone()),
        user_id: Set(m.user_id),
        status: Set(m.status),
        payment_method: Set(m.payment_method),
        payment_status: Set(m.payment_status),
        subtotal_amount: Set(m.subtotal_amount),
        shipping_fee: Set(m.shipping_fee),
        total_amount: Set(m.total_amount),
        note: Set(m.note.clone()),
        cancel_reason: Set(m.cancel_reason.clone()),
        shipping_full_name: Set(m.shipping_full_name.clone()),
        shipping_phone: Set(m.shipping_phone.clone()),
        shipping_province: Set(m.shipping_province.clone()),
        shipping_district: Set(m.shipping_district.clone()),
        shipping_ward: Set(m.shipping_ward.clone()),
        shipping_detail_address: Set(m.shipping_detail_address.clone()),
        created_at: Set(m.created_at),
        updated_at: Set(m.updated_at),
    }
}

fn new_order_item(m: &order_item::Model) -> order_item::ActiveModel {
    order_item::ActiveModel {
        id: Set(m.id),
        order_id: Set(m.order_id),
        product_id: Set(m.product_id),
        variant_id: Set(m.variant_id),
        product_name: Set(m.product_name.clone()),
        variant_name: Set(m.variant_name.clone()),
        price: Set(m.price),
        quantity: Set(m.quantity),
        subtotal: Set(m.subtotal),
        created_at: Set(m.created_at),
    }
}

fn apply_filter(mut query: Select<order::Entity>, filter: &OrderFilter) -> Select<order::Entity> {
    if let Some(user_id) = filter.user_id {
        query = query.filter(order::Column::UserId.eq(user_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(order::Column::Status.eq(status));
    }
    if let Some(payment_status) = filter.payment_status {
        query = query.filter(order::Column::PaymentStatus.eq(payment_status));
    }
    if let Some(payment_method) = filter.payment_method {
        query = query.filter(order::Column::PaymentMethod.eq(payment_method));
    }
    query
}

impl<C> SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn load_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    async fn hydrate(&self, order: Option<order::Model>) -> Result<Option<OrderWithItems>, ServiceError> {
        match order {
            Some(order) => {
                let items = self.load_items(order.id).await?;
                Ok(Some(OrderWithItems { order, items }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<C> OrderRepository for SeaOrmStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn insert_order(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError> {
        order::Entity::insert(new_order(&order))
            .exec_without_returning(&self.conn)
            .await?;

        if !items.is_empty() {
            order_item::Entity::insert_many(items.iter().map(new_order_item))
                .exec_without_returning(&self.conn)
                .await?;
        }

        Ok(OrderWithItems { order, items })
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let order = order::Entity::find_by_id(order_id).one(&self.conn).await?;
        self.hydrate(order).await
    }

    async fn find_order_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderCode.eq(code))
            .one(&self.conn)
            .await?;
        self.hydrate(order).await
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<(Vec<OrderWithItems>, u64), ServiceError> {
        let paginator = apply_filter(order::Entity::find(), filter)
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&self.conn, page.limit);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.page.saturating_sub(1)).await?;

        if orders.is_empty() {
            return Ok((Vec::new(), total));
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&self.conn)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        let orders = orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect();

        Ok((orders, total))
    }

    async fn update_order(&self, order: &order::Model) -> Result<(), ServiceError> {
        order::ActiveModel {
            id: Set(order.id),
            status: Set(order.status),
            payment_status: Set(order.payment_status),
            cancel_reason: Set(order.cancel_reason.clone()),
            updated_at: Set(order.updated_at),
            ..Default::default()
        }
        .update(&self.conn)
        .await?;
        Ok(())
    }
}
