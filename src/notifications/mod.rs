//! Order notifications.
//!
//! Delivery is best-effort: callers log a [`NotificationError`] and carry on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::entities::order;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn send_order_confirmation(&self, order: &order::Model) -> Result<(), NotificationError>;
}

/// Writes confirmations to the log instead of a mail server.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl OrderNotifier for LoggingNotifier {
    async fn send_order_confirmation(&self, order: &order::Model) -> Result<(), NotificationError> {
        info!(
            order_id = %order.id,
            order_code = %order.order_code,
            user_id = %order.user_id,
            total = %order.total_amount,
            payment_method = %order.payment_method,
            "order confirmation sent"
        );
        Ok(())
    }
}
