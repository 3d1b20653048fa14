//! Order lifecycle rules.
//!
//! ```text
//! pending ──► processing ──► shipping ──► delivered
//!    │             │
//!    └─────────────┴──► cancelled
//! ```

use crate::entities::OrderStatus;
use crate::errors::ServiceError;

/// Statuses reachable from `from` in one step.
pub fn allowed_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
        OrderStatus::Processing => &[OrderStatus::Shipping, OrderStatus::Cancelled],
        OrderStatus::Shipping => &[OrderStatus::Delivered],
        OrderStatus::Delivered | OrderStatus::Cancelled => &[],
    }
}

pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn is_terminal(status: OrderStatus) -> bool {
    allowed_transitions(status).is_empty()
}

pub fn can_cancel(status: OrderStatus) -> bool {
    is_valid_transition(status, OrderStatus::Cancelled)
}
