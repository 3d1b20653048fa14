// Checkout and order lifecycle
pub mod order_code;
pub mod order_status;
pub mod orders;

// Payments
pub mod gateways;
pub mod payments;

pub use orders::{CheckoutSettings, OrderService};
pub use payments::PaymentService;
