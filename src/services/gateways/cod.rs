use async_trait::async_trait;

use super::{PaymentGateway, PaymentRequest};
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;

/// Cash on delivery: nothing to redirect to, settled when the order is delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodGateway;

#[async_trait]
impl PaymentGateway for CodGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cod
    }

    async fn redirect_url(
        &self,
        _request: &PaymentRequest<'_>,
    ) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}
