use async_trait::async_trait;
use parley_core::domain::message::Message;
use parley_core::flow::FlowCoordinator;

use crate::consumer::{HandlerError, MessageHandler};

/// The ingress consumer feeds every decoded message straight into the coordinator. Rejections
/// surface as handler failures, which the consumer logs before moving on.
#[async_trait]
impl MessageHandler for FlowCoordinator {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        self.on_message(&message).map(|_| ()).map_err(|error| HandlerError(error.to_string()))
    }
}
