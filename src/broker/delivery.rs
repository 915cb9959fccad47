use super::{DeliveryHandler, JsonSerializer};
use tracing::{debug, error};

/// What to tell the broker about a delivery once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processed; remove the message from the queue.
    Ack,
    /// Not processed; the broker decides between requeue and dead-letter.
    Nack,
}

/// Decodes one message body and runs `handler` on it.
///
/// A body that does not decode is nacked without reaching the handler.
/// Handler errors are logged here and turned into a nack; they never
/// propagate into the consume loop.
pub async fn dispatch(payload: &[u8], handler: &dyn DeliveryHandler) -> Acknowledgement {
    let street = match JsonSerializer::deserialize(payload) {
        Ok(street) => street,
        Err(e) => {
            error!(
                error = %e,
                payload_len = payload.len(),
                "Discarding malformed message"
            );
            return Acknowledgement::Nack;
        }
    };

    let street_id = street.street_id;
    let street_name = street.street_name.clone();

    match handler.handle(street).await {
        Ok(()) => {
            debug!(street_id, street_name = %street_name, "Processed street");
            Acknowledgement::Ack
        }
        Err(e) => {
            error!(street_id, error = %e, "Error processing message");
            Acknowledgement::Nack
        }
    }
}
