//! Async delivery sink that records every routed event in the log.

use courier_types::{AsyncEventSink, DeliveryError, IndexedEvent, UserId};

/// Emits one `debug` event per routed event. Stands in for a federation or
/// push bridge when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AsyncEventSink for TracingSink {
    fn send(&self, recipients: &[UserId], event: &IndexedEvent) -> Result<(), DeliveryError> {
        tracing::debug!(
            index = event.index,
            event_id = %event.event.event_id,
            event_type = event.event.event_type(),
            recipients = recipients.len(),
            "event routed"
        );
        Ok(())
    }
}
