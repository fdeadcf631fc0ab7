//! Structured logging of engine events.

use imagegen_events::GenerationEvent;
use tokio::sync::broadcast;

/// Log every event until the bus is dropped.
pub async fn run(mut rx: broadcast::Receiver<GenerationEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(
                event_type = %event.event_type,
                batch_id = event.batch_id,
                job_id = event.job_id.as_deref().unwrap_or(""),
                image_index = event.image_index,
                payload = %event.payload,
                "Generation event",
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("Event log stopped");
}
