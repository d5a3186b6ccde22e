use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::TestOutcome;

/// Domain events emitted by the testing workflow. Consumed by the in-process
/// event loop; handlers are observational (logging, metrics), never part of
/// the transactional state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TestingRequestCreated {
        request_id: Uuid,
        request_number: String,
        from_location_id: Uuid,
        to_location_id: Uuid,
        line_count: usize,
    },
    TestingRequestAccepted {
        request_id: Uuid,
        accepted_by: Uuid,
    },
    TestResultRecorded {
        request_id: Uuid,
        product_id: Uuid,
        serial_number: Option<String>,
        result: TestOutcome,
    },
    TestingRequestCompleted {
        request_id: Uuid,
        completed_at: DateTime<Utc>,
    },
    TestingStockReturned {
        request_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    TestingRequestCancelled {
        request_id: Uuid,
        cancelled_by: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Lifecycle operations have already committed by the time events fire;
    /// a dropped event must not fail the request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Event processing loop; runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::TestingRequestCreated {
                request_number,
                line_count,
                ..
            } => {
                info!(
                    request_number = %request_number,
                    lines = line_count,
                    "Testing request created"
                );
            }
            Event::TestingRequestAccepted { request_id, .. } => {
                info!(request_id = %request_id, "Testing request accepted");
            }
            Event::TestResultRecorded {
                request_id,
                serial_number,
                result,
                ..
            } => {
                info!(
                    request_id = %request_id,
                    serial = ?serial_number,
                    result = ?result,
                    "Test result recorded"
                );
            }
            Event::TestingRequestCompleted { request_id, .. } => {
                info!(request_id = %request_id, "Testing request completed");
            }
            Event::TestingStockReturned {
                request_id,
                quantity,
                ..
            } => {
                info!(request_id = %request_id, quantity, "Testing stock returned to outlet");
            }
            Event::TestingRequestCancelled { request_id, .. } => {
                info!(request_id = %request_id, "Testing request cancelled");
            }
        }
    }

    info!("Event processing loop stopped");
}
