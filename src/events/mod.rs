use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Domain events emitted after a state transition has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPaid {
        order_id: Uuid,
    },
    OrderShipped {
        order_id: Uuid,
    },
    OrderReceived {
        order_id: Uuid,
    },
    RefundRequested {
        order_id: Uuid,
        reason: Option<String>,
    },
    RefundDenied {
        order_id: Uuid,
        reason: String,
    },
    RefundSucceeded {
        order_id: Uuid,
        refund_no: String,
    },
    RefundFailed {
        order_id: Uuid,
        refund_no: String,
        code: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel and logs each event. Outer layers (webhooks,
/// notifications) subscribe here instead of inside the services.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "domain event");
    }
}
