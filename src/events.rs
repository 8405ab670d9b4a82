use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed in-process by a logging
/// task; an external queue can be swapped in behind `EventSender`.
#[derive(Debug, Clone)]
pub enum Event {
    OrderCreated(Uuid),
    OrderPaid {
        order_id: Uuid,
        payment_id: Option<String>,
    },
    StockDepleted {
        product_id: Uuid,
    },
}

#[derive(Debug)]
pub enum EventError {
    ChannelClosed,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => write!(f, "event channel closed"),
        }
    }
}

impl std::error::Error for EventError {}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: Event) -> Result<(), EventError> {
        self.tx.send(event).await.map_err(|_| EventError::ChannelClosed)
    }
}

/// Creates a connected sender/receiver pair.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until all senders drop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderPaid {
                order_id,
                payment_id,
            } => {
                info!(order_id = %order_id, payment_id = ?payment_id, "Order paid");
            }
            Event::StockDepleted { product_id } => {
                warn!(product_id = %product_id, "Product stock depleted");
            }
        }
        debug!(?event, "Event processed");
    }
    debug!("Event channel closed, consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event() {
        let (sender, mut rx) = channel(4);
        sender
            .send(Event::OrderCreated(Uuid::nil()))
            .await
            .expect("send");
        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, Uuid::nil()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(sender.send(Event::OrderCreated(Uuid::nil())).await.is_err());
    }
}
