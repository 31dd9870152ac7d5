use tokio::sync::broadcast;

use crate::types::CoreEvent;

/// Broadcast event stream type used by store subscribers.
pub type EventStream = broadcast::Receiver<CoreEvent>;

/// Fan-out bus for live change notifications coming from the core.
#[derive(Clone, Debug)]
pub struct CoreEventBus {
    event_tx: broadcast::Sender<CoreEvent>,
}

impl CoreEventBus {
    /// Create a bus that buffers up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for CoreEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, ChatId, MsgId};

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let bus = CoreEventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(CoreEvent::IncomingMsg {
            account_id: AccountId(1),
            chat_id: ChatId(10),
            msg_id: MsgId(100),
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[test]
    fn emitting_without_subscribers_is_a_no_op() {
        let bus = CoreEventBus::new(1);
        bus.emit(CoreEvent::MsgDeleted {
            account_id: AccountId(1),
            chat_id: ChatId(10),
            msg_id: MsgId(5),
        });
    }
}
