//! Routes core change events to the store of the open chat.

use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    channel::EventStream,
    store::MessageListStore,
    types::{ChatId, CoreEvent, MessageState, MsgId},
};

/// Background task feeding one store from the core's event stream.
///
/// Events are handled one after another, so store effects are enqueued in
/// arrival order.
pub struct EventRouter {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl EventRouter {
    pub fn spawn(store: MessageListStore, mut events: EventStream) -> Self {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => dispatch_event(&store, event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                chat_id = %store.chat_id(),
                                skipped,
                                "event stream lagged, refreshing message list"
                            );
                            store.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(chat_id = %store.chat_id(), "event router stopped");
        });
        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop routing and wait for the event in flight to be handled.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Apply one core event to `store`. Events of other accounts or chats are
/// ignored.
pub async fn dispatch_event(store: &MessageListStore, event: CoreEvent) {
    if event.account_id() != store.account_id() {
        trace!(event = event.kind(), "event for another account");
        return;
    }
    let own_chat = |chat_id: ChatId| chat_id == store.chat_id();

    match event {
        CoreEvent::MsgDelivered {
            chat_id, msg_id, ..
        } if own_chat(chat_id) => store.set_message_state(msg_id, MessageState::OutDelivered),
        CoreEvent::MsgRead {
            chat_id, msg_id, ..
        } if own_chat(chat_id) => store.set_message_state(msg_id, MessageState::OutMdnRcvd),
        CoreEvent::IncomingMsg { chat_id, msg_id, .. } => {
            if own_chat(chat_id) {
                store.on_event_incoming_message().await;
            } else {
                debug!(chat_id = %chat_id, msg_id = %msg_id, "incoming message for another chat");
            }
        }
        CoreEvent::MsgsChanged {
            chat_id, msg_id, ..
        }
        | CoreEvent::ReactionsChanged {
            chat_id, msg_id, ..
        } => {
            if msg_id == MsgId::NONE {
                if chat_id == ChatId::ANY || own_chat(chat_id) {
                    store.refresh().await;
                }
            } else if chat_id == ChatId::ANY || own_chat(chat_id) {
                store.on_event_messages_changed(msg_id).await;
            }
        }
        CoreEvent::MsgFailed {
            chat_id, msg_id, ..
        } if own_chat(chat_id) => store.on_event_messages_changed(msg_id).await,
        CoreEvent::MsgDeleted { chat_id, .. } if own_chat(chat_id) => {
            store.refresh().await;
        }
        other => trace!(event = other.kind(), "event for another chat"),
    }
}
