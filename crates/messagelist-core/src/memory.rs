//! In-process implementation of [`CoreRpc`] used by tests and the smoke binary.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;

use crate::{
    channel::CoreEventBus,
    error::CoreError,
    rpc::{CoreRpc, ListFlags},
    types::{
        AccountId, ChatId, CoreEvent, Draft, Message, MessageListItem, MessageLoadResult,
        MessageState, MsgId, SetDraftRequest, ViewType,
    },
};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug)]
struct CoreData {
    next_msg_id: u32,
    day_markers: bool,
    offline: bool,
    chats: HashMap<(AccountId, ChatId), Vec<MsgId>>,
    messages: HashMap<(AccountId, MsgId), Message>,
    drafts: HashMap<(AccountId, ChatId), Draft>,
    first_unread: HashMap<(AccountId, ChatId), MsgId>,
}

impl Default for CoreData {
    fn default() -> Self {
        Self {
            // Ids below 10 are reserved for special markers in the real core.
            next_msg_id: 10,
            day_markers: true,
            offline: false,
            chats: HashMap::new(),
            messages: HashMap::new(),
            drafts: HashMap::new(),
            first_unread: HashMap::new(),
        }
    }
}

impl CoreData {
    fn allocate_id(&mut self) -> MsgId {
        let id = MsgId(self.next_msg_id);
        self.next_msg_id += 1;
        id
    }
}

/// Message core kept entirely in memory.
///
/// Mutating helpers emit the same [`CoreEvent`]s the real core would.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCore {
    data: Arc<RwLock<CoreData>>,
    events: CoreEventBus,
}

impl InMemoryCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core that never inserts day markers, so item indices equal message indices.
    pub fn without_day_markers() -> Self {
        let core = Self::default();
        core.write().day_markers = false;
        core
    }

    /// Event bus carrying this core's change notifications.
    pub fn events(&self) -> &CoreEventBus {
        &self.events
    }

    /// Make every RPC call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.write().offline = offline;
    }

    /// Append `count` text messages without emitting events.
    ///
    /// All messages share one day so at most one day marker is produced.
    pub fn seed_chat(&self, account_id: AccountId, chat_id: ChatId, count: usize) -> Vec<MsgId> {
        (0..count)
            .map(|n| {
                self.insert_message(
                    account_id,
                    chat_id,
                    text_message(format!("message {n}"), SECONDS_PER_DAY + n as i64),
                )
            })
            .collect()
    }

    /// Append a message to a chat as if it had just arrived.
    pub fn receive_message(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        text: impl Into<String>,
        timestamp: i64,
    ) -> MsgId {
        let msg_id = self.insert_message(account_id, chat_id, text_message(text, timestamp));
        self.events.emit(CoreEvent::IncomingMsg {
            account_id,
            chat_id,
            msg_id,
        });
        msg_id
    }

    /// Append a prepared message; its id and chat id are assigned by the core.
    pub fn insert_message(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        message: Message,
    ) -> MsgId {
        let mut data = self.write();
        let msg_id = data.allocate_id();
        data.messages.insert(
            (account_id, msg_id),
            Message {
                id: msg_id,
                chat_id,
                ..message
            },
        );
        data.chats.entry((account_id, chat_id)).or_default().push(msg_id);
        msg_id
    }

    /// Replace a message's text.
    pub fn edit_message(&self, account_id: AccountId, msg_id: MsgId, text: impl Into<String>) {
        let chat_id = {
            let mut data = self.write();
            let Some(message) = data.messages.get_mut(&(account_id, msg_id)) else {
                return;
            };
            message.text = text.into();
            message.chat_id
        };
        self.events.emit(CoreEvent::MsgsChanged {
            account_id,
            chat_id,
            msg_id,
        });
    }

    /// Delete a message from its chat.
    pub fn delete_message(&self, account_id: AccountId, msg_id: MsgId) {
        let chat_id = {
            let mut data = self.write();
            let Some(message) = data.messages.remove(&(account_id, msg_id)) else {
                return;
            };
            if let Some(ids) = data.chats.get_mut(&(account_id, message.chat_id)) {
                ids.retain(|id| *id != msg_id);
            }
            message.chat_id
        };
        self.events.emit(CoreEvent::MsgDeleted {
            account_id,
            chat_id,
            msg_id,
        });
    }

    /// Change delivery state and emit the matching event.
    pub fn set_message_state(&self, account_id: AccountId, msg_id: MsgId, state: MessageState) {
        let chat_id = {
            let mut data = self.write();
            let Some(message) = data.messages.get_mut(&(account_id, msg_id)) else {
                return;
            };
            message.state = state;
            message.chat_id
        };
        let event = match state {
            MessageState::OutDelivered => CoreEvent::MsgDelivered {
                account_id,
                chat_id,
                msg_id,
            },
            MessageState::OutMdnRcvd => CoreEvent::MsgRead {
                account_id,
                chat_id,
                msg_id,
            },
            MessageState::OutFailed => CoreEvent::MsgFailed {
                account_id,
                chat_id,
                msg_id,
            },
            _ => CoreEvent::MsgsChanged {
                account_id,
                chat_id,
                msg_id,
            },
        };
        self.events.emit(event);
    }

    pub fn set_first_unread(&self, account_id: AccountId, chat_id: ChatId, msg_id: Option<MsgId>) {
        let mut data = self.write();
        match msg_id {
            Some(msg_id) => data.first_unread.insert((account_id, chat_id), msg_id),
            None => data.first_unread.remove(&(account_id, chat_id)),
        };
    }

    /// Currently persisted draft, bypassing the RPC surface.
    pub fn stored_draft(&self, account_id: AccountId, chat_id: ChatId) -> Option<Draft> {
        self.read().drafts.get(&(account_id, chat_id)).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, CoreData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CoreData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), CoreError> {
        if self.read().offline {
            return Err(CoreError::transport("in-memory core is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl CoreRpc for InMemoryCore {
    async fn get_message_list_items(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        flags: ListFlags,
    ) -> Result<Vec<MessageListItem>, CoreError> {
        self.ensure_online()?;
        let data = self.read();
        let Some(ids) = data.chats.get(&(account_id, chat_id)) else {
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(ids.len());
        let mut last_day = None;
        for msg_id in ids {
            let Some(message) = data.messages.get(&(account_id, *msg_id)) else {
                continue;
            };
            if flags.info_only && !message.is_info {
                continue;
            }
            let day = message.timestamp.div_euclid(SECONDS_PER_DAY);
            if flags.add_daymarker && data.day_markers && last_day != Some(day) {
                items.push(MessageListItem::DayMarker {
                    timestamp: day * SECONDS_PER_DAY,
                });
            }
            last_day = Some(day);
            items.push(MessageListItem::Message { msg_id: *msg_id });
        }
        Ok(items)
    }

    async fn get_messages(
        &self,
        account_id: AccountId,
        msg_ids: &[MsgId],
    ) -> Result<HashMap<MsgId, MessageLoadResult>, CoreError> {
        self.ensure_online()?;
        let data = self.read();
        Ok(msg_ids
            .iter()
            .map(|msg_id| {
                let result = match data.messages.get(&(account_id, *msg_id)) {
                    Some(message) => MessageLoadResult::Message(message.clone()),
                    None => MessageLoadResult::LoadingError {
                        error: CoreError::message_not_found(*msg_id).message,
                    },
                };
                (*msg_id, result)
            })
            .collect())
    }

    async fn get_message(
        &self,
        account_id: AccountId,
        msg_id: MsgId,
    ) -> Result<Message, CoreError> {
        self.ensure_online()?;
        self.read()
            .messages
            .get(&(account_id, msg_id))
            .cloned()
            .ok_or_else(|| CoreError::message_not_found(msg_id))
    }

    async fn get_first_unread_message_of_chat(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
    ) -> Result<Option<MsgId>, CoreError> {
        self.ensure_online()?;
        Ok(self.read().first_unread.get(&(account_id, chat_id)).copied())
    }

    async fn get_draft(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
    ) -> Result<Option<Draft>, CoreError> {
        self.ensure_online()?;
        Ok(self.stored_draft(account_id, chat_id))
    }

    async fn misc_set_draft(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        request: SetDraftRequest,
    ) -> Result<(), CoreError> {
        self.ensure_online()?;
        let draft_msg_id = {
            let mut data = self.write();
            let quote = request
                .quoted_message_id
                .and_then(|quoted| data.messages.get(&(account_id, quoted)))
                .map(Message::to_quote);
            let file = request.file.filter(|file| !file.trim().is_empty());
            let file_name = file
                .as_deref()
                .map(|path| normalize_file_name(request.file_name.as_deref(), path));
            let file_mime = file_name.as_deref().and_then(guess_mime);

            let id = match data.drafts.get(&(account_id, chat_id)) {
                Some(existing) => existing.id,
                None => data.allocate_id(),
            };
            let draft = Draft {
                id,
                text: request.text,
                file_bytes: file.as_ref().map_or(0, |_| 1_024),
                file,
                file_name,
                file_mime,
                view_type: request.view_type,
                quote,
            };
            data.messages.insert(
                (account_id, id),
                Message {
                    id,
                    chat_id,
                    text: draft.text.clone(),
                    state: MessageState::OutDraft,
                    view_type: draft.view_type,
                    is_info: false,
                    is_forwarded: false,
                    file: draft.file.clone(),
                    sender_display_name: "Me".to_owned(),
                    quote: draft.quote.clone(),
                    timestamp: 0,
                },
            );
            data.drafts.insert((account_id, chat_id), draft);
            id
        };
        self.events.emit(CoreEvent::MsgsChanged {
            account_id,
            chat_id,
            msg_id: draft_msg_id,
        });
        Ok(())
    }

    async fn remove_draft(&self, account_id: AccountId, chat_id: ChatId) -> Result<(), CoreError> {
        self.ensure_online()?;
        let mut data = self.write();
        if let Some(draft) = data.drafts.remove(&(account_id, chat_id)) {
            data.messages.remove(&(account_id, draft.id));
        }
        Ok(())
    }
}

fn text_message(text: impl Into<String>, timestamp: i64) -> Message {
    Message {
        id: MsgId::NONE,
        chat_id: ChatId::ANY,
        text: text.into(),
        state: MessageState::InSeen,
        view_type: ViewType::Text,
        is_info: false,
        is_forwarded: false,
        file: None,
        sender_display_name: "Alice".to_owned(),
        quote: None,
        timestamp,
    }
}

/// The core keeps only the base name and falls back to the path's file name.
fn normalize_file_name(requested: Option<&str>, path: &str) -> String {
    let candidate = requested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(path);
    Path::new(candidate)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .unwrap_or_else(|| "file".to_owned())
}

fn guess_mime(file_name: &str) -> Option<String> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "vcf" => "text/vcard",
        _ => "application/octet-stream",
    };
    Some(mime.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: AccountId = AccountId(1);
    const CHAT: ChatId = ChatId(10);

    async fn listed_ids(core: &InMemoryCore) -> Vec<MsgId> {
        core.get_message_list_items(ACCOUNT, CHAT, ListFlags::default())
            .await
            .expect("list items")
            .iter()
            .filter_map(MessageListItem::msg_id)
            .collect()
    }

    #[tokio::test]
    async fn inserts_day_markers_when_the_day_changes() {
        let core = InMemoryCore::new();
        let first = core.insert_message(ACCOUNT, CHAT, text_message("a", 10));
        let second = core.insert_message(ACCOUNT, CHAT, text_message("b", 20));
        let third = core.insert_message(ACCOUNT, CHAT, text_message("c", SECONDS_PER_DAY + 5));

        let items = core
            .get_message_list_items(ACCOUNT, CHAT, ListFlags::default())
            .await
            .expect("list items");
        assert_eq!(
            items,
            vec![
                MessageListItem::DayMarker { timestamp: 0 },
                MessageListItem::Message { msg_id: first },
                MessageListItem::Message { msg_id: second },
                MessageListItem::DayMarker {
                    timestamp: SECONDS_PER_DAY
                },
                MessageListItem::Message { msg_id: third },
            ]
        );
    }

    #[tokio::test]
    async fn unknown_ids_load_as_errors() {
        let core = InMemoryCore::without_day_markers();
        let ids = core.seed_chat(ACCOUNT, CHAT, 1);

        let loaded = core
            .get_messages(ACCOUNT, &[ids[0], MsgId(9_999)])
            .await
            .expect("get messages");
        assert!(loaded[&ids[0]].as_message().is_some());
        assert!(matches!(
            loaded[&MsgId(9_999)],
            MessageLoadResult::LoadingError { .. }
        ));
    }

    #[tokio::test]
    async fn offline_core_fails_with_transport_errors() {
        let core = InMemoryCore::new();
        core.set_offline(true);
        let err = core
            .get_first_unread_message_of_chat(ACCOUNT, CHAT)
            .await
            .expect_err("offline core must fail");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn set_draft_normalizes_file_name_and_resolves_quote() {
        let core = InMemoryCore::without_day_markers();
        let ids = core.seed_chat(ACCOUNT, CHAT, 2);

        core.misc_set_draft(
            ACCOUNT,
            CHAT,
            SetDraftRequest {
                text: "hi".into(),
                file: Some("/tmp/upload/report.pdf".into()),
                file_name: Some("  ".into()),
                quoted_message_id: Some(ids[1]),
                view_type: ViewType::File,
            },
        )
        .await
        .expect("set draft");

        let draft = core.stored_draft(ACCOUNT, CHAT).expect("draft stored");
        assert_eq!(draft.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(draft.file_mime.as_deref(), Some("application/pdf"));
        assert_eq!(draft.quote.and_then(|quote| quote.message_id()), Some(ids[1]));

        let stored = core.get_message(ACCOUNT, draft.id).await.expect("draft message");
        assert_eq!(stored.state, MessageState::OutDraft);
        assert_eq!(listed_ids(&core).await, ids);
    }

    #[tokio::test]
    async fn delete_emits_event_and_removes_from_list() {
        let core = InMemoryCore::without_day_markers();
        let ids = core.seed_chat(ACCOUNT, CHAT, 3);
        let mut events = core.events().subscribe();

        core.delete_message(ACCOUNT, ids[1]);

        assert_eq!(listed_ids(&core).await, vec![ids[0], ids[2]]);
        let event = events.recv().await.expect("delete event");
        assert_eq!(
            event,
            CoreEvent::MsgDeleted {
                account_id: ACCOUNT,
                chat_id: CHAT,
                msg_id: ids[1],
            }
        );
    }
}
