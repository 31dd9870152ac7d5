//! Composer draft of the open chat.
//!
//! Edits are applied locally first and saved to the core after a debounce.
//! Each save is followed by a refetch, because the core normalizes attachment
//! metadata and resolves quotes. The refetched draft only replaces the fields
//! the core owns; the locally typed text always wins.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    config::DraftConfig,
    debounce::Debouncer,
    epoch::{Epoch, EpochToken},
    navigation::JumpArgs,
    rpc::CoreRpc,
    store::MessageListStore,
    types::{AccountId, ChatId, Draft, Message, MessageQuote, MsgId, SetDraftRequest, ViewType},
    view_state::ScrollIntoView,
};

/// Quote attached to a local draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DraftQuote {
    /// Fully resolved quote, either built locally or returned by the core.
    Resolved(MessageQuote),
    /// Only the id is known; the core resolves text and author on refetch.
    Pending { message_id: MsgId },
}

impl DraftQuote {
    pub fn message_id(&self) -> Option<MsgId> {
        match self {
            Self::Resolved(quote) => quote.message_id(),
            Self::Pending { message_id } => Some(*message_id),
        }
    }
}

/// Local view of the draft of one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftObject {
    pub chat_id: ChatId,
    /// Core-side draft message id, `0` until the core stored the draft.
    pub id: MsgId,
    pub text: String,
    pub file: Option<String>,
    pub file_name: Option<String>,
    pub file_mime: Option<String>,
    pub file_bytes: u64,
    pub view_type: ViewType,
    pub quote: Option<DraftQuote>,
    /// Local edits that the core has not confirmed yet.
    pub is_pending_save_and_refetch: bool,
}

impl DraftObject {
    pub fn empty(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            id: MsgId::NONE,
            text: String::new(),
            file: None,
            file_name: None,
            file_mime: None,
            file_bytes: 0,
            view_type: ViewType::Text,
            quote: None,
            is_pending_save_and_refetch: false,
        }
    }

    /// Draft exactly as persisted by the core.
    pub fn from_core(chat_id: ChatId, draft: Draft) -> Self {
        Self {
            chat_id,
            id: draft.id,
            text: draft.text,
            file: draft.file,
            file_name: draft.file_name,
            file_mime: draft.file_mime,
            file_bytes: draft.file_bytes,
            view_type: draft.view_type,
            quote: draft.quote.map(DraftQuote::Resolved),
            is_pending_save_and_refetch: false,
        }
    }

    /// No text, no attachment and no quote.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && !self.has_file() && self.quote.is_none()
    }

    fn has_file(&self) -> bool {
        self.file.as_deref().is_some_and(|file| !file.is_empty())
    }

    fn to_request(&self) -> SetDraftRequest {
        SetDraftRequest {
            text: self.text.clone(),
            file: self.file.clone().filter(|file| !file.is_empty()),
            file_name: self.file_name.clone(),
            quoted_message_id: self.quote.as_ref().and_then(DraftQuote::message_id),
            view_type: self.view_type,
        }
    }

    /// Merge the core's copy into the local draft, keeping the local text.
    fn reconcile(&self, canonical: Option<Draft>) -> Self {
        let text = self.text.clone();
        match canonical {
            Some(draft) => Self {
                text,
                ..Self::from_core(self.chat_id, draft)
            },
            None => Self {
                text,
                ..Self::empty(self.chat_id)
            },
        }
    }
}

/// Published draft state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftState {
    pub draft: DraftObject,
    /// The persisted draft of a newly opened chat is still being fetched.
    pub is_loading: bool,
}

impl Default for DraftState {
    fn default() -> Self {
        Self {
            draft: DraftObject::empty(ChatId::ANY),
            is_loading: false,
        }
    }
}

/// What to quote.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteSource {
    Message(Box<Message>),
    Id(MsgId),
}

/// Direction of the reply-to keyboard shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DraftTarget {
    account_id: AccountId,
    chat_id: ChatId,
    can_send: bool,
}

struct PendingSave {
    target: DraftTarget,
    token: EpochToken,
    revision: u64,
    draft: DraftObject,
}

struct DraftInner {
    rpc: Arc<dyn CoreRpc>,
    state: watch::Sender<DraftState>,
    target: Mutex<Option<DraftTarget>>,
    epoch: Epoch,
    revision: AtomicU64,
    save: Debouncer<PendingSave>,
}

/// Draft state machine for the composer. Clones share state.
#[derive(Clone)]
pub struct DraftController {
    inner: Arc<DraftInner>,
}

impl DraftController {
    pub fn new(rpc: Arc<dyn CoreRpc>, config: DraftConfig) -> Self {
        let (state, _) = watch::channel(DraftState::default());
        Self {
            inner: Arc::new(DraftInner {
                rpc,
                state,
                target: Mutex::new(None),
                epoch: Epoch::new(),
                revision: AtomicU64::new(0),
                save: Debouncer::new(config.save_debounce),
            }),
        }
    }

    pub fn state(&self) -> DraftState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DraftState> {
        self.inner.state.subscribe()
    }

    /// Switch to another chat.
    ///
    /// A pending save of the previous chat is persisted, but its refetch is
    /// dropped so it cannot overwrite the new chat's draft.
    pub async fn open_chat(&self, account_id: AccountId, chat_id: ChatId, can_send: bool) {
        let token = self.inner.epoch.advance();
        if let Some(pending) = self.inner.save.take_pending() {
            debug!(chat_id = %pending.target.chat_id, "flushing draft of previous chat");
            self.save_and_refetch(pending).await;
        }

        *self.lock_target() = Some(DraftTarget {
            account_id,
            chat_id,
            can_send,
        });
        self.inner.state.send_replace(DraftState {
            draft: DraftObject::empty(chat_id),
            is_loading: can_send,
        });
        if !can_send {
            return;
        }

        let loaded = self.inner.rpc.get_draft(account_id, chat_id).await;
        if !self.inner.epoch.is_current(token) {
            debug!(chat_id = %chat_id, "chat changed while loading draft, dropping result");
            return;
        }
        let draft = match loaded {
            Ok(Some(draft)) => DraftObject::from_core(chat_id, draft),
            Ok(None) => DraftObject::empty(chat_id),
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "failed to load draft");
                DraftObject::empty(chat_id)
            }
        };
        self.inner.state.send_replace(DraftState {
            draft,
            is_loading: false,
        });
    }

    /// Update the text; `input_chat_id` is the chat the composer belongs to.
    pub fn update_draft_text(&self, text: impl Into<String>, input_chat_id: ChatId) {
        let current = self.target().map(|target| target.chat_id);
        if current != Some(input_chat_id) {
            warn!(
                chat_id = ?current,
                input_chat_id = %input_chat_id,
                "composer chat does not match draft chat, ignoring edit"
            );
            return;
        }
        let text = text.into();
        self.edit_and_schedule(|draft| draft.text = text);
    }

    pub fn remove_quote(&self) {
        self.edit_and_schedule(|draft| draft.quote = None);
    }

    pub fn remove_file(&self) {
        self.edit_and_schedule(|draft| {
            draft.file = None;
            draft.file_name = None;
            draft.file_bytes = 0;
            draft.file_mime = None;
            draft.view_type = ViewType::Text;
        });
    }

    /// Attach a file and save right away, so the core can fill in metadata.
    pub async fn add_file_to_draft(
        &self,
        file: impl Into<String>,
        file_name: Option<String>,
        view_type: ViewType,
    ) {
        let file = file.into();
        let Some(pending) = self.edit(|draft| {
            draft.file = Some(file);
            draft.file_name = file_name;
            draft.view_type = view_type;
            draft.file_bytes = 0;
            draft.file_mime = None;
        }) else {
            return;
        };
        self.inner.save.clear();
        self.save_and_refetch(pending).await;
    }

    /// Set the quote. Quotes whose text only the core can produce are saved
    /// and refetched immediately.
    pub async fn quote_message(&self, source: QuoteSource) {
        let (quote, needs_refetch) = match source {
            QuoteSource::Message(message) => (
                DraftQuote::Resolved(message.to_quote()),
                !message.view_type.quote_is_local(),
            ),
            QuoteSource::Id(message_id) => (DraftQuote::Pending { message_id }, true),
        };
        self.edit_and_schedule(|draft| draft.quote = Some(quote));
        if needs_refetch {
            self.flush().await;
        }
    }

    /// Run a pending debounced save now.
    pub async fn flush(&self) {
        if let Some(pending) = self.inner.save.take_pending() {
            self.save_and_refetch(pending).await;
        }
    }

    /// Reset to an empty draft without saving.
    pub fn clear_draft_state(&self) {
        self.inner.save.clear();
        self.inner.state.send_modify(|state| {
            state.draft = DraftObject::empty(state.draft.chat_id);
        });
    }

    /// Replace the local draft without saving.
    pub fn set_draft_state(&self, draft: DraftObject) {
        self.inner.save.clear();
        self.inner.state.send_modify(|state| state.draft = draft);
    }

    /// Move the quote to the previous or next repliable message of `store`.
    pub async fn on_select_reply_to_shortcut(
        &self,
        direction: ReplyDirection,
        store: &MessageListStore,
    ) {
        if !self.target().is_some_and(|target| target.can_send) {
            return;
        }

        let list = store.snapshot();
        let repliable: Vec<&Message> = list
            .message_list_items
            .iter()
            .filter_map(|item| list.cached_message(item.msg_id()?))
            .filter(|message| !message.is_info)
            .collect();
        let quote = self.inner.state.borrow().draft.quote.clone();

        let Some(quote) = quote else {
            if direction == ReplyDirection::Up
                && let Some(last) = repliable.last()
            {
                self.quote_and_jump((*last).clone(), store).await;
            }
            return;
        };
        let Some(quoted_id) = quote.message_id() else {
            return;
        };

        let Some(position) = repliable.iter().rposition(|message| message.id == quoted_id) else {
            let in_list = list
                .message_list_items
                .iter()
                .any(|item| item.msg_id() == Some(quoted_id));
            if in_list {
                store.jump_to_message(reply_jump(quoted_id)).await;
            } else {
                self.remove_quote();
            }
            return;
        };

        if direction == ReplyDirection::Down && position + 1 == repliable.len() {
            self.remove_quote();
            return;
        }
        let next = match direction {
            ReplyDirection::Up => position.checked_sub(1),
            ReplyDirection::Down => Some(position + 1),
        };
        if let Some(message) = next.and_then(|index| repliable.get(index)) {
            self.quote_and_jump((*message).clone(), store).await;
        }
    }

    async fn quote_and_jump(&self, message: Message, store: &MessageListStore) {
        let msg_id = message.id;
        self.quote_message(QuoteSource::Message(Box::new(message))).await;
        store.jump_to_message(reply_jump(msg_id)).await;
    }

    fn edit_and_schedule(&self, update: impl FnOnce(&mut DraftObject)) {
        let Some(pending) = self.edit(update) else {
            return;
        };
        let controller = self.clone();
        self.inner.save.schedule(pending, move |pending| async move {
            controller.save_and_refetch(pending).await;
        });
    }

    /// Apply a local edit and describe the save it needs. `None` when the
    /// current chat takes no draft.
    fn edit(&self, update: impl FnOnce(&mut DraftObject)) -> Option<PendingSave> {
        let target = self.target().filter(|target| target.can_send)?;
        let revision = self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1;
        let mut draft = None;
        self.inner.state.send_modify(|state| {
            update(&mut state.draft);
            state.draft.is_pending_save_and_refetch = true;
            draft = Some(state.draft.clone());
        });
        Some(PendingSave {
            target,
            token: self.inner.epoch.token(),
            revision,
            draft: draft?,
        })
    }

    async fn save_and_refetch(&self, pending: PendingSave) {
        let PendingSave {
            target,
            token,
            revision,
            draft,
        } = pending;
        let DraftTarget {
            account_id,
            chat_id,
            ..
        } = target;

        let saved = if draft.is_empty() {
            self.inner.rpc.remove_draft(account_id, chat_id).await
        } else {
            self.inner
                .rpc
                .misc_set_draft(account_id, chat_id, draft.to_request())
                .await
        };
        if let Err(err) = saved {
            warn!(chat_id = %chat_id, error = %err, "failed to save draft");
            return;
        }
        if !self.inner.epoch.is_current(token) {
            debug!(
                chat_id = %chat_id,
                "draft saved for a chat that is no longer open, skipping refetch"
            );
            return;
        }

        let canonical = match self.inner.rpc.get_draft(account_id, chat_id).await {
            Ok(canonical) => canonical,
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "failed to refetch draft");
                return;
            }
        };
        if !self.inner.epoch.is_current(token) {
            debug!(chat_id = %chat_id, "chat changed during draft refetch, dropping result");
            return;
        }
        if self.inner.revision.load(Ordering::Acquire) != revision {
            debug!(chat_id = %chat_id, "newer local draft edits pending, dropping refetch");
            return;
        }
        self.inner.state.send_modify(|state| {
            state.draft = state.draft.reconcile(canonical);
        });
    }

    fn target(&self) -> Option<DraftTarget> {
        *self.lock_target()
    }

    fn lock_target(&self) -> MutexGuard<'_, Option<DraftTarget>> {
        self.inner
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn reply_jump(msg_id: MsgId) -> JumpArgs {
    JumpArgs {
        msg_id: Some(msg_id),
        highlight: true,
        focus: false,
        add_message_id_to_stack: None,
        scroll_into_view: ScrollIntoView::Nearest,
    }
}
