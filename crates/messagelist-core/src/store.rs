//! Windowed message list store for one `(account, chat)` pair.
//!
//! The store owns the chat's ordered item list, the fetched window over it and
//! a cache of hydrated message bodies. Effects are async and serialized by the
//! [`ScrollScheduler`]; reducers are synchronous state transitions. State is
//! published through a `watch` channel so renderers can subscribe.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    config::StoreConfig,
    debounce::Debouncer,
    epoch::{Epoch, EpochToken},
    error::{CoreError, ErrorCategory},
    navigation::{JumpArgs, PendingNavigation},
    rpc::{CoreRpc, ListFlags},
    scheduler::{LockName, ScrollScheduler},
    types::{AccountId, ChatId, Message, MessageListItem, MessageLoadResult, MessageState, MsgId},
    view_state::{ScrollMetrics, ViewState},
    window::{self, IncomingPlan, WindowBounds},
};

/// Non-blocking notice for the user, published alongside the list state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreFeedback {
    /// A jump target could not be found; the newest message is shown instead.
    MessageNotFound { msg_id: MsgId },
}

/// Snapshot of everything the renderer needs to draw the message list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageListState {
    /// Ordered items of the whole chat.
    pub message_list_items: Vec<MessageListItem>,
    /// Hydrated bodies, keyed by message id. Entries are merged, never evicted.
    pub message_cache: HashMap<MsgId, MessageLoadResult>,
    /// Fetched range of `message_list_items`; `None` for an empty chat.
    pub window: Option<WindowBounds>,
    pub view_state: ViewState,
    /// Messages to return to with "jump down", most recent last.
    pub jump_to_message_stack: Vec<MsgId>,
    /// Set once the first load or jump committed.
    pub loaded: bool,
    pub feedback: Option<StoreFeedback>,
}

impl MessageListState {
    /// Items inside the fetched window.
    pub fn active_view(&self) -> &[MessageListItem] {
        match self.window {
            Some(bounds) => bounds.slice(&self.message_list_items),
            None => &[],
        }
    }

    pub fn cached_message(&self, msg_id: MsgId) -> Option<&Message> {
        self.message_cache.get(&msg_id)?.as_message()
    }

    /// Message ids inside the window that have no cache entry yet.
    pub fn missing_in_window(&self) -> Vec<MsgId> {
        self.active_view()
            .iter()
            .filter_map(MessageListItem::msg_id)
            .filter(|msg_id| !self.message_cache.contains_key(msg_id))
            .collect()
    }
}

/// Outcome of [`MessageListStore::on_scroll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollDecision {
    pub fetch_top: bool,
    pub fetch_bottom: bool,
    /// Whether the "jump down" affordance should be visible.
    pub show_jump_down: bool,
}

struct StoreInner {
    account_id: AccountId,
    chat_id: ChatId,
    rpc: Arc<dyn CoreRpc>,
    config: StoreConfig,
    scheduler: ScrollScheduler,
    state: watch::Sender<MessageListState>,
    metrics: Mutex<ScrollMetrics>,
    epoch: Epoch,
    closed: AtomicBool,
    navigation: PendingNavigation,
    missing: Debouncer<()>,
}

/// Message list of one chat. Clones share the same store.
#[derive(Clone)]
pub struct MessageListStore {
    inner: Arc<StoreInner>,
}

impl MessageListStore {
    pub fn new(
        account_id: AccountId,
        chat_id: ChatId,
        rpc: Arc<dyn CoreRpc>,
        navigation: PendingNavigation,
    ) -> Self {
        Self::with_config(account_id, chat_id, rpc, navigation, StoreConfig::default())
    }

    pub fn with_config(
        account_id: AccountId,
        chat_id: ChatId,
        rpc: Arc<dyn CoreRpc>,
        navigation: PendingNavigation,
        config: StoreConfig,
    ) -> Self {
        let (state, _) = watch::channel(MessageListState::default());
        Self {
            inner: Arc::new(StoreInner {
                account_id,
                chat_id,
                rpc,
                config,
                scheduler: ScrollScheduler::new(),
                state,
                metrics: Mutex::new(ScrollMetrics::default()),
                epoch: Epoch::new(),
                closed: AtomicBool::new(false),
                navigation,
                missing: Debouncer::new(config.missing_messages_debounce),
            }),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.inner.account_id
    }

    pub fn chat_id(&self) -> ChatId {
        self.inner.chat_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> MessageListState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageListState> {
        self.inner.state.subscribe()
    }

    pub fn active_view(&self) -> Vec<MessageListItem> {
        self.inner.state.borrow().active_view().to_vec()
    }

    pub fn is_scroll_locked(&self) -> bool {
        self.inner.scheduler.is_locked(LockName::Scroll)
    }

    /// Wait until every effect queued so far has finished.
    pub async fn settled(&self) {
        self.inner.scheduler.settled().await;
    }

    /// Stop committing results. In-flight effects finish but their results
    /// are dropped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.epoch.advance();
        self.inner.missing.clear();
        self.inner.scheduler.unlock(LockName::Scroll);
        debug!(
            account_id = %self.inner.account_id,
            chat_id = %self.inner.chat_id,
            "message list store closed"
        );
    }

    /// Open the chat: follow a pending navigation request, else the first
    /// unread message, else show the newest page.
    pub async fn load_chat(&self) -> bool {
        if let Some(args) = self
            .inner
            .navigation
            .take_for(self.inner.account_id, self.inner.chat_id)
        {
            debug!(chat_id = %self.inner.chat_id, "load_chat consumed pending jump");
            return self.jump_to_message(args).await;
        }
        let Some(token) = self.begin() else {
            return false;
        };

        let mut first_unread = None;
        let changed = self
            .inner
            .scheduler
            .locked_queued(LockName::Scroll, "load_chat", async {
                match self
                    .inner
                    .rpc
                    .get_first_unread_message_of_chat(self.inner.account_id, self.inner.chat_id)
                    .await
                {
                    Ok(Some(msg_id)) => {
                        first_unread = Some(msg_id);
                        return Ok(false);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(
                            chat_id = %self.inner.chat_id,
                            error = %err,
                            "first unread lookup failed, opening at the newest message"
                        );
                    }
                }

                let items = self.fetch_items().await?;
                let bounds = window::initial_window(items.len(), self.inner.config.page_size);
                let bodies = match bounds {
                    Some(bounds) => {
                        self.load_bodies(window::message_ids(&items, bounds)).await
                    }
                    None => HashMap::new(),
                };

                Ok(self.commit(token, "load_chat", |state| {
                    let view_state = state.view_state.select_chat();
                    *state = MessageListState {
                        message_list_items: items,
                        message_cache: bodies,
                        window: bounds,
                        view_state,
                        loaded: true,
                        ..MessageListState::default()
                    };
                }))
            })
            .await;

        if let Some(msg_id) = first_unread {
            info!(
                chat_id = %self.inner.chat_id,
                msg_id = %msg_id,
                "opening chat at first unread message"
            );
            return self
                .jump_to_message(JumpArgs {
                    msg_id: Some(msg_id),
                    highlight: true,
                    focus: false,
                    ..JumpArgs::default()
                })
                .await;
        }
        self.backfill_if_needed();
        changed
    }

    /// Consume a navigation request addressed to this chat while it is open.
    pub async fn check_pending_jump(&self) -> bool {
        match self
            .inner
            .navigation
            .take_for(self.inner.account_id, self.inner.chat_id)
        {
            Some(args) => self.jump_to_message(args).await,
            None => false,
        }
    }

    /// Grow the window by one page of older items.
    ///
    /// Returns `false` when nothing changed: at the top edge, while a scroll
    /// is in flight, or when loading failed.
    pub async fn fetch_more_messages_top(&self) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };
        self.inner
            .scheduler
            .locked_or_drop(LockName::Scroll, "fetch_more_messages_top", async {
                let plan = {
                    let state = self.inner.state.borrow();
                    state.window.and_then(|current| {
                        let grown = window::extend_top(current, self.inner.config.page_size)?;
                        let added = WindowBounds::new(grown.oldest, current.oldest - 1);
                        Some((grown, uncached_ids(&state, added)))
                    })
                };
                let Some((grown, ids)) = plan else {
                    debug!(
                        chat_id = %self.inner.chat_id,
                        "fetch_more_messages_top: already at the top"
                    );
                    return Ok(false);
                };

                let bodies = self.load_bodies(ids).await;
                let metrics = self.scroll_metrics();
                Ok(self.commit(token, "fetch_more_messages_top", |state| {
                    state.message_cache.extend(bodies);
                    state.window = Some(grown);
                    state.view_state = state.view_state.append_messages_top(metrics);
                }))
            })
            .await
    }

    /// Grow the window by one page of newer items.
    pub async fn fetch_more_messages_bottom(&self) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };
        self.inner
            .scheduler
            .locked_or_drop(LockName::Scroll, "fetch_more_messages_bottom", async {
                let plan = {
                    let state = self.inner.state.borrow();
                    state.window.and_then(|current| {
                        let grown = window::extend_bottom(
                            current,
                            state.message_list_items.len(),
                            self.inner.config.page_size,
                        )?;
                        let added = WindowBounds::new(current.newest + 1, grown.newest);
                        Some((grown, uncached_ids(&state, added)))
                    })
                };
                let Some((grown, ids)) = plan else {
                    debug!(
                        chat_id = %self.inner.chat_id,
                        "fetch_more_messages_bottom: already at the bottom"
                    );
                    return Ok(false);
                };

                let bodies = self.load_bodies(ids).await;
                let metrics = self.scroll_metrics();
                Ok(self.commit(token, "fetch_more_messages_bottom", |state| {
                    state.message_cache.extend(bodies);
                    state.window = Some(grown);
                    state.view_state = state.view_state.append_messages_bottom(metrics);
                }))
            })
            .await
    }

    /// Center the window on a message and ask the renderer to reveal it.
    ///
    /// The scroll lock stays held after a successful jump until
    /// [`Self::unlock_scroll`] is called.
    pub async fn jump_to_message(&self, args: JumpArgs) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };
        let changed = self
            .inner
            .scheduler
            .locked_queued(LockName::Scroll, "jump_to_message", self.jump(token, args))
            .await;
        self.backfill_if_needed();
        changed
    }

    async fn jump(&self, token: EpochToken, args: JumpArgs) -> Result<bool, CoreError> {
        let JumpArgs {
            msg_id,
            mut highlight,
            focus,
            add_message_id_to_stack,
            scroll_into_view,
        } = args;

        let (mut items, current_stack) = {
            let state = self.inner.state.borrow();
            (
                state.message_list_items.clone(),
                state.jump_to_message_stack.clone(),
            )
        };

        let (target, mut stack) = match msg_id {
            None => match current_stack.split_last() {
                Some((last, rest)) => (Some(*last), rest.to_vec()),
                None => {
                    highlight = false;
                    (None, Vec::new())
                }
            },
            Some(msg_id) => {
                let stack = match add_message_id_to_stack {
                    None => Vec::new(),
                    Some(add) if current_stack.contains(&add) => current_stack,
                    Some(add) => {
                        let mut stack = current_stack;
                        stack.push(add);
                        stack
                    }
                };
                (Some(msg_id), stack)
            }
        };

        if let Some(target) = target
            && let Some(chat_id) = self.resolve_chat(target).await?
            && chat_id != self.inner.chat_id
        {
            error!(
                msg_id = %target,
                target_chat_id = %chat_id,
                chat_id = %self.inner.chat_id,
                "jump target belongs to another chat; switch stores before jumping"
            );
            stack.clear();
        }

        let mut refetched = false;
        let needs_items = match target {
            Some(target) => window::find_message(&items, target).is_none(),
            None => newest_message_index(&items).is_none(),
        };
        if needs_items {
            items = self.fetch_items().await?;
            refetched = true;
        }

        let mut feedback = None;
        let found = target.and_then(|target| {
            window::find_message(&items, target).map(|index| (target, index))
        });
        let (target_id, target_index) = match (target, found) {
            (_, Some(found)) => found,
            (missing, None) => {
                let Some(index) = newest_message_index(&items) else {
                    debug!(chat_id = %self.inner.chat_id, "jump_to_message: chat has no messages");
                    return Ok(self.commit(token, "jump_to_message", |state| {
                        state.message_list_items = items;
                        state.window = None;
                        state.jump_to_message_stack = Vec::new();
                        state.loaded = true;
                    }));
                };
                if let Some(missing) = missing {
                    warn!(
                        chat_id = %self.inner.chat_id,
                        msg_id = %missing,
                        "jump target not found, showing the newest message instead"
                    );
                    feedback = Some(StoreFeedback::MessageNotFound { msg_id: missing });
                    highlight = false;
                }
                let Some(newest_id) = items[index].msg_id() else {
                    return Ok(false);
                };
                (newest_id, index)
            }
        };

        let Some(requested) =
            window::jump_window(target_index, items.len(), self.inner.config.half_page())
        else {
            return Ok(false);
        };

        let (bounds, ids) = {
            let state = self.inner.state.borrow();
            let ids: Vec<MsgId> = window::message_ids(&items, requested)
                .into_iter()
                .filter(|id| !state.message_cache.contains_key(id))
                .collect();
            let bounds = if ids.is_empty() && !refetched {
                window::widen(state.window, requested)
            } else {
                requested
            };
            (bounds, ids)
        };
        debug!(
            chat_id = %self.inner.chat_id,
            msg_id = %target_id,
            oldest = bounds.oldest,
            newest = bounds.newest,
            reuse_cache = ids.is_empty(),
            "jump_to_message window"
        );
        let bodies = self.load_bodies(ids).await;

        Ok(self.commit(token, "jump_to_message", |state| {
            state.message_list_items = items;
            state.message_cache.extend(bodies);
            state.window = Some(bounds);
            state.view_state =
                state
                    .view_state
                    .jump_to_message(target_id, highlight, focus, scroll_into_view);
            state.jump_to_message_stack = stack;
            state.loaded = true;
            state.feedback = feedback;
        }))
    }

    /// Reload the item list and the bodies of the current window.
    pub async fn refresh(&self) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };
        let changed = self
            .inner
            .scheduler
            .locked_queued(LockName::Scroll, "refresh", async {
                let items = self.fetch_items().await?;
                let current = self.inner.state.borrow().window;
                let bounds = window::clamp(current, items.len());
                let ids = bounds
                    .map(|bounds| window::message_ids(&items, bounds))
                    .unwrap_or_default();
                let bodies = self.load_bodies(ids).await;
                let metrics = self.scroll_metrics();

                Ok(self.commit(token, "refresh", |state| {
                    state.message_list_items = items;
                    state.message_cache.extend(bodies);
                    state.window = bounds;
                    state.view_state = state.view_state.refresh(metrics);
                    state.loaded = true;
                }))
            })
            .await;
        self.backfill_if_needed();
        changed
    }

    /// New messages arrived in this chat.
    ///
    /// They are attached to the window only when they directly follow it;
    /// otherwise only the item list is replaced.
    pub async fn on_event_incoming_message(&self) {
        let Some(token) = self.begin() else {
            return;
        };
        self.inner
            .scheduler
            .queued("on_event_incoming_message", async {
                let refreshed = self.fetch_items().await?;
                let plan = {
                    let state = self.inner.state.borrow();
                    window::plan_incoming(
                        &state.message_list_items,
                        &refreshed,
                        state.window,
                        self.inner.config.page_size,
                    )
                };
                let metrics = self.scroll_metrics();

                let (bounds, added) = match plan {
                    IncomingPlan::ItemsOnly => {
                        debug!(
                            chat_id = %self.inner.chat_id,
                            "incoming messages leave a gap, updating items only"
                        );
                        self.commit_items(token, "on_event_incoming_message", refreshed, metrics);
                        return Ok(());
                    }
                    IncomingPlan::Open(bounds) => (bounds, bounds),
                    IncomingPlan::Append { first_new, window } => {
                        (window, WindowBounds::new(first_new, window.newest))
                    }
                };

                let bodies = self
                    .load_bodies(window::message_ids(&refreshed, added))
                    .await;
                self.commit(token, "on_event_incoming_message", |state| {
                    state.message_list_items = refreshed;
                    state.message_cache.extend(bodies);
                    state.window = Some(bounds);
                    state.view_state = state.view_state.fetched_incoming_messages(metrics);
                    state.loaded = true;
                });
                Ok(())
            })
            .await;
        self.backfill_if_needed();
    }

    /// A message changed. Known messages are patched in the cache; unknown
    /// ones may be insertions, so the item list is refetched.
    pub async fn on_event_messages_changed(&self, msg_id: MsgId) {
        let Some(token) = self.begin() else {
            return;
        };
        self.inner
            .scheduler
            .queued("on_event_messages_changed", async {
                let known = {
                    let state = self.inner.state.borrow();
                    window::find_message(&state.message_list_items, msg_id).is_some()
                };

                if known {
                    match self.inner.rpc.get_message(self.inner.account_id, msg_id).await {
                        Ok(message) => {
                            self.commit(token, "on_event_messages_changed", |state| {
                                state
                                    .message_cache
                                    .insert(msg_id, MessageLoadResult::Message(message));
                            });
                        }
                        Err(err) => {
                            warn!(
                                msg_id = %msg_id,
                                error = %err,
                                "failed to fetch changed message"
                            );
                        }
                    }
                    return Ok(());
                }

                match self.inner.rpc.get_message(self.inner.account_id, msg_id).await {
                    Ok(message) if message.state == MessageState::OutDraft => {
                        debug!(msg_id = %msg_id, "draft changed, item list unaffected");
                        return Ok(());
                    }
                    Ok(message) if message.chat_id != self.inner.chat_id => {
                        debug!(
                            msg_id = %msg_id,
                            event_chat_id = %message.chat_id,
                            "changed message belongs to another chat"
                        );
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(
                            msg_id = %msg_id,
                            error = %err,
                            "changed message not loadable, refetching items"
                        );
                    }
                }

                let items = self.fetch_items().await?;
                let metrics = self.scroll_metrics();
                self.commit_items(token, "on_event_messages_changed", items, metrics);
                Ok(())
            })
            .await;
        self.backfill_if_needed();
    }

    /// Debounced backfill of window items that have no cache entry.
    pub fn load_missing_messages(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let store = self.clone();
        self.inner.missing.schedule((), move |()| async move {
            store.load_missing_messages_now().await;
        });
    }

    /// Undebounced variant of [`Self::load_missing_messages`].
    pub async fn load_missing_messages_now(&self) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };
        self.inner
            .scheduler
            .locked_queued(LockName::Scroll, "load_missing_messages", async {
                let missing = self.inner.state.borrow().missing_in_window();
                if missing.is_empty() {
                    return Ok(false);
                }
                warn!(
                    chat_id = %self.inner.chat_id,
                    count = missing.len(),
                    "message cache misses window items, loading them now"
                );
                let bodies = self.load_bodies(missing).await;
                if !bodies.is_empty() {
                    self.commit(token, "load_missing_messages", |state| {
                        state.message_cache.extend(bodies);
                    });
                }
                Ok(false)
            })
            .await
    }

    /// Patch the delivery state of a cached message.
    pub fn set_message_state(&self, msg_id: MsgId, message_state: MessageState) {
        let patched = self.inner.state.send_if_modified(|state| {
            match state.message_cache.get_mut(&msg_id) {
                Some(MessageLoadResult::Message(message)) => {
                    message.state = message_state;
                    true
                }
                _ => false,
            }
        });
        if !patched {
            warn!(
                chat_id = %self.inner.chat_id,
                msg_id = %msg_id,
                state = ?message_state,
                "state change for a message that is not cached, ignoring"
            );
        }
    }

    /// Called by the renderer once it applied `view_state.scroll_to`.
    pub fn unlock_scroll(&self) {
        self.inner.state.send_modify(|state| {
            state.view_state = state.view_state.unlock_scroll();
        });
        self.inner.scheduler.unlock(LockName::Scroll);
    }

    pub fn clear_jump_stack(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.jump_to_message_stack.is_empty() {
                return false;
            }
            state.jump_to_message_stack.clear();
            true
        });
    }

    /// Take the pending user feedback, if any.
    pub fn take_feedback(&self) -> Option<StoreFeedback> {
        let mut feedback = None;
        self.inner.state.send_if_modified(|state| {
            feedback = state.feedback.take();
            feedback.is_some()
        });
        feedback
    }

    /// Record viewport geometry and decide what the scroll handler should do.
    pub fn on_scroll(&self, metrics: ScrollMetrics) -> ScrollDecision {
        *self
            .inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = metrics;
        if self.is_scroll_locked() {
            return ScrollDecision::default();
        }

        let config = &self.inner.config;
        let newest_in_window = {
            let state = self.inner.state.borrow();
            match (state.window, state.message_list_items.len().checked_sub(1)) {
                (Some(bounds), Some(last)) => bounds.newest == last,
                (None, None) => true,
                _ => false,
            }
        };
        let decision = ScrollDecision {
            fetch_top: metrics.distance_to_top() < config.load_more_threshold_px,
            fetch_bottom: metrics.distance_to_bottom() < config.load_more_threshold_px,
            show_jump_down: !newest_in_window
                || metrics.distance_to_bottom() > config.scroll_bottom_close_px,
        };
        if !decision.show_jump_down {
            self.clear_jump_stack();
        }
        decision
    }

    fn begin(&self) -> Option<EpochToken> {
        if self.inner.closed.load(Ordering::Acquire) {
            debug!(chat_id = %self.inner.chat_id, "store closed, ignoring effect");
            return None;
        }
        Some(self.inner.epoch.token())
    }

    fn commit(
        &self,
        token: EpochToken,
        effect: &'static str,
        update: impl FnOnce(&mut MessageListState),
    ) -> bool {
        if !self.inner.epoch.is_current(token) {
            debug!(chat_id = %self.inner.chat_id, effect, "dropping stale effect result");
            return false;
        }
        self.inner.state.send_modify(update);
        true
    }

    fn commit_items(
        &self,
        token: EpochToken,
        effect: &'static str,
        items: Vec<MessageListItem>,
        metrics: ScrollMetrics,
    ) -> bool {
        self.commit(token, effect, |state| {
            state.window = window::clamp(state.window, items.len());
            state.message_list_items = items;
            state.view_state = state.view_state.set_message_list_items(metrics);
        })
    }

    fn backfill_if_needed(&self) {
        let has_missing = !self.inner.state.borrow().missing_in_window().is_empty();
        if has_missing {
            self.load_missing_messages();
        }
    }

    fn scroll_metrics(&self) -> ScrollMetrics {
        *self
            .inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_items(&self) -> Result<Vec<MessageListItem>, CoreError> {
        self.inner
            .rpc
            .get_message_list_items(self.inner.account_id, self.inner.chat_id, ListFlags::default())
            .await
    }

    /// Chat of `msg_id`, from the cache when possible. `None` when the
    /// message does not exist.
    async fn resolve_chat(&self, msg_id: MsgId) -> Result<Option<ChatId>, CoreError> {
        let cached = self
            .inner
            .state
            .borrow()
            .cached_message(msg_id)
            .map(|message| message.chat_id);
        if cached.is_some() {
            return Ok(cached);
        }
        match self.inner.rpc.get_message(self.inner.account_id, msg_id).await {
            Ok(message) => Ok(Some(message.chat_id)),
            Err(err) if err.category == ErrorCategory::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Hydrate bodies. Failures are logged and contribute nothing.
    async fn load_bodies(&self, ids: Vec<MsgId>) -> HashMap<MsgId, MessageLoadResult> {
        if ids.is_empty() {
            return HashMap::new();
        }
        if ids.len() > self.inner.config.bulk_load_warn_threshold {
            warn!(
                chat_id = %self.inner.chat_id,
                count = ids.len(),
                threshold = self.inner.config.bulk_load_warn_threshold,
                "loading a large batch of messages at once"
            );
        }
        match self.inner.rpc.get_messages(self.inner.account_id, &ids).await {
            Ok(bodies) => bodies,
            Err(err) => {
                error!(
                    chat_id = %self.inner.chat_id,
                    count = ids.len(),
                    error = %err,
                    "loading messages failed"
                );
                HashMap::new()
            }
        }
    }
}

fn newest_message_index(items: &[MessageListItem]) -> Option<usize> {
    items.iter().rposition(|item| item.msg_id().is_some())
}

fn uncached_ids(state: &MessageListState, bounds: WindowBounds) -> Vec<MsgId> {
    window::message_ids(&state.message_list_items, bounds)
        .into_iter()
        .filter(|msg_id| !state.message_cache.contains_key(msg_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        memory::InMemoryCore,
        navigation::JumpRequest,
        types::{Draft, SetDraftRequest, ViewType},
        view_state::{ScrollIntoView, ScrollTo},
    };

    const ACCOUNT: AccountId = AccountId(1);
    const CHAT: ChatId = ChatId(10);
    const OTHER_CHAT: ChatId = ChatId(20);

    /// Delegates to the in-memory core, counting body loads and optionally
    /// failing the next few of them.
    struct CountingCore {
        core: InMemoryCore,
        body_loads: AtomicUsize,
        fail_next_body_loads: AtomicUsize,
    }

    impl CountingCore {
        fn new(core: InMemoryCore) -> Self {
            Self {
                core,
                body_loads: AtomicUsize::new(0),
                fail_next_body_loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CoreRpc for CountingCore {
        async fn get_message_list_items(
            &self,
            account_id: AccountId,
            chat_id: ChatId,
            flags: ListFlags,
        ) -> Result<Vec<MessageListItem>, CoreError> {
            self.core.get_message_list_items(account_id, chat_id, flags).await
        }

        async fn get_messages(
            &self,
            account_id: AccountId,
            msg_ids: &[MsgId],
        ) -> Result<HashMap<MsgId, MessageLoadResult>, CoreError> {
            self.body_loads.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .fail_next_body_loads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if fail {
                return Err(CoreError::transport("injected body load failure"));
            }
            self.core.get_messages(account_id, msg_ids).await
        }

        async fn get_message(
            &self,
            account_id: AccountId,
            msg_id: MsgId,
        ) -> Result<Message, CoreError> {
            self.core.get_message(account_id, msg_id).await
        }

        async fn get_first_unread_message_of_chat(
            &self,
            account_id: AccountId,
            chat_id: ChatId,
        ) -> Result<Option<MsgId>, CoreError> {
            self.core.get_first_unread_message_of_chat(account_id, chat_id).await
        }

        async fn get_draft(
            &self,
            account_id: AccountId,
            chat_id: ChatId,
        ) -> Result<Option<Draft>, CoreError> {
            self.core.get_draft(account_id, chat_id).await
        }

        async fn misc_set_draft(
            &self,
            account_id: AccountId,
            chat_id: ChatId,
            request: SetDraftRequest,
        ) -> Result<(), CoreError> {
            self.core.misc_set_draft(account_id, chat_id, request).await
        }

        async fn remove_draft(
            &self,
            account_id: AccountId,
            chat_id: ChatId,
        ) -> Result<(), CoreError> {
            self.core.remove_draft(account_id, chat_id).await
        }
    }

    fn seeded(count: usize) -> (InMemoryCore, Vec<MsgId>) {
        let core = InMemoryCore::without_day_markers();
        let ids = core.seed_chat(ACCOUNT, CHAT, count);
        (core, ids)
    }

    fn store_for(core: &InMemoryCore) -> MessageListStore {
        MessageListStore::new(ACCOUNT, CHAT, Arc::new(core.clone()), PendingNavigation::new())
    }

    fn assert_window_cached(state: &MessageListState) {
        assert!(
            state.missing_in_window().is_empty(),
            "window items missing from cache: {:?}",
            state.missing_in_window()
        );
    }

    #[tokio::test]
    async fn empty_chat_loads_without_window() {
        let core = InMemoryCore::without_day_markers();
        let store = store_for(&core);

        assert!(store.load_chat().await);
        let state = store.snapshot();
        assert!(state.loaded);
        assert_eq!(state.window, None);
        assert!(state.active_view().is_empty());
    }

    #[tokio::test]
    async fn initial_load_with_unread_centers_on_first_unread() {
        let (core, ids) = seeded(50);
        core.set_first_unread(ACCOUNT, CHAT, Some(ids[37]));
        let store = store_for(&core);

        assert!(store.load_chat().await);
        let state = store.snapshot();
        let bounds = state.window.expect("window after unread jump");
        assert!(bounds.contains(37));
        assert_eq!(bounds, WindowBounds::new(31, 43));
        assert_eq!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message {
                msg_id: ids[37],
                highlight: true,
                focus: false,
                scroll_into_view: ScrollIntoView::Center,
            })
        );
        assert_window_cached(&state);
        assert!(store.is_scroll_locked());
    }

    #[tokio::test]
    async fn paging_to_top_stops_at_the_first_item() {
        let (core, _) = seeded(30);
        let store = store_for(&core);

        assert!(store.load_chat().await);
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(19, 29)));
        assert_eq!(
            store.snapshot().view_state.scroll_to,
            Some(ScrollTo::Bottom { if_close: false })
        );
        store.unlock_scroll();

        assert!(store.fetch_more_messages_top().await);
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(8, 29)));
        store.unlock_scroll();

        assert!(store.fetch_more_messages_top().await);
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(0, 29)));
        store.unlock_scroll();

        assert!(!store.fetch_more_messages_top().await);
        assert!(!store.fetch_more_messages_bottom().await);
        assert!(!store.is_scroll_locked());

        let state = store.snapshot();
        assert_eq!(state.message_cache.len(), 30);
        assert_window_cached(&state);
    }

    #[tokio::test]
    async fn paging_is_dropped_while_a_scroll_is_in_flight() {
        let (core, _) = seeded(30);
        let store = store_for(&core);

        assert!(store.load_chat().await);
        assert!(!store.fetch_more_messages_top().await);
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(19, 29)));
    }

    #[tokio::test]
    async fn window_bounds_only_grow_while_paging() {
        let (core, ids) = seeded(60);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert!(store.jump_to_message(JumpArgs::to_message(ids[30])).await);
        store.unlock_scroll();

        let mut previous = store.snapshot().window.expect("window after jump");
        for step in 0..8 {
            if step % 2 == 0 {
                store.fetch_more_messages_top().await;
            } else {
                store.fetch_more_messages_bottom().await;
            }
            store.unlock_scroll();
            let current = store.snapshot().window.expect("window while paging");
            assert!(current.oldest <= previous.oldest);
            assert!(current.newest >= previous.newest);
            previous = current;
        }
        assert_eq!(previous, WindowBounds::new(0, 59));
    }

    #[tokio::test]
    async fn contiguous_incoming_message_extends_the_window() {
        let (core, _) = seeded(20);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(9, 19)));

        let incoming = core.receive_message(ACCOUNT, CHAT, "hello", 86_400 + 100);
        store.on_event_incoming_message().await;

        let state = store.snapshot();
        assert_eq!(state.window, Some(WindowBounds::new(9, 20)));
        assert!(state.cached_message(incoming).is_some());
        assert_eq!(
            state.view_state.scroll_to,
            Some(ScrollTo::Bottom { if_close: true })
        );
    }

    #[tokio::test]
    async fn incoming_message_behind_a_gap_only_updates_items() {
        let (core, ids) = seeded(40);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert!(store.jump_to_message(JumpArgs::to_message(ids[5])).await);
        store.unlock_scroll();
        let before = store.snapshot().window;

        let incoming = core.receive_message(ACCOUNT, CHAT, "late", 86_400 + 200);
        store.on_event_incoming_message().await;

        let state = store.snapshot();
        assert_eq!(state.message_list_items.len(), 41);
        assert_eq!(state.window, before);
        assert!(state.cached_message(incoming).is_none());
    }

    #[tokio::test]
    async fn repeated_jump_keeps_window_and_cache() {
        let (core, ids) = seeded(50);
        let counting = Arc::new(CountingCore::new(core));
        let store = MessageListStore::new(
            ACCOUNT,
            CHAT,
            counting.clone(),
            PendingNavigation::new(),
        );
        assert!(store.load_chat().await);
        store.unlock_scroll();

        assert!(store.jump_to_message(JumpArgs::to_message(ids[10])).await);
        store.unlock_scroll();
        let first = store.snapshot();
        let loads = counting.body_loads.load(Ordering::SeqCst);

        assert!(store.jump_to_message(JumpArgs::to_message(ids[10])).await);
        store.unlock_scroll();
        let second = store.snapshot();

        assert_eq!(first.window, second.window);
        assert_eq!(first.message_cache, second.message_cache);
        assert_eq!(counting.body_loads.load(Ordering::SeqCst), loads);
    }

    #[tokio::test]
    async fn jump_into_loaded_range_widens_instead_of_resetting() {
        let (core, ids) = seeded(30);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert!(store.fetch_more_messages_top().await);
        store.unlock_scroll();

        assert!(store.jump_to_message(JumpArgs::to_message(ids[20])).await);
        let state = store.snapshot();
        assert_eq!(state.window, Some(WindowBounds::new(8, 29)));
        assert!(matches!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message { msg_id, .. }) if msg_id == ids[20]
        ));
    }

    #[tokio::test]
    async fn jump_into_cached_range_never_shrinks_the_window() {
        let (core, ids) = seeded(50);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert!(store.fetch_more_messages_top().await);
        store.unlock_scroll();
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(28, 49)));

        assert!(store.jump_to_message(JumpArgs::to_message(ids[5])).await);
        store.unlock_scroll();
        assert_eq!(store.snapshot().window, Some(WindowBounds::new(0, 12)));

        assert!(store.jump_to_message(JumpArgs::to_message(ids[40])).await);
        let state = store.snapshot();
        assert_eq!(state.window, Some(WindowBounds::new(0, 46)));
        assert_eq!(state.missing_in_window(), ids[13..28].to_vec());

        store.unlock_scroll();
        store.load_missing_messages_now().await;
        assert_window_cached(&store.snapshot());
    }

    #[tokio::test]
    async fn oversized_body_batches_still_load() {
        let (core, _) = seeded(30);
        let config = StoreConfig {
            bulk_load_warn_threshold: 4,
            ..StoreConfig::default()
        };
        let store = MessageListStore::with_config(
            ACCOUNT,
            CHAT,
            Arc::new(core.clone()),
            PendingNavigation::new(),
            config,
        );

        assert!(store.load_chat().await);
        store.unlock_scroll();
        assert!(store.fetch_more_messages_top().await);

        let state = store.snapshot();
        assert_eq!(state.window, Some(WindowBounds::new(8, 29)));
        assert_window_cached(&state);
    }

    #[tokio::test]
    async fn jump_back_stack_pops_then_falls_back_to_newest() {
        let (core, ids) = seeded(40);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();

        assert!(
            store
                .jump_to_message(JumpArgs {
                    add_message_id_to_stack: Some(ids[35]),
                    ..JumpArgs::to_message(ids[3])
                })
                .await
        );
        store.unlock_scroll();
        assert_eq!(store.snapshot().jump_to_message_stack, vec![ids[35]]);

        assert!(store.jump_to_message(JumpArgs::default()).await);
        let state = store.snapshot();
        assert!(state.jump_to_message_stack.is_empty());
        assert!(matches!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message { msg_id, highlight: true, .. }) if msg_id == ids[35]
        ));
        store.unlock_scroll();

        assert!(store.jump_to_message(JumpArgs::default()).await);
        let state = store.snapshot();
        assert!(matches!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message { msg_id, highlight: false, .. }) if msg_id == ids[39]
        ));
        assert_eq!(state.window.map(|bounds| bounds.newest), Some(39));
    }

    #[tokio::test]
    async fn missing_jump_target_falls_back_to_newest_with_feedback() {
        let (core, ids) = seeded(25);
        let store = store_for(&core);

        assert!(store.jump_to_message(JumpArgs::to_message(MsgId(9_999))).await);
        let state = store.snapshot();
        assert_eq!(
            state.feedback,
            Some(StoreFeedback::MessageNotFound {
                msg_id: MsgId(9_999)
            })
        );
        assert!(matches!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message { msg_id, highlight: false, .. }) if msg_id == ids[24]
        ));
        assert_window_cached(&state);

        assert_eq!(
            store.take_feedback(),
            Some(StoreFeedback::MessageNotFound {
                msg_id: MsgId(9_999)
            })
        );
        assert_eq!(store.take_feedback(), None);
    }

    #[tokio::test]
    async fn jump_to_message_of_another_chat_stays_in_own_chat() {
        let (core, ids) = seeded(15);
        let foreign = core.seed_chat(ACCOUNT, OTHER_CHAT, 3);
        let store = store_for(&core);

        assert!(store.jump_to_message(JumpArgs::to_message(foreign[1])).await);
        let state = store.snapshot();
        assert!(state.message_list_items.iter().all(|item| item.msg_id() != Some(foreign[1])));
        assert!(matches!(
            state.view_state.scroll_to,
            Some(ScrollTo::Message { msg_id, .. }) if msg_id == ids[14]
        ));
        assert!(state.feedback.is_some());
    }

    #[tokio::test]
    async fn pending_navigation_is_consumed_by_load_chat() {
        let (core, ids) = seeded(30);
        let navigation = PendingNavigation::new();
        navigation.set(JumpRequest {
            account_id: ACCOUNT,
            chat_id: CHAT,
            args: JumpArgs::to_message(ids[4]),
        });
        let store = MessageListStore::new(
            ACCOUNT,
            CHAT,
            Arc::new(core.clone()),
            navigation.clone(),
        );

        assert!(store.load_chat().await);
        assert_eq!(navigation.peek(), None);
        assert!(store.snapshot().window.expect("window").contains(4));

        store.unlock_scroll();
        assert!(!store.check_pending_jump().await);
        navigation.set(JumpRequest {
            account_id: ACCOUNT,
            chat_id: CHAT,
            args: JumpArgs::default(),
        });
        assert!(store.check_pending_jump().await);
        assert_eq!(store.snapshot().window.map(|bounds| bounds.newest), Some(29));
    }

    #[tokio::test]
    async fn known_message_edit_patches_cache() {
        let (core, ids) = seeded(12);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();

        core.edit_message(ACCOUNT, ids[11], "edited");
        store.on_event_messages_changed(ids[11]).await;

        let state = store.snapshot();
        assert_eq!(
            state.cached_message(ids[11]).map(|message| message.text.as_str()),
            Some("edited")
        );
        assert_eq!(state.view_state.scroll_to, None);
    }

    #[tokio::test]
    async fn draft_changes_do_not_refetch_items() {
        let (core, _) = seeded(12);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();

        core.misc_set_draft(
            ACCOUNT,
            CHAT,
            SetDraftRequest {
                text: "draft".into(),
                file: None,
                file_name: None,
                quoted_message_id: None,
                view_type: ViewType::Text,
            },
        )
        .await
        .expect("set draft");
        let draft = core.stored_draft(ACCOUNT, CHAT).expect("draft");
        store.on_event_messages_changed(draft.id).await;

        let state = store.snapshot();
        assert_eq!(state.message_list_items.len(), 12);
        assert_eq!(state.view_state.scroll_to, None);
    }

    #[tokio::test]
    async fn unknown_changed_message_refetches_items() {
        let (core, _) = seeded(12);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();

        let added = core.receive_message(ACCOUNT, CHAT, "sent elsewhere", 86_400 + 50);
        store.on_event_messages_changed(added).await;

        let state = store.snapshot();
        assert_eq!(state.message_list_items.len(), 13);
        assert_eq!(state.window, Some(WindowBounds::new(1, 11)));
    }

    #[tokio::test]
    async fn set_message_state_patches_only_cached_messages() {
        let (core, ids) = seeded(20);
        let store = store_for(&core);
        assert!(store.load_chat().await);

        store.set_message_state(ids[19], MessageState::OutMdnRcvd);
        store.set_message_state(ids[0], MessageState::OutDelivered);

        let state = store.snapshot();
        assert_eq!(
            state.cached_message(ids[19]).map(|message| message.state),
            Some(MessageState::OutMdnRcvd)
        );
        assert!(state.cached_message(ids[0]).is_none());
    }

    #[tokio::test]
    async fn refresh_after_delete_clamps_the_window() {
        let (core, ids) = seeded(11);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();

        core.delete_message(ACCOUNT, ids[10]);
        assert!(store.refresh().await);

        let state = store.snapshot();
        assert_eq!(state.message_list_items.len(), 10);
        assert_eq!(state.window, Some(WindowBounds::new(0, 9)));
        assert!(matches!(state.view_state.scroll_to, Some(ScrollTo::Position { .. })));
    }

    #[tokio::test]
    async fn transport_failure_leaves_state_untouched() {
        let (core, _) = seeded(30);
        let store = store_for(&core);
        assert!(store.load_chat().await);
        store.unlock_scroll();
        let before = store.snapshot();

        core.set_offline(true);
        store.on_event_incoming_message().await;
        assert!(!store.refresh().await);
        assert_eq!(store.snapshot(), before);
        assert!(!store.is_scroll_locked());

        core.set_offline(false);
        assert!(store.fetch_more_messages_top().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_body_load_is_backfilled() {
        let (core, _) = seeded(30);
        let counting = Arc::new(CountingCore::new(core));
        counting.fail_next_body_loads.store(1, Ordering::SeqCst);
        let store = MessageListStore::new(
            ACCOUNT,
            CHAT,
            counting.clone(),
            PendingNavigation::new(),
        );

        assert!(store.load_chat().await);
        assert_eq!(store.snapshot().missing_in_window().len(), 11);
        store.unlock_scroll();

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.settled().await;

        assert_window_cached(&store.snapshot());
        assert_eq!(counting.body_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn on_scroll_reports_edges_and_clears_jump_stack_at_bottom() {
        let (core, ids) = seeded(30);
        let store = store_for(&core);
        assert!(store.load_chat().await);

        let near_top = ScrollMetrics {
            scroll_top: 100.0,
            scroll_height: 5_000.0,
            client_height: 600.0,
        };
        assert_eq!(store.on_scroll(near_top), ScrollDecision::default());
        store.unlock_scroll();

        let decision = store.on_scroll(near_top);
        assert!(decision.fetch_top);
        assert!(!decision.fetch_bottom);
        assert!(decision.show_jump_down);

        assert!(
            store
                .jump_to_message(JumpArgs {
                    add_message_id_to_stack: Some(ids[29]),
                    ..JumpArgs::to_message(ids[25])
                })
                .await
        );
        store.unlock_scroll();
        assert_eq!(store.snapshot().jump_to_message_stack, vec![ids[29]]);

        let at_bottom = ScrollMetrics {
            scroll_top: 4_400.0,
            scroll_height: 5_000.0,
            client_height: 600.0,
        };
        let decision = store.on_scroll(at_bottom);
        assert!(decision.fetch_bottom);
        assert!(!decision.show_jump_down);
        assert!(store.snapshot().jump_to_message_stack.is_empty());
    }

    #[tokio::test]
    async fn closed_store_ignores_effects() {
        let (core, _) = seeded(30);
        let store = store_for(&core);
        store.close();

        assert!(!store.load_chat().await);
        store.on_event_incoming_message().await;
        assert_eq!(store.snapshot(), MessageListState::default());
    }
}
