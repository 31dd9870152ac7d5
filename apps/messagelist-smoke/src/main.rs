mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use messagelist_core::{
    AccountId, ChatId, DraftController, EventRouter, InMemoryCore, JumpArgs, MessageListStore,
    PendingNavigation, ReplyDirection, ScrollMetrics, ViewType,
};
use tracing::{error, info, warn};

use config::SmokeConfig;

/// Stand-in viewport: every item is this tall and the viewport shows ten of them.
const ITEM_HEIGHT_PX: f64 = 60.0;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };
    run(config).await;
}

async fn run(config: SmokeConfig) {
    let account_id = AccountId(config.account_id);
    let chat_id = ChatId(config.chat_id);

    let core = InMemoryCore::new();
    let ids = core.seed_chat(account_id, chat_id, config.message_count);
    if let Some(first_unread) = ids.get(ids.len().saturating_sub(ids.len() / 4)) {
        core.set_first_unread(account_id, chat_id, Some(*first_unread));
    }
    info!(
        account_id = %account_id,
        chat_id = %chat_id,
        messages = ids.len(),
        "seeded in-memory core"
    );

    let store = MessageListStore::with_config(
        account_id,
        chat_id,
        Arc::new(core.clone()),
        PendingNavigation::new(),
        config.store,
    );
    let router = EventRouter::spawn(store.clone(), core.events().subscribe());
    let drafts = DraftController::new(Arc::new(core.clone()), config.draft);

    store.load_chat().await;
    render(&store);

    for _ in 0..2 {
        if store.fetch_more_messages_top().await {
            render(&store);
        }
    }

    let incoming = core.receive_message(account_id, chat_id, "ping from smoke", 4 * 86_400);
    let mut updates = store.subscribe();
    let arrived = tokio::time::timeout(
        Duration::from_secs(1),
        updates.wait_for(|state| state.cached_message(incoming).is_some()),
    )
    .await;
    match arrived {
        Ok(Ok(_)) => info!(msg_id = %incoming, "incoming message reached the window"),
        _ => warn!(msg_id = %incoming, "incoming message was not attached to the window"),
    }
    render(&store);

    if let (Some(oldest), Some(newest)) = (ids.first(), ids.last()) {
        store
            .jump_to_message(JumpArgs {
                add_message_id_to_stack: Some(*newest),
                ..JumpArgs::to_message(*oldest)
            })
            .await;
        render(&store);

        store.jump_to_message(JumpArgs::default()).await;
        render(&store);
    }

    drafts.open_chat(account_id, chat_id, true).await;
    drafts.update_draft_text("draft written by the smoke run", chat_id);
    drafts
        .on_select_reply_to_shortcut(ReplyDirection::Up, &store)
        .await;
    render(&store);
    drafts
        .add_file_to_draft("/tmp/smoke/notes.txt", None, ViewType::File)
        .await;
    drafts.flush().await;
    let draft = drafts.state().draft;
    info!(
        draft_id = %draft.id,
        text = %draft.text,
        file_name = ?draft.file_name,
        file_mime = ?draft.file_mime,
        quoted = ?draft.quote.as_ref().and_then(|quote| quote.message_id()),
        "draft persisted"
    );

    router.stop().await;
    store.close();
    info!("smoke run finished");
}

/// Act as the renderer: resolve the scroll intent, report the viewport and
/// release the scroll lock.
fn render(store: &MessageListStore) {
    let state = store.snapshot();
    let content_height = state.active_view().len() as f64 * ITEM_HEIGHT_PX;
    let client_height = 10.0 * ITEM_HEIGHT_PX;
    let viewport = ScrollMetrics {
        scroll_top: (content_height - client_height).max(0.0),
        scroll_height: content_height,
        client_height,
    };
    let command = state
        .view_state
        .scroll_command(viewport, store.config().scroll_bottom_close_px);
    info!(
        window = ?state.window,
        items = state.message_list_items.len(),
        cached = state.message_cache.len(),
        jump_stack = state.jump_to_message_stack.len(),
        ?command,
        "rendered message list"
    );
    if let Some(feedback) = store.take_feedback() {
        warn!(?feedback, "store feedback");
    }

    store.unlock_scroll();
    let decision = store.on_scroll(viewport);
    info!(?decision, "scroll handler decision");
}
