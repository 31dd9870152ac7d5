//! Windowed message list of a chat client.
//!
//! This crate keeps a bounded, fully hydrated window over a chat's item list,
//! serializes every mutation through a scroll-aware effect queue, derives the
//! renderer's scroll intent, and manages the composer draft.

/// Core event fan-out.
pub mod channel;
/// Tuning constants and configuration structs.
pub mod config;
/// Debounced deferred work.
pub mod debounce;
/// Composer draft state machine.
pub mod draft;
/// Monotonic generation counter guarding stale async results.
pub mod epoch;
/// Stable core error types.
pub mod error;
/// In-process core used by tests and the smoke binary.
pub mod memory;
/// Cross-chat jump requests.
pub mod navigation;
/// Routing of core events to the open chat's store.
pub mod router;
/// Async request surface of the messaging core.
pub mod rpc;
/// Scroll lock and FIFO effect queue.
pub mod scheduler;
/// Windowed message list store.
pub mod store;
/// Core-facing data types (ids, items, messages, drafts, events).
pub mod types;
/// Scroll intent reducers.
pub mod view_state;
/// Window index arithmetic.
pub mod window;

pub use channel::{CoreEventBus, EventStream};
pub use config::{DraftConfig, StoreConfig};
pub use draft::{DraftController, DraftObject, DraftQuote, DraftState, QuoteSource, ReplyDirection};
pub use error::{CoreError, ErrorCategory};
pub use memory::InMemoryCore;
pub use navigation::{JumpArgs, JumpRequest, PendingNavigation};
pub use router::{EventRouter, dispatch_event};
pub use rpc::{CoreRpc, ListFlags};
pub use scheduler::{LockName, ScrollScheduler};
pub use store::{MessageListState, MessageListStore, ScrollDecision, StoreFeedback};
pub use types::{
    AccountId, ChatId, CoreEvent, Draft, Message, MessageListItem, MessageLoadResult,
    MessageQuote, MessageState, MsgId, SetDraftRequest, ViewType,
};
pub use view_state::{
    AppendedOn, ScrollCommand, ScrollIntoView, ScrollMetrics, ScrollTo, ViewState,
};
pub use window::WindowBounds;
