use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    types::{AccountId, ChatId, MsgId},
    view_state::ScrollIntoView,
};

/// Arguments of a jump to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpArgs {
    /// Target message. `None` pops the jump-back stack, or goes to the newest
    /// message when the stack is empty.
    pub msg_id: Option<MsgId>,
    /// Flash the target after scrolling to it.
    pub highlight: bool,
    /// Move keyboard focus to the target.
    pub focus: bool,
    /// Message to push on the jump-back stack before jumping.
    pub add_message_id_to_stack: Option<MsgId>,
    /// Where the target lands in the viewport.
    pub scroll_into_view: ScrollIntoView,
}

impl Default for JumpArgs {
    fn default() -> Self {
        Self {
            msg_id: None,
            highlight: true,
            focus: false,
            add_message_id_to_stack: None,
            scroll_into_view: ScrollIntoView::Center,
        }
    }
}

impl JumpArgs {
    pub fn to_message(msg_id: MsgId) -> Self {
        Self {
            msg_id: Some(msg_id),
            ..Self::default()
        }
    }
}

/// Jump addressed to whichever store next opens `(account_id, chat_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpRequest {
    pub account_id: AccountId,
    pub chat_id: ChatId,
    pub args: JumpArgs,
}

/// Single-slot mailbox for navigation requests that cross component
/// boundaries ("show in chat" from another screen).
///
/// Clones share the slot. Setting a request overwrites any unconsumed one.
#[derive(Debug, Clone, Default)]
pub struct PendingNavigation {
    slot: Arc<Mutex<Option<JumpRequest>>>,
}

impl PendingNavigation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, request: JumpRequest) {
        if let Some(previous) = self.lock().replace(request) {
            debug!(
                account_id = %previous.account_id,
                chat_id = %previous.chat_id,
                "dropping unconsumed navigation request"
            );
        }
    }

    /// Take the pending request if it targets `(account_id, chat_id)`.
    ///
    /// Requests for other chats stay in the slot.
    pub fn take_for(&self, account_id: AccountId, chat_id: ChatId) -> Option<JumpArgs> {
        let mut slot = self.lock();
        match *slot {
            Some(request) if request.account_id == account_id && request.chat_id == chat_id => {
                *slot = None;
                Some(request.args)
            }
            _ => None,
        }
    }

    pub fn peek(&self) -> Option<JumpRequest> {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Option<JumpRequest>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
