use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    error::CoreError,
    types::{
        AccountId, ChatId, Draft, Message, MessageListItem, MessageLoadResult, MsgId,
        SetDraftRequest,
    },
};

/// Flags forwarded to [`CoreRpc::get_message_list_items`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListFlags {
    /// Only return info messages.
    pub info_only: bool,
    /// Insert day markers between messages of different days.
    pub add_daymarker: bool,
}

impl Default for ListFlags {
    fn default() -> Self {
        Self {
            info_only: false,
            add_daymarker: true,
        }
    }
}

/// Async request surface of the messaging core.
///
/// Each call is one RPC round-trip and a suspension point for the caller.
#[async_trait]
pub trait CoreRpc: Send + Sync {
    async fn get_message_list_items(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        flags: ListFlags,
    ) -> Result<Vec<MessageListItem>, CoreError>;

    /// Hydrate message bodies. Ids the core cannot load map to
    /// [`MessageLoadResult::LoadingError`] instead of failing the whole call.
    async fn get_messages(
        &self,
        account_id: AccountId,
        msg_ids: &[MsgId],
    ) -> Result<HashMap<MsgId, MessageLoadResult>, CoreError>;

    async fn get_message(&self, account_id: AccountId, msg_id: MsgId)
    -> Result<Message, CoreError>;

    async fn get_first_unread_message_of_chat(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
    ) -> Result<Option<MsgId>, CoreError>;

    async fn get_draft(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
    ) -> Result<Option<Draft>, CoreError>;

    async fn misc_set_draft(
        &self,
        account_id: AccountId,
        chat_id: ChatId,
        request: SetDraftRequest,
    ) -> Result<(), CoreError>;

    async fn remove_draft(&self, account_id: AccountId, chat_id: ChatId) -> Result<(), CoreError>;
}
