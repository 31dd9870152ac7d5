use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            Serialize,
            Deserialize,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Core-assigned account identifier.
    AccountId
);
id_newtype!(
    /// Core-assigned chat identifier. `ChatId(0)` in events means "any chat".
    ChatId
);
id_newtype!(
    /// Core-assigned message identifier. Id `0` never names a real message.
    MsgId
);

impl ChatId {
    /// Wildcard chat id used by events that concern more than one chat.
    pub const ANY: ChatId = ChatId(0);
}

impl MsgId {
    /// Wildcard message id used by events that concern a whole chat.
    pub const NONE: MsgId = MsgId(0);
}

/// One entry of a chat's ordered item list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageListItem {
    /// Reference to a real message.
    Message {
        /// Referenced message.
        msg_id: MsgId,
    },
    /// Synthetic date separator inserted by the core.
    DayMarker {
        /// Start of the day, seconds since Unix epoch.
        timestamp: i64,
    },
}

impl MessageListItem {
    /// Message id when this item references a message.
    pub fn msg_id(&self) -> Option<MsgId> {
        match self {
            Self::Message { msg_id } => Some(*msg_id),
            Self::DayMarker { .. } => None,
        }
    }
}

/// Delivery/read state of a message as tracked by the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MessageState {
    /// Incoming, not yet noticed.
    InFresh,
    /// Incoming, chat was opened but the message was not seen.
    InNoticed,
    /// Incoming, seen by the user.
    InSeen,
    /// Outgoing, still being sent.
    OutPending,
    /// Outgoing, sending failed.
    OutFailed,
    /// Outgoing, delivered to the server.
    OutDelivered,
    /// Outgoing, read receipt received.
    OutMdnRcvd,
    /// Unsent draft stored in the core.
    OutDraft,
}

/// Content kind of a message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ViewType {
    #[default]
    Text,
    Image,
    Gif,
    Sticker,
    Audio,
    Voice,
    Video,
    File,
    Vcard,
    Webxdc,
}

impl ViewType {
    /// Whether a quote of this view type can be rendered from local data alone.
    ///
    /// Other view types get a core-synthesized quote text (for example a
    /// contact name for vCards) and need a refetch.
    pub fn quote_is_local(self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::Sticker | Self::Gif)
    }

    /// Whether quotes of this view type show the attachment as a thumbnail.
    pub fn quote_shows_image(self) -> bool {
        matches!(self, Self::Image | Self::Sticker | Self::Gif)
    }
}

/// Resolved quote as reported by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageQuote {
    /// Quote of a message that is no longer available; only its text is kept.
    JustText {
        /// Quoted text.
        text: String,
    },
    /// Quote that still references an existing message.
    WithMessage {
        /// Quoted message.
        message_id: MsgId,
        /// Chat the quoted message lives in.
        chat_id: ChatId,
        /// Quoted text (possibly synthesized by the core).
        text: String,
        /// Display name of the quoted message's author.
        author_display_name: String,
        /// View type of the quoted message.
        view_type: ViewType,
        /// Thumbnail path for image-like quotes.
        image: Option<String>,
        /// Whether the quoted message was forwarded.
        is_forwarded: bool,
    },
}

impl MessageQuote {
    /// Message id referenced by this quote, if any.
    pub fn message_id(&self) -> Option<MsgId> {
        match self {
            Self::JustText { .. } => None,
            Self::WithMessage { message_id, .. } => Some(*message_id),
        }
    }
}

/// Fully hydrated message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Message id.
    pub id: MsgId,
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// Display-ready text.
    pub text: String,
    /// Delivery/read state.
    pub state: MessageState,
    /// Content kind.
    pub view_type: ViewType,
    /// System/info message (group changes, etc.) that cannot be replied to.
    pub is_info: bool,
    /// Whether the message was forwarded.
    pub is_forwarded: bool,
    /// Attachment path when present.
    pub file: Option<String>,
    /// Sender display name.
    pub sender_display_name: String,
    /// Resolved quote when the message replies to another one.
    pub quote: Option<MessageQuote>,
    /// Timestamp in seconds since Unix epoch.
    pub timestamp: i64,
}

impl Message {
    /// Quote referencing this message, as the composer shows it.
    pub fn to_quote(&self) -> MessageQuote {
        MessageQuote::WithMessage {
            message_id: self.id,
            chat_id: self.chat_id,
            text: self.text.clone(),
            author_display_name: self.sender_display_name.clone(),
            view_type: self.view_type,
            image: self
                .view_type
                .quote_shows_image()
                .then(|| self.file.clone())
                .flatten(),
            is_forwarded: self.is_forwarded,
        }
    }
}

/// Result of hydrating one message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageLoadResult {
    /// Message loaded successfully.
    Message(Message),
    /// The core could not load this message.
    LoadingError {
        /// Human-readable error.
        error: String,
    },
}

impl MessageLoadResult {
    /// The loaded message, when loading succeeded.
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::LoadingError { .. } => None,
        }
    }
}

/// Draft as persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Draft {
    /// Core-side id of the draft message.
    pub id: MsgId,
    /// Draft text.
    pub text: String,
    /// Attachment path (normalized by the core).
    pub file: Option<String>,
    /// Attachment display name (normalized by the core).
    pub file_name: Option<String>,
    /// Attachment MIME type, filled in by the core.
    pub file_mime: Option<String>,
    /// Attachment size in bytes, filled in by the core.
    pub file_bytes: u64,
    /// Draft view type.
    pub view_type: ViewType,
    /// Resolved quote.
    pub quote: Option<MessageQuote>,
}

/// Arguments of the core's `misc_set_draft` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetDraftRequest {
    /// Draft text.
    pub text: String,
    /// Attachment path.
    pub file: Option<String>,
    /// Requested attachment display name.
    pub file_name: Option<String>,
    /// Id of the quoted message.
    pub quoted_message_id: Option<MsgId>,
    /// Draft view type.
    pub view_type: ViewType,
}

/// Live change notification delivered by the core's event bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoreEvent {
    /// A new message arrived in a chat.
    IncomingMsg {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// One message changed, or (with `MsgId::NONE`) a whole chat changed.
    MsgsChanged {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// A message was deleted.
    MsgDeleted {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// An outgoing message was delivered.
    MsgDelivered {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// An outgoing message was read by the recipient.
    MsgRead {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// Sending an outgoing message failed.
    MsgFailed {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// Reactions on a message changed.
    ReactionsChanged {
        account_id: AccountId,
        chat_id: ChatId,
        msg_id: MsgId,
    },
}

impl CoreEvent {
    /// Account the event is scoped to.
    pub fn account_id(&self) -> AccountId {
        match *self {
            Self::IncomingMsg { account_id, .. }
            | Self::MsgsChanged { account_id, .. }
            | Self::MsgDeleted { account_id, .. }
            | Self::MsgDelivered { account_id, .. }
            | Self::MsgRead { account_id, .. }
            | Self::MsgFailed { account_id, .. }
            | Self::ReactionsChanged { account_id, .. } => account_id,
        }
    }

    /// Stable event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncomingMsg { .. } => "incoming_msg",
            Self::MsgsChanged { .. } => "msgs_changed",
            Self::MsgDeleted { .. } => "msg_deleted",
            Self::MsgDelivered { .. } => "msg_delivered",
            Self::MsgRead { .. } => "msg_read",
            Self::MsgFailed { .. } => "msg_failed",
            Self::ReactionsChanged { .. } => "reactions_changed",
        }
    }
}
