//! Desired scroll position handed to the renderer.
//!
//! Reducers here are pure: they take the previous [`ViewState`] plus a
//! [`ScrollMetrics`] snapshot of the list viewport and return the next state.
//! The snapshot is taken before the item list changes so the renderer can
//! restore the user's relative position afterwards.

use serde::{Deserialize, Serialize};

use crate::types::MsgId;

/// Where a revealed message lands inside the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrollIntoView {
    Start,
    #[default]
    Center,
    End,
    Nearest,
}

/// Edge of the list new items were added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppendedOn {
    Top,
    Bottom,
}

/// Viewport geometry in pixels, as reported by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    /// Offset of the viewport from the top of the content.
    pub scroll_top: f64,
    /// Total content height.
    pub scroll_height: f64,
    /// Viewport height.
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn distance_to_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn distance_to_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }
}

/// Scroll intent waiting to be applied by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScrollTo {
    /// Reveal one message.
    Message {
        msg_id: MsgId,
        highlight: bool,
        focus: bool,
        scroll_into_view: ScrollIntoView,
    },
    /// Keep the content under the viewport in place after items were added.
    LastKnownPosition {
        last_known_scroll_height: f64,
        last_known_scroll_top: f64,
        appended_on: AppendedOn,
    },
    /// Absolute offset.
    Position { scroll_top: f64 },
    /// Scroll to the newest item; with `if_close` only when already near it.
    Bottom { if_close: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// Live intent; `None` once the renderer applied it.
    pub scroll_to: Option<ScrollTo>,
    /// Content height captured for the `Bottom { if_close: true }` check, `-1` when unset.
    pub last_known_scroll_height: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            scroll_to: None,
            last_known_scroll_height: -1.0,
        }
    }
}

/// Concrete action for the renderer after resolving a [`ScrollTo`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    Stay,
    SetScrollTop(f64),
    ScrollToBottom,
    RevealMessage {
        msg_id: MsgId,
        highlight: bool,
        focus: bool,
        scroll_into_view: ScrollIntoView,
    },
}

impl ViewState {
    /// Items were reloaded in place; keep the pixel offset.
    pub fn refresh(&self, metrics: ScrollMetrics) -> Self {
        Self {
            scroll_to: Some(ScrollTo::Position {
                scroll_top: metrics.scroll_top,
            }),
            ..*self
        }
    }

    pub fn append_messages_top(&self, metrics: ScrollMetrics) -> Self {
        self.keep_position(metrics, AppendedOn::Top)
    }

    pub fn append_messages_bottom(&self, metrics: ScrollMetrics) -> Self {
        self.keep_position(metrics, AppendedOn::Bottom)
    }

    /// Only the item list changed; anchor like a top append.
    pub fn set_message_list_items(&self, metrics: ScrollMetrics) -> Self {
        self.keep_position(metrics, AppendedOn::Top)
    }

    /// New messages were appended at the bottom. Follow them only when the
    /// reader was already at the bottom before the append.
    pub fn fetched_incoming_messages(&self, metrics: ScrollMetrics) -> Self {
        Self {
            scroll_to: Some(ScrollTo::Bottom { if_close: true }),
            last_known_scroll_height: metrics.scroll_height,
        }
    }

    pub fn select_chat(&self) -> Self {
        Self {
            scroll_to: Some(ScrollTo::Bottom { if_close: false }),
            ..*self
        }
    }

    pub fn jump_to_message(
        &self,
        msg_id: MsgId,
        highlight: bool,
        focus: bool,
        scroll_into_view: ScrollIntoView,
    ) -> Self {
        Self {
            scroll_to: Some(ScrollTo::Message {
                msg_id,
                highlight,
                focus,
                scroll_into_view,
            }),
            ..*self
        }
    }

    pub fn unlock_scroll(&self) -> Self {
        Self::default()
    }

    /// Resolve the live intent against the viewport after the content changed.
    ///
    /// `close_px` is the slack allowed for `Bottom { if_close: true }`.
    pub fn scroll_command(&self, current: ScrollMetrics, close_px: f64) -> ScrollCommand {
        let Some(scroll_to) = self.scroll_to else {
            return ScrollCommand::Stay;
        };
        match scroll_to {
            ScrollTo::Message {
                msg_id,
                highlight,
                focus,
                scroll_into_view,
            } => ScrollCommand::RevealMessage {
                msg_id,
                highlight,
                focus,
                scroll_into_view,
            },
            ScrollTo::LastKnownPosition {
                last_known_scroll_height,
                last_known_scroll_top,
                appended_on: AppendedOn::Top,
            } => ScrollCommand::SetScrollTop(
                current.scroll_height - last_known_scroll_height + last_known_scroll_top,
            ),
            ScrollTo::LastKnownPosition {
                last_known_scroll_top,
                appended_on: AppendedOn::Bottom,
                ..
            } => ScrollCommand::SetScrollTop(last_known_scroll_top),
            ScrollTo::Position { scroll_top } => ScrollCommand::SetScrollTop(scroll_top),
            ScrollTo::Bottom { if_close: false } => ScrollCommand::ScrollToBottom,
            ScrollTo::Bottom { if_close: true } => {
                let scroll_bottom = current.scroll_top + current.client_height;
                if scroll_bottom >= self.last_known_scroll_height - close_px {
                    ScrollCommand::ScrollToBottom
                } else {
                    ScrollCommand::Stay
                }
            }
        }
    }

    fn keep_position(&self, metrics: ScrollMetrics, appended_on: AppendedOn) -> Self {
        Self {
            scroll_to: Some(ScrollTo::LastKnownPosition {
                last_known_scroll_height: metrics.scroll_height,
                last_known_scroll_top: metrics.scroll_top,
                appended_on,
            }),
            ..*self
        }
    }
}
