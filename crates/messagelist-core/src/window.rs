//! Index arithmetic for the fetched window over a chat's item list.
//!
//! Everything here is pure and works on inclusive item indices; the store
//! decides what to load and when to commit.

use serde::{Deserialize, Serialize};

use crate::types::{MessageListItem, MsgId};

/// Inclusive range of item indices that is loaded and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub oldest: usize,
    pub newest: usize,
}

impl WindowBounds {
    pub fn new(oldest: usize, newest: usize) -> Self {
        debug_assert!(oldest <= newest, "window bounds out of order");
        Self { oldest, newest }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.oldest <= index && index <= self.newest
    }

    /// Items covered by this window, tolerating a list that shrank underneath it.
    pub fn slice<'a>(&self, items: &'a [MessageListItem]) -> &'a [MessageListItem] {
        let end = (self.newest + 1).min(items.len());
        let start = self.oldest.min(end);
        &items[start..end]
    }
}

/// Window shown when a chat opens without a jump: the newest `page_size` items.
pub fn initial_window(len: usize, page_size: usize) -> Option<WindowBounds> {
    let newest = len.checked_sub(1)?;
    Some(WindowBounds::new(len.saturating_sub(page_size), newest))
}

/// Window grown by one page towards older items; `None` at the top edge.
pub fn extend_top(bounds: WindowBounds, page_size: usize) -> Option<WindowBounds> {
    if bounds.oldest == 0 {
        return None;
    }
    Some(WindowBounds::new(
        bounds.oldest.saturating_sub(page_size),
        bounds.newest,
    ))
}

/// Window grown by one page towards newer items; `None` at the bottom edge.
pub fn extend_bottom(bounds: WindowBounds, len: usize, page_size: usize) -> Option<WindowBounds> {
    let first_new = bounds.newest + 1;
    if first_new >= len {
        return None;
    }
    Some(WindowBounds::new(
        bounds.oldest,
        (bounds.newest + page_size).min(len - 1),
    ))
}

/// Window of roughly `2 * half` items around `target`.
///
/// When one side hits an edge, the missing items are added on the other side.
pub fn jump_window(target: usize, len: usize, half: usize) -> Option<WindowBounds> {
    let last = len.checked_sub(1)?;
    let target = target.min(last);
    let mut oldest = target.saturating_sub(half);
    let mut newest = (target + half).min(last);

    let newer_side = newest - target;
    let older_side = target - oldest;
    if newer_side < half {
        oldest = oldest.saturating_sub(half - newer_side);
    } else if older_side < half {
        newest = (newest + (half - older_side)).min(last);
    }
    Some(WindowBounds::new(oldest, newest))
}

/// Smallest window covering both `current` and `requested`.
///
/// Items between two disjoint ranges are left for the missing-message backfill.
pub fn widen(current: Option<WindowBounds>, requested: WindowBounds) -> WindowBounds {
    match current {
        Some(current) => WindowBounds::new(
            current.oldest.min(requested.oldest),
            current.newest.max(requested.newest),
        ),
        None => requested,
    }
}

/// Fit `bounds` into a list of `len` items.
pub fn clamp(bounds: Option<WindowBounds>, len: usize) -> Option<WindowBounds> {
    let bounds = bounds?;
    let last = len.checked_sub(1)?;
    let newest = bounds.newest.min(last);
    Some(WindowBounds::new(bounds.oldest.min(newest), newest))
}

pub fn find_message(items: &[MessageListItem], msg_id: MsgId) -> Option<usize> {
    items.iter().position(|item| item.msg_id() == Some(msg_id))
}

/// Message ids inside `bounds`, skipping day markers.
pub fn message_ids(items: &[MessageListItem], bounds: WindowBounds) -> Vec<MsgId> {
    bounds
        .slice(items)
        .iter()
        .filter_map(MessageListItem::msg_id)
        .collect()
}

/// How a refreshed item list is merged after new messages arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingPlan {
    /// Items `first_new..=window.newest` directly follow the fetched window.
    Append {
        first_new: usize,
        window: WindowBounds,
    },
    /// Nothing was fetched yet; open this window at the newest end.
    Open(WindowBounds),
    /// New items cannot be attached without leaving a hole (or there are
    /// none); only the item list is replaced.
    ItemsOnly,
}

pub fn plan_incoming(
    previous: &[MessageListItem],
    refreshed: &[MessageListItem],
    current: Option<WindowBounds>,
    page_size: usize,
) -> IncomingPlan {
    let Some(current) = current else {
        return initial_window(refreshed.len(), page_size)
            .map_or(IncomingPlan::ItemsOnly, IncomingPlan::Open);
    };
    let Some(last_known) = previous.last() else {
        return IncomingPlan::ItemsOnly;
    };
    let Some(anchor) = refreshed.iter().position(|item| item == last_known) else {
        return IncomingPlan::ItemsOnly;
    };

    let first_new = anchor + 1;
    if first_new >= refreshed.len() || first_new != current.newest + 1 {
        return IncomingPlan::ItemsOnly;
    }
    IncomingPlan::Append {
        first_new,
        window: WindowBounds::new(current.oldest, refreshed.len() - 1),
    }
}
