use std::time::Duration;

/// Number of items added to the window per paging step.
pub const PAGE_SIZE: usize = 11;
/// Distance to the top/bottom edge (px) below which more items are loaded.
pub const LOAD_MORE_THRESHOLD_PX: f64 = 800.0;
/// Distance to the bottom (px) still considered "at the bottom".
pub const SCROLL_BOTTOM_CLOSE_PX: f64 = 10.0;
/// Body fetches above this many ids are logged as a performance warning.
pub const BULK_LOAD_WARN_THRESHOLD: usize = 100;

const DEFAULT_MISSING_MESSAGES_DEBOUNCE_MS: u64 = 400;
const DEFAULT_DRAFT_SAVE_DEBOUNCE_MS: u64 = 15_000;

/// Tuning of the windowed message store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// Items added per paging step; jumps place `ceil(page_size / 2)` on each side.
    pub page_size: usize,
    /// Load-more trigger distance in pixels.
    pub load_more_threshold_px: f64,
    /// "Close to the bottom" distance in pixels.
    pub scroll_bottom_close_px: f64,
    /// Soft limit for ids per body fetch; exceeding it only logs a warning.
    pub bulk_load_warn_threshold: usize,
    /// Debounce applied to missing-message backfills.
    pub missing_messages_debounce: Duration,
}

impl StoreConfig {
    /// Items placed on each side of a jump target.
    pub fn half_page(&self) -> usize {
        self.page_size.div_ceil(2)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            load_more_threshold_px: LOAD_MORE_THRESHOLD_PX,
            scroll_bottom_close_px: SCROLL_BOTTOM_CLOSE_PX,
            bulk_load_warn_threshold: BULK_LOAD_WARN_THRESHOLD,
            missing_messages_debounce: Duration::from_millis(DEFAULT_MISSING_MESSAGES_DEBOUNCE_MS),
        }
    }
}

/// Tuning of the draft state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftConfig {
    /// Debounce applied to text edits before saving to the core.
    pub save_debounce: Duration,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_millis(DEFAULT_DRAFT_SAVE_DEBOUNCE_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_page_rounds_up() {
        let config = StoreConfig::default();
        assert_eq!(config.half_page(), 6);

        let even = StoreConfig {
            page_size: 10,
            ..StoreConfig::default()
        };
        assert_eq!(even.half_page(), 5);
    }
}
