use std::sync::atomic::{AtomicU64, Ordering};

/// Generation counter used to drop results of superseded async work.
///
/// An effect captures a token before its first suspension point and checks
/// [`Epoch::is_current`] before committing. Advancing the epoch makes every
/// outstanding token stale.
#[derive(Debug, Default)]
pub struct Epoch {
    generation: AtomicU64,
}

/// Snapshot of an [`Epoch`] generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpochToken(u64);

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for the current generation.
    pub fn token(&self) -> EpochToken {
        EpochToken(self.generation.load(Ordering::Acquire))
    }

    /// Start a new generation and return its token.
    pub fn advance(&self) -> EpochToken {
        EpochToken(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, token: EpochToken) -> bool {
        self.token() == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_invalidates_previous_tokens() {
        let epoch = Epoch::new();
        let first = epoch.token();
        assert!(epoch.is_current(first));

        let second = epoch.advance();
        assert!(!epoch.is_current(first));
        assert!(epoch.is_current(second));
        assert_eq!(epoch.token(), second);
    }
}
