//! Token retention: how many of a chunk's tokens survive after indexing.

use crate::config::{RetentionConfig, RetentionMode};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What is kept of a chunk's token list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "size")]
pub enum TokenRetention {
    Full,
    Sample(usize),
    None,
}

impl TokenRetention {
    /// Trim `tokens` in place according to this retention
    pub fn apply(&self, tokens: &mut Vec<String>) {
        match *self {
            TokenRetention::Full => {}
            TokenRetention::Sample(size) => tokens.truncate(size),
            TokenRetention::None => {
                tokens.clear();
                tokens.shrink_to_fit();
            }
        }
    }
}

impl std::fmt::Display for TokenRetention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenRetention::Full => f.write_str("full"),
            TokenRetention::Sample(size) => write!(f, "sample({size})"),
            TokenRetention::None => f.write_str("none"),
        }
    }
}

/// Cumulative token budget shared by every accumulator of one build.
#[derive(Debug)]
pub struct TokenBudget {
    max_tokens: u64,
    used: AtomicU64,
    exceeded: AtomicBool,
}

impl TokenBudget {
    pub fn new(max_tokens: u64) -> Arc<Self> {
        Arc::new(Self {
            max_tokens,
            used: AtomicU64::new(0),
            exceeded: AtomicBool::new(false),
        })
    }

    /// Charge `tokens` against the budget. Returns whether it is now exceeded.
    pub fn charge(&self, tokens: u64) -> bool {
        let total = self.used.fetch_add(tokens, Ordering::AcqRel) + tokens;
        if total > self.max_tokens {
            self.exceeded.store(true, Ordering::Release);
        }
        self.is_exceeded()
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }
}

/// Retention state of one accumulator.
///
/// In auto mode the policy starts at `Full` and downgrades to
/// `Sample(sample_size)` the first time it observes an exceeded budget. The
/// downgrade is one-way.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    current: TokenRetention,
    auto: bool,
    sample_size: usize,
    budget: Arc<TokenBudget>,
}

/// Outcome of charging one chunk against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionEvent {
    Unchanged,
    /// The policy just flipped; everything accumulated must be trimmed
    Downgraded(TokenRetention),
}

impl RetentionPolicy {
    /// Fixed policy that never changes
    pub fn fixed(retention: TokenRetention) -> Self {
        Self {
            current: retention,
            auto: false,
            sample_size: 0,
            budget: TokenBudget::new(u64::MAX),
        }
    }

    /// Auto policy starting at `Full`
    pub fn auto(sample_size: usize, budget: Arc<TokenBudget>) -> Self {
        Self {
            current: TokenRetention::Full,
            auto: true,
            sample_size,
            budget,
        }
    }

    /// Resolve the configured mode for a build of `total_files` files.
    ///
    /// `auto` only starts at `Full` for builds of at most `max_files` files;
    /// larger builds go straight to sampling.
    pub fn resolve(config: &RetentionConfig, total_files: usize, budget: Arc<TokenBudget>) -> Self {
        match config.mode {
            RetentionMode::Full => Self::fixed(TokenRetention::Full),
            RetentionMode::Sample => Self::fixed(TokenRetention::Sample(config.sample_size)),
            RetentionMode::None => Self::fixed(TokenRetention::None),
            RetentionMode::Auto if total_files <= config.max_files => {
                Self::auto(config.sample_size, budget)
            }
            RetentionMode::Auto => Self::fixed(TokenRetention::Sample(config.sample_size)),
        }
    }

    pub fn current(&self) -> TokenRetention {
        self.current
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    /// A policy for another accumulator of the same build.
    ///
    /// Shares the budget but starts from this policy's current retention, so
    /// a fresh shard never re-enters `Full` after the build downgraded.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Charge a chunk's tokens and report whether the policy flipped.
    pub fn charge(&mut self, tokens: usize) -> RetentionEvent {
        if !self.auto {
            return RetentionEvent::Unchanged;
        }
        let exceeded = self.budget.charge(tokens as u64);
        if exceeded && self.current == TokenRetention::Full {
            self.current = TokenRetention::Sample(self.sample_size);
            return RetentionEvent::Downgraded(self.current);
        }
        RetentionEvent::Unchanged
    }
}
