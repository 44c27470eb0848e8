//! Session state owned by the break core
//!
//! Plain counters that decide whether a break is short or long and which
//! message it shows. Only the core task mutates this state; the running
//! sequencer shares the skip flag.

use crate::config::BreakConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Classification of a break occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Short,
    Long,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Short => write!(f, "short"),
            BreakKind::Long => write!(f, "long"),
        }
    }
}

/// Mutable session state
#[derive(Debug, Default)]
pub struct SessionState {
    /// Whether breaks are currently enabled
    pub active: bool,
    /// Position in the short/long cycle, in `[0, breaks_per_long_break)`
    pub break_count: u32,
    pub short_break_message_index: usize,
    pub long_break_message_index: usize,
    skipped: Arc<AtomicBool>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next break attempt is a long one
    pub fn is_long_break(&self, breaks_per_long_break: u32) -> bool {
        self.break_count == breaks_per_long_break.saturating_sub(1)
    }

    /// Classify the current break attempt and advance the cycle
    pub fn advance_break(&mut self, breaks_per_long_break: u32) -> BreakKind {
        let kind = if self.is_long_break(breaks_per_long_break) {
            BreakKind::Long
        } else {
            BreakKind::Short
        };
        self.break_count = (self.break_count + 1) % breaks_per_long_break.max(1);
        kind
    }

    /// Pick the message for a break of `kind` and rotate to the next one
    pub fn next_message(&mut self, kind: BreakKind, config: &BreakConfig) -> String {
        let messages = config.messages_for(kind);
        let index = match kind {
            BreakKind::Short => &mut self.short_break_message_index,
            BreakKind::Long => &mut self.long_break_message_index,
        };
        if messages.is_empty() {
            return String::new();
        }
        let current = *index % messages.len();
        *index = (current + 1) % messages.len();
        messages[current].clone()
    }

    /// Bring counters back into range after the configuration changed
    pub fn rebase(&mut self, config: &BreakConfig) {
        self.break_count %= config.no_of_short_breaks_per_long_break.max(1);
        self.short_break_message_index %= config.short_break_messages.len().max(1);
        self.long_break_message_index %= config.long_break_messages.len().max(1);
    }

    /// Flag shared with the running sequencer
    pub fn skip_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.skipped)
    }

    pub fn request_skip(&self) {
        self.skipped.store(true, Ordering::SeqCst);
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn reset_skip(&self) {
        self.skipped.store(false, Ordering::SeqCst);
    }
}
