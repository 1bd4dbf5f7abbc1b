//! Deferred scroll-and-highlight after a page transition.
//!
//! The effector is ticked by the UI loop. It never sleeps: it keeps a
//! deadline and does one lookup each time the deadline passes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::transient::{PendingScroll, TransientStore, TransientStoreExt, PENDING_SCROLL};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_HIGHLIGHT_FOR: Duration = Duration::from_millis(2500);

/// Stable anchor of a rendered comment.
pub fn anchor_id(comment_id: i64) -> String {
    format!("comment-{comment_id}")
}

/// The rendered comment page, addressed by anchor.
pub trait ScrollSurface {
    fn has_anchor(&self, anchor: &str) -> bool;
    /// Moves the viewport so the anchor is vertically centered.
    fn scroll_to_center(&mut self, anchor: &str);
    fn set_highlight(&mut self, anchor: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTiming {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub highlight_for: Duration,
}

impl Default for JumpTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            highlight_for: DEFAULT_HIGHLIGHT_FOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveHighlight {
    anchor: String,
    until: Instant,
}

/// Owns the single highlight timer of a view.
#[derive(Debug, Default)]
pub struct Highlighter {
    active: Option<ActiveHighlight>,
}

impl Highlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highlights `anchor` until `now + duration`. Re-highlighting restarts
    /// the existing timer instead of adding one.
    pub fn start(
        &mut self,
        surface: &mut dyn ScrollSurface,
        anchor: &str,
        now: Instant,
        duration: Duration,
    ) {
        surface.set_highlight(Some(anchor));
        self.active = Some(ActiveHighlight {
            anchor: anchor.to_string(),
            until: now + duration,
        });
    }

    /// Reverts the highlight once it has expired. Returns true on revert.
    pub fn tick(&mut self, surface: &mut dyn ScrollSurface, now: Instant) -> bool {
        match &self.active {
            Some(active) if now >= active.until => {
                surface.set_highlight(None);
                self.active = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, surface: &mut dyn ScrollSurface) {
        if self.active.take().is_some() {
            surface.set_highlight(None);
        }
    }

    pub fn active_anchor(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.anchor.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|active| active.until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Polling {
        comment_id: i64,
        attempts_left: u32,
        next_attempt: Instant,
    },
    Found {
        comment_id: i64,
    },
    GaveUp {
        comment_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Found { comment_id: i64 },
    GaveUp { comment_id: i64 },
}

pub struct ScrollEffector {
    post_id: i64,
    state: ScrollState,
    timing: JumpTiming,
    store: Arc<dyn TransientStore>,
}

impl ScrollEffector {
    /// Effector for the mounted thread of `post_id`.
    pub fn new(post_id: i64, store: Arc<dyn TransientStore>, timing: JumpTiming) -> Self {
        Self {
            post_id,
            state: ScrollState::Idle,
            timing,
            store,
        }
    }

    pub fn state(&self) -> ScrollState {
        self.state
    }

    /// Starts polling for the pending request, if any. A request for a
    /// different comment replaces the loop in progress; a request aimed at
    /// another post is stale and discarded.
    pub fn arm(&mut self, now: Instant) -> bool {
        let Some(pending) = self.store.read(&PENDING_SCROLL) else {
            return false;
        };
        if pending.post_id != self.post_id {
            debug!(
                post_id = self.post_id,
                pending_post = pending.post_id,
                comment_id = pending.comment_id,
                "discarding scroll request for another post"
            );
            self.store.remove(&PENDING_SCROLL);
            return false;
        }
        if let ScrollState::Polling { comment_id, .. } = self.state {
            if comment_id == pending.comment_id {
                return true;
            }
        }
        debug!(comment_id = pending.comment_id, "polling for quoted comment");
        self.state = ScrollState::Polling {
            comment_id: pending.comment_id,
            attempts_left: self.timing.max_attempts.max(1),
            next_attempt: now,
        };
        true
    }

    /// Drops the loop without touching the pending request; used on unmount.
    pub fn cancel(&mut self) {
        if matches!(self.state, ScrollState::Polling { .. }) {
            debug!("scroll polling cancelled");
        }
        self.state = ScrollState::Idle;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ScrollState::Polling { next_attempt, .. } => Some(next_attempt),
            _ => None,
        }
    }

    pub fn tick(
        &mut self,
        surface: &mut dyn ScrollSurface,
        highlighter: &mut Highlighter,
        now: Instant,
    ) -> Option<ScrollOutcome> {
        // A newer request written while polling takes over.
        self.arm_if_superseded(now);

        let ScrollState::Polling {
            comment_id,
            attempts_left,
            next_attempt,
        } = self.state
        else {
            return None;
        };
        if now < next_attempt {
            return None;
        }

        let anchor = anchor_id(comment_id);
        if surface.has_anchor(&anchor) {
            surface.scroll_to_center(&anchor);
            highlighter.start(surface, &anchor, now, self.timing.highlight_for);
            self.consume(comment_id);
            self.state = ScrollState::Found { comment_id };
            return Some(ScrollOutcome::Found { comment_id });
        }

        let attempts_left = attempts_left - 1;
        if attempts_left == 0 {
            warn!(comment_id, "quoted comment never rendered, giving up");
            self.consume(comment_id);
            self.state = ScrollState::GaveUp { comment_id };
            return Some(ScrollOutcome::GaveUp { comment_id });
        }
        self.state = ScrollState::Polling {
            comment_id,
            attempts_left,
            next_attempt: now + self.timing.poll_interval,
        };
        None
    }

    fn arm_if_superseded(&mut self, now: Instant) {
        if let ScrollState::Polling { comment_id, .. } = self.state {
            match self.store.read(&PENDING_SCROLL) {
                Some(pending) if pending != PendingScroll::new(self.post_id, comment_id) => {
                    self.arm(now);
                }
                _ => {}
            }
        }
    }

    /// Removes the pending request if it still refers to `comment_id`.
    fn consume(&self, comment_id: i64) {
        if self.store.read(&PENDING_SCROLL) == Some(PendingScroll::new(self.post_id, comment_id)) {
            self.store.remove(&PENDING_SCROLL);
        }
    }
}

impl Drop for ScrollEffector {
    fn drop(&mut self) {
        self.cancel();
    }
}
