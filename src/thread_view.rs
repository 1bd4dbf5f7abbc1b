//! One mounted thread page: loading state, laid-out lines with comment
//! anchors, viewport, selection and the jump machinery bound to it.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::{CacheError, Snapshot};
use crate::content::html_to_text;
use crate::floors::{ThreadEntry, ROOT_FLOOR};
use crate::forum;
use crate::jump::{JumpAction, NavigationController, PostRoute, QuoteTarget, Router};
use crate::paging;
use crate::scroll::{
    anchor_id, Highlighter, JumpTiming, ScrollEffector, ScrollOutcome, ScrollSurface,
};
use crate::transient::TransientStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    Title,
    Meta,
    Quote,
    Body,
    Separator,
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLine {
    pub text: String,
    pub role: LineRole,
    pub comment_id: Option<i64>,
}

impl PageLine {
    fn new(text: impl Into<String>, role: LineRole, comment_id: Option<i64>) -> Self {
        Self {
            text: text.into(),
            role,
            comment_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AnchorSpan {
    comment_id: i64,
    anchor: String,
    start: usize,
    len: usize,
}

/// Laid-out page the jump machinery scrolls and highlights.
#[derive(Debug, Default)]
struct PageSurface {
    lines: Vec<PageLine>,
    spans: Vec<AnchorSpan>,
    offset: usize,
    height: usize,
    highlight: Option<String>,
    selected: usize,
}

impl PageSurface {
    fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.height.max(1))
    }

    fn span_index(&self, anchor: &str) -> Option<usize> {
        self.spans.iter().position(|span| span.anchor == anchor)
    }

    fn keep_selected_visible(&mut self) {
        let Some(span) = self.spans.get(self.selected) else {
            return;
        };
        let height = self.height.max(1);
        if span.start < self.offset {
            self.offset = span.start;
        } else if span.start + span.len.min(height) > self.offset + height {
            self.offset = (span.start + span.len.min(height)).saturating_sub(height);
        }
        self.offset = self.offset.min(self.max_offset());
    }
}

impl ScrollSurface for PageSurface {
    fn has_anchor(&self, anchor: &str) -> bool {
        self.span_index(anchor).is_some()
    }

    fn scroll_to_center(&mut self, anchor: &str) {
        let Some(index) = self.span_index(anchor) else {
            return;
        };
        let span = &self.spans[index];
        let center = span.start + span.len / 2;
        self.offset = center
            .saturating_sub(self.height / 2)
            .min(self.max_offset());
        self.selected = index;
    }

    fn set_highlight(&mut self, anchor: Option<&str>) {
        self.highlight = anchor.map(str::to_string);
    }
}

struct PendingLoad {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct ThreadView {
    route: PostRoute,
    page_size: NonZeroU32,
    post: Option<forum::Post>,
    status: LoadStatus,
    entries: Option<Snapshot>,
    pending: Option<PendingLoad>,
    surface: PageSurface,
    effector: ScrollEffector,
    highlighter: Highlighter,
    armed: bool,
    mounted: bool,
}

impl ThreadView {
    pub fn new(
        route: PostRoute,
        page_size: NonZeroU32,
        post: Option<forum::Post>,
        store: Arc<dyn TransientStore>,
        timing: JumpTiming,
    ) -> Self {
        Self {
            route,
            page_size,
            post,
            status: LoadStatus::Loading,
            entries: None,
            pending: None,
            surface: PageSurface::default(),
            effector: ScrollEffector::new(route.post_id, store, timing),
            highlighter: Highlighter::new(),
            armed: false,
            mounted: true,
        }
    }

    pub fn route(&self) -> PostRoute {
        self.route
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn post(&self) -> Option<&forum::Post> {
        self.post.as_ref()
    }

    pub fn set_post(&mut self, post: forum::Post) {
        if post.id == self.route.post_id {
            self.post = Some(post);
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Registers a comment load; the returned flag tells the worker to stop.
    pub fn begin_load(&mut self, request_id: u64) -> Arc<AtomicBool> {
        if let Some(previous) = self.pending.take() {
            previous.cancel_flag.store(true, Ordering::SeqCst);
        }
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingLoad {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        if self.entries.is_none() {
            self.status = LoadStatus::Loading;
        }
        cancel_flag
    }

    /// Applies a finished load. Returns false when the response is stale:
    /// the view was unmounted, or a newer request replaced this one.
    pub fn apply_comments(
        &mut self,
        request_id: u64,
        post_id: i64,
        result: Result<Snapshot, CacheError>,
    ) -> bool {
        if !self.mounted || post_id != self.route.post_id {
            return false;
        }
        let Some(pending) = &self.pending else {
            return false;
        };
        if pending.request_id != request_id || pending.cancel_flag.load(Ordering::SeqCst) {
            return false;
        }
        self.pending = None;

        match result {
            Ok(entries) => {
                let clamped = paging::clamp_page(self.route.page, entries.len(), self.page_size);
                if clamped != self.route.page {
                    debug!(requested = self.route.page, clamped, "page out of range");
                    self.route = self.route.with_page(clamped);
                }
                self.entries = Some(entries);
                self.status = LoadStatus::Ready;
            }
            Err(err) => {
                self.status = LoadStatus::Failed(err.to_string());
            }
        }
        true
    }

    /// Stops everything tied to this mount: the pending load, the scroll
    /// polling loop and any highlight.
    pub fn unmount(&mut self) {
        self.mounted = false;
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        self.effector.cancel();
        self.highlighter.clear(&mut self.surface);
    }

    pub fn total_pages(&self) -> u32 {
        let count = self.entries.as_ref().map_or(0, |entries| entries.len());
        paging::total_pages(count, self.page_size)
    }

    pub fn page_entries(&self) -> &[ThreadEntry] {
        match &self.entries {
            Some(entries) => paging::page_entries(entries, self.route.page, self.page_size),
            None => &[],
        }
    }

    /// Lays the page out for a `width` x `height` viewport. The first layout
    /// after the load settles arms the deferred scroll, so a failed load still
    /// spends the lookup budget and retires the pending request.
    pub fn layout(&mut self, width: usize, height: usize, now: Instant) -> &[PageLine] {
        let width = width.max(10);
        let lines = self.build_lines(width);
        let spans = collect_spans(&lines);
        self.surface.lines = lines;
        self.surface.spans = spans;
        self.surface.height = height;
        if self.surface.selected >= self.surface.spans.len() {
            self.surface.selected = self.surface.spans.len().saturating_sub(1);
        }
        self.surface.offset = self.surface.offset.min(self.surface.max_offset());

        if !self.armed && self.mounted && self.status != LoadStatus::Loading {
            self.armed = true;
            self.effector.arm(now);
        }
        &self.surface.lines
    }

    pub fn lines(&self) -> &[PageLine] {
        &self.surface.lines
    }

    pub fn offset(&self) -> usize {
        self.surface.offset
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.surface.highlight.as_deref()
    }

    pub fn selected_comment(&self) -> Option<&ThreadEntry> {
        let span = self.surface.spans.get(self.surface.selected)?;
        self.page_entries()
            .iter()
            .find(|entry| entry.id() == span.comment_id)
    }

    pub fn select_comment(&mut self, comment_id: i64) -> bool {
        match self
            .surface
            .spans
            .iter()
            .position(|span| span.comment_id == comment_id)
        {
            Some(index) => {
                self.surface.selected = index;
                self.surface.keep_selected_visible();
                true
            }
            None => false,
        }
    }

    pub fn select_next(&mut self) {
        if self.surface.selected + 1 < self.surface.spans.len() {
            self.surface.selected += 1;
        }
        self.surface.keep_selected_visible();
    }

    pub fn select_prev(&mut self) {
        self.surface.selected = self.surface.selected.saturating_sub(1);
        self.surface.keep_selected_visible();
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let next = self.surface.offset as isize + delta;
        self.surface.offset = (next.max(0) as usize).min(self.surface.max_offset());
    }

    /// Quote target of the selected comment, if it replies to another one.
    pub fn selected_quote(&self) -> Option<QuoteTarget> {
        let entry = self.selected_comment()?;
        let comment_id = entry.comment.parent_comment_id?;
        Some(QuoteTarget {
            comment_id,
            floor: entry.parent_floor.map(i64::from),
        })
    }

    pub fn quote_jump(
        &mut self,
        controller: &NavigationController,
        target: QuoteTarget,
        now: Instant,
        router: &mut dyn Router,
    ) -> JumpAction {
        controller.quote_jump(
            self.route,
            target,
            now,
            router,
            &mut self.surface,
            &mut self.highlighter,
        )
    }

    /// Advances the scroll poll and the highlight timer.
    pub fn tick(&mut self, now: Instant) -> Option<ScrollOutcome> {
        if !self.mounted {
            return None;
        }
        let outcome = self
            .effector
            .tick(&mut self.surface, &mut self.highlighter, now);
        self.highlighter.tick(&mut self.surface, now);
        outcome
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.effector.deadline(), self.highlighter.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn build_lines(&self, width: usize) -> Vec<PageLine> {
        let mut lines = Vec::new();

        if self.route.page == 1 {
            if let Some(post) = &self.post {
                lines.push(PageLine::new(post.title.clone(), LineRole::Title, None));
                lines.push(PageLine::new(
                    format!(
                        "#{ROOT_FLOOR} · {} · {} · ▲ {}",
                        post.author.username,
                        post.created_at.format("%Y-%m-%d %H:%M"),
                        post.score
                    ),
                    LineRole::Meta,
                    None,
                ));
                push_wrapped(&mut lines, &html_to_text(&post.content), width, None);
                lines.push(PageLine::new(String::new(), LineRole::Separator, None));
            }
        }

        match &self.status {
            LoadStatus::Loading => {
                lines.push(PageLine::new("Loading comments...", LineRole::Notice, None));
                return lines;
            }
            LoadStatus::Failed(message) => {
                lines.push(PageLine::new(
                    format!("Failed to load comments: {message}"),
                    LineRole::Error,
                    None,
                ));
                return lines;
            }
            LoadStatus::Ready => {}
        }

        let entries = self.page_entries();
        if entries.is_empty() {
            lines.push(PageLine::new("No comments yet.", LineRole::Notice, None));
            return lines;
        }

        for entry in entries {
            let id = Some(entry.id());
            let comment = &entry.comment;
            lines.push(PageLine::new(
                format!(
                    "#{} · {} · {} · ▲ {}",
                    entry.floor,
                    comment.commenter_name(),
                    comment.created_at.format("%Y-%m-%d %H:%M"),
                    comment.score
                ),
                LineRole::Meta,
                id,
            ));
            match (comment.parent_comment_id, entry.parent_floor) {
                (Some(_), Some(floor)) => {
                    lines.push(PageLine::new(format!("↪ Replying to #{floor}"), LineRole::Quote, id));
                }
                (Some(_), None) => {
                    lines.push(PageLine::new(
                        "↪ Replying to a removed comment",
                        LineRole::Quote,
                        id,
                    ));
                }
                _ => {}
            }
            push_wrapped(&mut lines, &html_to_text(&comment.content), width, id);
            lines.push(PageLine::new(String::new(), LineRole::Separator, id));
        }
        lines
    }
}

impl Drop for ThreadView {
    fn drop(&mut self) {
        if self.mounted {
            self.unmount();
        }
    }
}

fn push_wrapped(lines: &mut Vec<PageLine>, text: &str, width: usize, comment_id: Option<i64>) {
    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(PageLine::new(String::new(), LineRole::Body, comment_id));
            continue;
        }
        let role = if paragraph.starts_with("> ") {
            LineRole::Quote
        } else {
            LineRole::Body
        };
        for wrapped in textwrap::wrap(paragraph, width) {
            lines.push(PageLine::new(wrapped.into_owned(), role, comment_id));
        }
    }
}

fn collect_spans(lines: &[PageLine]) -> Vec<AnchorSpan> {
    let mut spans: Vec<AnchorSpan> = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(comment_id) = line.comment_id else {
            continue;
        };
        match spans.last_mut() {
            Some(span) if span.comment_id == comment_id => span.len += 1,
            _ => spans.push(AnchorSpan {
                comment_id,
                anchor: anchor_id(comment_id),
                start: index,
                len: 1,
            }),
        }
    }
    spans
}
