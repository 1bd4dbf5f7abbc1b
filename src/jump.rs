//! Quote jumps: bring the quoted comment into view, navigating to its page
//! first when it is rendered elsewhere.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::debug;
use url::Url;

use crate::paging;
use crate::scroll::{anchor_id, Highlighter, JumpTiming, ScrollSurface};
use crate::transient::{PendingScroll, TransientStore, TransientStoreExt, PENDING_SCROLL};

/// Location of a thread page. Page 1 is canonical without a `page` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostRoute {
    pub post_id: i64,
    pub page: u32,
}

impl PostRoute {
    pub fn new(post_id: i64, page: u32) -> Self {
        Self {
            post_id,
            page: page.max(1),
        }
    }

    pub fn with_page(self, page: u32) -> Self {
        Self::new(self.post_id, page)
    }

    pub fn path(&self) -> String {
        if self.page > 1 {
            format!("/posts/{}?page={}", self.post_id, self.page)
        } else {
            format!("/posts/{}", self.post_id)
        }
    }

    /// Parses `/posts/<id>[?page=N]`. Missing, malformed or non-positive page
    /// values resolve to the first page.
    pub fn parse(input: &str) -> Result<Self> {
        let base = Url::parse("forum://local/").context("route: base url")?;
        let url = base
            .join(input.trim())
            .with_context(|| format!("route: parse {input:?}"))?;
        let mut segments = url.path_segments().into_iter().flatten();
        let (Some("posts"), Some(id), None) = (segments.next(), segments.next(), segments.next())
        else {
            bail!("route: {input:?} is not a post route");
        };
        let post_id: i64 = id
            .parse()
            .with_context(|| format!("route: invalid post id {id:?}"))?;
        let page = url
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse::<u32>().ok())
            .unwrap_or(1);
        Ok(Self::new(post_id, page))
    }
}

impl fmt::Display for PostRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

pub trait Router {
    fn navigate(&mut self, route: PostRoute);
}

/// The quoted comment of a clicked reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTarget {
    pub comment_id: i64,
    pub floor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpAction {
    /// No usable floor; nothing happened.
    Ignored,
    ScrolledInPage { anchor: String },
    Navigated { route: PostRoute },
}

pub struct NavigationController {
    page_size: NonZeroU32,
    timing: JumpTiming,
    store: Arc<dyn TransientStore>,
}

impl NavigationController {
    pub fn new(page_size: NonZeroU32, timing: JumpTiming, store: Arc<dyn TransientStore>) -> Self {
        Self {
            page_size,
            timing,
            store,
        }
    }

    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    /// Performs exactly one of: in-page scroll plus highlight, or pending
    /// request write plus navigation.
    pub fn quote_jump(
        &self,
        current: PostRoute,
        target: QuoteTarget,
        now: Instant,
        router: &mut dyn Router,
        surface: &mut dyn ScrollSurface,
        highlighter: &mut Highlighter,
    ) -> JumpAction {
        let Some(floor) = target.floor else {
            return JumpAction::Ignored;
        };
        let Ok(page) = paging::locate_page(floor, self.page_size) else {
            return JumpAction::Ignored;
        };

        if page == current.page {
            let anchor = anchor_id(target.comment_id);
            if surface.has_anchor(&anchor) {
                surface.scroll_to_center(&anchor);
                highlighter.start(surface, &anchor, now, self.timing.highlight_for);
            } else {
                debug!(%anchor, "quoted comment missing from current page");
            }
            return JumpAction::ScrolledInPage { anchor };
        }

        let route = current.with_page(page);
        debug!(comment_id = target.comment_id, floor, %route, "quote jump across pages");
        self.store.write(
            &PENDING_SCROLL,
            &PendingScroll::new(current.post_id, target.comment_id),
        );
        router.navigate(route);
        JumpAction::Navigated { route }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scroll::tests::FakeSurface;
    use crate::scroll::DEFAULT_HIGHLIGHT_FOR;
    use crate::transient::SessionStore;

    #[derive(Default)]
    struct RecordingRouter {
        routes: Vec<PostRoute>,
    }

    impl Router for RecordingRouter {
        fn navigate(&mut self, route: PostRoute) {
            self.routes.push(route);
        }
    }

    fn controller() -> (Arc<SessionStore>, NavigationController) {
        let store = Arc::new(SessionStore::new());
        let controller = NavigationController::new(
            paging::DEFAULT_PAGE_SIZE,
            JumpTiming::default(),
            store.clone(),
        );
        (store, controller)
    }

    #[test]
    fn route_path_omits_first_page() {
        assert_eq!(PostRoute::new(9, 1).path(), "/posts/9");
        assert_eq!(PostRoute::new(9, 0).path(), "/posts/9");
        assert_eq!(PostRoute::new(9, 3).path(), "/posts/9?page=3");
    }

    #[test]
    fn route_parse_reads_page_parameter() {
        assert_eq!(PostRoute::parse("/posts/9").unwrap(), PostRoute::new(9, 1));
        assert_eq!(
            PostRoute::parse("/posts/9?page=4").unwrap(),
            PostRoute::new(9, 4)
        );
        assert_eq!(
            PostRoute::parse("/posts/9?page=0").unwrap(),
            PostRoute::new(9, 1)
        );
        assert_eq!(
            PostRoute::parse("/posts/9?page=abc").unwrap(),
            PostRoute::new(9, 1)
        );
        assert!(PostRoute::parse("/users/9").is_err());
        assert!(PostRoute::parse("/posts/x").is_err());
    }

    #[test]
    fn missing_or_invalid_floor_is_ignored() {
        let (store, controller) = controller();
        let mut router = RecordingRouter::default();
        let mut surface = FakeSurface::with_comments(&[1]);
        let mut highlighter = Highlighter::new();
        let current = PostRoute::new(1, 2);

        for floor in [None, Some(0), Some(-3)] {
            let action = controller.quote_jump(
                current,
                QuoteTarget {
                    comment_id: 1,
                    floor,
                },
                Instant::now(),
                &mut router,
                &mut surface,
                &mut highlighter,
            );
            assert_eq!(action, JumpAction::Ignored);
        }
        assert!(router.routes.is_empty());
        assert!(surface.scrolled_to.is_empty());
        assert_eq!(store.read(&PENDING_SCROLL), None);
    }

    #[test]
    fn same_page_scrolls_without_navigation() {
        let (store, controller) = controller();
        let mut router = RecordingRouter::default();
        let mut surface = FakeSurface::with_comments(&[20]);
        let mut highlighter = Highlighter::new();
        let now = Instant::now();

        let action = controller.quote_jump(
            PostRoute::new(1, 2),
            QuoteTarget {
                comment_id: 20,
                floor: Some(18),
            },
            now,
            &mut router,
            &mut surface,
            &mut highlighter,
        );

        assert_eq!(
            action,
            JumpAction::ScrolledInPage {
                anchor: "comment-20".into()
            }
        );
        assert!(router.routes.is_empty());
        assert_eq!(store.read(&PENDING_SCROLL), None);
        assert_eq!(surface.highlight.as_deref(), Some("comment-20"));
        assert_eq!(highlighter.deadline(), Some(now + DEFAULT_HIGHLIGHT_FOR));
    }

    #[test]
    fn repeated_same_page_jump_keeps_one_timer() {
        let (store, controller) = controller();
        let mut router = RecordingRouter::default();
        let mut surface = FakeSurface::with_comments(&[20]);
        let mut highlighter = Highlighter::new();
        let now = Instant::now();
        let target = QuoteTarget {
            comment_id: 20,
            floor: Some(18),
        };

        for _ in 0..2 {
            controller.quote_jump(
                PostRoute::new(1, 2),
                target,
                now,
                &mut router,
                &mut surface,
                &mut highlighter,
            );
        }

        assert_eq!(highlighter.active_anchor(), Some("comment-20"));
        assert!(highlighter.tick(&mut surface, now + DEFAULT_HIGHLIGHT_FOR));
        assert!(!highlighter.tick(&mut surface, now + DEFAULT_HIGHLIGHT_FOR * 2));
        assert_eq!(surface.highlight, None);
        assert_eq!(store.read(&PENDING_SCROLL), None);
    }

    #[test]
    fn other_page_writes_request_and_navigates() {
        let (store, controller) = controller();
        let mut router = RecordingRouter::default();
        let mut surface = FakeSurface::default();
        let mut highlighter = Highlighter::new();

        let action = controller.quote_jump(
            PostRoute::new(4, 1),
            QuoteTarget {
                comment_id: 77,
                floor: Some(31),
            },
            Instant::now(),
            &mut router,
            &mut surface,
            &mut highlighter,
        );

        let expected = PostRoute::new(4, 3);
        assert_eq!(action, JumpAction::Navigated { route: expected });
        assert_eq!(router.routes, vec![expected]);
        assert_eq!(expected.path(), "/posts/4?page=3");
        assert_eq!(
            store.read(&PENDING_SCROLL),
            Some(PendingScroll::new(4, 77))
        );
        assert!(surface.scrolled_to.is_empty());
        assert_eq!(surface.highlight_calls, 0);
    }
}
