use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{TimeZone, Utc};

use forum_tui::cache::{CachePolicy, CommentCache};
use forum_tui::data::CommentService;
use forum_tui::forum::Comment;
use forum_tui::jump::{JumpAction, NavigationController, PostRoute, QuoteTarget, Router};
use forum_tui::scroll::{JumpTiming, ScrollOutcome};
use forum_tui::thread_view::ThreadView;
use forum_tui::transient::{PendingScroll, SessionStore, TransientStoreExt, PENDING_SCROLL};

const POST_ID: i64 = 7;

/// Forty comments; comment 35 (floor 36, page 3) replies to comment 9 (floor 10).
struct Thread;

impl CommentService for Thread {
    fn load_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Ok((1..=40)
            .map(|id| Comment {
                id,
                post_id,
                parent_comment_id: (id == 35).then_some(9),
                content: format!("<p>comment {id}</p>"),
                created_at: base + chrono::Duration::minutes(id),
                commenter_id: id % 4,
                commenter: None,
                score: 0,
                my_vote: 0,
            })
            .collect())
    }
}

#[derive(Default)]
struct History {
    routes: Vec<PostRoute>,
}

impl Router for History {
    fn navigate(&mut self, route: PostRoute) {
        self.routes.push(route);
    }
}

fn page_size() -> NonZeroU32 {
    NonZeroU32::new(15).unwrap()
}

fn mount(
    route: PostRoute,
    cache: &CommentCache,
    store: &Arc<SessionStore>,
    request_id: u64,
    now: Instant,
) -> ThreadView {
    let mut view = ThreadView::new(
        route,
        page_size(),
        None,
        store.clone(),
        JumpTiming::default(),
    );
    view.begin_load(request_id);
    assert!(view.apply_comments(request_id, route.post_id, cache.get_comments(route.post_id)));
    view.layout(72, 16, now);
    view
}

#[test]
fn jump_from_page_three_to_floor_ten() {
    let store = Arc::new(SessionStore::new());
    let cache = CommentCache::new(Arc::new(Thread), CachePolicy::default());
    let controller = NavigationController::new(page_size(), JumpTiming::default(), store.clone());
    let start = Instant::now();

    let mut page_three = mount(PostRoute::new(POST_ID, 3), &cache, &store, 1, start);
    assert!(page_three.select_comment(35));
    let target = page_three.selected_quote().expect("comment 35 quotes another comment");
    assert_eq!(
        target,
        QuoteTarget {
            comment_id: 9,
            floor: Some(10)
        }
    );

    let mut history = History::default();
    let action = page_three.quote_jump(&controller, target, start, &mut history);
    let expected = PostRoute::new(POST_ID, 1);
    assert_eq!(action, JumpAction::Navigated { route: expected });
    assert_eq!(history.routes, vec![expected]);
    assert_eq!(expected.path(), format!("/posts/{POST_ID}"));
    assert_eq!(
        store.read(&PENDING_SCROLL),
        Some(PendingScroll::new(POST_ID, 9))
    );
    page_three.unmount();

    let mut page_one = mount(expected, &cache, &store, 2, start);
    assert_eq!(cache.network_calls(), 1);
    assert_eq!(
        page_one.tick(start),
        Some(ScrollOutcome::Found { comment_id: 9 })
    );
    assert_eq!(page_one.highlighted(), Some("comment-9"));
    assert_eq!(page_one.selected_comment().map(|entry| entry.floor), Some(10));
    assert!(page_one.offset() > 0);
    assert_eq!(store.read(&PENDING_SCROLL), None);

    assert_eq!(page_one.tick(start + Duration::from_millis(2400)), None);
    assert_eq!(page_one.highlighted(), Some("comment-9"));
    page_one.tick(start + Duration::from_millis(2500));
    assert_eq!(page_one.highlighted(), None);
}

#[test]
fn same_page_jump_does_not_navigate() {
    let store = Arc::new(SessionStore::new());
    let cache = CommentCache::new(Arc::new(Thread), CachePolicy::default());
    let controller = NavigationController::new(page_size(), JumpTiming::default(), store.clone());
    let now = Instant::now();
    let mut view = mount(PostRoute::new(POST_ID, 1), &cache, &store, 1, now);

    let mut history = History::default();
    let target = QuoteTarget {
        comment_id: 9,
        floor: Some(10),
    };
    for _ in 0..2 {
        let action = view.quote_jump(&controller, target, now, &mut history);
        assert_eq!(
            action,
            JumpAction::ScrolledInPage {
                anchor: "comment-9".into()
            }
        );
    }
    assert!(history.routes.is_empty());
    assert_eq!(store.read(&PENDING_SCROLL), None);
    assert_eq!(view.highlighted(), Some("comment-9"));

    view.tick(now + JumpTiming::default().highlight_for);
    assert_eq!(view.highlighted(), None);
}

#[test]
fn pending_request_survives_until_a_matching_page_renders() {
    let store = Arc::new(SessionStore::new());
    let cache = CommentCache::new(Arc::new(Thread), CachePolicy::default());
    store.write(&PENDING_SCROLL, &PendingScroll::new(POST_ID, 9));
    let now = Instant::now();

    // Unmounted before its comments arrive: nothing is applied or consumed.
    let mut abandoned = ThreadView::new(
        PostRoute::new(POST_ID, 1),
        page_size(),
        None,
        store.clone(),
        JumpTiming::default(),
    );
    abandoned.begin_load(1);
    abandoned.unmount();
    assert!(!abandoned.apply_comments(1, POST_ID, cache.get_comments(POST_ID)));
    assert_eq!(abandoned.tick(now), None);
    assert_eq!(
        store.read(&PENDING_SCROLL),
        Some(PendingScroll::new(POST_ID, 9))
    );

    let mut view = mount(PostRoute::new(POST_ID, 1), &cache, &store, 2, now);
    assert_eq!(view.tick(now), Some(ScrollOutcome::Found { comment_id: 9 }));
    assert_eq!(store.read(&PENDING_SCROLL), None);
}
