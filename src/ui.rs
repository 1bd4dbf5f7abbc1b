use std::collections::HashSet;
use std::io::{self, Stdout};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, MouseEvent, MouseEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::cache::{CacheError, CommentCache, Snapshot};
use crate::content;
use crate::data::{CategoryService, FeedService, InteractionService, NotificationService};
use crate::forum::{self, VoteTarget};
use crate::jump::{JumpAction, NavigationController, PostRoute, Router};
use crate::scroll::{anchor_id, JumpTiming, ScrollOutcome};
use crate::thread_view::{LineRole, LoadStatus, PageLine, ThreadView};
use crate::transient::TransientStore;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_HIGHLIGHT_BG: Color = Color::Rgb(88, 78, 40);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_QUOTE: Color = Color::Rgb(148, 226, 213);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const TICK_RATE: Duration = Duration::from_millis(120);
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const GAVE_UP_NOTICE: &str = "Original comment not found";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pane {
    Categories,
    Posts,
    Thread,
}

impl Pane {
    fn title(self) -> &'static str {
        match self {
            Pane::Categories => "Categories",
            Pane::Posts => "Posts",
            Pane::Thread => "Thread",
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Categories => Pane::Posts,
            Pane::Posts | Pane::Thread => Pane::Thread,
        }
    }

    fn previous(self) -> Self {
        match self {
            Pane::Thread => Pane::Posts,
            Pane::Posts | Pane::Categories => Pane::Categories,
        }
    }
}

fn toggle_vote_value(old: i32, requested: i32) -> i32 {
    if old == requested {
        0
    } else {
        requested
    }
}

/// Collects the route handed to the router during a quote jump.
#[derive(Default)]
struct NavigationQueue {
    next: Option<PostRoute>,
}

impl Router for NavigationQueue {
    fn navigate(&mut self, route: PostRoute) {
        self.next = Some(route);
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        if self.last_tick.elapsed() >= TICK_RATE {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = Instant::now();
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

struct PendingPosts {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

struct Composer {
    post_id: i64,
    parent: Option<(i64, u32)>,
    text: String,
}

enum AsyncResponse {
    Categories {
        request_id: u64,
        result: Result<Vec<forum::Category>>,
    },
    Posts {
        request_id: u64,
        category_id: i64,
        result: Result<forum::PostPage>,
    },
    Post {
        post_id: i64,
        result: Result<forum::Post>,
    },
    Comments {
        request_id: u64,
        post_id: i64,
        result: Result<Snapshot, CacheError>,
    },
    Vote {
        target: VoteTarget,
        result: Result<forum::VoteTally>,
    },
    Reply {
        post_id: i64,
        result: Result<forum::Comment>,
    },
    Notifications {
        result: Result<Vec<forum::Notification>>,
    },
    Interaction {
        label: String,
        refresh_post: Option<i64>,
        result: Result<()>,
    },
}

pub struct Options {
    pub status_message: String,
    pub categories: Arc<dyn CategoryService>,
    pub feed: Arc<dyn FeedService>,
    pub comments: CommentCache,
    pub interactions: Arc<dyn InteractionService>,
    pub notifications: Arc<dyn NotificationService>,
    pub controller: NavigationController,
    pub transient: Arc<dyn TransientStore>,
    pub timing: JumpTiming,
    pub web: Option<Arc<forum::Client>>,
    pub initial_route: Option<PostRoute>,
}

pub struct Model {
    status_message: String,
    categories: Vec<forum::Category>,
    selected_category: usize,
    posts: Vec<forum::Post>,
    selected_post: usize,
    post_page: u32,
    post_total_pages: u32,
    thread: Option<ThreadView>,
    history: Vec<PostRoute>,
    notifications: Vec<forum::Notification>,
    notifications_visible: bool,
    selected_notification: usize,
    composer: Option<Composer>,
    following: HashSet<i64>,
    blocked: HashSet<i64>,
    focused_pane: Pane,
    category_service: Arc<dyn CategoryService>,
    feed_service: Arc<dyn FeedService>,
    interaction_service: Arc<dyn InteractionService>,
    notification_service: Arc<dyn NotificationService>,
    comments: CommentCache,
    controller: NavigationController,
    transient: Arc<dyn TransientStore>,
    timing: JumpTiming,
    web: Option<Arc<forum::Client>>,
    spinner: Spinner,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_categories: Option<u64>,
    pending_posts: Option<PendingPosts>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut model = Self {
            status_message: opts.status_message,
            categories: Vec::new(),
            selected_category: 0,
            posts: Vec::new(),
            selected_post: 0,
            post_page: 1,
            post_total_pages: 1,
            thread: None,
            history: Vec::new(),
            notifications: Vec::new(),
            notifications_visible: false,
            selected_notification: 0,
            composer: None,
            following: HashSet::new(),
            blocked: HashSet::new(),
            focused_pane: Pane::Categories,
            category_service: opts.categories,
            feed_service: opts.feed,
            interaction_service: opts.interactions,
            notification_service: opts.notifications,
            comments: opts.comments,
            controller: opts.controller,
            transient: opts.transient,
            timing: opts.timing,
            web: opts.web,
            spinner: Spinner::new(),
            needs_redraw: true,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_categories: None,
            pending_posts: None,
        };
        model.reload_categories();
        if let Some(route) = opts.initial_route {
            model.open_route(route, false);
        }
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(deadline) = self.thread.as_ref().and_then(ThreadView::next_deadline) {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err}");
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(..) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }
            self.tick_thread(Instant::now());

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        if let Some(mut thread) = self.thread.take() {
            thread.unmount();
        }
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn bump_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        request_id
    }

    fn is_loading(&self) -> bool {
        self.pending_categories.is_some()
            || self.pending_posts.is_some()
            || self.thread.as_ref().is_some_and(ThreadView::is_loading)
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.composer.is_some() {
            self.handle_composer_key(code);
            self.mark_dirty();
            return Ok(false);
        }
        if self.notifications_visible {
            self.handle_notifications_key(code);
            self.mark_dirty();
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc => self.go_back(),
            KeyCode::Char('h') | KeyCode::Left => {
                self.focused_pane = self.focused_pane.previous();
            }
            KeyCode::Char('l') | KeyCode::Right => {
                if self.focused_pane != Pane::Posts || self.thread.is_some() {
                    self.focused_pane = self.focused_pane.next();
                }
            }
            KeyCode::Char('j') | KeyCode::Down => self.navigate_in_focus(1),
            KeyCode::Char('k') | KeyCode::Up => self.navigate_in_focus(-1),
            KeyCode::PageDown | KeyCode::Char(' ') => {
                if let Some(thread) = self.thread.as_mut() {
                    thread.scroll_by(10);
                }
            }
            KeyCode::PageUp => {
                if let Some(thread) = self.thread.as_mut() {
                    thread.scroll_by(-10);
                }
            }
            KeyCode::Enter => self.commit_selection(),
            KeyCode::Char('n') => self.shift_page(1),
            KeyCode::Char('p') => self.shift_page(-1),
            KeyCode::Char('g') => self.quote_jump_selected(),
            KeyCode::Char('u') => self.vote_selected(1),
            KeyCode::Char('d') => self.vote_selected(-1),
            KeyCode::Char('b') => self.toggle_bookmark(),
            KeyCode::Char('f') => self.toggle_follow(),
            KeyCode::Char('x') => self.toggle_block(),
            KeyCode::Char('c') => self.open_composer(),
            KeyCode::Char('N') => self.open_notifications(),
            KeyCode::Char('o') => self.open_in_browser(),
            KeyCode::Char('r') => self.refresh(),
            _ => return Ok(false),
        }

        self.mark_dirty();
        Ok(false)
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::ScrollDown => {
                self.navigate_in_focus(1);
                self.mark_dirty();
            }
            MouseEventKind::ScrollUp => {
                self.navigate_in_focus(-1);
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn navigate_in_focus(&mut self, delta: i32) {
        match self.focused_pane {
            Pane::Categories => {
                self.selected_category = step_index(self.selected_category, self.categories.len(), delta);
            }
            Pane::Posts => {
                self.selected_post = step_index(self.selected_post, self.posts.len(), delta);
            }
            Pane::Thread => {
                if let Some(thread) = self.thread.as_mut() {
                    if delta > 0 {
                        thread.select_next();
                    } else {
                        thread.select_prev();
                    }
                }
            }
        }
    }

    fn commit_selection(&mut self) {
        match self.focused_pane {
            Pane::Categories => {
                self.post_page = 1;
                self.reload_posts();
                self.focused_pane = Pane::Posts;
            }
            Pane::Posts => {
                if let Some(post) = self.posts.get(self.selected_post) {
                    let route = PostRoute::new(post.id, 1);
                    self.history.clear();
                    self.open_route(route, false);
                    self.focused_pane = Pane::Thread;
                }
            }
            Pane::Thread => {}
        }
    }

    fn go_back(&mut self) {
        if let Some(route) = self.history.pop() {
            self.open_route(route, false);
            self.status_message = format!("Back to {route}");
            return;
        }
        if self.focused_pane == Pane::Thread {
            if let Some(mut thread) = self.thread.take() {
                thread.unmount();
            }
            self.focused_pane = Pane::Posts;
        }
    }

    fn shift_page(&mut self, delta: i64) {
        match self.focused_pane {
            Pane::Thread => {
                let Some(thread) = self.thread.as_ref() else {
                    return;
                };
                let route = thread.route();
                let target = i64::from(route.page) + delta;
                if target < 1 || target > i64::from(thread.total_pages()) {
                    self.status_message = format!(
                        "Page {} of {}.",
                        route.page,
                        thread.total_pages()
                    );
                    return;
                }
                self.open_route(route.with_page(target as u32), true);
            }
            Pane::Posts | Pane::Categories => {
                let target = i64::from(self.post_page) + delta;
                if target < 1 || target > i64::from(self.post_total_pages) {
                    return;
                }
                self.post_page = target as u32;
                self.reload_posts();
            }
        }
    }

    /// Mounts a thread view for `route`, unmounting the current one.
    fn open_route(&mut self, route: PostRoute, remember: bool) {
        let mut preview = self
            .posts
            .iter()
            .find(|post| post.id == route.post_id)
            .cloned();
        if let Some(mut previous) = self.thread.take() {
            if remember {
                self.history.push(previous.route());
            }
            if preview.is_none() {
                preview = previous
                    .post()
                    .filter(|post| post.id == route.post_id)
                    .cloned();
            }
            previous.unmount();
        }

        debug!(%route, "opening thread page");
        let needs_post = preview.is_none();
        self.thread = Some(ThreadView::new(
            route,
            self.controller.page_size(),
            preview,
            self.transient.clone(),
            self.timing,
        ));
        self.load_thread_comments();
        if needs_post {
            self.load_post(route.post_id);
        }
    }

    fn load_thread_comments(&mut self) {
        let request_id = self.bump_request_id();
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        let post_id = thread.route().post_id;
        let cancel_flag = thread.begin_load(request_id);
        let cache = self.comments.clone();
        let tx = self.response_tx.clone();
        self.spinner.reset();

        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = cache.get_comments(post_id);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Comments {
                request_id,
                post_id,
                result,
            });
        });
    }

    fn load_post(&mut self, post_id: i64) {
        let service = self.feed_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load_post(post_id);
            let _ = tx.send(AsyncResponse::Post { post_id, result });
        });
    }

    fn reload_categories(&mut self) {
        let request_id = self.bump_request_id();
        self.pending_categories = Some(request_id);
        let service = self.category_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.list_categories();
            let _ = tx.send(AsyncResponse::Categories { request_id, result });
        });
    }

    fn reload_posts(&mut self) {
        let Some(category) = self.categories.get(self.selected_category) else {
            self.status_message = "No category selected.".to_string();
            return;
        };
        let category_id = category.id;
        let page = self.post_page;
        self.status_message = format!("Loading {} (page {page})…", category.name);

        if let Some(pending) = self.pending_posts.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        let request_id = self.bump_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_posts = Some(PendingPosts {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });

        let service = self.feed_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_category(category_id, page);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Posts {
                request_id,
                category_id,
                result,
            });
        });
    }

    fn refresh(&mut self) {
        match self.focused_pane {
            Pane::Categories => self.reload_categories(),
            Pane::Posts => self.reload_posts(),
            Pane::Thread => {
                if let Some(post_id) = self.thread.as_ref().map(|thread| thread.route().post_id) {
                    self.comments.invalidate(post_id);
                    self.load_thread_comments();
                    self.status_message = "Refreshing comments…".to_string();
                }
            }
        }
    }

    fn quote_jump_selected(&mut self) {
        if self.focused_pane != Pane::Thread {
            return;
        }
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        let Some(target) = thread.selected_quote() else {
            self.status_message = "This comment does not quote another one.".to_string();
            return;
        };

        let mut queue = NavigationQueue::default();
        let action = thread.quote_jump(&self.controller, target, Instant::now(), &mut queue);
        match action {
            JumpAction::Ignored => {
                self.status_message = "The quoted comment is no longer available.".to_string();
            }
            JumpAction::ScrolledInPage { .. } => {
                self.status_message = match target.floor {
                    Some(floor) => format!("Jumped to #{floor}."),
                    None => "Jumped to the quoted comment.".to_string(),
                };
            }
            JumpAction::Navigated { route } => {
                self.status_message = format!("Opening page {} of the thread…", route.page);
            }
        }
        if let Some(route) = queue.next.take() {
            self.open_route(route, true);
        }
    }

    fn tick_thread(&mut self, now: Instant) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        let due = thread.next_deadline().is_some_and(|deadline| deadline <= now);
        match thread.tick(now) {
            Some(ScrollOutcome::Found { comment_id }) => {
                debug!(comment_id, "quoted comment in view");
                self.status_message = "Jumped to the quoted comment.".to_string();
            }
            Some(ScrollOutcome::GaveUp { .. }) => {
                self.status_message = GAVE_UP_NOTICE.to_string();
            }
            None => {}
        }
        if due {
            self.mark_dirty();
        }
    }

    fn vote_selected(&mut self, requested: i32) {
        let (target, old) = match self.focused_pane {
            Pane::Thread => {
                let Some(entry) = self.thread.as_ref().and_then(ThreadView::selected_comment) else {
                    return;
                };
                (VoteTarget::Comment(entry.id()), entry.comment.my_vote)
            }
            Pane::Posts => {
                let Some(post) = self.posts.get(self.selected_post) else {
                    return;
                };
                (VoteTarget::Post(post.id), post.my_vote)
            }
            Pane::Categories => return,
        };
        let value = toggle_vote_value(old, requested);
        let service = self.interaction_service.clone();
        let tx = self.response_tx.clone();
        self.status_message = "Sending vote…".to_string();
        thread::spawn(move || {
            let result = service.vote(target, value);
            let _ = tx.send(AsyncResponse::Vote { target, result });
        });
    }

    fn toggle_bookmark(&mut self) {
        let Some(post) = self.posts.get_mut(self.selected_post) else {
            return;
        };
        let post_id = post.id;
        let bookmarked = !post.bookmarked;
        post.bookmarked = bookmarked;
        let label = if bookmarked { "Bookmarked" } else { "Bookmark removed" };
        self.run_interaction(label.to_string(), None, move |service| {
            service.set_bookmark(post_id, bookmarked)
        });
    }

    fn selected_author(&self) -> Option<(i64, String)> {
        match self.focused_pane {
            Pane::Thread => {
                let entry = self.thread.as_ref()?.selected_comment()?;
                Some((entry.comment.commenter_id, entry.comment.commenter_name()))
            }
            Pane::Posts => {
                let post = self.posts.get(self.selected_post)?;
                Some((post.author.id, post.author.username.clone()))
            }
            Pane::Categories => None,
        }
    }

    fn toggle_follow(&mut self) {
        let Some((user_id, name)) = self.selected_author() else {
            return;
        };
        let following = self.following.insert(user_id);
        if !following {
            self.following.remove(&user_id);
        }
        let label = if following {
            format!("Following {name}")
        } else {
            format!("Unfollowed {name}")
        };
        self.run_interaction(label, None, move |service| {
            service.set_follow(user_id, following)
        });
    }

    fn toggle_block(&mut self) {
        let Some((user_id, name)) = self.selected_author() else {
            return;
        };
        let blocked = self.blocked.insert(user_id);
        if !blocked {
            self.blocked.remove(&user_id);
        }
        let label = if blocked {
            format!("Blocked {name}")
        } else {
            format!("Unblocked {name}")
        };
        let refresh_post = self.thread.as_ref().map(|thread| thread.route().post_id);
        self.run_interaction(label, refresh_post, move |service| {
            service.set_block(user_id, blocked)
        });
    }

    fn run_interaction<F>(&mut self, label: String, refresh_post: Option<i64>, call: F)
    where
        F: FnOnce(&dyn InteractionService) -> Result<()> + Send + 'static,
    {
        let service = self.interaction_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = call(service.as_ref());
            let _ = tx.send(AsyncResponse::Interaction {
                label,
                refresh_post,
                result,
            });
        });
    }

    fn open_composer(&mut self) {
        if self.focused_pane != Pane::Thread {
            return;
        }
        let Some(thread) = self.thread.as_ref() else {
            return;
        };
        let parent = thread
            .selected_comment()
            .map(|entry| (entry.id(), entry.floor));
        self.composer = Some(Composer {
            post_id: thread.route().post_id,
            parent,
            text: String::new(),
        });
    }

    fn handle_composer_key(&mut self, code: KeyCode) {
        let Some(composer) = self.composer.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => {
                self.composer = None;
                self.status_message = "Reply discarded.".to_string();
            }
            KeyCode::Backspace => {
                composer.text.pop();
            }
            KeyCode::Char(ch) => composer.text.push(ch),
            KeyCode::Enter => {
                let Some(composer) = self.composer.take() else {
                    return;
                };
                let body = content::text_to_html(&composer.text);
                if body.is_empty() {
                    self.status_message = "Nothing to send.".to_string();
                    return;
                }
                let service = self.interaction_service.clone();
                let tx = self.response_tx.clone();
                let post_id = composer.post_id;
                let parent = composer.parent.map(|(id, _)| id);
                self.status_message = "Posting reply…".to_string();
                thread::spawn(move || {
                    let result = service.reply(post_id, parent, &body);
                    let _ = tx.send(AsyncResponse::Reply { post_id, result });
                });
            }
            _ => {}
        }
    }

    fn open_notifications(&mut self) {
        self.notifications_visible = true;
        self.selected_notification = 0;
        let service = self.notification_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.list_notifications();
            let _ = tx.send(AsyncResponse::Notifications { result });
        });
    }

    fn handle_notifications_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('N') | KeyCode::Char('q') => {
                self.notifications_visible = false;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.selected_notification =
                    step_index(self.selected_notification, self.notifications.len(), 1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_notification =
                    step_index(self.selected_notification, self.notifications.len(), -1);
            }
            KeyCode::Enter => {
                let Some(notification) = self.notifications.get_mut(self.selected_notification)
                else {
                    return;
                };
                let notification_id = notification.id;
                let post_id = notification.post_id;
                if !notification.read {
                    notification.read = true;
                    self.run_notification_read(notification_id);
                }
                if let Some(post_id) = post_id {
                    self.notifications_visible = false;
                    self.history.clear();
                    self.open_route(PostRoute::new(post_id, 1), false);
                    self.focused_pane = Pane::Thread;
                }
            }
            _ => {}
        }
    }

    fn run_notification_read(&mut self, notification_id: i64) {
        let service = self.notification_service.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.mark_read(notification_id);
            let _ = tx.send(AsyncResponse::Interaction {
                label: "Notification marked as read".to_string(),
                refresh_post: None,
                result,
            });
        });
    }

    fn open_in_browser(&mut self) {
        let post_id = match self.focused_pane {
            Pane::Thread => self.thread.as_ref().map(|thread| thread.route().post_id),
            _ => self.posts.get(self.selected_post).map(|post| post.id),
        };
        let Some(post_id) = post_id else {
            return;
        };
        let Some(client) = self.web.as_ref() else {
            self.status_message = "No forum server configured.".to_string();
            return;
        };
        let url = client.post_web_url(post_id);
        self.status_message = match webbrowser::open(url.as_str()) {
            Ok(()) => format!("Opened {url}"),
            Err(err) => {
                warn!(error = %err, %url, "failed to open browser");
                format!("Failed to open browser: {err}")
            }
        };
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Categories { request_id, result } => {
                if self.pending_categories != Some(request_id) {
                    return;
                }
                self.pending_categories = None;
                match result {
                    Ok(categories) => {
                        let first_load = self.categories.is_empty();
                        self.categories = categories;
                        self.selected_category =
                            self.selected_category.min(self.categories.len().saturating_sub(1));
                        if first_load && !self.categories.is_empty() {
                            self.reload_posts();
                        }
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load categories: {err}");
                    }
                }
            }
            AsyncResponse::Posts {
                request_id,
                category_id,
                result,
            } => {
                let Some(pending) = &self.pending_posts else {
                    return;
                };
                if pending.request_id != request_id || pending.cancel_flag.load(Ordering::SeqCst) {
                    return;
                }
                self.pending_posts = None;
                match result {
                    Ok(page) => {
                        let count = page.items.len();
                        self.posts = page.items;
                        self.post_page = page.page.max(1);
                        self.post_total_pages = page.total_pages.max(1);
                        self.selected_post = self.selected_post.min(count.saturating_sub(1));
                        let name = self
                            .categories
                            .iter()
                            .find(|category| category.id == category_id)
                            .map(|category| category.name.as_str())
                            .unwrap_or("category");
                        self.status_message = format!(
                            "{name}: {count} posts · page {}/{}",
                            self.post_page, self.post_total_pages
                        );
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load posts: {err}");
                    }
                }
            }
            AsyncResponse::Post { post_id, result } => match result {
                Ok(post) => {
                    if let Some(thread) = self.thread.as_mut() {
                        thread.set_post(post);
                    }
                }
                Err(err) => {
                    warn!(post_id, error = %err, "failed to load post");
                }
            },
            AsyncResponse::Comments {
                request_id,
                post_id,
                result,
            } => {
                let Some(thread) = self.thread.as_mut() else {
                    debug!(post_id, "comments arrived after the thread closed");
                    return;
                };
                if !thread.apply_comments(request_id, post_id, result) {
                    debug!(post_id, request_id, "discarding stale comment response");
                    return;
                }
                if let LoadStatus::Failed(message) = thread.status() {
                    self.status_message = format!("Failed to load comments: {message}");
                } else {
                    let route = thread.route();
                    self.status_message =
                        format!("{route} · page {}/{}", route.page, thread.total_pages());
                }
            }
            AsyncResponse::Vote { target, result } => match result {
                Ok(tally) => {
                    match target {
                        VoteTarget::Post(post_id) => {
                            for post in self.posts.iter_mut().filter(|post| post.id == post_id) {
                                post.score = tally.score;
                                post.my_vote = tally.my_vote;
                            }
                        }
                        VoteTarget::Comment(_) => {
                            if let Some(post_id) =
                                self.thread.as_ref().map(|thread| thread.route().post_id)
                            {
                                self.comments.invalidate(post_id);
                                self.load_thread_comments();
                            }
                        }
                    }
                    self.status_message = format!("Vote recorded (score {}).", tally.score);
                }
                Err(err) => {
                    self.status_message = format!("Vote failed: {err}");
                }
            },
            AsyncResponse::Reply { post_id, result } => match result {
                Ok(comment) => {
                    info!(post_id, comment_id = comment.id, "reply posted");
                    self.comments.invalidate(post_id);
                    if self
                        .thread
                        .as_ref()
                        .is_some_and(|thread| thread.route().post_id == post_id)
                    {
                        self.load_thread_comments();
                    }
                    self.status_message = "Reply posted.".to_string();
                }
                Err(err) => {
                    self.status_message = format!("Reply failed: {err}");
                }
            },
            AsyncResponse::Notifications { result } => match result {
                Ok(notifications) => {
                    self.notifications = notifications;
                    self.selected_notification = 0;
                }
                Err(err) => {
                    self.status_message = format!("Failed to load notifications: {err}");
                }
            },
            AsyncResponse::Interaction {
                label,
                refresh_post,
                result,
            } => match result {
                Ok(()) => {
                    self.status_message = format!("{label}.");
                    if let Some(post_id) = refresh_post {
                        self.comments.invalidate(post_id);
                        if self
                            .thread
                            .as_ref()
                            .is_some_and(|thread| thread.route().post_id == post_id)
                        {
                            self.load_thread_comments();
                        }
                    }
                }
                Err(err) => {
                    self.status_message = format!("{label} failed: {err}");
                }
            },
        }
    }

    /// Lays out the mounted thread; the first layout with comments arms the
    /// pending scroll.
    fn layout_thread(&mut self, width: usize, height: usize, now: Instant) {
        if let Some(thread) = self.thread.as_mut() {
            thread.layout(width, height, now);
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_style = if self.status_message == GAVE_UP_NOTICE {
            Style::default().fg(COLOR_ERROR).bg(COLOR_PANEL_FOCUSED_BG)
        } else {
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD)
        };
        frame.render_widget(Paragraph::new(status_text).style(status_style), layout[0]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(18),
                Constraint::Percentage(32),
                Constraint::Percentage(50),
            ])
            .split(layout[1]);
        self.draw_categories(frame, main_chunks[0]);
        self.draw_posts(frame, main_chunks[1]);
        self.draw_thread(frame, main_chunks[2]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.notifications_visible {
            self.draw_notifications(frame, layout[1]);
        }
        if self.composer.is_some() {
            self.draw_composer(frame, layout[1]);
        }
    }

    fn pane_block(&self, pane: Pane, title: String) -> Block<'static> {
        let focused = self.focused_pane == pane;
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    fn draw_categories(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Categories, Pane::Categories.title().to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let width = inner.width as usize;

        let items: Vec<ListItem> = self
            .categories
            .iter()
            .map(|category| {
                ListItem::new(vec![
                    Line::from(Span::styled(
                        truncate_to_width(&category.name, width),
                        Style::default().fg(COLOR_TEXT_PRIMARY),
                    )),
                    Line::from(Span::styled(
                        truncate_to_width(&format!("{} posts", category.post_count), width),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    )),
                ])
            })
            .collect();
        self.render_list(frame, inner, items, self.selected_category, Pane::Categories);
    }

    fn draw_posts(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = format!(
            "{} · {}/{}",
            Pane::Posts.title(),
            self.post_page,
            self.post_total_pages
        );
        let block = self.pane_block(Pane::Posts, title);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let width = inner.width as usize;

        let items: Vec<ListItem> = self
            .posts
            .iter()
            .map(|post| {
                let marker = if post.bookmarked { "★ " } else { "" };
                let vote_color = match post.my_vote {
                    1 => COLOR_SUCCESS,
                    -1 => COLOR_ERROR,
                    _ => COLOR_TEXT_SECONDARY,
                };
                ListItem::new(vec![
                    Line::from(Span::styled(
                        truncate_to_width(&format!("{marker}{}", post.title), width),
                        Style::default()
                            .fg(COLOR_TEXT_PRIMARY)
                            .add_modifier(Modifier::BOLD),
                    )),
                    Line::from(vec![
                        Span::styled(format!("▲ {} ", post.score), Style::default().fg(vote_color)),
                        Span::styled(
                            truncate_to_width(
                                &format!(
                                    "· {} comments · {}",
                                    post.comment_count, post.author.username
                                ),
                                width.saturating_sub(8),
                            ),
                            Style::default().fg(COLOR_TEXT_SECONDARY),
                        ),
                    ]),
                ])
            })
            .collect();
        self.render_list(frame, inner, items, self.selected_post, Pane::Posts);
    }

    fn render_list(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        items: Vec<ListItem<'static>>,
        selected: usize,
        pane: Pane,
    ) {
        let highlight_bg = if self.focused_pane == pane {
            COLOR_PANEL_SELECTED_BG
        } else {
            COLOR_PANEL_FOCUSED_BG
        };
        let mut state = ListState::default();
        if !items.is_empty() {
            state.select(Some(selected.min(items.len() - 1)));
        }
        let list = List::new(items).highlight_style(Style::default().bg(highlight_bg));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_thread(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let title = match self.thread.as_ref() {
            Some(thread) => format!(
                "{} · {} · page {}/{}",
                Pane::Thread.title(),
                thread.route(),
                thread.route().page,
                thread.total_pages()
            ),
            None => Pane::Thread.title().to_string(),
        };
        let block = self.pane_block(Pane::Thread, title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.thread.is_none() {
            let hint = Paragraph::new("Select a post and press Enter to read the thread.")
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .wrap(Wrap { trim: true });
            frame.render_widget(hint, inner);
            return;
        }

        let width = inner.width.saturating_sub(2) as usize;
        let height = inner.height as usize;
        self.layout_thread(width, height, Instant::now());
        let Some(thread) = self.thread.as_ref() else {
            return;
        };
        let selected = thread.selected_comment().map(|entry| entry.id());
        let highlighted = thread.highlighted();
        let lines: Vec<Line<'static>> = thread
            .lines()
            .iter()
            .skip(thread.offset())
            .take(height)
            .map(|line| render_page_line(line, selected, highlighted, width))
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_notifications(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup = centered_rect(60, 60, area);
        frame.render_widget(Clear, popup);
        let block = Block::default()
            .title(Span::styled(
                "Notifications",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        if self.notifications.is_empty() {
            frame.render_widget(
                Paragraph::new("No notifications.").style(Style::default().fg(COLOR_TEXT_SECONDARY)),
                inner,
            );
            return;
        }
        let width = inner.width as usize;
        let items: Vec<ListItem> = self
            .notifications
            .iter()
            .map(|notification| {
                let style = if notification.read {
                    Style::default().fg(COLOR_TEXT_SECONDARY)
                } else {
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD)
                };
                let text = format!(
                    "{} · {}",
                    notification.created_at.format("%m-%d %H:%M"),
                    notification.message
                );
                ListItem::new(Line::from(Span::styled(
                    truncate_to_width(&text, width),
                    style,
                )))
            })
            .collect();
        let mut state = ListState::default();
        state.select(Some(self.selected_notification.min(items.len() - 1)));
        let list =
            List::new(items).highlight_style(Style::default().bg(COLOR_PANEL_SELECTED_BG));
        frame.render_stateful_widget(list, inner, &mut state);
    }

    fn draw_composer(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(composer) = self.composer.as_ref() else {
            return;
        };
        let popup = centered_rect(70, 30, area);
        frame.render_widget(Clear, popup);
        let title = match composer.parent {
            Some((_, floor)) => format!("Reply to #{floor}"),
            None => "Reply".to_string(),
        };
        let block = Block::default()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::uniform(1));
        let body = Paragraph::new(format!("{}▏", composer.text))
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .wrap(Wrap { trim: false })
            .block(block);
        frame.render_widget(body, popup);
    }

    fn footer_text(&self) -> String {
        if self.composer.is_some() {
            return "Type your reply · Enter send · Esc discard".to_string();
        }
        if self.notifications_visible {
            return "Notifications: j/k move · Enter open · Esc close".to_string();
        }

        let mut parts: Vec<&str> = Vec::new();
        match self.focused_pane {
            Pane::Categories => {
                parts.push("Categories: j/k move, Enter load");
            }
            Pane::Posts => {
                parts.push("Posts: j/k move, Enter open, n/p page");
                parts.push("u/d vote · b bookmark · f follow · x block");
            }
            Pane::Thread => {
                parts.push("Thread: j/k select, n/p page, g jump to quote");
                parts.push("u/d vote · c reply · f follow · x block");
                parts.push("Esc back");
            }
        }
        parts.push("N notifications");
        parts.push("o open in browser");
        parts.push("r refresh");
        parts.push("q quit");
        parts.join(" · ")
    }
}

fn step_index(current: usize, len: usize, delta: i32) -> usize {
    if len == 0 {
        return 0;
    }
    let next = current as i64 + i64::from(delta);
    next.clamp(0, len as i64 - 1) as usize
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn render_page_line(
    line: &PageLine,
    selected: Option<i64>,
    highlighted: Option<&str>,
    width: usize,
) -> Line<'static> {
    let is_selected = line.comment_id.is_some() && line.comment_id == selected;
    let is_highlighted = match (line.comment_id, highlighted) {
        (Some(id), Some(anchor)) => anchor_id(id) == anchor,
        _ => false,
    };

    let mut style = match line.role {
        LineRole::Title => Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD),
        LineRole::Meta => Style::default().fg(COLOR_ACCENT),
        LineRole::Quote => Style::default()
            .fg(COLOR_QUOTE)
            .add_modifier(Modifier::ITALIC),
        LineRole::Body | LineRole::Separator => Style::default().fg(COLOR_TEXT_PRIMARY),
        LineRole::Notice => Style::default().fg(COLOR_TEXT_SECONDARY),
        LineRole::Error => Style::default().fg(COLOR_ERROR),
    };
    if is_highlighted {
        style = style.bg(COLOR_HIGHLIGHT_BG);
    }

    let marker = if is_selected { "▌ " } else { "  " };
    let mut text = truncate_to_width(&line.text, width);
    if is_highlighted {
        let pad = width.saturating_sub(text.width());
        text.push_str(&" ".repeat(pad));
    }
    Line::from(vec![
        Span::styled(marker, Style::default().fg(COLOR_ACCENT)),
        Span::styled(text, style),
    ])
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
