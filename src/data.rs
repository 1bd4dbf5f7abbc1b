use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};

use crate::forum::{self, VoteTarget};

pub trait CategoryService: Send + Sync {
    fn list_categories(&self) -> Result<Vec<forum::Category>>;
}

pub trait FeedService: Send + Sync {
    fn load_category(&self, category_id: i64, page: u32) -> Result<forum::PostPage>;
    fn load_post(&self, post_id: i64) -> Result<forum::Post>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, post_id: i64) -> Result<Vec<forum::Comment>>;
}

pub trait InteractionService: Send + Sync {
    fn vote(&self, target: VoteTarget, value: i32) -> Result<forum::VoteTally>;
    fn set_bookmark(&self, post_id: i64, bookmarked: bool) -> Result<()>;
    fn set_follow(&self, user_id: i64, following: bool) -> Result<()>;
    fn set_block(&self, user_id: i64, blocked: bool) -> Result<()>;
    fn reply(&self, post_id: i64, parent_comment_id: Option<i64>, content: &str)
        -> Result<forum::Comment>;
}

pub trait NotificationService: Send + Sync {
    fn list_notifications(&self) -> Result<Vec<forum::Notification>>;
    fn mark_read(&self, notification_id: i64) -> Result<()>;
}

pub struct ForumCategoryService {
    client: Arc<forum::Client>,
}

impl ForumCategoryService {
    pub fn new(client: Arc<forum::Client>) -> Self {
        Self { client }
    }
}

impl CategoryService for ForumCategoryService {
    fn list_categories(&self) -> Result<Vec<forum::Category>> {
        self.client.categories().context("fetch categories")
    }
}

pub struct ForumFeedService {
    client: Arc<forum::Client>,
}

impl ForumFeedService {
    pub fn new(client: Arc<forum::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ForumFeedService {
    fn load_category(&self, category_id: i64, page: u32) -> Result<forum::PostPage> {
        self.client
            .category_posts(category_id, page)
            .context("fetch category posts")
    }

    fn load_post(&self, post_id: i64) -> Result<forum::Post> {
        self.client.post(post_id).context("fetch post")
    }
}

pub struct ForumCommentService {
    client: Arc<forum::Client>,
}

impl ForumCommentService {
    pub fn new(client: Arc<forum::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ForumCommentService {
    fn load_comments(&self, post_id: i64) -> Result<Vec<forum::Comment>> {
        self.client.comments(post_id).context("fetch comments")
    }
}

pub struct ForumInteractionService {
    client: Arc<forum::Client>,
}

impl ForumInteractionService {
    pub fn new(client: Arc<forum::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ForumInteractionService {
    fn vote(&self, target: VoteTarget, value: i32) -> Result<forum::VoteTally> {
        self.client.vote(target, value)
    }

    fn set_bookmark(&self, post_id: i64, bookmarked: bool) -> Result<()> {
        self.client.set_bookmark(post_id, bookmarked)
    }

    fn set_follow(&self, user_id: i64, following: bool) -> Result<()> {
        self.client.set_follow(user_id, following)
    }

    fn set_block(&self, user_id: i64, blocked: bool) -> Result<()> {
        self.client.set_block(user_id, blocked)
    }

    fn reply(
        &self,
        post_id: i64,
        parent_comment_id: Option<i64>,
        content: &str,
    ) -> Result<forum::Comment> {
        self.client.reply(post_id, parent_comment_id, content)
    }
}

pub struct ForumNotificationService {
    client: Arc<forum::Client>,
}

impl ForumNotificationService {
    pub fn new(client: Arc<forum::Client>) -> Self {
        Self { client }
    }
}

impl NotificationService for ForumNotificationService {
    fn list_notifications(&self) -> Result<Vec<forum::Notification>> {
        self.client.notifications().context("fetch notifications")
    }

    fn mark_read(&self, notification_id: i64) -> Result<()> {
        self.client.mark_notification_read(notification_id)
    }
}

/// Offline data used when no backend is reachable and by the demo mode.
#[derive(Default)]
pub struct MockForum;

impl CategoryService for MockForum {
    fn list_categories(&self) -> Result<Vec<forum::Category>> {
        Ok(vec![
            forum::Category {
                id: 1,
                name: "General".into(),
                description: "Anything goes.".into(),
                post_count: 1,
            },
            forum::Category {
                id: 2,
                name: "Help".into(),
                description: "Questions and answers.".into(),
                post_count: 0,
            },
        ])
    }
}

impl FeedService for MockForum {
    fn load_category(&self, category_id: i64, _page: u32) -> Result<forum::PostPage> {
        let items = if category_id == 1 {
            vec![mock_post()]
        } else {
            Vec::new()
        };
        Ok(forum::PostPage {
            items,
            page: 1,
            total_pages: 1,
        })
    }

    fn load_post(&self, _post_id: i64) -> Result<forum::Post> {
        Ok(mock_post())
    }
}

impl CommentService for MockForum {
    fn load_comments(&self, post_id: i64) -> Result<Vec<forum::Comment>> {
        Ok(mock_comments(post_id, 40))
    }
}

impl InteractionService for MockForum {
    fn vote(&self, _target: VoteTarget, value: i32) -> Result<forum::VoteTally> {
        Ok(forum::VoteTally {
            score: i64::from(value),
            my_vote: value,
        })
    }

    fn set_bookmark(&self, _post_id: i64, _bookmarked: bool) -> Result<()> {
        Ok(())
    }

    fn set_follow(&self, _user_id: i64, _following: bool) -> Result<()> {
        Ok(())
    }

    fn set_block(&self, _user_id: i64, _blocked: bool) -> Result<()> {
        Ok(())
    }

    fn reply(
        &self,
        post_id: i64,
        parent_comment_id: Option<i64>,
        content: &str,
    ) -> Result<forum::Comment> {
        Ok(forum::Comment {
            id: 10_000,
            post_id,
            parent_comment_id,
            content: content.to_string(),
            created_at: Utc::now(),
            commenter_id: 0,
            commenter: None,
            score: 0,
            my_vote: 0,
        })
    }
}

impl NotificationService for MockForum {
    fn list_notifications(&self) -> Result<Vec<forum::Notification>> {
        Ok(Vec::new())
    }

    fn mark_read(&self, _notification_id: i64) -> Result<()> {
        Ok(())
    }
}

fn mock_post() -> forum::Post {
    forum::Post {
        id: 1,
        category_id: 1,
        title: "Welcome to forum-tui".into(),
        content: "<p>Browse threads with <b>j/k</b>, page with <b>n/p</b> and press <b>g</b> on a reply to jump to the quoted comment.</p>".into(),
        author: forum::Author {
            id: 0,
            username: "forum-tui".into(),
            avatar_url: None,
        },
        created_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now),
        updated_at: None,
        score: 1,
        my_vote: 0,
        comment_count: 40,
        bookmarked: false,
    }
}

/// Builds `count` comments where every third one quotes a much earlier one,
/// so quote jumps cross page boundaries.
pub fn mock_comments(post_id: i64, count: i64) -> Vec<forum::Comment> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);
    (1..=count)
        .map(|n| {
            let parent = if n % 3 == 0 && n > 3 { Some(n / 3) } else { None };
            forum::Comment {
                id: n,
                post_id,
                parent_comment_id: parent,
                content: format!("<p>Comment number {n}.</p>"),
                created_at: base + chrono::Duration::minutes(n),
                commenter_id: n % 5,
                commenter: Some(forum::Author {
                    id: n % 5,
                    username: format!("member{}", n % 5),
                    avatar_url: None,
                }),
                score: 0,
                my_vote: 0,
            }
        })
        .collect()
}
