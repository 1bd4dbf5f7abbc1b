use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cache::CommentCache;
use crate::config;
use crate::data::{
    self, CategoryService, CommentService, FeedService, InteractionService, NotificationService,
};
use crate::forum;
use crate::jump::{NavigationController, PostRoute};
use crate::logging;
use crate::session;
use crate::storage;
use crate::transient::{SessionStore, TransientStore};
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Browse built-in sample data instead of a server.
    pub offline: bool,
    /// Thread page to open on start.
    pub open: Option<PostRoute>,
}

struct Services {
    categories: Arc<dyn CategoryService>,
    feed: Arc<dyn FeedService>,
    comments: Arc<dyn CommentService + Send + Sync>,
    interactions: Arc<dyn InteractionService>,
    notifications: Arc<dyn NotificationService>,
}

impl Services {
    fn offline() -> Self {
        let mock = Arc::new(data::MockForum);
        Self {
            categories: mock.clone(),
            feed: mock.clone(),
            comments: mock.clone(),
            interactions: mock.clone(),
            notifications: mock,
        }
    }

    fn remote(client: Arc<forum::Client>) -> Self {
        Self {
            categories: Arc::new(data::ForumCategoryService::new(client.clone())),
            feed: Arc::new(data::ForumFeedService::new(client.clone())),
            comments: Arc::new(data::ForumCommentService::new(client.clone())),
            interactions: Arc::new(data::ForumInteractionService::new(client.clone())),
            notifications: Arc::new(data::ForumNotificationService::new(client)),
        }
    }
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let log_path = logging::init(None).context("init logging")?;
    info!(version = crate::VERSION, log = ?log_path, "starting forum-tui");

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let manager = Arc::new(session::Manager::new(store.clone()));
    let signed_in = match manager.load_existing() {
        Ok(session) => session.map(|session| session.account.username),
        Err(err) => {
            warn!(error = %err, "could not resume session");
            None
        }
    };

    let (services, web, status) = if options.offline {
        (
            Services::offline(),
            None,
            "Offline demo: browsing sample data. Press q to quit.".to_string(),
        )
    } else {
        match build_client(&cfg, manager.clone()) {
            Ok(client) => {
                let client = Arc::new(client);
                let who = signed_in
                    .as_deref()
                    .map(|name| format!("Signed in as {name}"))
                    .unwrap_or_else(|| "Browsing anonymously".to_string());
                let status = format!("{who} · {}", client.base_url());
                (Services::remote(client.clone()), Some(client), status)
            }
            Err(err) => {
                warn!(error = %err, "forum client unavailable, using sample data");
                let config_path = friendly_path(config::default_path().as_ref());
                (
                    Services::offline(),
                    None,
                    format!("Could not set up the forum client ({err}). Check api.base_url in {config_path}."),
                )
            }
        }
    };

    let transient: Arc<dyn TransientStore> = Arc::new(SessionStore::new());
    let timing = cfg.jump.timing();
    let controller = NavigationController::new(cfg.ui.page_size(), timing, transient.clone());
    let comments = CommentCache::new(services.comments, cfg.comments.policy());

    let mut model = ui::Model::new(ui::Options {
        status_message: status,
        categories: services.categories,
        feed: services.feed,
        comments,
        interactions: services.interactions,
        notifications: services.notifications,
        controller,
        transient,
        timing,
        web,
        initial_route: options.open,
    });
    model.run()?;

    info!("forum-tui exited");
    Ok(())
}

/// Signs in and stores the issued token for later runs.
pub fn login(username: &str, password: &str) -> Result<String> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let manager = Arc::new(session::Manager::new(store));
    let client = build_client(&cfg, manager.clone())?;
    let session = manager.login(&client, username, password)?;
    Ok(session.account.username)
}

/// Forgets the stored session. Returns false when nobody was signed in.
pub fn logout() -> Result<bool> {
    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let manager = session::Manager::new(store);
    if manager.load_existing()?.is_none() {
        return Ok(false);
    }
    manager.logout()?;
    Ok(true)
}

fn build_client(cfg: &config::Config, tokens: Arc<session::Manager>) -> Result<forum::Client> {
    let user_agent = if cfg.api.user_agent.trim().is_empty() {
        format!("forum-tui/{}", crate::VERSION)
    } else {
        cfg.api.user_agent.clone()
    };
    let client = forum::Client::new(forum::ClientConfig {
        user_agent,
        base_url: Some(cfg.api.base_url.clone()),
        http_client: None,
    })
    .context("create forum client")?;
    Ok(client.with_token_provider(tokens))
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/forum-tui/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_falls_back_to_default() {
        assert_eq!(friendly_path(None), "~/.config/forum-tui/config.yaml");
    }

    #[test]
    fn friendly_path_abbreviates_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".config").join("forum-tui").join("config.yaml");
        assert_eq!(
            friendly_path(Some(&path)),
            "~/.config/forum-tui/config.yaml"
        );
    }
}
