use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use crate::forum::{self, TokenProvider};
use crate::storage::{self, Account, Token};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("account not found")]
    AccountNotFound,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub account: Account,
    pub token: Token,
}

pub struct Manager {
    store: Arc<storage::Store>,
    active: RwLock<Option<Session>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>) -> Self {
        Self {
            store,
            active: RwLock::new(None),
        }
    }

    /// Resumes the most recently used account that still has a valid token.
    pub fn load_existing(&self) -> Result<Option<Session>> {
        let now = Utc::now();
        for account in self.store.list_accounts()? {
            match self.store.get_token(account.id)? {
                Some(token) if !token.is_expired(now) => {
                    let session = Session { account, token };
                    *self.active.write() = Some(session.clone());
                    return Ok(Some(session));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    pub fn login(&self, client: &forum::Client, username: &str, password: &str) -> Result<Session> {
        let response = client.login(username, password)?;
        self.complete_login(response)
    }

    pub fn complete_login(&self, response: forum::LoginResponse) -> Result<Session> {
        let user = response.user;
        let now = Utc::now();
        let account_id = self
            .store
            .upsert_account(Account {
                id: 0,
                user_id: user.id,
                username: user.username.clone(),
                display_name: user.display_name.clone(),
                created_at: now,
                updated_at: now,
            })
            .context("session: store account")?;
        let token = Token {
            account_id,
            access_token: response.token,
            expires_at: response.expires_at,
        };
        self.store
            .upsert_token(token.clone())
            .context("session: store token")?;
        let account = self
            .store
            .get_account_by_id(account_id)?
            .ok_or(SessionError::AccountNotFound)?;
        info!(username = %account.username, "signed in");
        let session = Session { account, token };
        *self.active.write() = Some(session.clone());
        Ok(session)
    }

    /// Forgets the active account and its token.
    pub fn logout(&self) -> Result<()> {
        let Some(session) = self.active.write().take() else {
            return Ok(());
        };
        self.store.delete_account(session.account.id)?;
        info!(username = %session.account.username, "signed out");
        Ok(())
    }
}

impl TokenProvider for Manager {
    fn token(&self) -> Option<String> {
        let active = self.active.read();
        let session = active.as_ref()?;
        if session.token.is_expired(Utc::now()) {
            return None;
        }
        Some(session.token.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> Manager {
        let store = storage::Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        Manager::new(Arc::new(store))
    }

    fn login_response(user_id: i64, token: &str, expires_in: Option<i64>) -> forum::LoginResponse {
        forum::LoginResponse {
            token: token.into(),
            expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user: forum::Profile {
                id: user_id,
                username: format!("user{user_id}"),
                display_name: String::new(),
                bio: String::new(),
                avatar_url: None,
                following: false,
                blocked: false,
            },
        }
    }

    #[test]
    fn login_activates_and_provides_token() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        assert_eq!(manager.token(), None);
        manager
            .complete_login(login_response(4, "tok", Some(3600)))
            .unwrap();
        assert_eq!(manager.token().as_deref(), Some("tok"));
        assert!(manager.active.read().is_some());
    }

    #[test]
    fn resume_skips_expired_tokens() {
        let dir = tempdir().unwrap();
        {
            let manager = manager(&dir);
            manager
                .complete_login(login_response(1, "old", Some(-60)))
                .unwrap();
        }
        let manager = manager(&dir);
        assert!(manager.load_existing().unwrap().is_none());
        assert_eq!(manager.token(), None);
    }

    #[test]
    fn logout_forgets_account() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager
            .complete_login(login_response(2, "tok", None))
            .unwrap();
        manager.logout().unwrap();
        assert_eq!(manager.token(), None);
        assert!(manager.store.list_accounts().unwrap().is_empty());
    }
}
