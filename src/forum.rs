use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api/";

/// Supplies the bearer token of the signed-in account, if any.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("forum client user agent required");
        }
        let base = config
            .base_url
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .context("forum: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            token_provider: None,
        })
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        self.get_json("categories", &[])
    }

    pub fn category_posts(&self, category_id: i64, page: u32) -> Result<PostPage> {
        let mut params = Vec::new();
        if page > 1 {
            params.push(("page".to_string(), page.to_string()));
        }
        self.get_json(&format!("categories/{category_id}/posts"), &params)
    }

    pub fn post(&self, post_id: i64) -> Result<Post> {
        self.get_json(&format!("posts/{post_id}"), &[])
    }

    pub fn create_post(&self, draft: &PostDraft) -> Result<Post> {
        draft.validate()?;
        let resp = self.request(Method::POST, "posts", &[], Some(json_body(draft)?))?;
        resp.json().context("forum: decode created post")
    }

    pub fn edit_post(&self, post_id: i64, draft: &PostDraft) -> Result<Post> {
        draft.validate()?;
        let resp = self.request(
            Method::PUT,
            &format!("posts/{post_id}"),
            &[],
            Some(json_body(draft)?),
        )?;
        resp.json().context("forum: decode edited post")
    }

    pub fn comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        self.get_json(&format!("posts/{post_id}/comments"), &[])
    }

    pub fn reply(&self, post_id: i64, parent_comment_id: Option<i64>, content: &str) -> Result<Comment> {
        if content.trim().is_empty() {
            bail!("forum: reply content is required");
        }
        let body = NewComment {
            content: content.to_string(),
            parent_comment_id,
        };
        let resp = self.request(
            Method::POST,
            &format!("posts/{post_id}/comments"),
            &[],
            Some(json_body(&body)?),
        )?;
        resp.json().context("forum: decode created comment")
    }

    pub fn vote(&self, target: VoteTarget, value: i32) -> Result<VoteTally> {
        if !(-1..=1).contains(&value) {
            bail!("forum: vote value must be -1, 0, or 1");
        }
        let path = match target {
            VoteTarget::Post(id) => format!("posts/{id}/vote"),
            VoteTarget::Comment(id) => format!("comments/{id}/vote"),
        };
        let body = serde_json::json!({ "value": value });
        let resp = self.request(Method::POST, &path, &[], Some(body))?;
        resp.json().context("forum: decode vote tally")
    }

    pub fn set_bookmark(&self, post_id: i64, bookmarked: bool) -> Result<()> {
        let method = if bookmarked { Method::PUT } else { Method::DELETE };
        self.request(method, &format!("posts/{post_id}/bookmark"), &[], None)?;
        Ok(())
    }

    pub fn set_follow(&self, user_id: i64, following: bool) -> Result<()> {
        let method = if following { Method::PUT } else { Method::DELETE };
        self.request(method, &format!("users/{user_id}/follow"), &[], None)?;
        Ok(())
    }

    pub fn set_block(&self, user_id: i64, blocked: bool) -> Result<()> {
        let method = if blocked { Method::PUT } else { Method::DELETE };
        self.request(method, &format!("users/{user_id}/block"), &[], None)?;
        Ok(())
    }

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        self.get_json("notifications", &[])
    }

    pub fn mark_notification_read(&self, notification_id: i64) -> Result<()> {
        self.request(
            Method::POST,
            &format!("notifications/{notification_id}/read"),
            &[],
            None,
        )?;
        Ok(())
    }

    pub fn profile(&self, user_id: i64) -> Result<Profile> {
        self.get_json(&format!("users/{user_id}"), &[])
    }

    pub fn me(&self) -> Result<Profile> {
        self.get_json("me", &[])
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let resp = self.request(Method::PUT, "me", &[], Some(json_body(update)?))?;
        resp.json().context("forum: decode updated profile")
    }

    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let username = username.trim();
        if username.is_empty() {
            bail!("forum: username is required");
        }
        if password.is_empty() {
            bail!("forum: password is required");
        }
        let body = serde_json::json!({ "username": username, "password": password });
        let resp = self.request(Method::POST, "auth/login", &[], Some(body))?;
        resp.json().context("forum: decode login response")
    }

    /// Web URL of a post, used when opening it in a browser.
    pub fn post_web_url(&self, post_id: i64) -> Url {
        let mut web = self.base_url.clone();
        web.set_path(&format!("/posts/{post_id}"));
        web.set_query(None);
        web
    }

    fn get_json<T>(&self, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(Method::GET, path, params, None)?;
        resp.json()
            .with_context(|| format!("forum: decode response for {path}"))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            {
                let mut pairs = url.query_pairs_mut();
                for (k, v) in params {
                    pairs.append_pair(k, v);
                }
            }
        }

        debug!(%method, %url, "forum request");
        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token_provider.as_ref().and_then(|p| p.token()) {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 => Err(anyhow!("forum: unauthorized")),
                403 => Err(anyhow!("forum: forbidden")),
                404 => Err(anyhow!("forum: not found")),
                429 => Err(anyhow!("forum: rate limited: {}", body)),
                _ => Err(anyhow!("forum: api error {}: {}", status, body)),
            }
        }
    }
}

fn normalize_base(base: &str) -> Result<Url> {
    let mut url = Url::parse(base.trim()).with_context(|| format!("forum: parse base url {base:?}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn json_body<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("forum: encode request body")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub post_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    /// Sanitized HTML.
    #[serde(default)]
    pub content: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub my_vote: i32,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub bookmarked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub items: Vec<Post>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub total_pages: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub category_id: i64,
    pub title: String,
    pub content: String,
}

impl PostDraft {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            bail!("forum: post title is required");
        }
        if self.content.trim().is_empty() {
            bail!("forum: post content is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    #[serde(default)]
    pub parent_comment_id: Option<i64>,
    /// Sanitized HTML.
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub commenter_id: i64,
    #[serde(default)]
    pub commenter: Option<Author>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub my_vote: i32,
}

impl Comment {
    pub fn commenter_name(&self) -> String {
        self.commenter
            .as_ref()
            .map(|author| author.username.clone())
            .unwrap_or_else(|| format!("user#{}", self.commenter_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewComment {
    content: String,
    parent_comment_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTarget {
    Post(i64),
    Comment(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub score: i64,
    #[serde(default)]
    pub my_vote: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub comment_id: Option<i64>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Profile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use tiny_http::{Header, Response as HttpResponse, Server};

    struct Captured {
        method: String,
        url: String,
        authorization: Option<String>,
        body: String,
    }

    fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<Captured>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut payload = String::new();
            request.as_reader().read_to_string(&mut payload).unwrap();
            let authorization = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let captured = Captured {
                method: request.method().to_string(),
                url: request.url().to_string(),
                authorization,
                body: payload,
            };
            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let _ = request.respond(
                HttpResponse::from_string(body)
                    .with_status_code(status)
                    .with_header(header),
            );
            captured
        });
        (format!("http://{addr}/api"), handle)
    }

    fn client(base: String) -> Client {
        Client::new(ClientConfig {
            user_agent: "forum-tui-test".into(),
            base_url: Some(base),
            http_client: None,
        })
        .unwrap()
    }

    struct StaticToken;

    impl TokenProvider for StaticToken {
        fn token(&self) -> Option<String> {
            Some("secret".into())
        }
    }

    #[test]
    fn comments_decode_camel_case_payload() {
        let (base, handle) = serve_once(
            200,
            r#"[{"id":7,"postId":3,"parentCommentId":null,"content":"<p>hi</p>","createdAt":"2024-05-01T10:00:00Z","commenterId":9,"commenter":{"id":9,"username":"ada"}}]"#,
        );
        let comments = client(base).comments(3).unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "GET");
        assert_eq!(captured.url, "/api/posts/3/comments");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].parent_comment_id, None);
        assert_eq!(comments[0].commenter_name(), "ada");
    }

    #[test]
    fn reply_sends_bearer_token_and_parent() {
        let (base, handle) = serve_once(
            201,
            r#"{"id":8,"postId":3,"parentCommentId":7,"content":"<p>yes</p>","createdAt":"2024-05-01T10:05:00Z","commenterId":1}"#,
        );
        let client = client(base).with_token_provider(Arc::new(StaticToken));
        let comment = client.reply(3, Some(7), "<p>yes</p>").unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.authorization.as_deref(), Some("Bearer secret"));
        let sent: Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(sent["parentCommentId"], 7);
        assert_eq!(comment.id, 8);
    }

    #[test]
    fn category_posts_omits_first_page_param() {
        let (base, handle) = serve_once(200, r#"{"items":[]}"#);
        let page = client(base).category_posts(4, 1).unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.url, "/api/categories/4/posts");
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn not_found_maps_to_error() {
        let (base, handle) = serve_once(404, "{}");
        let err = client(base).post(99).unwrap_err();
        handle.join().unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn vote_rejects_out_of_range_value() {
        let client = client("http://127.0.0.1:9/api".into());
        assert!(client.vote(VoteTarget::Post(1), 2).is_err());
    }

    #[test]
    fn post_web_url_drops_api_prefix() {
        let client = client("http://forum.test/api".into());
        assert_eq!(
            client.post_web_url(5).as_str(),
            "http://forum.test/posts/5"
        );
    }

    #[test]
    fn create_post_validates_before_sending() {
        let client = client("http://127.0.0.1:9/api".into());
        let draft = PostDraft {
            category_id: 1,
            title: "  ".into(),
            content: "<p>body</p>".into(),
        };
        let err = client.create_post(&draft).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn update_profile_sends_only_changed_fields() {
        let (base, handle) = serve_once(
            200,
            r#"{"id":2,"username":"ada","displayName":"Ada L","bio":""}"#,
        );
        let update = ProfileUpdate {
            display_name: Some("Ada L".into()),
            ..ProfileUpdate::default()
        };
        let profile = client(base).update_profile(&update).unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.url, "/api/me");
        assert_eq!(captured.body, r#"{"displayName":"Ada L"}"#);
        assert_eq!(profile.display_name, "Ada L");
    }

    #[test]
    fn login_decodes_token_and_user() {
        let (base, handle) = serve_once(
            200,
            r#"{"token":"t0k","expiresAt":"2030-01-01T00:00:00Z","user":{"id":4,"username":"bob"}}"#,
        );
        let response = client(base).login(" bob ", "pw").unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.url, "/api/auth/login");
        let sent: Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(sent["username"], "bob");
        assert_eq!(response.token, "t0k");
        assert_eq!(response.user.username, "bob");
        assert!(response.expires_at.is_some());
    }

    #[test]
    fn edit_post_puts_draft() {
        let (base, handle) = serve_once(
            200,
            r#"{"id":5,"categoryId":2,"title":"Edited","content":"<p>new</p>","author":{"id":1,"username":"ada"},"createdAt":"2024-05-01T12:00:00Z"}"#,
        );
        let draft = PostDraft {
            category_id: 2,
            title: "Edited".into(),
            content: "<p>new</p>".into(),
        };
        let post = client(base).edit_post(5, &draft).unwrap();
        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.url, "/api/posts/5");
        let sent: Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(sent["categoryId"], 2);
        assert_eq!(post.title, "Edited");
    }

    #[test]
    fn profile_reads_user_and_self() {
        let (base, handle) = serve_once(200, r#"{"id":9,"username":"cy","following":true}"#);
        let profile = client(base).profile(9).unwrap();
        assert_eq!(handle.join().unwrap().url, "/api/users/9");
        assert!(profile.following);
        assert!(profile.display_name.is_empty());

        let (base, handle) = serve_once(200, r#"{"id":1,"username":"me"}"#);
        let me = client(base).me().unwrap();
        assert_eq!(handle.join().unwrap().url, "/api/me");
        assert_eq!(me.username, "me");
    }
}
