/// TikTok scraper client.
///
/// Talks to the RapidAPI TikTok scraper: resolves usernames, fetches profile
/// statistics and cursor-paginated post lists. Rate-limited calls are retried
/// with exponential backoff; every other failure is returned immediately.
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::post::{first_string, first_u64, Post, Profile};

pub const DEFAULT_BASE_URL: &str = "https://tiktok-scraper7.p.rapidapi.com";
pub const DEFAULT_HOST: &str = "tiktok-scraper7.p.rapidapi.com";

/// Retries after the first rate-limited attempt.
pub const MAX_RETRIES: u32 = 3;

/// Largest page the provider serves.
const MAX_PAGE_SIZE: usize = 35;

/// Bound on cursor pages followed for one profile.
const MAX_CURSOR_PAGES: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("Rate limited by TikTok provider after {attempts} attempts, please try again later")]
    RateLimited { attempts: u32 },

    #[error("TikTok profile not found: {0}")]
    NotFound(String),

    #[error("Invalid TikTok profile: {0}")]
    InvalidInput(String),

    #[error("TikTok provider error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ScraperError>;

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub host: String,
    pub api_key: String,
    /// First backoff delay; doubles on every retry.
    pub retry_base: Duration,
    pub timeout: Duration,
}

impl ScraperConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
            api_key: api_key.into(),
            retry_base: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One page of a creator's posts.
#[derive(Debug, Clone)]
pub struct PostPage {
    pub videos: Vec<Post>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

pub struct ScraperClient {
    http: reqwest::Client,
    config: ScraperConfig,
}

impl ScraperClient {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// Resolves a username, `@handle` or profile URL to the provider profile,
    /// which carries the numeric creator id.
    pub async fn resolve_username(&self, input: &str) -> Result<Profile> {
        let username = parse_username_input(input)?;
        self.get_user_info(&username).await
    }

    pub async fn get_user_info(&self, username: &str) -> Result<Profile> {
        let body = self
            .get_json("/user/info", &[("unique_id", username.to_string())])
            .await
            .map_err(|e| match e {
                ScraperError::Upstream { status: 404, .. } => {
                    ScraperError::NotFound(username.to_string())
                }
                other => other,
            })?;

        let data = body
            .get("data")
            .filter(|d| !d.is_null())
            .ok_or_else(|| ScraperError::NotFound(username.to_string()))?;
        profile_from_json(username, data)
    }

    pub async fn get_user_posts(
        &self,
        creator_id: &str,
        username: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<PostPage> {
        let mut query = vec![
            ("user_id", creator_id.to_string()),
            ("count", count.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let body = self.get_json("/user/posts", &query).await?;
        Ok(post_page_from_json(username, &body))
    }

    /// Follows provider cursors until `limit` posts are collected or the
    /// provider reports no more pages.
    pub async fn get_recent_posts(
        &self,
        creator_id: &str,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CURSOR_PAGES {
            if posts.len() >= limit {
                break;
            }
            let page = self
                .get_user_posts(creator_id, username, limit - posts.len(), cursor.as_deref())
                .await?;

            let fetched = page.videos.len();
            posts.extend(page.videos);
            tracing::debug!(username, fetched, total = posts.len(), "fetched posts page");

            match page.cursor {
                Some(next) if page.has_more && fetched > 0 && cursor.as_deref() != Some(&next) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        posts.truncate(limit);
        Ok(posts)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let url = url.as_str();
        let (http, config) = (&self.http, &self.config);

        with_rate_limit_retry(MAX_RETRIES, config.retry_base, move || async move {
            let resp = http
                .get(url)
                .header("X-RapidAPI-Key", &config.api_key)
                .header("X-RapidAPI-Host", &config.host)
                .query(query)
                .send()
                .await?;

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ScraperError::RateLimited { attempts: 1 });
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ScraperError::Upstream {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: Value = resp
                .json()
                .await
                .map_err(|e| ScraperError::Decode(e.to_string()))?;
            check_provider_code(&body)?;
            Ok(body)
        })
        .await
    }
}

/// Runs `op`, retrying up to `max_retries` times while it reports a rate
/// limit. Delays are `base`, `2*base`, `4*base`, ...
pub async fn with_rate_limit_retry<T, F, Fut>(max_retries: u32, base: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(ScraperError::RateLimited { .. }) if attempt < max_retries => {
                let delay = base * 2u32.pow(attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited by provider, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(ScraperError::RateLimited { .. }) => {
                return Err(ScraperError::RateLimited {
                    attempts: attempt + 1,
                });
            }
            other => return other,
        }
    }
}

/// Extracts a TikTok username from `name`, `@name` or a profile URL.
pub fn parse_username_input(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ScraperError::InvalidInput("empty profile identifier".to_string()));
    }

    let candidate = if input.contains("tiktok.com") || input.contains("://") {
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| ScraperError::InvalidInput(format!("{}: {}", input, e)))?;
        url.path_segments()
            .and_then(|mut segments| segments.find(|s| s.starts_with('@')))
            .map(|s| s.trim_start_matches('@').to_string())
            .ok_or_else(|| {
                ScraperError::InvalidInput(format!("no @username in profile URL: {}", input))
            })?
    } else {
        input.trim_start_matches('@').to_string()
    };

    let valid_len = (2..=24).contains(&candidate.chars().count());
    let valid_chars = candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid_len || !valid_chars {
        return Err(ScraperError::InvalidInput(format!(
            "'{}' is not a valid TikTok username",
            candidate
        )));
    }

    Ok(candidate.to_ascii_lowercase())
}

// ============================================================================
// Response decoding
// ============================================================================

/// The provider reports some failures with HTTP 200 and a non-zero `code`.
fn check_provider_code(body: &Value) -> Result<()> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let message = first_string(body, &["msg", "message"]).unwrap_or_default();
    let lowered = message.to_lowercase();
    if lowered.contains("rate") || lowered.contains("too many") {
        return Err(ScraperError::RateLimited { attempts: 1 });
    }
    if lowered.contains("not exist") || lowered.contains("not found") {
        return Err(ScraperError::Upstream {
            status: 404,
            message,
        });
    }
    Err(ScraperError::Upstream {
        status: 200,
        message,
    })
}

fn profile_from_json(requested: &str, data: &Value) -> Result<Profile> {
    let user = data
        .get("user")
        .ok_or_else(|| ScraperError::Decode("missing data.user".to_string()))?;
    let stats = data.get("stats").unwrap_or(&Value::Null);

    let id = first_string(user, &["id", "uid", "user_id"])
        .ok_or_else(|| ScraperError::Decode("missing user id".to_string()))?;
    let username = first_string(user, &["uniqueId", "unique_id"])
        .map(|u| u.to_ascii_lowercase())
        .unwrap_or_else(|| requested.to_string());

    Ok(Profile {
        id,
        username,
        nickname: first_string(user, &["nickname"]),
        avatar_url: first_string(user, &["avatarMedium", "avatarThumb", "avatar"]),
        signature: first_string(user, &["signature"]),
        verified: user.get("verified").and_then(Value::as_bool).unwrap_or(false),
        followers: first_u64(stats, &["followerCount", "follower_count"]),
        following: first_u64(stats, &["followingCount", "following_count"]),
        total_likes: first_u64(stats, &["heartCount", "heart", "heart_count"]),
        video_count: first_u64(stats, &["videoCount", "video_count"]),
        updated_at: Utc::now(),
    })
}

fn post_page_from_json(username: &str, body: &Value) -> PostPage {
    let data = body.get("data").unwrap_or(&Value::Null);

    let videos = data
        .get("videos")
        .and_then(Value::as_array)
        .map(|videos| {
            videos
                .iter()
                .filter_map(|raw| Post::from_provider(username, raw))
                .collect()
        })
        .unwrap_or_default();

    let has_more = data
        .get("hasMore")
        .or_else(|| data.get("has_more"))
        .and_then(|v| v.as_bool().or_else(|| v.as_i64().map(|n| n != 0)))
        .unwrap_or(false);

    PostPage {
        videos,
        cursor: first_string(data, &["cursor"]),
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_plain_and_at_usernames() {
        assert_eq!(parse_username_input("charlidamelio").unwrap(), "charlidamelio");
        assert_eq!(parse_username_input(" @Khaby.Lame ").unwrap(), "khaby.lame");
    }

    #[test]
    fn test_parse_profile_urls() {
        assert_eq!(
            parse_username_input("https://www.tiktok.com/@some_creator?lang=en").unwrap(),
            "some_creator"
        );
        assert_eq!(
            parse_username_input("tiktok.com/@creator/video/7300000000").unwrap(),
            "creator"
        );
        assert!(parse_username_input("https://www.tiktok.com/foryou").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_username_input("").is_err());
        assert!(parse_username_input("@").is_err());
        assert!(parse_username_input("has space").is_err());
        assert!(parse_username_input("a").is_err());
        assert!(parse_username_input(&"x".repeat(25)).is_err());
    }

    #[test]
    fn test_provider_codes() {
        assert!(check_provider_code(&json!({"code": 0, "data": {}})).is_ok());
        assert!(check_provider_code(&json!({"data": {}})).is_ok());
        assert!(matches!(
            check_provider_code(&json!({"code": -1, "msg": "Rate limit exceeded"})),
            Err(ScraperError::RateLimited { .. })
        ));
        assert!(matches!(
            check_provider_code(&json!({"code": -1, "msg": "User does not exist"})),
            Err(ScraperError::Upstream { status: 404, .. })
        ));
        assert!(matches!(
            check_provider_code(&json!({"code": -1, "msg": "boom"})),
            Err(ScraperError::Upstream { status: 200, .. })
        ));
    }

    #[test]
    fn test_profile_from_json() {
        let data = json!({
            "user": {
                "id": "6700000000000000000",
                "uniqueId": "Creator",
                "nickname": "The Creator",
                "avatarThumb": "https://cdn.example/avatar.jpg",
                "verified": true
            },
            "stats": {
                "followerCount": 1200,
                "followingCount": 30,
                "heartCount": 50000,
                "videoCount": 42
            }
        });
        let profile = profile_from_json("creator", &data).unwrap();
        assert_eq!(profile.id, "6700000000000000000");
        assert_eq!(profile.username, "creator");
        assert!(profile.verified);
        assert_eq!(profile.followers, 1200);
        assert_eq!(profile.total_likes, 50000);
        assert_eq!(profile.video_count, 42);
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn.example/avatar.jpg"));
    }

    #[test]
    fn test_post_page_from_json() {
        let body = json!({
            "code": 0,
            "data": {
                "videos": [
                    {"video_id": "1", "create_time": 1704067200, "play_count": 10},
                    {"play_count": 5},
                    {"aweme_id": "2", "create_time": 1704153600, "play_count": 20}
                ],
                "cursor": 1704153600000i64,
                "hasMore": true
            }
        });
        let page = post_page_from_json("creator", &body);
        assert_eq!(page.videos.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("1704153600000"));
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_rate_limits() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_rate_limit_retry(MAX_RETRIES, Duration::from_millis(1), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ScraperError::RateLimited { attempts: 1 })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> =
            with_rate_limit_retry(MAX_RETRIES, Duration::from_millis(1), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScraperError::RateLimited { attempts: 1 })
            })
            .await;

        assert!(matches!(result, Err(ScraperError::RateLimited { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> =
            with_rate_limit_retry(MAX_RETRIES, Duration::from_millis(1), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScraperError::NotFound("ghost".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ScraperError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_double() {
        let started = tokio::time::Instant::now();
        let result: Result<()> = with_rate_limit_retry(MAX_RETRIES, Duration::from_secs(2), || async {
            Err(ScraperError::RateLimited { attempts: 1 })
        })
        .await;

        assert!(result.is_err());
        // 2s + 4s + 8s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(15), "{:?}", elapsed);
    }
}
