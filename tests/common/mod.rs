//! Shared helpers: a local fake of the TikTok provider and an API server
//! bound to an ephemeral port.
#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use whysoviral::refresh_log::MemoryRefreshLog;
use whysoviral::scraper::{ScraperClient, ScraperConfig};
use whysoviral::service::{App, AppSettings};
use whysoviral::store::Store;

/// Posts every fake creator has, served two per page.
pub const FAKE_POST_COUNT: u64 = 3;

#[derive(Default)]
pub struct FakeProvider {
    /// Requests answered with HTTP 429 before serving normally again.
    pub rate_limits_remaining: AtomicU32,
    pub followers: AtomicU64,
    /// Username reported back by `/user/info` instead of the requested one.
    pub renamed_to: Mutex<Option<String>>,
    pub info_calls: AtomicU32,
    pub posts_calls: AtomicU32,
}

impl FakeProvider {
    pub fn rate_limit_next(&self, n: u32) {
        self.rate_limits_remaining.store(n, Ordering::SeqCst);
    }

    pub fn rename(&self, username: &str) {
        *self.renamed_to.lock().unwrap() = Some(username.to_string());
    }

    fn take_rate_limit(&self) -> bool {
        self.rate_limits_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Deserialize)]
struct InfoParams {
    unique_id: String,
}

#[derive(Deserialize)]
struct PostsParams {
    user_id: String,
    count: Option<usize>,
    cursor: Option<String>,
}

async fn user_info(
    State(fake): State<Arc<FakeProvider>>,
    Query(params): Query<InfoParams>,
) -> Response {
    fake.info_calls.fetch_add(1, Ordering::SeqCst);
    if fake.take_rate_limit() {
        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
    }
    if params.unique_id == "ghost" {
        return Json(json!({ "code": -1, "msg": "User does not exist" })).into_response();
    }

    let unique_id = fake
        .renamed_to
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| params.unique_id.clone());

    Json(json!({
        "code": 0,
        "msg": "success",
        "data": {
            "user": {
                "id": format!("id-{}", params.unique_id),
                "uniqueId": unique_id,
                "nickname": "Fake Creator",
                "verified": false
            },
            "stats": {
                "followerCount": fake.followers.load(Ordering::SeqCst),
                "followingCount": 5,
                "heartCount": 1000,
                "videoCount": FAKE_POST_COUNT
            }
        }
    }))
    .into_response()
}

async fn user_posts(
    State(fake): State<Arc<FakeProvider>>,
    Query(params): Query<PostsParams>,
) -> Response {
    fake.posts_calls.fetch_add(1, Ordering::SeqCst);
    if fake.take_rate_limit() {
        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
    }

    let start: u64 = params.cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
    let count = params.count.unwrap_or(2).min(2) as u64;
    let end = (start + count).min(FAKE_POST_COUNT);
    let now = Utc::now();

    let videos: Vec<_> = (start..end)
        .map(|i| {
            json!({
                "video_id": format!("{}-v{}", params.user_id, i),
                "title": "day in the life #fyp #tiktok",
                "create_time": (now - Duration::days(i as i64 + 1)).timestamp(),
                "play_count": 100 * (i + 1),
                "digg_count": 10,
                "comment_count": 1,
                "share_count": 1,
                "collect_count": 0
            })
        })
        .collect();

    Json(json!({
        "code": 0,
        "data": {
            "videos": videos,
            "cursor": end.to_string(),
            "hasMore": end < FAKE_POST_COUNT
        }
    }))
    .into_response()
}

/// Starts the fake provider; returns its base URL.
pub async fn spawn_fake_provider(fake: Arc<FakeProvider>) -> String {
    let router = Router::new()
        .route("/user/info", get(user_info))
        .route("/user/posts", get(user_posts))
        .with_state(fake);
    serve_router(router).await
}

pub async fn serve_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn scraper_for(base_url: &str) -> ScraperClient {
    let mut config = ScraperConfig::new("test-key");
    config.base_url = base_url.to_string();
    config.retry_base = std::time::Duration::from_millis(1);
    ScraperClient::new(config).unwrap()
}

/// App backed by an in-memory store and the given provider.
pub fn test_app(base_url: &str) -> App {
    App::new(
        Arc::new(Store::open_in_memory().unwrap()),
        scraper_for(base_url),
        Arc::new(MemoryRefreshLog::new()),
        AppSettings { max_posts: 50 },
    )
}
