/// Canonical post and profile records.
///
/// Provider payloads arrive with inconsistent field names (`plays`, `playCount`,
/// `play_count`, ...). Everything is normalized here into one strictly typed
/// shape before it reaches the store or the analytics engine.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of published content, as seen at scrape time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub username: String,
    /// Publication time. `None` when the provider value was missing or malformed.
    pub created_at: Option<DateTime<Utc>>,
    pub plays: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub bookmarks: u64,
    pub hashtags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Profile-level statistics for a creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Provider-side numeric id, kept as a string.
    pub id: String,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub signature: Option<String>,
    pub verified: bool,
    pub followers: u64,
    pub following: u64,
    pub total_likes: u64,
    pub video_count: u64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Field aliases accepted from providers
// ============================================================================

const ID_KEYS: &[&str] = &["id", "video_id", "videoId", "aweme_id", "awemeId"];
const PLAY_KEYS: &[&str] = &["plays", "playCount", "play_count"];
const LIKE_KEYS: &[&str] = &["likes", "diggCount", "digg_count", "likeCount", "like_count"];
const COMMENT_KEYS: &[&str] = &["comments", "commentCount", "comment_count"];
const SHARE_KEYS: &[&str] = &["shares", "shareCount", "share_count"];
const BOOKMARK_KEYS: &[&str] = &["bookmarks", "collectCount", "collect_count"];
const UNIX_TIME_KEYS: &[&str] = &["create_time", "createTime"];
const ISO_TIME_KEYS: &[&str] = &["created_at", "createdAt"];
const TEXT_KEYS: &[&str] = &["description", "desc", "title"];

impl Post {
    /// Normalizes one provider video object.
    ///
    /// Missing counters become 0. Returns `None` only when the object has no
    /// usable id, since such a record cannot be upserted.
    pub fn from_provider(username: &str, raw: &Value) -> Option<Self> {
        let id = first_string(raw, ID_KEYS)?;
        let description = first_string(raw, TEXT_KEYS);

        let created_at = parse_created_at(raw);
        if created_at.is_none() {
            tracing::warn!(post_id = %id, "post has no usable creation time");
        }

        let mut hashtags = explicit_hashtags(raw);
        if hashtags.is_empty() {
            if let Some(text) = &description {
                hashtags = extract_hashtags(text);
            }
        }

        Some(Post {
            id,
            username: username.to_string(),
            created_at,
            plays: first_u64(raw, PLAY_KEYS),
            likes: first_u64(raw, LIKE_KEYS),
            comments: first_u64(raw, COMMENT_KEYS),
            shares: first_u64(raw, SHARE_KEYS),
            bookmarks: first_u64(raw, BOOKMARK_KEYS),
            hashtags,
            description,
        })
    }

    /// Sum of the interactions counted towards engagement.
    pub fn interactions(&self) -> u64 {
        self.likes + self.comments + self.shares
    }
}

/// Pulls `#tags` out of free text, lowercased, in order of appearance.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter_map(|word| word.strip_prefix('#'))
        .map(|tag| {
            tag.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn explicit_hashtags(raw: &Value) -> Vec<String> {
    let list = raw
        .get("hashtags")
        .or_else(|| raw.get("challenges"))
        .or_else(|| raw.get("textExtra"))
        .and_then(Value::as_array);

    let Some(list) = list else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => first_string(item, &["name", "hashtagName", "title"]),
            _ => None,
        })
        .map(|tag| tag.trim_start_matches('#').to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn parse_created_at(raw: &Value) -> Option<DateTime<Utc>> {
    for key in UNIX_TIME_KEYS {
        if let Some(secs) = raw.get(*key).and_then(value_as_i64) {
            if secs > 0 {
                return Utc.timestamp_opt(secs, 0).single();
            }
        }
    }
    for key in ISO_TIME_KEYS {
        if let Some(text) = raw.get(*key).and_then(Value::as_str) {
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }
    None
}

/// First key that holds a non-negative integer (or numeric string).
pub(crate) fn first_u64(raw: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(value_as_i64)
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

/// First key that holds a non-empty string or a number rendered as one.
pub(crate) fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
