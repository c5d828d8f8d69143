/// Analytics aggregation engine.
///
/// Turns a creator's post records into engagement metrics over a lookback
/// window. Everything here is pure: the caller fetches posts, injects "now",
/// and decides whether to persist the result.
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pagination::{fetch_posts_in_window, PostSource};
use crate::post::Post;
use crate::window::Lookback;

/// Maximum number of hashtags reported.
const TOP_HASHTAGS: usize = 5;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Aggregated metrics for one creator and one lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub avg_views_per_post: u64,
    /// Percentage, unrounded.
    pub avg_engagement_rate: f64,
    /// Hours.
    pub avg_time_between_posts: f64,
    pub weekly_post_frequency: Vec<WeekCount>,
    pub views_trend: Vec<DayViews>,
    pub post_frequency: PostFrequency,
    pub top_hashtags: Vec<String>,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_shares: u64,
    pub total_views: u64,
    pub post_count: usize,
    pub last_calculated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekCount {
    /// Sunday that starts the week.
    pub week: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayViews {
    pub date: NaiveDate,
    pub views: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PostFrequency {
    pub weekly: f64,
    pub monthly: f64,
}

/// Posting history bounds for a creator, over every stored post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingSpan {
    pub post_count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl PostingSpan {
    /// Span over the dated posts of a history, or `None` if none are dated.
    pub fn from_posts(posts: &[Post]) -> Option<Self> {
        let mut dated = posts.iter().filter_map(|p| p.created_at);
        let first_ts = dated.next()?;
        let (mut first, mut last, mut count) = (first_ts, first_ts, 1);
        for ts in dated {
            first = first.min(ts);
            last = last.max(ts);
            count += 1;
        }
        Some(PostingSpan {
            post_count: count,
            first,
            last,
        })
    }
}

impl Analytics {
    /// Result for a creator with no posts in the window.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Analytics {
            avg_views_per_post: 0,
            avg_engagement_rate: 0.0,
            avg_time_between_posts: 0.0,
            weekly_post_frequency: Vec::new(),
            views_trend: Vec::new(),
            post_frequency: PostFrequency::default(),
            top_hashtags: Vec::new(),
            total_likes: 0,
            total_comments: 0,
            total_shares: 0,
            total_views: 0,
            post_count: 0,
            last_calculated: now,
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Computes analytics over a creator's history for the given lookback.
///
/// `posts` is everything available for the creator. The window is applied
/// here; post frequency is derived from the whole history.
pub fn compute_analytics(posts: &[Post], lookback: Lookback, now: DateTime<Utc>) -> Analytics {
    let window: Vec<Post> = posts
        .iter()
        .filter(|p| match p.created_at {
            Some(ts) => lookback.contains(ts, now),
            None => {
                tracing::warn!(post_id = %p.id, "undated post left out of window");
                false
            }
        })
        .cloned()
        .collect();

    build_analytics(&window, PostingSpan::from_posts(posts), now)
}

/// Runs the calculators over posts already filtered to one window.
///
/// Undated posts still count towards totals, averages, engagement and
/// hashtags, but are skipped by every date-dependent metric.
pub fn build_analytics(posts: &[Post], span: Option<PostingSpan>, now: DateTime<Utc>) -> Analytics {
    let post_frequency = span.map(post_frequency).unwrap_or_default();

    if posts.is_empty() {
        return Analytics {
            post_frequency,
            ..Analytics::empty(now)
        };
    }

    let totals = Totals::from_posts(posts);

    Analytics {
        avg_views_per_post: average_views(&totals, posts.len()),
        avg_engagement_rate: average_engagement_rate(posts),
        avg_time_between_posts: average_hours_between_posts(posts),
        weekly_post_frequency: weekly_post_frequency(posts),
        views_trend: views_trend(posts),
        post_frequency,
        top_hashtags: top_hashtags(posts),
        total_likes: totals.likes,
        total_comments: totals.comments,
        total_shares: totals.shares,
        total_views: totals.views,
        post_count: posts.len(),
        last_calculated: now,
    }
}

/// Fetches a creator's window page by page, then aggregates it.
pub fn compute_for_creator<S: PostSource>(
    source: &S,
    username: &str,
    lookback: Lookback,
    now: DateTime<Utc>,
) -> anyhow::Result<Analytics> {
    let cutoff = lookback.cutoff(now);
    let posts = fetch_posts_in_window(source, username, cutoff)?;
    let span = source.posting_span(username)?;

    tracing::debug!(
        username,
        lookback = %lookback,
        posts = posts.len(),
        "computing analytics"
    );

    Ok(build_analytics(&posts, span, now))
}

// ============================================================================
// Per-metric calculators (private)
// ============================================================================

struct Totals {
    views: u64,
    likes: u64,
    comments: u64,
    shares: u64,
}

impl Totals {
    fn from_posts(posts: &[Post]) -> Self {
        let mut totals = Totals {
            views: 0,
            likes: 0,
            comments: 0,
            shares: 0,
        };
        for post in posts {
            totals.views += post.plays;
            totals.likes += post.likes;
            totals.comments += post.comments;
            totals.shares += post.shares;
        }
        totals
    }
}

fn average_views(totals: &Totals, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    (totals.views as f64 / count as f64).round() as u64
}

/// Mean of per-post engagement rates. Posts without plays contribute no rate
/// but still count in the denominator.
fn average_engagement_rate(posts: &[Post]) -> f64 {
    if posts.is_empty() {
        return 0.0;
    }
    let rate_sum: f64 = posts
        .iter()
        .filter(|p| p.plays > 0)
        .map(|p| p.interactions() as f64 / p.plays as f64 * 100.0)
        .sum();
    rate_sum / posts.len() as f64
}

fn average_hours_between_posts(posts: &[Post]) -> f64 {
    let mut stamps: Vec<DateTime<Utc>> = posts.iter().filter_map(|p| p.created_at).collect();
    if stamps.len() < 2 {
        return 0.0;
    }
    stamps.sort();

    let total_gap_ms: i64 = stamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds())
        .sum();

    total_gap_ms as f64 / (stamps.len() - 1) as f64 / MILLIS_PER_HOUR
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

fn weekly_post_frequency(posts: &[Post]) -> Vec<WeekCount> {
    let mut by_week: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    for ts in posts.iter().filter_map(|p| p.created_at) {
        *by_week.entry(week_start(ts.date_naive())).or_insert(0) += 1;
    }
    by_week
        .into_iter()
        .map(|(week, count)| WeekCount { week, count })
        .collect()
}

fn views_trend(posts: &[Post]) -> Vec<DayViews> {
    let mut by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for post in posts {
        if let Some(ts) = post.created_at {
            *by_day.entry(ts.date_naive()).or_insert(0) += post.plays;
        }
    }
    by_day
        .into_iter()
        .map(|(date, views)| DayViews { date, views })
        .collect()
}

fn post_frequency(span: PostingSpan) -> PostFrequency {
    if span.post_count < 2 {
        return PostFrequency::default();
    }
    let span_days = (span.last - span.first).num_milliseconds() as f64 / MILLIS_PER_DAY;
    if span_days <= 0.0 {
        return PostFrequency::default();
    }
    let per_day = span.post_count as f64 / span_days;
    PostFrequency {
        weekly: per_day * 7.0,
        monthly: per_day * 30.0,
    }
}

/// Most used hashtags; ties keep first-seen order.
fn top_hashtags(posts: &[Post]) -> Vec<String> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for tag in posts.iter().flat_map(|p| p.hashtags.iter()) {
        *counts.entry(tag.as_str()).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    ranked
        .into_iter()
        .take(TOP_HASHTAGS)
        .map(|(tag, _)| tag.to_string())
        .collect()
}
