use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::pagination::PostSource;
use crate::refresh_log::RefreshLog;
use crate::store::Store;
use crate::timefmt::{format_timestamp, format_timestamp_opt};
use crate::window::Lookback;

/// Stored state of one tracked profile.
pub struct ProfileStatus {
    pub username: String,
    pub stored: bool,
    pub followers: u64,
    pub post_count: usize,
    pub first_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Average views from the cached default-window analytics.
    pub cached_avg_views: Option<u64>,
}

pub struct ServiceStatus {
    pub last_refresh: Option<DateTime<Utc>>,
    pub profiles: Vec<ProfileStatus>,
}

/// Gather the status of every tracked profile.
pub fn collect_status(store: &Store, refresh_log: &dyn RefreshLog) -> Result<ServiceStatus> {
    let mut profiles = Vec::new();

    for username in store.all_tracked_usernames()? {
        let profile = store.get_profile(&username)?;
        let span = store.posting_span(&username)?;
        let cached = store.cached_analytics(&username, Lookback::default())?;

        profiles.push(ProfileStatus {
            stored: profile.is_some(),
            followers: profile.as_ref().map(|p| p.followers).unwrap_or(0),
            updated_at: profile.as_ref().map(|p| p.updated_at),
            post_count: store.post_count(&username)?,
            first_post: span.map(|s| s.first),
            last_post: span.map(|s| s.last),
            cached_avg_views: cached.map(|a| a.avg_views_per_post),
            username,
        });
    }

    Ok(ServiceStatus {
        last_refresh: refresh_log.last()?,
        profiles,
    })
}

pub fn run(store: &Store, refresh_log: &dyn RefreshLog) -> Result<()> {
    let status = collect_status(store, refresh_log)?;

    println!("Last refresh: {}", format_timestamp_opt(status.last_refresh));

    if status.profiles.is_empty() {
        println!("No tracked profiles.");
        return Ok(());
    }

    for profile in &status.profiles {
        println!("\nProfile: @{}", profile.username);
        if !profile.stored {
            println!("  [!] Tracked but never scraped");
            continue;
        }
        println!("  Followers: {}", profile.followers);
        println!("  Stored posts: {}", profile.post_count);
        match (profile.first_post, profile.last_post) {
            (Some(first), Some(last)) => println!(
                "  Posting window: {} to {}",
                format_timestamp(first),
                format_timestamp(last)
            ),
            _ => println!("  Posting window: (no dated posts)"),
        }
        println!("  Last scraped: {}", format_timestamp_opt(profile.updated_at));
        match profile.cached_avg_views {
            Some(avg) => println!("  Avg views/post ({}): {}", Lookback::default(), avg),
            None => println!("  Avg views/post: (not computed yet)"),
        }
    }
    Ok(())
}
