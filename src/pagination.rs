/// Paginated window fetch.
///
/// Pulls a creator's posts from a page-oriented source in ascending
/// publication order, stopping on the first short page.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::analytics::PostingSpan;
use crate::post::Post;

/// Posts per page.
pub const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for one window (100k posts).
/// Guards against a backend that never returns a short page.
pub const MAX_PAGES: usize = 1_000;

/// Offset-paginated access to stored posts.
pub trait PostSource {
    /// One page of a creator's posts published at or after `cutoff`,
    /// ordered by ascending `created_at`.
    fn fetch_page(
        &self,
        username: &str,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Post>>;

    /// Bounds of the creator's full posting history.
    fn posting_span(&self, username: &str) -> Result<Option<PostingSpan>>;
}

/// Fetches every post of `username` published at or after `cutoff`.
pub fn fetch_posts_in_window<S: PostSource + ?Sized>(
    source: &S,
    username: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Post>> {
    let mut posts = Vec::new();

    for page_index in 0..MAX_PAGES {
        let offset = page_index * PAGE_SIZE;
        let page = source
            .fetch_page(username, cutoff, offset, PAGE_SIZE)
            .with_context(|| format!("Failed to fetch posts page at offset {}", offset))?;

        let fetched = page.len();
        posts.extend(page);

        if fetched < PAGE_SIZE {
            return Ok(posts);
        }
    }

    tracing::warn!(
        username,
        pages = MAX_PAGES,
        "page limit reached while fetching window, result may be truncated"
    );
    Ok(posts)
}
