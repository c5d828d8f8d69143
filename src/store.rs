/// Persistence layer
///
/// SQLite-backed storage for profiles, posts, tracked-profile links, teams,
/// invitations, the analytics cache and small pieces of service state.
/// Every write is an upsert keyed by a natural identifier, so repeated
/// ingestion of the same data is idempotent.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::analytics::{Analytics, PostingSpan};
use crate::pagination::PostSource;
use crate::post::{Post, Profile};
use crate::teams::{Invitation, InvitationStatus, Member, Role, Team};
use crate::window::Lookback;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    username TEXT NOT NULL PRIMARY KEY,
    provider_id TEXT NOT NULL,
    nickname TEXT,
    avatar_url TEXT,
    signature TEXT,
    verified INTEGER NOT NULL DEFAULT 0,
    followers INTEGER NOT NULL DEFAULT 0,
    following INTEGER NOT NULL DEFAULT 0,
    total_likes INTEGER NOT NULL DEFAULT 0,
    video_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS posts (
    id TEXT NOT NULL PRIMARY KEY,
    username TEXT NOT NULL,
    created_ts INTEGER,
    plays INTEGER NOT NULL DEFAULT 0,
    likes INTEGER NOT NULL DEFAULT 0,
    comments INTEGER NOT NULL DEFAULT 0,
    shares INTEGER NOT NULL DEFAULT 0,
    bookmarks INTEGER NOT NULL DEFAULT 0,
    hashtags TEXT NOT NULL DEFAULT '[]',
    description TEXT
);
CREATE INDEX IF NOT EXISTS posts_by_creator_time ON posts (username, created_ts);
CREATE TABLE IF NOT EXISTS tracked_profiles (
    user_id TEXT NOT NULL,
    username TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, username)
);
CREATE TABLE IF NOT EXISTS analytics_cache (
    username TEXT NOT NULL,
    lookback_months INTEGER NOT NULL,
    payload TEXT NOT NULL,
    calculated_at INTEGER NOT NULL,
    PRIMARY KEY (username, lookback_months)
);
CREATE TABLE IF NOT EXISTS service_state (
    key TEXT NOT NULL PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS teams (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS team_members (
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    joined_at INTEGER NOT NULL,
    PRIMARY KEY (team_id, user_id)
);
CREATE TABLE IF NOT EXISTS team_groups (
    team_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (team_id, name)
);
CREATE TABLE IF NOT EXISTS invitations (
    id TEXT NOT NULL PRIMARY KEY,
    team_id TEXT NOT NULL,
    email TEXT NOT NULL,
    role TEXT NOT NULL,
    token TEXT NOT NULL UNIQUE,
    invited_by TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
";

const POST_COLUMNS: &str =
    "id, username, created_ts, plays, likes, comments, shares, bookmarks, hashtags, description";

/// Database handle shared by request handlers.
///
/// The connection sits behind a mutex held for one statement batch at a time.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let db_path = data_dir.join("whysoviral.sqlite");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Self::init(conn)
    }

    /// Fresh database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("Database lock poisoned"))
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Insert or update a profile. Returns true when anything changed.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO profiles (username, provider_id, nickname, avatar_url, signature, verified,
                                   followers, following, total_likes, video_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(username) DO UPDATE SET
                provider_id = excluded.provider_id,
                nickname = excluded.nickname,
                avatar_url = excluded.avatar_url,
                signature = excluded.signature,
                verified = excluded.verified,
                followers = excluded.followers,
                following = excluded.following,
                total_likes = excluded.total_likes,
                video_count = excluded.video_count,
                updated_at = excluded.updated_at
             WHERE followers != excluded.followers
                OR following != excluded.following
                OR total_likes != excluded.total_likes
                OR video_count != excluded.video_count
                OR nickname IS NOT excluded.nickname
                OR avatar_url IS NOT excluded.avatar_url
                OR signature IS NOT excluded.signature
                OR verified != excluded.verified",
            params![
                profile.username,
                profile.id,
                profile.nickname,
                profile.avatar_url,
                profile.signature,
                profile.verified,
                profile.followers as i64,
                profile.following as i64,
                profile.total_likes as i64,
                profile.video_count as i64,
                profile.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_profile(&self, username: &str) -> Result<Option<Profile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT username, provider_id, nickname, avatar_url, signature, verified,
                        followers, following, total_likes, video_count, updated_at
                 FROM profiles WHERE username = ?1",
                params![username],
                |row| {
                    Ok(Profile {
                        username: row.get(0)?,
                        id: row.get(1)?,
                        nickname: row.get(2)?,
                        avatar_url: row.get(3)?,
                        signature: row.get(4)?,
                        verified: row.get(5)?,
                        followers: row.get::<_, i64>(6)?.max(0) as u64,
                        following: row.get::<_, i64>(7)?.max(0) as u64,
                        total_likes: row.get::<_, i64>(8)?.max(0) as u64,
                        video_count: row.get::<_, i64>(9)?.max(0) as u64,
                        updated_at: millis_to_utc(row.get(10)?),
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    /// Upsert a batch of posts in one transaction.
    ///
    /// Returns how many posts were new or had different metrics.
    pub fn upsert_posts(&self, posts: &[Post]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO posts (id, username, created_ts, plays, likes, comments, shares,
                                    bookmarks, hashtags, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    created_ts = COALESCE(excluded.created_ts, created_ts),
                    plays = excluded.plays,
                    likes = excluded.likes,
                    comments = excluded.comments,
                    shares = excluded.shares,
                    bookmarks = excluded.bookmarks,
                    hashtags = excluded.hashtags,
                    description = excluded.description
                 WHERE plays != excluded.plays
                    OR likes != excluded.likes
                    OR comments != excluded.comments
                    OR shares != excluded.shares
                    OR bookmarks != excluded.bookmarks
                    OR hashtags != excluded.hashtags
                    OR description IS NOT excluded.description
                    OR (created_ts IS NULL AND excluded.created_ts IS NOT NULL)",
            )?;
            for post in posts {
                let hashtags = serde_json::to_string(&post.hashtags)?;
                changed += stmt.execute(params![
                    post.id,
                    post.username,
                    post.created_at.map(|ts| ts.timestamp_millis()),
                    post.plays as i64,
                    post.likes as i64,
                    post.comments as i64,
                    post.shares as i64,
                    post.bookmarks as i64,
                    hashtags,
                    post.description,
                ])?;
            }
        }
        tx.commit().context("Failed to commit posts")?;
        Ok(changed)
    }

    pub fn post_count(&self, username: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Tracked profiles
    // ------------------------------------------------------------------

    pub fn track_profile(&self, user_id: &str, username: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tracked_profiles (user_id, username, added_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, username) DO NOTHING",
            params![user_id, username, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Returns false when the link did not exist.
    pub fn untrack_profile(&self, user_id: &str, username: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM tracked_profiles WHERE user_id = ?1 AND username = ?2",
            params![user_id, username],
        )?;
        Ok(removed > 0)
    }

    /// Profiles tracked by one user, oldest first.
    pub fn tracked_usernames(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT username FROM tracked_profiles WHERE user_id = ?1 ORDER BY added_at, username",
        )?;
        let names = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Every profile tracked by anyone.
    pub fn all_tracked_usernames(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT username FROM tracked_profiles ORDER BY username")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Analytics cache and service state
    // ------------------------------------------------------------------

    pub fn save_analytics(
        &self,
        username: &str,
        lookback: Lookback,
        analytics: &Analytics,
    ) -> Result<()> {
        let payload = serde_json::to_string(analytics)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO analytics_cache (username, lookback_months, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(username, lookback_months) DO UPDATE SET
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
            params![
                username,
                lookback.get(),
                payload,
                analytics.last_calculated.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn cached_analytics(&self, username: &str, lookback: Lookback) -> Result<Option<Analytics>> {
        let conn = self.conn()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM analytics_cache WHERE username = ?1 AND lookback_months = ?2",
                params![username, lookback.get()],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).context("Failed to decode cached analytics"))
            .transpose()
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO service_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM service_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    /// Create a team and its owner membership atomically.
    pub fn create_team(&self, team: &Team) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let created = team.created_at.timestamp_millis();
        tx.execute(
            "INSERT INTO teams (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![team.id, team.name, team.owner_id, created],
        )?;
        tx.execute(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![team.id, team.owner_id, Role::Owner.as_str(), created],
        )?;
        tx.commit().context("Failed to commit team creation")?;
        Ok(())
    }

    pub fn create_group(&self, team_id: &str, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO team_groups (team_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![team_id, name, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn team_groups(&self, team_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name FROM team_groups WHERE team_id = ?1 ORDER BY created_at, name")?;
        let names = stmt
            .query_map(params![team_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn get_team(&self, team_id: &str) -> Result<Option<Team>> {
        let conn = self.conn()?;
        let team = conn
            .query_row(
                "SELECT id, name, owner_id, created_at FROM teams WHERE id = ?1",
                params![team_id],
                team_from_row,
            )
            .optional()?;
        Ok(team)
    }

    /// Teams the user belongs to, with the user's role in each.
    pub fn teams_for_user(&self, user_id: &str) -> Result<Vec<(Team, Role)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.owner_id, t.created_at, m.role
             FROM teams t JOIN team_members m ON m.team_id = t.id
             WHERE m.user_id = ?1
             ORDER BY t.created_at, t.id",
        )?;
        let teams = stmt
            .query_map(params![user_id], |row| {
                let role: String = row.get(4)?;
                Ok((team_from_row(row)?, parse_role(&role)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    pub fn get_member(&self, team_id: &str, user_id: &str) -> Result<Option<Member>> {
        let conn = self.conn()?;
        let member = conn
            .query_row(
                "SELECT team_id, user_id, role, joined_at FROM team_members
                 WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
                member_from_row,
            )
            .optional()?;
        Ok(member)
    }

    pub fn list_members(&self, team_id: &str) -> Result<Vec<Member>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT team_id, user_id, role, joined_at FROM team_members
             WHERE team_id = ?1 ORDER BY joined_at, user_id",
        )?;
        let members = stmt
            .query_map(params![team_id], member_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    /// Add a member; an existing membership keeps its role.
    pub fn add_member(&self, member: &Member) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(team_id, user_id) DO NOTHING",
            params![
                member.team_id,
                member.user_id,
                member.role.as_str(),
                member.joined_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Returns false when the member does not exist.
    pub fn update_member_role(&self, team_id: &str, user_id: &str, role: Role) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE team_members SET role = ?3 WHERE team_id = ?1 AND user_id = ?2",
            params![team_id, user_id, role.as_str()],
        )?;
        Ok(updated > 0)
    }

    /// Returns false when the member does not exist.
    pub fn remove_member(&self, team_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2",
            params![team_id, user_id],
        )?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    pub fn insert_invitation(&self, invitation: &Invitation) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO invitations (id, team_id, email, role, token, invited_by, status,
                                      created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                invitation.id,
                invitation.team_id,
                invitation.email,
                invitation.role.as_str(),
                invitation.token,
                invitation.invited_by,
                invitation.status.as_str(),
                invitation.created_at.timestamp_millis(),
                invitation.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn invitation_by_token(&self, token: &str) -> Result<Option<Invitation>> {
        let conn = self.conn()?;
        let invitation = conn
            .query_row(
                "SELECT id, team_id, email, role, token, invited_by, status, created_at, expires_at
                 FROM invitations WHERE token = ?1",
                params![token],
                invitation_from_row,
            )
            .optional()?;
        Ok(invitation)
    }

    /// Pending invitations of a team, newest first.
    pub fn pending_invitations(&self, team_id: &str) -> Result<Vec<Invitation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, team_id, email, role, token, invited_by, status, created_at, expires_at
             FROM invitations WHERE team_id = ?1 AND status = 'pending'
             ORDER BY created_at DESC, id",
        )?;
        let invitations = stmt
            .query_map(params![team_id], invitation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(invitations)
    }

    /// Pending invitation for an email on a team, if any.
    pub fn has_pending_invitation(&self, team_id: &str, email: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM invitations
             WHERE team_id = ?1 AND email = ?2 AND status = 'pending'",
            params![team_id, email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Accept an invitation and add the member in one transaction.
    pub fn accept_invitation(&self, invitation: &Invitation, member: &Member) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE invitations SET status = ?2 WHERE id = ?1",
            params![invitation.id, InvitationStatus::Accepted.as_str()],
        )?;
        tx.execute(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(team_id, user_id) DO NOTHING",
            params![
                member.team_id,
                member.user_id,
                member.role.as_str(),
                member.joined_at.timestamp_millis()
            ],
        )?;
        tx.commit().context("Failed to commit invitation acceptance")?;
        Ok(())
    }
}

impl PostSource for Store {
    fn fetch_page(
        &self,
        username: &str,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM posts
             WHERE username = ?1 AND created_ts IS NOT NULL AND created_ts >= ?2
             ORDER BY created_ts ASC, id ASC
             LIMIT ?3 OFFSET ?4",
            POST_COLUMNS
        ))?;
        let posts = stmt
            .query_map(
                params![
                    username,
                    cutoff.timestamp_millis(),
                    limit as i64,
                    offset as i64
                ],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    fn posting_span(&self, username: &str) -> Result<Option<PostingSpan>> {
        let conn = self.conn()?;
        let (count, first, last): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(created_ts), MIN(created_ts), MAX(created_ts)
             FROM posts WHERE username = ?1 AND created_ts IS NOT NULL",
            params![username],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(match (first, last) {
            (Some(first), Some(last)) if count > 0 => Some(PostingSpan {
                post_count: count as usize,
                first: millis_to_utc(first),
                last: millis_to_utc(last),
            }),
            _ => None,
        })
    }
}

// ============================================================================
// Row mapping helpers
// ============================================================================

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn count_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let hashtags: String = row.get(8)?;
    Ok(Post {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get::<_, Option<i64>>(2)?.map(millis_to_utc),
        plays: count_col(row, 3)?,
        likes: count_col(row, 4)?,
        comments: count_col(row, 5)?,
        shares: count_col(row, 6)?,
        bookmarks: count_col(row, 7)?,
        hashtags: serde_json::from_str(&hashtags).unwrap_or_default(),
        description: row.get(9)?,
    })
}

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: millis_to_utc(row.get(3)?),
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    let role: String = row.get(2)?;
    Ok(Member {
        team_id: row.get(0)?,
        user_id: row.get(1)?,
        role: parse_role(&role),
        joined_at: millis_to_utc(row.get(3)?),
    })
}

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    let role: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok(Invitation {
        id: row.get(0)?,
        team_id: row.get(1)?,
        email: row.get(2)?,
        role: parse_role(&role),
        token: row.get(4)?,
        invited_by: row.get(5)?,
        status: InvitationStatus::parse(&status).unwrap_or(InvitationStatus::Revoked),
        created_at: millis_to_utc(row.get(7)?),
        expires_at: millis_to_utc(row.get(8)?),
    })
}

/// Unknown role strings degrade to the least privileged role.
fn parse_role(s: &str) -> Role {
    Role::parse(s).unwrap_or(Role::Member)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::fetch_posts_in_window;
    use chrono::Duration;

    fn post(id: &str, ts: Option<DateTime<Utc>>, plays: u64) -> Post {
        Post {
            id: id.to_string(),
            username: "creator".to_string(),
            created_at: ts,
            plays,
            likes: 1,
            comments: 0,
            shares: 0,
            bookmarks: 0,
            hashtags: vec!["tag".to_string()],
            description: Some("caption #tag".to_string()),
        }
    }

    fn profile(followers: u64) -> Profile {
        Profile {
            id: "6800000000".to_string(),
            username: "creator".to_string(),
            nickname: Some("Creator".to_string()),
            avatar_url: None,
            signature: None,
            verified: false,
            followers,
            following: 10,
            total_likes: 1000,
            video_count: 3,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_profile_upsert_reports_changes() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.upsert_profile(&profile(100)).unwrap());
        assert!(!store.upsert_profile(&profile(100)).unwrap());
        assert!(store.upsert_profile(&profile(150)).unwrap());

        let loaded = store.get_profile("creator").unwrap().unwrap();
        assert_eq!(loaded.followers, 150);
        assert_eq!(loaded.nickname.as_deref(), Some("Creator"));
        assert!(store.get_profile("nobody").unwrap().is_none());
    }

    #[test]
    fn test_post_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let posts = vec![post("a", Some(start()), 10), post("b", Some(start()), 20)];

        assert_eq!(store.upsert_posts(&posts).unwrap(), 2);
        assert_eq!(store.upsert_posts(&posts).unwrap(), 0);
        assert_eq!(store.post_count("creator").unwrap(), 2);

        let updated = vec![post("a", Some(start()), 15)];
        assert_eq!(store.upsert_posts(&updated).unwrap(), 1);
    }

    #[test]
    fn test_fetch_page_orders_and_filters() {
        let store = Store::open_in_memory().unwrap();
        let posts: Vec<Post> = (0..5)
            .rev()
            .map(|i| post(&format!("p{i}"), Some(start() + Duration::days(i)), i as u64))
            .chain(std::iter::once(post("undated", None, 99)))
            .collect();
        store.upsert_posts(&posts).unwrap();

        let cutoff = start() + Duration::days(2);
        let page = store.fetch_page("creator", cutoff, 0, 2).unwrap();
        let ids: Vec<_> = page.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);

        let all = fetch_posts_in_window(&store, "creator", start()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].hashtags, vec!["tag"]);
        assert_eq!(all[0].description.as_deref(), Some("caption #tag"));
    }

    #[test]
    fn test_posting_span() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.posting_span("creator").unwrap().is_none());

        store
            .upsert_posts(&[
                post("a", Some(start()), 1),
                post("b", Some(start() + Duration::days(10)), 1),
                post("c", None, 1),
            ])
            .unwrap();

        let span = store.posting_span("creator").unwrap().unwrap();
        assert_eq!(span.post_count, 2);
        assert_eq!(span.first, start());
        assert_eq!(span.last, start() + Duration::days(10));
    }

    #[test]
    fn test_tracking() {
        let store = Store::open_in_memory().unwrap();
        store.track_profile("u1", "alice").unwrap();
        store.track_profile("u1", "alice").unwrap();
        store.track_profile("u2", "alice").unwrap();
        store.track_profile("u2", "bob").unwrap();

        assert_eq!(store.tracked_usernames("u1").unwrap(), vec!["alice"]);
        assert_eq!(store.all_tracked_usernames().unwrap(), vec!["alice", "bob"]);
        assert!(store.untrack_profile("u2", "bob").unwrap());
        assert!(!store.untrack_profile("u2", "bob").unwrap());
    }

    #[test]
    fn test_analytics_cache_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let lookback = Lookback::months(3).unwrap();
        assert!(store.cached_analytics("creator", lookback).unwrap().is_none());

        let analytics = Analytics::empty(start());
        store.save_analytics("creator", lookback, &analytics).unwrap();
        let cached = store.cached_analytics("creator", lookback).unwrap().unwrap();
        assert_eq!(cached, analytics);
    }

    #[test]
    fn test_team_membership_flow() {
        let store = Store::open_in_memory().unwrap();
        let team = Team::new("Growth", "owner", start());
        store.create_team(&team).unwrap();
        store.create_group(&team.id, "General").unwrap();
        assert!(store.create_group(&team.id, "General").is_err());
        assert_eq!(store.team_groups(&team.id).unwrap(), vec!["General"]);

        let owner = store.get_member(&team.id, "owner").unwrap().unwrap();
        assert_eq!(owner.role, Role::Owner);

        let invitation = Invitation::new(&team.id, "new@example.com", Role::Admin, "owner", start());
        store.insert_invitation(&invitation).unwrap();
        assert!(store.has_pending_invitation(&team.id, "new@example.com").unwrap());

        let loaded = store.invitation_by_token(&invitation.token).unwrap().unwrap();
        assert_eq!(loaded, invitation);

        let member = Member {
            team_id: team.id.clone(),
            user_id: "newbie".to_string(),
            role: loaded.role,
            joined_at: start(),
        };
        store.accept_invitation(&loaded, &member).unwrap();
        assert!(store.pending_invitations(&team.id).unwrap().is_empty());
        assert_eq!(store.list_members(&team.id).unwrap().len(), 2);

        let teams = store.teams_for_user("newbie").unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].1, Role::Admin);

        assert!(store.update_member_role(&team.id, "newbie", Role::Member).unwrap());
        assert!(store.remove_member(&team.id, "newbie").unwrap());
        assert!(!store.remove_member(&team.id, "newbie").unwrap());
    }

    #[test]
    fn test_state_values() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_state("last_refresh").unwrap().is_none());
        store.set_state("last_refresh", "1").unwrap();
        store.set_state("last_refresh", "2").unwrap();
        assert_eq!(store.get_state("last_refresh").unwrap().as_deref(), Some("2"));
    }
}
