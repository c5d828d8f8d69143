/// Application operations.
///
/// `App` owns the shared handles (store, scraper client, refresh log) and
/// implements every operation the HTTP server and the CLI expose. Handlers
/// stay thin: they extract input, call one method here and wrap the result.
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::analytics::{build_analytics, compute_for_creator, Analytics};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::pagination::{fetch_posts_in_window, PostSource};
use crate::post::{Post, Profile};
use crate::refresh_log::{RefreshLog, StoreRefreshLog};
use crate::scraper::{parse_username_input, ScraperClient};
use crate::store::Store;
use crate::teams::{
    is_valid_email, normalize_email, Invitation, InvitationStatus, Member, Role, Team,
    DEFAULT_GROUP_NAME,
};
use crate::window::Lookback;

const MAX_TEAM_NAME_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Posts fetched from the provider per profile scrape.
    pub max_posts: usize,
}

/// A tracked profile with its analytics and the posts of the window,
/// newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub user: Profile,
    pub analytics: Analytics,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub refreshed_count: usize,
    pub data_changed: bool,
}

/// A team as seen by one of its members.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    #[serde(flatten)]
    pub team: Team,
    pub role: Role,
}

pub struct App {
    store: Arc<Store>,
    scraper: ScraperClient,
    refresh_log: Arc<dyn RefreshLog>,
    settings: AppSettings,
}

impl App {
    pub fn new(
        store: Arc<Store>,
        scraper: ScraperClient,
        refresh_log: Arc<dyn RefreshLog>,
        settings: AppSettings,
    ) -> Self {
        Self {
            store,
            scraper,
            refresh_log,
            settings,
        }
    }

    /// Wires the app from configuration: provider client from the RapidAPI
    /// settings, refresh times persisted in `store`.
    pub fn from_config(config: &Config, store: Arc<Store>) -> anyhow::Result<Self> {
        let scraper = ScraperClient::new(config.scraper_config()?)
            .context("Failed to build TikTok scraper client")?;
        let refresh_log = Arc::new(StoreRefreshLog::new(store.clone()));
        Ok(Self::new(
            store,
            scraper,
            refresh_log,
            AppSettings {
                max_posts: config.max_posts,
            },
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ========================================================================
    // Profiles and analytics
    // ========================================================================

    /// Resolves and scrapes a profile, stores it and links it to `user_id`.
    pub async fn add_profile(
        &self,
        user_id: &str,
        input: &str,
        lookback: Lookback,
    ) -> AppResult<ProfileView> {
        let profile = self.scraper.resolve_username(input).await?;
        let changed = self.ingest(&profile).await?;
        self.store.track_profile(user_id, &profile.username)?;

        tracing::info!(user_id, username = %profile.username, changed, "profile added");
        self.profile_view(&profile.username, lookback)
    }

    /// Every profile the user tracks. Links to profiles that were never
    /// stored are skipped.
    pub fn list_profiles(&self, user_id: &str, lookback: Lookback) -> AppResult<Vec<ProfileView>> {
        let mut views = Vec::new();
        for username in self.store.tracked_usernames(user_id)? {
            match self.profile_view(&username, lookback) {
                Ok(view) => views.push(view),
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(user_id, username = %username, "tracked profile has no stored data");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    pub fn profile_analytics(&self, username: &str, lookback: Lookback) -> AppResult<Analytics> {
        let username = parse_username_input(username)?;
        if self.store.get_profile(&username)?.is_none() {
            return Err(AppError::not_found(format!("Profile not tracked: {}", username)));
        }

        let analytics = compute_for_creator(self.store.as_ref(), &username, lookback, Utc::now())?;
        self.cache_analytics(&username, lookback, &analytics);
        Ok(analytics)
    }

    /// Unlinks a profile from the user. Stored data is kept for other users.
    pub fn remove_profile(&self, user_id: &str, username: &str) -> AppResult<()> {
        let username = parse_username_input(username)?;
        if !self.store.untrack_profile(user_id, &username)? {
            return Err(AppError::not_found(format!("Profile not tracked: {}", username)));
        }
        tracing::info!(user_id, username = %username, "profile removed");
        Ok(())
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    pub async fn refresh_profile(&self, username: &str) -> AppResult<RefreshReport> {
        let username = parse_username_input(username)?;
        if self.store.get_profile(&username)?.is_none() {
            return Err(AppError::not_found(format!("Profile not tracked: {}", username)));
        }

        let data_changed = self.refresh_one(&username).await?;
        self.refresh_log.record(Utc::now())?;
        Ok(RefreshReport {
            refreshed_count: 1,
            data_changed,
        })
    }

    /// Re-scrapes every tracked profile.
    ///
    /// A rate limit aborts the whole run; any other per-profile failure is
    /// logged and the profile skipped.
    pub async fn refresh_all(&self) -> AppResult<RefreshReport> {
        let usernames = self.store.all_tracked_usernames()?;
        let mut report = RefreshReport::default();

        for username in &usernames {
            match self.refresh_one(username).await {
                Ok(changed) => {
                    report.refreshed_count += 1;
                    report.data_changed |= changed;
                }
                Err(e @ AppError::RateLimited(_)) => {
                    tracing::warn!(
                        username = %username,
                        refreshed = report.refreshed_count,
                        "refresh aborted: rate limited"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(username = %username, error = %e, "failed to refresh profile, skipping");
                }
            }
        }

        self.refresh_log.record(Utc::now())?;
        tracing::info!(
            total = usernames.len(),
            refreshed = report.refreshed_count,
            data_changed = report.data_changed,
            "refresh finished"
        );
        Ok(report)
    }

    pub fn refresh_status(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self.refresh_log.last()?)
    }

    async fn refresh_one(&self, username: &str) -> AppResult<bool> {
        let mut profile = self.scraper.get_user_info(username).await?;
        // Stored posts and tracked links are keyed on the tracked name.
        if profile.username != username {
            tracing::warn!(
                tracked = username,
                provider = %profile.username,
                "provider returned a different username, keeping the tracked one"
            );
            profile.username = username.to_string();
        }
        self.ingest(&profile).await
    }

    /// Fetches recent posts and upserts profile and posts. Returns true when
    /// any stored value changed.
    async fn ingest(&self, profile: &Profile) -> AppResult<bool> {
        let posts = self
            .scraper
            .get_recent_posts(&profile.id, &profile.username, self.settings.max_posts)
            .await?;

        let profile_changed = self.store.upsert_profile(profile)?;
        let posts_changed = self.store.upsert_posts(&posts)?;

        tracing::debug!(
            username = %profile.username,
            fetched = posts.len(),
            posts_changed,
            profile_changed,
            "ingested profile"
        );
        Ok(profile_changed || posts_changed > 0)
    }

    fn profile_view(&self, username: &str, lookback: Lookback) -> AppResult<ProfileView> {
        let user = self
            .store
            .get_profile(username)?
            .ok_or_else(|| AppError::not_found(format!("Profile not tracked: {}", username)))?;

        let now = Utc::now();
        let mut posts = fetch_posts_in_window(self.store.as_ref(), username, lookback.cutoff(now))?;
        let span = self.store.posting_span(username)?;
        let analytics = build_analytics(&posts, span, now);
        self.cache_analytics(username, lookback, &analytics);

        posts.reverse();
        Ok(ProfileView {
            user,
            analytics,
            posts,
        })
    }

    fn cache_analytics(&self, username: &str, lookback: Lookback, analytics: &Analytics) {
        if let Err(e) = self.store.save_analytics(username, lookback, analytics) {
            tracing::warn!(username, error = %e, "failed to cache analytics");
        }
    }

    // ========================================================================
    // Teams
    // ========================================================================

    /// Creates a team owned by `user_id` together with its default group.
    pub fn create_team(&self, user_id: &str, name: &str) -> AppResult<TeamView> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("Team name is required"));
        }
        if name.chars().count() > MAX_TEAM_NAME_LEN {
            return Err(AppError::bad_request(format!(
                "Team name must be at most {} characters",
                MAX_TEAM_NAME_LEN
            )));
        }

        let team = Team::new(name, user_id, Utc::now());
        self.store.create_team(&team)?;

        if let Err(e) = self.store.create_group(&team.id, DEFAULT_GROUP_NAME) {
            tracing::warn!(team_id = %team.id, error = %e, "failed to create default group");
        }

        tracing::info!(team_id = %team.id, owner = user_id, "team created");
        Ok(TeamView {
            team,
            role: Role::Owner,
        })
    }

    pub fn list_teams(&self, user_id: &str) -> AppResult<Vec<TeamView>> {
        Ok(self
            .store
            .teams_for_user(user_id)?
            .into_iter()
            .map(|(team, role)| TeamView { team, role })
            .collect())
    }

    pub fn team_members(&self, user_id: &str, team_id: &str) -> AppResult<Vec<Member>> {
        self.membership(user_id, team_id)?;
        Ok(self.store.list_members(team_id)?)
    }

    /// Creates a pending invitation. The invitation email is not delivered;
    /// the acceptance link is logged instead.
    pub fn invite_member(
        &self,
        user_id: &str,
        team_id: &str,
        email: &str,
        role: Option<&str>,
    ) -> AppResult<Invitation> {
        self.manager(user_id, team_id)?;

        if !is_valid_email(email) {
            return Err(AppError::bad_request(format!("Invalid email address: {}", email.trim())));
        }
        let role = parse_assignable_role(role.unwrap_or("member"))?;
        let email = normalize_email(email);

        if self.store.has_pending_invitation(team_id, &email)? {
            return Err(AppError::bad_request(format!(
                "{} already has a pending invitation",
                email
            )));
        }

        let invitation = Invitation::new(team_id, &email, role, user_id, Utc::now());
        self.store.insert_invitation(&invitation)?;

        tracing::info!(
            team_id,
            email = %invitation.email,
            role = role.as_str(),
            accept_path = %format!("/api/invitations/{}/accept", invitation.token),
            "invitation created (email delivery not configured)"
        );
        Ok(invitation)
    }

    pub fn list_invitations(&self, user_id: &str, team_id: &str) -> AppResult<Vec<Invitation>> {
        self.manager(user_id, team_id)?;
        Ok(self.store.pending_invitations(team_id)?)
    }

    /// Accepts an invitation on behalf of `user_id`, whose verified email
    /// must match the invited address.
    pub fn accept_invitation(
        &self,
        user_id: &str,
        user_email: Option<&str>,
        token: &str,
    ) -> AppResult<Member> {
        let invitation = self
            .store
            .invitation_by_token(token)?
            .ok_or_else(|| AppError::not_found("Invitation not found"))?;

        if invitation.status != InvitationStatus::Pending {
            return Err(AppError::bad_request(format!(
                "Invitation is already {}",
                invitation.status.as_str()
            )));
        }
        let now = Utc::now();
        if invitation.is_expired(now) {
            return Err(AppError::bad_request("Invitation has expired"));
        }

        let Some(email) = user_email else {
            return Err(AppError::Unauthorized(
                "An email address is required to accept invitations".to_string(),
            ));
        };
        if normalize_email(email) != invitation.email {
            return Err(AppError::forbidden("Invitation was sent to a different email address"));
        }
        if self.store.get_member(&invitation.team_id, user_id)?.is_some() {
            return Err(AppError::bad_request("Already a member of this team"));
        }

        let member = Member {
            team_id: invitation.team_id.clone(),
            user_id: user_id.to_string(),
            role: invitation.role,
            joined_at: now,
        };
        self.store.accept_invitation(&invitation, &member)?;

        tracing::info!(team_id = %member.team_id, user_id, role = member.role.as_str(), "invitation accepted");
        Ok(member)
    }

    pub fn update_member_role(
        &self,
        user_id: &str,
        team_id: &str,
        member_id: &str,
        role: &str,
    ) -> AppResult<Member> {
        self.manager(user_id, team_id)?;
        let role = parse_assignable_role(role)?;

        let target = self
            .store
            .get_member(team_id, member_id)?
            .ok_or_else(|| AppError::not_found(format!("Member not found: {}", member_id)))?;
        if target.role == Role::Owner {
            return Err(AppError::forbidden("The team owner's role cannot be changed"));
        }

        self.store.update_member_role(team_id, member_id, role)?;
        Ok(Member { role, ..target })
    }

    /// Removes a member. Managers may remove anyone but the owner; members
    /// may remove themselves.
    pub fn remove_member(&self, user_id: &str, team_id: &str, member_id: &str) -> AppResult<()> {
        let actor = self.membership(user_id, team_id)?;
        if actor.user_id != member_id && !actor.role.can_manage() {
            return Err(AppError::forbidden("Only team admins can remove members"));
        }

        let target = self
            .store
            .get_member(team_id, member_id)?
            .ok_or_else(|| AppError::not_found(format!("Member not found: {}", member_id)))?;
        if target.role == Role::Owner {
            return Err(AppError::forbidden("The team owner cannot be removed"));
        }

        self.store.remove_member(team_id, member_id)?;
        tracing::info!(team_id, member_id, removed_by = user_id, "member removed");
        Ok(())
    }

    fn membership(&self, user_id: &str, team_id: &str) -> AppResult<Member> {
        if self.store.get_team(team_id)?.is_none() {
            return Err(AppError::not_found(format!("Team not found: {}", team_id)));
        }
        self.store
            .get_member(team_id, user_id)?
            .ok_or_else(|| AppError::forbidden("Not a member of this team"))
    }

    fn manager(&self, user_id: &str, team_id: &str) -> AppResult<Member> {
        let member = self.membership(user_id, team_id)?;
        if !member.role.can_manage() {
            return Err(AppError::forbidden("Only team admins can manage members"));
        }
        Ok(member)
    }
}

fn parse_assignable_role(role: &str) -> AppResult<Role> {
    match Role::parse(role) {
        Some(role) if role.is_assignable() => Ok(role),
        Some(_) => Err(AppError::bad_request("The owner role cannot be assigned")),
        None => Err(AppError::bad_request(format!("Unknown role: {}", role))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh_log::MemoryRefreshLog;
    use crate::scraper::ScraperConfig;
    use chrono::Duration;

    /// App whose scraper points at an unroutable address; the team and
    /// profile-store operations under test never reach it.
    fn offline_app() -> App {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut config = ScraperConfig::new("test-key");
        config.base_url = "http://127.0.0.1:9".to_string();
        App::new(
            store,
            ScraperClient::new(config).unwrap(),
            Arc::new(MemoryRefreshLog::new()),
            AppSettings { max_posts: 10 },
        )
    }

    fn stored_profile(app: &App, username: &str) {
        app.store()
            .upsert_profile(&Profile {
                id: format!("id-{}", username),
                username: username.to_string(),
                nickname: None,
                avatar_url: None,
                signature: None,
                verified: false,
                followers: 10,
                following: 1,
                total_likes: 100,
                video_count: 2,
                updated_at: Utc::now(),
            })
            .unwrap();
        let now = Utc::now();
        let posts: Vec<Post> = (0..2)
            .map(|i| Post {
                id: format!("{}-{}", username, i),
                username: username.to_string(),
                created_at: Some(now - Duration::days(i + 1)),
                plays: 100,
                likes: 10,
                comments: 0,
                shares: 0,
                bookmarks: 0,
                hashtags: vec!["fyp".to_string()],
                description: None,
            })
            .collect();
        app.store().upsert_posts(&posts).unwrap();
    }

    #[test]
    fn test_list_and_remove_profiles() {
        let app = offline_app();
        stored_profile(&app, "creator");
        app.store().track_profile("alice", "creator").unwrap();
        app.store().track_profile("alice", "ghost").unwrap();

        let views = app.list_profiles("alice", Lookback::default()).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].user.username, "creator");
        assert_eq!(views[0].posts.len(), 2);
        assert_eq!(views[0].analytics.total_views, 200);
        assert!(views[0].posts[0].created_at > views[0].posts[1].created_at);

        assert!(app.list_profiles("bob", Lookback::default()).unwrap().is_empty());

        app.remove_profile("alice", "@Creator").unwrap();
        assert!(matches!(
            app.remove_profile("alice", "creator"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_profile_analytics_uses_store_and_caches() {
        let app = offline_app();
        stored_profile(&app, "creator");

        let analytics = app.profile_analytics("creator", Lookback::default()).unwrap();
        assert_eq!(analytics.post_count, 2);
        assert_eq!(analytics.avg_views_per_post, 100);

        let cached = app
            .store()
            .cached_analytics("creator", Lookback::default())
            .unwrap()
            .unwrap();
        assert_eq!(cached.post_count, 2);

        assert!(matches!(
            app.profile_analytics("unknown", Lookback::default()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            app.profile_analytics("not a name", Lookback::default()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_all_with_nothing_tracked_records_time() {
        let app = offline_app();
        assert!(app.refresh_status().unwrap().is_none());

        let report = app.refresh_all().await.unwrap();
        assert_eq!(report, RefreshReport::default());
        assert!(app.refresh_status().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_unknown_profile_is_not_found() {
        let app = offline_app();
        assert!(matches!(
            app.refresh_profile("nobody").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_team_with_default_group() {
        let app = offline_app();
        let view = app.create_team("owner", "  Growth  ").unwrap();
        assert_eq!(view.team.name, "Growth");
        assert_eq!(view.role, Role::Owner);
        assert_eq!(
            app.store().team_groups(&view.team.id).unwrap(),
            vec![DEFAULT_GROUP_NAME.to_string()]
        );

        let teams = app.list_teams("owner").unwrap();
        assert_eq!(teams.len(), 1);
        assert!(app.list_teams("stranger").unwrap().is_empty());

        assert!(matches!(app.create_team("owner", "   "), Err(AppError::BadRequest(_))));
        assert!(matches!(
            app.create_team("owner", &"x".repeat(101)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_invitation_flow() {
        let app = offline_app();
        let team = app.create_team("owner", "Team").unwrap().team;

        let invitation = app
            .invite_member("owner", &team.id, "New@Example.com", Some("admin"))
            .unwrap();
        assert_eq!(invitation.email, "new@example.com");
        assert_eq!(invitation.role, Role::Admin);

        // duplicate pending invitation
        assert!(matches!(
            app.invite_member("owner", &team.id, "new@example.com", None),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(app.list_invitations("owner", &team.id).unwrap().len(), 1);

        // wrong email, then missing email
        assert!(matches!(
            app.accept_invitation("newbie", Some("other@example.com"), &invitation.token),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            app.accept_invitation("newbie", None, &invitation.token),
            Err(AppError::Unauthorized(_))
        ));

        let member = app
            .accept_invitation("newbie", Some("NEW@example.com"), &invitation.token)
            .unwrap();
        assert_eq!(member.role, Role::Admin);
        assert_eq!(app.team_members("owner", &team.id).unwrap().len(), 2);
        assert!(app.list_invitations("owner", &team.id).unwrap().is_empty());

        // token is single use
        assert!(matches!(
            app.accept_invitation("newbie", Some("new@example.com"), &invitation.token),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            app.accept_invitation("newbie", Some("new@example.com"), "missing"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_invitation_validation_and_permissions() {
        let app = offline_app();
        let team = app.create_team("owner", "Team").unwrap().team;

        assert!(matches!(
            app.invite_member("owner", &team.id, "not-an-email", None),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            app.invite_member("owner", &team.id, "a@example.com", Some("owner")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            app.invite_member("owner", &team.id, "a@example.com", Some("boss")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            app.invite_member("stranger", &team.id, "a@example.com", None),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            app.invite_member("owner", "no-such-team", "a@example.com", None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_expired_invitation_is_rejected() {
        let app = offline_app();
        let team = app.create_team("owner", "Team").unwrap().team;
        let invitation = Invitation::new(
            &team.id,
            "late@example.com",
            Role::Member,
            "owner",
            Utc::now() - Duration::days(30),
        );
        app.store().insert_invitation(&invitation).unwrap();

        assert!(matches!(
            app.accept_invitation("late", Some("late@example.com"), &invitation.token),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_member_role_changes_and_removal() {
        let app = offline_app();
        let team = app.create_team("owner", "Team").unwrap().team;
        let joined = Utc::now();
        for user in ["admin", "member"] {
            app.store()
                .add_member(&Member {
                    team_id: team.id.clone(),
                    user_id: user.to_string(),
                    role: Role::Member,
                    joined_at: joined,
                })
                .unwrap();
        }

        let promoted = app
            .update_member_role("owner", &team.id, "admin", "admin")
            .unwrap();
        assert_eq!(promoted.role, Role::Admin);

        // members cannot manage, nobody can touch the owner
        assert!(matches!(
            app.update_member_role("member", &team.id, "admin", "member"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            app.update_member_role("admin", &team.id, "owner", "member"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            app.remove_member("admin", &team.id, "owner"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            app.update_member_role("owner", &team.id, "ghost", "member"),
            Err(AppError::NotFound(_))
        ));

        // a member may leave, an admin may remove
        assert!(matches!(
            app.remove_member("member", &team.id, "admin"),
            Err(AppError::Forbidden(_))
        ));
        app.remove_member("member", &team.id, "member").unwrap();
        let remaining: Vec<String> = app
            .team_members("owner", &team.id)
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        assert_eq!(remaining, vec!["owner".to_string(), "admin".to_string()]);

        app.remove_member("admin", &team.id, "admin").unwrap();
        assert_eq!(app.team_members("owner", &team.id).unwrap().len(), 1);
    }
}
