/// Team collaboration model.
///
/// Teams own a set of members with roles; admins invite new members by email
/// and the invitee accepts with a one-time token.
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long an invitation stays valid.
pub const INVITATION_TTL_DAYS: i64 = 7;

/// Name of the group created alongside every team.
pub const DEFAULT_GROUP_NAME: &str = "General";

const TOKEN_LEN: usize = 32;
const ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Admins and owners manage membership and invitations.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }

    /// Roles that can be handed out through invitations or role changes.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Self::Owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub team_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub team_id: String,
    pub email: String,
    pub role: Role,
    pub token: String,
    pub invited_by: String,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    pub fn new(team_id: &str, email: &str, role: Role, invited_by: &str, now: DateTime<Utc>) -> Self {
        Invitation {
            id: random_id(ID_LEN),
            team_id: team_id.to_string(),
            email: normalize_email(email),
            role,
            token: random_id(TOKEN_LEN),
            invited_by: invited_by.to_string(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(INVITATION_TTL_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Team {
    pub fn new(name: &str, owner_id: &str, now: DateTime<Utc>) -> Self {
        Team {
            id: random_id(ID_LEN),
            name: name.trim().to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
        }
    }
}

/// Random alphanumeric identifier.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Loose shape check: one '@', non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_permissions() {
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" member "), Some(Role::Member));
        assert_eq!(Role::parse("guest"), None);

        assert!(Role::Owner.can_manage());
        assert!(Role::Admin.can_manage());
        assert!(!Role::Member.can_manage());

        assert!(!Role::Owner.is_assignable());
        assert!(Role::Admin.is_assignable());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email(" Bob.Smith@mail.example.org "));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("alice@.com"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("al ice@example.com"));
    }

    #[test]
    fn test_invitation_expiry() {
        let now = Utc::now();
        let invitation = Invitation::new("team", "New@Example.com", Role::Member, "owner", now);
        assert_eq!(invitation.email, "new@example.com");
        assert_eq!(invitation.token.len(), TOKEN_LEN);
        assert!(!invitation.is_expired(now));
        assert!(invitation.is_expired(now + Duration::days(INVITATION_TTL_DAYS)));
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(random_id(16), random_id(16));
    }
}
