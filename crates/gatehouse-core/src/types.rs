//! Typed identifiers, categories, verdicts, and entity records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::TokenValue;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Stable identifier of a user.
    UserId
);
id_type!(
    /// Stable identifier of a team.
    TeamId
);
id_type!(
    /// Stable identifier of a permission.
    PermissionId
);
id_type!(
    /// Stable identifier of a grant row.
    GrantId
);
id_type!(
    /// Identifier of a scoped object (repository or monitoring system).
    ObjectId
);
id_type!(
    /// Stable identifier of a section.
    SectionId
);
id_type!(
    /// Stable identifier of an action.
    ActionId
);

/// Identifier of an in-flight key-exchange session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Generate a random request identifier.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Suffix distinguishing a grant meta-category from its primary category.
pub const GRANT_SUFFIX: &str = ":grant";

/// The category that holds auto-created per-category system permissions.
pub const SYSTEM_CATEGORY: &str = "system";

/// The built-in primary categories created at bootstrap.
pub const BUILTIN_CATEGORIES: &[&str] = &[
    "global",
    "repository",
    "team",
    "monitoring",
    "system",
    "permission",
    "operations",
];

/// A permission namespace.
///
/// Every primary category is paired with a `<name>:grant` meta-category that
/// controls who may grant permissions inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(String);

impl Category {
    /// Create a category from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The category name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is a `<name>:grant` meta-category.
    pub fn is_grant_meta(&self) -> bool {
        self.0.ends_with(GRANT_SUFFIX)
    }

    /// The paired grant meta-category.
    pub fn grant_meta(&self) -> Category {
        Category(format!("{}{}", self.0, GRANT_SUFFIX))
    }

    /// The primary category (strips a `:grant` suffix if present).
    pub fn primary(&self) -> Category {
        match self.0.strip_suffix(GRANT_SUFFIX) {
            Some(base) => Category(base.to_string()),
            None => self.clone(),
        }
    }

    /// The grant scope this category dispatches to.
    pub fn scope(&self) -> Scope {
        match self.primary().name() {
            "repository" => Scope::Repository,
            "team" => Scope::Team,
            "monitoring" => Scope::Monitoring,
            _ => Scope::Unscoped,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Grant scope: whether a grant binds to a single target object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Instance-wide grant (global, system, permission, operations).
    Unscoped,
    /// Grant limited to one repository.
    Repository,
    /// Grant limited to one team.
    Team,
    /// Grant limited to one monitoring system.
    Monitoring,
}

impl Scope {
    /// Whether grants of this scope carry an object identifier.
    pub fn is_object_scoped(&self) -> bool {
        !matches!(self, Scope::Unscoped)
    }
}

/// The principal a grant binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A user principal. The only recipient type grant/revoke supports.
    User(UserId),
    /// A team principal. Grant/revoke return NotImplemented for teams.
    Team(TeamId),
}

/// Request verdicts, modeled on the HTTP status codes the platform speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Verdict {
    /// Success; list results may still carry per-item errors.
    Ok = 200,
    /// Accepted for asynchronous completion.
    Accepted = 202,
    /// Malformed input.
    BadRequest = 400,
    /// Token or credential invalid or expired.
    Unauthorized = 401,
    /// Authenticated but not allowed.
    Forbidden = 403,
    /// Entity absent.
    NotFound = 404,
    /// Operation disallowed on this instance's mode.
    Conflict = 406,
    /// Unexpected storage or transaction failure.
    ServerError = 500,
    /// Recognized but unsupported action or recipient type.
    NotImplemented = 501,
    /// Temporarily unavailable.
    Unavailable = 503,
}

impl Verdict {
    /// The numeric status code.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Whether the verdict is a success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok | Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Deployment mode of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceMode {
    /// Holds authoritative write-side state.
    Full,
    /// Serves reads only; writes are refused with Conflict and
    /// authentication falls back to the store on cache miss.
    ReadOnly,
}

impl InstanceMode {
    /// Whether this instance may execute write statements.
    pub fn is_writable(&self) -> bool {
        matches!(self, InstanceMode::Full)
    }
}

/// Administrative restrictions on the root account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootPolicy {
    /// Root authentication is refused outright.
    pub disabled: bool,
    /// Root may only authenticate over a restricted channel.
    pub restricted_channel_only: bool,
}

/// The reserved root account name.
pub const ROOT_USER: &str = "root";

/// A user identity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub active: bool,
}

/// A team identity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: TeamId,
    pub name: String,
}

/// An issued bearer token.
///
/// Tokens are immutable once issued; renewal creates a new token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The computed token value presented by the client.
    pub value: TokenValue,
    /// Random salt mixed into the MAC.
    pub salt: Vec<u8>,
    /// Start of the validity window (Unix ms).
    pub valid_from: i64,
    /// End of the validity window (Unix ms).
    pub expires_at: i64,
    /// The user the token authenticates.
    pub user: UserId,
}

impl TokenRecord {
    /// Whether `now` falls within the validity window.
    pub fn is_current(&self, now: i64) -> bool {
        now >= self.valid_from && now <= self.expires_at
    }
}

/// Per-user password-derived material for basic-auth validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user: UserId,
    /// Password-derived material; mutated only by password operations.
    pub material: Vec<u8>,
    /// When the credential lapses (Unix ms).
    pub expires_at: i64,
}

/// A category row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub name: Category,
    pub created_by: UserId,
    pub created_at: i64,
}

/// A permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: PermissionId,
    pub name: String,
    pub category: Category,
    pub created_by: UserId,
    pub created_at: i64,
}

/// A section groups related actions under a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: SectionId,
    pub name: String,
    pub category: Category,
}

/// A fine-grained operation name within a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub name: String,
    pub section: SectionId,
}

/// An authorization edge binding a recipient to a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: GrantId,
    pub recipient: Recipient,
    pub permission: PermissionId,
    pub category: Category,
    /// Target instance for repository/team/monitoring scoped grants.
    pub object: Option<ObjectId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_grant_meta_pairing() {
        let cat = Category::new("repository");
        let meta = cat.grant_meta();

        assert_eq!(meta.name(), "repository:grant");
        assert!(meta.is_grant_meta());
        assert!(!cat.is_grant_meta());
        assert_eq!(meta.primary(), cat);
    }

    #[test]
    fn test_category_scope_dispatch() {
        assert_eq!(Category::new("global").scope(), Scope::Unscoped);
        assert_eq!(Category::new("system").scope(), Scope::Unscoped);
        assert_eq!(Category::new("repository").scope(), Scope::Repository);
        assert_eq!(Category::new("team").scope(), Scope::Team);
        assert_eq!(Category::new("monitoring").scope(), Scope::Monitoring);
        // Meta-categories dispatch like their primaries.
        assert_eq!(Category::new("monitoring:grant").scope(), Scope::Monitoring);
    }

    #[test]
    fn test_token_window() {
        let token = TokenRecord {
            value: crate::crypto::TokenValue::from_bytes([0u8; 32]),
            salt: vec![1, 2, 3],
            valid_from: 100,
            expires_at: 200,
            user: UserId(1),
        };

        assert!(!token.is_current(99));
        assert!(token.is_current(100));
        assert!(token.is_current(200));
        assert!(!token.is_current(201));
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let grant = GrantRecord {
            id: GrantId(3),
            recipient: Recipient::User(UserId(9)),
            permission: PermissionId(12),
            category: Category::new("repository"),
            object: Some(ObjectId(42)),
        };

        let json = serde_json::to_string(&grant).unwrap();
        let back: GrantRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grant);
    }

    #[test]
    fn test_verdict_codes() {
        assert_eq!(Verdict::Ok.code(), 200);
        assert_eq!(Verdict::Conflict.code(), 406);
        assert_eq!(Verdict::NotImplemented.code(), 501);
        assert!(Verdict::Accepted.is_ok());
        assert!(!Verdict::Unauthorized.is_ok());
    }
}
