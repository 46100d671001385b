use serde::{Deserialize, Serialize};

/// Role ids seeded by the default catalog.
pub const ROLE_USER: i64 = 1;
pub const ROLE_ADMIN: i64 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub account: String,
    /// Credential digest; never serialized out.
    #[serde(skip_serializing, default)]
    pub password_digest: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

/// Public view of an identity returned to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub account: String,
    pub username: String,
    pub email: String,
    pub avatar: String,
}

impl From<&Identity> for Profile {
    fn from(i: &Identity) -> Self {
        Profile { account: i.account.clone(), username: i.username.clone(), email: i.email.clone(), avatar: i.avatar.clone() }
    }
}

/// A protected operation: route pattern plus HTTP verb.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub route: String,
    pub verb: String,
}

impl Operation {
    pub fn new(route: impl Into<String>, verb: impl AsRef<str>) -> Self {
        Self { route: route.into(), verb: verb.as_ref().to_ascii_uppercase() }
    }

    /// Member string stored in the permission→operation cache sets.
    pub fn cache_member(&self) -> String { format!("{}:{}", self.route, self.verb) }
}
