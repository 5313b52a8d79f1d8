//! Persisted user model.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Account kind. Unknown names collapse to `Client` so that routing stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Freelancer,
    Company,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Client, Role::Freelancer, Role::Company, Role::Admin];

    /// Strict parse; `None` for names outside the closed set.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Role::Client),
            "freelancer" => Some(Role::Freelancer),
            "company" => Some(Role::Company),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Lenient parse used at every deserialization boundary.
    pub fn from_name_lossy(raw: &str) -> Role {
        Role::parse(raw).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Freelancer => "freelancer",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }

    /// Roles with an onboarding step before their home screen.
    pub fn requires_profile(&self) -> bool {
        matches!(self, Role::Freelancer | Role::Company)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from_name_lossy(&raw))
    }
}

/// Role as nested inside a user payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleDescriptor {
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Role,
}

impl RoleDescriptor {
    pub fn new(name: Role) -> Self {
        Self { id: None, name }
    }
}

/// A signed-in user. Replaced wholesale on every auth event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: RoleDescriptor,
}

impl UserProfile {
    pub fn role(&self) -> Role {
        self.role.name
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(raw: StringOrNumber) -> Self {
        match raw {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Freelancer"), Some(Role::Freelancer));
        assert_eq!(Role::parse(" ADMIN "), Some(Role::Admin));
        assert_eq!(Role::parse("moderator"), None);
    }

    #[test]
    fn test_unknown_role_defaults_to_client() {
        let role: Role = serde_json::from_str("\"moderator\"").unwrap();
        assert_eq!(role, Role::Client);
        assert_eq!(serde_json::to_string(&Role::Company).unwrap(), "\"company\"");
    }

    #[test]
    fn test_non_string_role_is_rejected() {
        assert!(serde_json::from_str::<Role>("42").is_err());
        assert!(serde_json::from_str::<Role>("null").is_err());
    }

    #[test]
    fn test_user_profile_accepts_numeric_ids() {
        let user: UserProfile = serde_json::from_str(
            r#"{"id":7,"username":"alice","email":"a@x.io","role":{"id":3,"name":"company"}}"#,
        )
        .unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.role.id.as_deref(), Some("3"));
        assert_eq!(user.role(), Role::Company);
    }

    #[test]
    fn test_user_profile_missing_role_is_client() {
        let user: UserProfile =
            serde_json::from_str(r#"{"id":"u1","username":"bob","email":"b@x.io"}"#).unwrap();
        assert_eq!(user.role(), Role::Client);
    }

    #[test]
    fn test_user_profile_missing_email_is_rejected() {
        let result = serde_json::from_str::<UserProfile>(r#"{"id":"u1","username":"bob"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_profile() {
        assert!(!Role::Client.requires_profile());
        assert!(Role::Freelancer.requires_profile());
        assert!(Role::Company.requires_profile());
        assert!(!Role::Admin.requires_profile());
    }
}
