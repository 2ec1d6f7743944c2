//! Users, roles and auth payloads.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account roles, ordered from most to least privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Everything, including deletes
    Admin,
    /// Create and edit records
    Manager,
    /// Read records, plus self-service endpoints
    User,
    /// Read-only account seeded in demo mode
    Demo,
}

impl Role {
    /// Permission level (higher = more permissions)
    pub fn level(&self) -> u8 {
        match self {
            Role::Admin => 4,
            Role::Manager => 3,
            Role::User => 2,
            Role::Demo => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
            Role::Demo => "demo",
        }
    }

    /// Roles a caller may request for themselves at registration
    pub fn is_self_assignable(&self) -> bool {
        !matches!(self, Role::Demo)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "user" => Ok(Role::User),
            "demo" => Ok(Role::Demo),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub subscription_tier: String,
    pub subscription_active: bool,
    pub created_at: String,
}

impl User {
    /// Parsed role; unknown strings in the table degrade to `user`
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::User)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub subscription_tier: String,
    pub subscription_active: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            subscription_tier: user.subscription_tier,
            subscription_active: user.subscription_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Body returned by both register and login
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub access_token: String,
}
