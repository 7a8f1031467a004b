//! Caller identity threaded explicitly through every marketplace operation.
//!
//! The presentation layer resolves an [`Actor`] once from its injected [`AuthSession`];
//! business logic only ever sees the resolved value.

use serde::{Deserialize, Serialize};

use super::error::MarketplaceError;
use super::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Professional,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Professional => "professional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Role::Client),
            "professional" | "craftsman" => Some(Role::Professional),
            _ => None,
        }
    }
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
            email: None,
        }
    }

    /// Resolve the caller from the auth session; fails when nobody is signed in.
    pub fn resolve(
        session: &dyn AuthSession,
        display_name: impl Into<String>,
        role: Role,
    ) -> Result<Self, MarketplaceError> {
        let user_id = session
            .current_user_id()
            .ok_or(MarketplaceError::Unauthenticated)?;
        Ok(Self {
            user_id,
            display_name: display_name.into(),
            role,
            email: session.current_user_email(),
        })
    }

    pub fn is(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

/// Auth provider surface consumed by the marketplace.
pub trait AuthSession: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
    fn current_user_email(&self) -> Option<String>;
}

/// Fixed session used by the CLI demo and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user_id: Option<UserId>,
    email: Option<String>,
}

impl StaticSession {
    pub fn signed_in(user_id: impl Into<UserId>, email: Option<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            email,
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl AuthSession for StaticSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.user_id.clone()
    }

    fn current_user_email(&self) -> Option<String> {
        self.email.clone()
    }
}
