use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::config::ApiToken;
use crate::error::HubError;

pub const TOKEN_HEADER: &str = "x-relay-hub-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    Agent,
}

pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Supervisor, Role::Agent];
pub const CAMPAIGN_ROLES: &[Role] = &[Role::Admin, Role::Supervisor];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub workspace_id: String,
    pub user_id: String,
    pub role: Role,
}

/// Resolves the caller of a request into a workspace-scoped principal.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn require_role(
        &self,
        headers: &HeaderMap,
        allowed: &[Role],
    ) -> Result<Principal, HubError>;
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.trim().strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Tokens listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenRoles {
    tokens: Vec<ApiToken>,
}

impl StaticTokenRoles {
    pub fn new(tokens: Vec<ApiToken>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl RoleProvider for StaticTokenRoles {
    async fn require_role(
        &self,
        headers: &HeaderMap,
        allowed: &[Role],
    ) -> Result<Principal, HubError> {
        let token = extract_token(headers).ok_or(HubError::Unauthorized)?;
        let entry = self
            .tokens
            .iter()
            .find(|t| t.token == token)
            .ok_or(HubError::Unauthorized)?;
        if !allowed.contains(&entry.role) {
            return Err(HubError::Forbidden("role_not_permitted".to_string()));
        }
        Ok(Principal {
            workspace_id: entry.workspace_id.clone(),
            user_id: entry.user_id.clone(),
            role: entry.role,
        })
    }
}
