//! Token model - persisted token records and the statuses reported about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a token may request authorization for inside one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub namespace: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Which of the two signed strings issued for a record this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Persisted token record. Absence of the record means the token was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub uuid: Uuid,
    pub namespace: String,
    pub identity: Uuid,
    pub scopes: Vec<Scope>,
    pub creation_metadata: String,
    pub disabled: bool,
    pub created_utc: DateTime<Utc>,
}

impl TokenData {
    /// Create a new, active token record.
    pub fn new(
        namespace: String,
        identity: Uuid,
        scopes: Vec<Scope>,
        creation_metadata: String,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            namespace,
            identity,
            scopes,
            creation_metadata,
            disabled: false,
            created_utc: Utc::now(),
        }
    }
}

/// Result of `TokenService::create`.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token_data: TokenData,
    pub token: String,
    pub refresh_token: String,
}

/// Outcome of validating a token string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Ok,
    Disabled,
    NotFound,
    Invalid,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Ok => "OK",
            TokenStatus::Disabled => "DISABLED",
            TokenStatus::NotFound => "NOT_FOUND",
            TokenStatus::Invalid => "INVALID",
        }
    }
}

/// Outcome of presenting a string to `refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshStatus {
    Ok,
    Disabled,
    NotFound,
    NotRefreshToken,
    Invalid,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Ok => "OK",
            RefreshStatus::Disabled => "DISABLED",
            RefreshStatus::NotFound => "NOT_FOUND",
            RefreshStatus::NotRefreshToken => "NOT_REFRESH_TOKEN",
            RefreshStatus::Invalid => "INVALID",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub status: RefreshStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RefreshOutcome {
    pub fn rejected(status: RefreshStatus) -> Self {
        Self {
            status,
            token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RefreshStatus::NotRefreshToken).unwrap(),
            "NOT_REFRESH_TOKEN"
        );
        assert_eq!(serde_json::to_value(TokenStatus::NotFound).unwrap(), "NOT_FOUND");
        assert_eq!(TokenStatus::Disabled.as_str(), "DISABLED");
    }

    #[test]
    fn test_scope_defaults() {
        let scope: Scope = serde_json::from_str(r#"{"namespace":"acme"}"#).unwrap();
        assert!(scope.resources.is_empty());
        assert!(scope.actions.is_empty());
    }
}
