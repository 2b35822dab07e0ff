pub mod identity;
pub mod password_credential;
pub mod token;

pub use identity::{Identity, Managed, MembershipKind, ResourceRef};
pub use password_credential::PasswordCredential;
pub use token::{IssuedToken, RefreshOutcome, RefreshStatus, Scope, TokenData, TokenKind, TokenStatus};

/// The always-present global namespace.
pub const GLOBAL_NAMESPACE: &str = "";

/// Default page size for listing operations.
pub const DEFAULT_PAGE_LIMIT: u64 = 100;

/// Upper bound on a single page.
pub const MAX_PAGE_LIMIT: u64 = 1000;

/// Largest offset a store can represent (Postgres `OFFSET` is a BIGINT).
pub const MAX_PAGE_SKIP: u64 = i64::MAX as u64;

/// Offset pagination window for listing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

impl Page {
    /// Build a page, defaulting a missing or zero limit and clamping large
    /// limits and offsets.
    pub fn new(skip: Option<u64>, limit: Option<u64>) -> Self {
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) => l.min(MAX_PAGE_LIMIT),
        };
        Self {
            skip: skip.unwrap_or(0).min(MAX_PAGE_SKIP),
            limit,
        }
    }

    /// Apply the window to an already-ordered sequence.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.skip as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
