use thiserror::Error;

/// Backing store that produced a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Subscriptions,
    QuotaLimits,
    Usage,
    Payments,
}

impl Store {
    pub fn as_str(&self) -> &'static str {
        match self {
            Store::Subscriptions => "subscriptions",
            Store::QuotaLimits => "quota_limits",
            Store::Usage => "usage",
            Store::Payments => "payments",
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("{store} store unavailable: {message}")]
    Unavailable { store: Store, message: String },

    #[error("{store} store timed out after {after_ms}ms")]
    Timeout { store: Store, after_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EntitlementError {
    /// Wrap a driver error as an availability fault of `store`
    pub fn unavailable(store: Store, err: impl std::fmt::Display) -> Self {
        EntitlementError::Unavailable {
            store,
            message: err.to_string(),
        }
    }

    /// True for store faults, which callers must not map to allow or deny
    pub fn is_service_fault(&self) -> bool {
        matches!(
            self,
            EntitlementError::Unavailable { .. }
                | EntitlementError::Timeout { .. }
                | EntitlementError::Database(_)
        )
    }

    /// Store that failed, if this is a store fault
    pub fn store(&self) -> Option<Store> {
        match self {
            EntitlementError::Unavailable { store, .. } | EntitlementError::Timeout { store, .. } => {
                Some(*store)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EntitlementError>;
