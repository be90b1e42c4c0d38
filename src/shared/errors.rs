use thiserror::Error;

/// Contract violations raised by the status core.
///
/// Business outcomes (blocked tokens, timeouts, partial command results) are
/// ordinary return values and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Empty or otherwise invalid timeline access.
    #[error("Data error: {0}")]
    Data(String),

    /// Attaching `child` below `parent` would close a cycle.
    #[error("Cycle: attaching {child} below {parent} would create a cycle")]
    Cycle { parent: String, child: String },

    /// A user supplied aggregation function failed for `entity`.
    #[error("Aggregation failed for {entity}: {reason}")]
    Aggregation { entity: String, reason: String },

    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Already exists: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn cycle(parent: impl ToString, child: impl ToString) -> Self {
        Self::Cycle {
            parent: parent.to_string(),
            child: child.to_string(),
        }
    }

    pub fn aggregation(entity: impl ToString, reason: impl Into<String>) -> Self {
        Self::Aggregation {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub fn entity_not_found(value: impl ToString) -> Self {
        Self::NotFound {
            entity: "Entity",
            field: "id",
            value: value.to_string(),
        }
    }
}

/// Errors raised while loading the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
