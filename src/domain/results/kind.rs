use serde::{Deserialize, Serialize};

/// Outcome kind of a command against one target.
///
/// `Partial` marks a mixed outcome and is only ever produced by
/// [`super::flatten`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResultKind {
    Success,
    Partial,
    NoOperation,
    Enqueued,
    AdminDown,
    OutOfService,
    Error,
    Failed,
    LockTimeout,
    ArgumentError,
    Timeout,
    Unspecified,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Partial => "Partial",
            Self::NoOperation => "NoOperation",
            Self::Enqueued => "Enqueued",
            Self::AdminDown => "AdminDown",
            Self::OutOfService => "OutOfService",
            Self::Error => "Error",
            Self::Failed => "Failed",
            Self::LockTimeout => "LockTimeout",
            Self::ArgumentError => "ArgumentError",
            Self::Timeout => "Timeout",
            Self::Unspecified => "Unspecified",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Kinds that always carry an elapsed duration
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout | Self::LockTimeout)
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
