//! Outcome of one command against one target

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use serde::Serialize;

use super::kind::ResultKind;

/// Free-form warning attached to a command result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Warning(String);

impl Warning {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Warning {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Warning {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable outcome of a command against one target entity.
///
/// Only the kind-specific constructors create results, so an `Error` or
/// `Failed` result always has a description and a `Timeout` or
/// `LockTimeout` result always has an elapsed duration. The `with_*`
/// methods consume and return the value; nothing mutates a result once it
/// has been handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult<E> {
    entity: Option<E>,
    kind: ResultKind,
    description: Option<String>,
    rejected: Vec<E>,
    warnings: Vec<Warning>,
    elapsed: Option<Duration>,
    runtime: Option<Duration>,
}

impl<E> CommandResult<E>
where
    E: Clone + Eq + Hash,
{
    fn of(entity: Option<E>, kind: ResultKind) -> Self {
        Self {
            entity,
            kind,
            description: None,
            rejected: Vec::new(),
            warnings: Vec::new(),
            elapsed: None,
            runtime: None,
        }
    }

    pub fn success(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::Success)
    }

    pub fn no_operation(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::NoOperation)
    }

    pub fn enqueued(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::Enqueued)
    }

    pub fn admin_down(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::AdminDown)
    }

    pub fn out_of_service(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::OutOfService)
    }

    pub fn error(entity: E, description: impl Into<String>) -> Self {
        Self::of(Some(entity), ResultKind::Error).with_description(description)
    }

    pub fn failed(entity: E, description: impl Into<String>) -> Self {
        Self::of(Some(entity), ResultKind::Failed).with_description(description)
    }

    pub fn lock_timeout(entity: E, elapsed: Duration) -> Self {
        let mut result = Self::of(Some(entity), ResultKind::LockTimeout);
        result.elapsed = Some(elapsed);
        result
    }

    pub fn timeout(entity: E, elapsed: Duration) -> Self {
        let mut result = Self::of(Some(entity), ResultKind::Timeout);
        result.elapsed = Some(elapsed);
        result
    }

    pub fn argument_error(entity: E, argument: &str, description: impl Into<String>) -> Self {
        Self::of(Some(entity), ResultKind::ArgumentError).with_description(format!(
            "Invalid argument '{}': {}",
            argument,
            description.into()
        ))
    }

    pub fn unspecified(entity: E) -> Self {
        Self::of(Some(entity), ResultKind::Unspecified)
    }

    /// Multi-target constructor, reserved for reconciliation.
    pub(crate) fn reconciled(
        entity: Option<E>,
        kind: ResultKind,
        description: Option<String>,
        rejected: Vec<E>,
        warnings: Vec<Warning>,
        elapsed: Option<Duration>,
        runtime: Duration,
    ) -> Self {
        Self {
            entity,
            kind,
            description,
            rejected,
            warnings,
            elapsed,
            runtime: Some(runtime),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add rejected items, skipping ones already present.
    pub fn with_rejected(mut self, items: impl IntoIterator<Item = E>) -> Self {
        let mut merged = std::mem::take(&mut self.rejected);
        merged.extend(items);
        self.rejected = dedup(merged);
        self
    }

    /// Add warnings, skipping ones already present.
    pub fn with_warnings<W: Into<Warning>>(mut self, warnings: impl IntoIterator<Item = W>) -> Self {
        let mut merged = std::mem::take(&mut self.warnings);
        merged.extend(warnings.into_iter().map(Into::into));
        self.warnings = dedup(merged);
        self
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn entity(&self) -> Option<&E> {
        self.entity.as_ref()
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rejected(&self) -> &[E] {
        &self.rejected
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}

/// Keep the first occurrence of every item, preserving order.
pub(crate) fn dedup<T: Clone + Eq + Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

impl<E: Display> Display for CommandResult<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(entity) = &self.entity {
            write!(f, " [{}]", entity)?;
        }
        if let Some(elapsed) = self.elapsed {
            write!(f, " after {} ms", elapsed.as_millis())?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        if !self.warnings.is_empty() {
            write!(f, " ({} warnings)", self.warnings.len())?;
        }
        Ok(())
    }
}
