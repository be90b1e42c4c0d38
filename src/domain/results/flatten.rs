//! Reconciliation of per-target command outcomes
//!
//! [`flatten`] takes the complete set of outcomes of one logical command at
//! once. It is not associative and must not be folded pairwise.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;

use tracing::debug;

use super::command_result::{dedup, CommandResult};
use super::kind::ResultKind;

/// A [`CommandResult`] synthesised from several per-target results
pub type FlattenedResult<E> = CommandResult<E>;

/// Description used when there is nothing to reconcile
pub const EMPTY_INPUT_DESCRIPTION: &str = "!";

/// Reduce the outcomes of one command into a single verdict.
///
/// - no outcomes: `Error` with description `"!"`
/// - every outcome has the same kind: that kind
/// - otherwise: `Partial`
///
/// Descriptions are newline-joined in input order; rejected items and
/// warnings are merged without duplicates. The entity is kept only when all
/// outcomes refer to the same one.
pub fn flatten<E>(results: &[CommandResult<E>], runtime: Duration) -> FlattenedResult<E>
where
    E: Clone + Eq + Hash,
{
    if results.is_empty() {
        metrics::counter!("command_results_flattened_total", "kind" => ResultKind::Error.as_str())
            .increment(1);
        return CommandResult::reconciled(
            None,
            ResultKind::Error,
            Some(EMPTY_INPUT_DESCRIPTION.to_string()),
            Vec::new(),
            Vec::new(),
            None,
            runtime,
        );
    }

    let mut counts: BTreeMap<ResultKind, usize> = BTreeMap::new();
    for result in results {
        *counts.entry(result.kind()).or_default() += 1;
    }

    let kind = match counts.iter().find(|(_, count)| **count == results.len()) {
        Some((kind, _)) => *kind,
        None => ResultKind::Partial,
    };

    let first_entity = results[0].entity();
    let entity = results
        .iter()
        .all(|r| r.entity() == first_entity)
        .then(|| first_entity.cloned())
        .flatten();

    let descriptions: Vec<&str> = results.iter().filter_map(|r| r.description()).collect();
    let description = (!descriptions.is_empty()).then(|| descriptions.join("\n"));

    let rejected = dedup(
        results
            .iter()
            .flat_map(|r| r.rejected().iter().cloned())
            .collect(),
    );
    let warnings = dedup(
        results
            .iter()
            .flat_map(|r| r.warnings().iter().cloned())
            .collect(),
    );

    let elapsed = if kind.is_timeout() {
        results.iter().filter_map(|r| r.elapsed()).max()
    } else {
        None
    };

    debug!(
        targets = results.len(),
        distinct_kinds = counts.len(),
        kind = kind.as_str(),
        "Flattened command results"
    );
    metrics::counter!("command_results_flattened_total", "kind" => kind.as_str()).increment(1);

    CommandResult::reconciled(entity, kind, description, rejected, warnings, elapsed, runtime)
}
