//! Removal of documents whose source files do not exist at the target
//! commit, and of the result entries that pointed at them.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::correlate::CorrelationState;
use crate::existence::{ExistenceChecker, GetChildren};

/// Drop every document that is not present in the repository at the
/// target commit. Indexers routinely emit entries for generated files
/// and uncommitted dependencies; keeping those would let queries
/// resolve to paths that do not exist.
pub fn prune(
    state: &mut CorrelationState,
    root: &str,
    children: &mut dyn GetChildren,
    cancel: &CancelToken,
) -> Result<()> {
    let paths: Vec<String> = state.document_data.values().map(|doc| doc.uri.clone()).collect();
    let checker = ExistenceChecker::new(root, &paths, children, cancel)?;

    state
        .document_data
        .retain(|_, doc| checker.should_include(&doc.uri));

    let document_data = &state.document_data;
    for document_ranges in state.definition_data.values_mut() {
        document_ranges.retain(|document_id, _| document_data.contains_key(document_id));
    }
    for document_ranges in state.reference_data.values_mut() {
        document_ranges.retain(|document_id, _| document_data.contains_key(document_id));
    }

    Ok(())
}
