//! Rewrite passes that collapse the correlated graph in place.
//!
//! Pass order matters: duplicate documents are merged first, then
//! linked reference results, then result-set chains, then the final
//! hop from each range. Every pass is idempotent on its own output,
//! and after all four the `next_data` indirection map is empty.

use std::collections::BTreeMap;

use crate::correlate::CorrelationState;
use crate::model::{MonikerData, MonikerKind, RangeData, ResultSetData};
use crate::sets::{DisjointIdSet, IdSet};

pub fn canonicalize(state: &mut CorrelationState) {
    canonicalize_documents(state);
    canonicalize_reference_results(state);
    canonicalize_result_sets(state);
    canonicalize_ranges(state);
}

/// Merge every document that shares a URI into the one with the
/// lexicographically smallest id. Some indexers emit the same source
/// file under multiple document ids when indexing dependent projects
/// into a single dump; their contains sets and per-document result
/// entries must collapse without losing attributions.
fn canonicalize_documents(state: &mut CorrelationState) {
    let mut ids_by_uri: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (document_id, doc) in &state.document_data {
        ids_by_uri
            .entry(doc.uri.clone())
            .or_default()
            .push(document_id.clone());
    }

    for ids in ids_by_uri.values() {
        // Iteration over document_data is sorted, so ids[0] is the
        // lexicographically smallest id for this URI.
        let canonical_id = &ids[0];

        for document_id in &ids[1..] {
            if let Some(doc) = state.document_data.remove(document_id) {
                if let Some(canonical) = state.document_data.get_mut(canonical_id) {
                    canonical.contains.add_all(&doc.contains);
                }
            }

            for document_ranges in state.definition_data.values_mut() {
                if let Some(range_ids) = document_ranges.remove(document_id) {
                    document_ranges.get_or_create(canonical_id).add_all(&range_ids);
                }
            }

            for document_ranges in state.reference_data.values_mut() {
                if let Some(range_ids) = document_ranges.remove(document_id) {
                    document_ranges.get_or_create(canonical_id).add_all(&range_ids);
                }
            }
        }
    }
}

/// Merge reference results linked by item edges. Each equivalence
/// class keeps its `choose`-canonical member; the others fold their
/// per-document contents into it and are removed, and every range and
/// result set pointing at a member is rewritten to the canonical id.
fn canonicalize_reference_results(state: &mut CorrelationState) {
    let mut canonical_ids: BTreeMap<String, String> = BTreeMap::new();

    let member_ids: Vec<String> = state
        .linked_reference_results
        .keys()
        .map(String::from)
        .collect();

    for reference_result_id in member_ids {
        // Each linked class is processed once, from whichever member
        // is seen first.
        if canonical_ids.contains_key(&reference_result_id) {
            continue;
        }

        let linked_ids = state.linked_reference_results.extract_set(&reference_result_id);
        let Some(canonical_id) = linked_ids.choose().map(String::from) else {
            continue;
        };

        for linked_id in linked_ids.iter() {
            canonical_ids.insert(linked_id.to_string(), canonical_id.clone());
            if linked_id == canonical_id {
                continue;
            }

            if let Some(document_ranges) = state.reference_data.remove(linked_id) {
                for (document_id, range_ids) in document_ranges {
                    if let Some(canonical) = state.reference_data.get_mut(&canonical_id) {
                        canonical.get_or_create(&document_id).add_all(&range_ids);
                    }
                }
            }
        }
    }

    for range in state.range_data.values_mut() {
        rewrite_reference_result_id(&mut range.reference_result_id, &canonical_ids);
    }
    for result_set in state.result_set_data.values_mut() {
        rewrite_reference_result_id(&mut result_set.reference_result_id, &canonical_ids);
    }
}

fn rewrite_reference_result_id(slot: &mut Option<String>, canonical_ids: &BTreeMap<String, String>) {
    if let Some(id) = slot {
        if let Some(canonical_id) = canonical_ids.get(id) {
            *slot = Some(canonical_id.clone());
        }
    }
}

/// Collapse each result set's `next` chain so that every result set
/// holds the first non-empty definition, reference, and hover ids
/// found along its chain, plus the union of the chain's monikers.
fn canonicalize_result_sets(state: &mut CorrelationState) {
    let ids: Vec<String> = state.result_set_data.keys().cloned().collect();
    for id in &ids {
        collapse_result_set(state, id);
    }

    for id in &ids {
        let Some(result_set) = state.result_set_data.get(id) else {
            continue;
        };
        let gathered = gather_monikers(
            &state.linked_monikers,
            &state.moniker_data,
            &result_set.moniker_ids,
        );
        if let Some(result_set) = state.result_set_data.get_mut(id) {
            result_set.moniker_ids = gathered;
        }
    }
}

/// Collapse the single remaining `next` hop from each range into the
/// range itself; result sets were flattened by the previous pass.
fn canonicalize_ranges(state: &mut CorrelationState) {
    let ids: Vec<String> = state.range_data.keys().cloned().collect();
    for id in &ids {
        if let Some(next_id) = state.next_data.get(id).cloned() {
            let next_item = state.result_set_data.get(&next_id).cloned().unwrap_or_default();
            if let Some(range) = state.range_data.get_mut(id) {
                merge_next_into_range(range, &next_item);
            }
            state.next_data.remove(id);
        }

        let Some(range) = state.range_data.get(id) else {
            continue;
        };
        let gathered = gather_monikers(
            &state.linked_monikers,
            &state.moniker_data,
            &range.moniker_ids,
        );
        if let Some(range) = state.range_data.get_mut(id) {
            range.moniker_ids = gathered;
        }
    }
}

fn collapse_result_set(state: &mut CorrelationState, id: &str) -> ResultSetData {
    let item = state.result_set_data.get(id).cloned().unwrap_or_default();
    let Some(next_id) = state.next_data.get(id).cloned() else {
        return item;
    };

    let next_item = collapse_result_set(state, &next_id);
    let mut item = item;
    merge_next_into_result_set(&mut item, &next_item);
    state.result_set_data.insert(id.to_string(), item.clone());
    state.next_data.remove(id);
    item
}

fn merge_next_into_result_set(item: &mut ResultSetData, next_item: &ResultSetData) {
    if item.definition_result_id.is_none() {
        item.definition_result_id = next_item.definition_result_id.clone();
    }
    if item.reference_result_id.is_none() {
        item.reference_result_id = next_item.reference_result_id.clone();
    }
    if item.hover_result_id.is_none() {
        item.hover_result_id = next_item.hover_result_id.clone();
    }
    item.moniker_ids.add_all(&next_item.moniker_ids);
}

fn merge_next_into_range(item: &mut RangeData, next_item: &ResultSetData) {
    if item.definition_result_id.is_none() {
        item.definition_result_id = next_item.definition_result_id.clone();
    }
    if item.reference_result_id.is_none() {
        item.reference_result_id = next_item.reference_result_id.clone();
    }
    if item.hover_result_id.is_none() {
        item.hover_result_id = next_item.hover_result_id.clone();
    }
    item.moniker_ids.add_all(&next_item.moniker_ids);
}

/// Expand a moniker set into the union of its linkage classes,
/// dropping `local` monikers, which carry no cross-project meaning.
fn gather_monikers(
    linked_monikers: &DisjointIdSet,
    moniker_data: &BTreeMap<String, MonikerData>,
    source: &IdSet,
) -> IdSet {
    let mut monikers = IdSet::new();
    for source_id in source.iter() {
        for id in linked_monikers.extract_set(source_id).iter() {
            let kind = moniker_data.get(id).map(|m| m.kind);
            if kind.is_some_and(|kind| kind != MonikerKind::Local) {
                monikers.insert(id);
            }
        }
    }
    monikers
}
