//! Folding the parsed element stream into an in-memory graph.
//!
//! The correlator enforces referential integrity as it goes: every
//! edge endpoint must already have been seen as a vertex of the right
//! kind, and the first structural inconsistency aborts the job.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::cancel::CancelToken;
use crate::element::{self, Element, EdgePayload};
use crate::error::DumpError;
use crate::model::{
    DocumentData, MonikerData, MonikerKind, PackageInformationData, RangeData, ResultSetData,
};
use crate::sets::{DefaultIdSetMap, DisjointIdSet, IdSet};

/// The entire in-memory graph accumulated from one dump, mutated in
/// place by the canonicalization passes and the pruner, then consumed
/// read-only by the emitter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationState {
    pub dump_root: String,
    pub lsif_version: String,
    pub project_root: String,
    pub unsupported_vertices: IdSet,
    pub document_data: BTreeMap<String, DocumentData>,
    pub range_data: BTreeMap<String, RangeData>,
    pub result_set_data: BTreeMap<String, ResultSetData>,
    pub definition_data: BTreeMap<String, DefaultIdSetMap>,
    pub reference_data: BTreeMap<String, DefaultIdSetMap>,
    pub hover_data: BTreeMap<String, String>,
    pub moniker_data: BTreeMap<String, MonikerData>,
    pub package_information_data: BTreeMap<String, PackageInformationData>,
    pub next_data: BTreeMap<String, String>,
    pub imported_monikers: IdSet,
    pub exported_monikers: IdSet,
    pub linked_monikers: DisjointIdSet,
    pub linked_reference_results: DisjointIdSet,
}

impl CorrelationState {
    pub fn new(dump_root: impl Into<String>) -> Self {
        CorrelationState {
            dump_root: dump_root.into(),
            ..CorrelationState::default()
        }
    }
}

/// Correlate a gzip-compressed dump file.
pub fn correlate(
    filename: &Path,
    dump_root: &str,
    cancel: &CancelToken,
) -> Result<CorrelationState, DumpError> {
    let file = File::open(filename)?;
    let reader = BufReader::new(GzDecoder::new(file));
    correlate_from_reader(dump_root, reader, cancel)
}

/// Correlate an uncompressed line stream.
pub fn correlate_from_reader(
    dump_root: &str,
    reader: impl BufRead,
    cancel: &CancelToken,
) -> Result<CorrelationState, DumpError> {
    let mut state = CorrelationState::new(dump_root);

    for line in reader.lines() {
        cancel.check()?;
        let line = line?;
        let element = element::parse_element(line.as_bytes())?;
        correlate_element(&mut state, &element)?;
    }

    if state.lsif_version.is_empty() {
        return Err(DumpError::MissingMetaData);
    }

    Ok(state)
}

fn correlate_element(state: &mut CorrelationState, element: &Element<'_>) -> Result<(), DumpError> {
    match element.element_type.as_str() {
        "vertex" => correlate_vertex(state, element),
        "edge" => correlate_edge(state, element),
        other => Err(DumpError::UnknownElementType(other.to_string())),
    }
}

fn correlate_vertex(state: &mut CorrelationState, element: &Element<'_>) -> Result<(), DumpError> {
    match element.label.as_str() {
        "metaData" => state.correlate_metadata(element),
        "document" => state.correlate_document(element),
        "range" => state.correlate_range(element),
        "resultSet" => state.correlate_result_set(element),
        "definitionResult" => state.correlate_definition_result(element),
        "referenceResult" => state.correlate_reference_result(element),
        "hoverResult" => state.correlate_hover_result(element),
        "moniker" => state.correlate_moniker(element),
        "packageInformation" => state.correlate_package_information(element),
        _ => {
            state.unsupported_vertices.insert(element.id.clone());
            Ok(())
        }
    }
}

type EdgeHandler = fn(&mut CorrelationState, &str, &EdgePayload) -> Result<(), DumpError>;

fn correlate_edge(state: &mut CorrelationState, element: &Element<'_>) -> Result<(), DumpError> {
    let handler: EdgeHandler = match element.label.as_str() {
        "contains" => CorrelationState::correlate_contains_edge,
        "next" => CorrelationState::correlate_next_edge,
        "item" => CorrelationState::correlate_item_edge,
        "textDocument/definition" => CorrelationState::correlate_definition_edge,
        "textDocument/references" => CorrelationState::correlate_references_edge,
        "textDocument/hover" => CorrelationState::correlate_hover_edge,
        "moniker" => CorrelationState::correlate_moniker_edge,
        "nextMoniker" => CorrelationState::correlate_next_moniker_edge,
        "packageInformation" => CorrelationState::correlate_package_information_edge,
        // Unrecognized edge labels are tolerated.
        _ => return Ok(()),
    };

    let edge = element::parse_edge(element)?;
    handler(state, &element.id, &edge)
}

impl CorrelationState {
    fn correlate_metadata(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        let meta = element::parse_metadata(element, &self.dump_root)?;
        self.lsif_version = meta.version;
        self.project_root = meta.project_root;
        Ok(())
    }

    fn correlate_document(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        if self.project_root.is_empty() {
            return Err(DumpError::MissingMetaData);
        }

        let doc = element::parse_document(element, &self.project_root)?;
        self.document_data.insert(element.id.clone(), doc);
        Ok(())
    }

    fn correlate_range(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        let range = element::parse_range(element)?;
        self.range_data.insert(element.id.clone(), range);
        Ok(())
    }

    fn correlate_result_set(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        self.result_set_data
            .insert(element.id.clone(), ResultSetData::default());
        Ok(())
    }

    fn correlate_definition_result(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        self.definition_data
            .insert(element.id.clone(), DefaultIdSetMap::new());
        Ok(())
    }

    fn correlate_reference_result(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        self.reference_data
            .insert(element.id.clone(), DefaultIdSetMap::new());
        Ok(())
    }

    fn correlate_hover_result(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        let hover = element::parse_hover(element)?;
        self.hover_data.insert(element.id.clone(), hover);
        Ok(())
    }

    fn correlate_moniker(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        let moniker = element::parse_moniker(element)?;
        self.moniker_data.insert(element.id.clone(), moniker);
        Ok(())
    }

    fn correlate_package_information(&mut self, element: &Element<'_>) -> Result<(), DumpError> {
        let info = element::parse_package_information(element)?;
        self.package_information_data.insert(element.id.clone(), info);
        Ok(())
    }

    fn correlate_contains_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        // Contains edges from the project vertex are not tracked.
        let Some(doc) = self.document_data.get_mut(&edge.out_v) else {
            return Ok(());
        };

        for in_v in &edge.in_vs {
            if !self.range_data.contains_key(in_v) {
                return Err(DumpError::malformed(id, in_v, &["range"]));
            }
            doc.contains.insert(in_v.clone());
        }
        Ok(())
    }

    fn correlate_next_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.range_data.contains_key(&edge.out_v)
            && !self.result_set_data.contains_key(&edge.out_v)
        {
            return Err(DumpError::malformed(id, &edge.out_v, &["range", "resultSet"]));
        }
        if !self.result_set_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["resultSet"]));
        }

        self.next_data.insert(edge.out_v.clone(), edge.in_v.clone());
        Ok(())
    }

    fn correlate_item_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if self.definition_data.contains_key(&edge.out_v) {
            for in_v in &edge.in_vs {
                if !self.range_data.contains_key(in_v) {
                    return Err(DumpError::malformed(id, in_v, &["range"]));
                }
                if let Some(document_map) = self.definition_data.get_mut(&edge.out_v) {
                    document_map.get_or_create(&edge.document).insert(in_v.clone());
                }
            }
            return Ok(());
        }

        if self.reference_data.contains_key(&edge.out_v) {
            for in_v in &edge.in_vs {
                if self.reference_data.contains_key(in_v) {
                    // A reference result pointing at another reference
                    // result links the two into one logical result.
                    self.linked_reference_results.union(&edge.out_v, in_v);
                } else if self.range_data.contains_key(in_v) {
                    if let Some(document_map) = self.reference_data.get_mut(&edge.out_v) {
                        document_map.get_or_create(&edge.document).insert(in_v.clone());
                    }
                } else {
                    return Err(DumpError::malformed(id, in_v, &["range"]));
                }
            }
            return Ok(());
        }

        if !self.unsupported_vertices.contains(&edge.out_v) {
            return Err(DumpError::malformed(id, &edge.out_v, &["vertex"]));
        }

        // Item edges from a vertex we chose to ignore are skipped.
        Ok(())
    }

    fn correlate_definition_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.definition_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["definitionResult"]));
        }

        if let Some(range) = self.range_data.get_mut(&edge.out_v) {
            range.definition_result_id = Some(edge.in_v.clone());
        } else if let Some(result_set) = self.result_set_data.get_mut(&edge.out_v) {
            result_set.definition_result_id = Some(edge.in_v.clone());
        } else {
            return Err(DumpError::malformed(id, &edge.out_v, &["range", "resultSet"]));
        }
        Ok(())
    }

    fn correlate_references_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.reference_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["referenceResult"]));
        }

        if let Some(range) = self.range_data.get_mut(&edge.out_v) {
            range.reference_result_id = Some(edge.in_v.clone());
        } else if let Some(result_set) = self.result_set_data.get_mut(&edge.out_v) {
            result_set.reference_result_id = Some(edge.in_v.clone());
        } else {
            return Err(DumpError::malformed(id, &edge.out_v, &["range", "resultSet"]));
        }
        Ok(())
    }

    fn correlate_hover_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.hover_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["hoverResult"]));
        }

        if let Some(range) = self.range_data.get_mut(&edge.out_v) {
            range.hover_result_id = Some(edge.in_v.clone());
        } else if let Some(result_set) = self.result_set_data.get_mut(&edge.out_v) {
            result_set.hover_result_id = Some(edge.in_v.clone());
        } else {
            return Err(DumpError::malformed(id, &edge.out_v, &["range", "resultSet"]));
        }
        Ok(())
    }

    // The moniker edge overwrites any previously attached moniker;
    // linked monikers accumulate during canonicalization instead.
    fn correlate_moniker_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.moniker_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["moniker"]));
        }

        let mut ids = IdSet::new();
        ids.insert(edge.in_v.clone());

        if let Some(range) = self.range_data.get_mut(&edge.out_v) {
            range.moniker_ids = ids;
        } else if let Some(result_set) = self.result_set_data.get_mut(&edge.out_v) {
            result_set.moniker_ids = ids;
        } else {
            return Err(DumpError::malformed(id, &edge.out_v, &["range", "resultSet"]));
        }
        Ok(())
    }

    fn correlate_next_moniker_edge(&mut self, id: &str, edge: &EdgePayload) -> Result<(), DumpError> {
        if !self.moniker_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["moniker"]));
        }
        if !self.moniker_data.contains_key(&edge.out_v) {
            return Err(DumpError::malformed(id, &edge.out_v, &["moniker"]));
        }

        self.linked_monikers.union(&edge.in_v, &edge.out_v);
        Ok(())
    }

    fn correlate_package_information_edge(
        &mut self,
        id: &str,
        edge: &EdgePayload,
    ) -> Result<(), DumpError> {
        if !self.package_information_data.contains_key(&edge.in_v) {
            return Err(DumpError::malformed(id, &edge.in_v, &["packageInformation"]));
        }

        let Some(moniker) = self.moniker_data.get_mut(&edge.out_v) else {
            return Err(DumpError::malformed(id, &edge.out_v, &["moniker"]));
        };

        match moniker.kind {
            MonikerKind::Import => self.imported_monikers.insert(edge.out_v.clone()),
            MonikerKind::Export => self.exported_monikers.insert(edge.out_v.clone()),
            MonikerKind::Local => {}
        }

        moniker.package_information_id = Some(edge.in_v.clone());
        Ok(())
    }
}
