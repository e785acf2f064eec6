//! Emission of the canonicalized, pruned graph into the bundle file.
//!
//! All rows of a job are written inside one transaction through
//! parameter-capped batch inserters; covering indexes are created only
//! after the commit. Document and result-chunk payloads are stored as
//! gzip-compressed JSON blobs. Map- and set-valued fields use the
//! `{"value": [...]}` wrapping; consumers decode exactly this shape,
//! so it must not change.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::Value;
use rusqlite::Connection;
use serde_json::json;

use crate::cancel::CancelToken;
use crate::correlate::CorrelationState;
use crate::db::{self, batch::BatchInserter};
use crate::hash::{hash_key, num_result_chunks};
use crate::sets::DefaultIdSetMap;

/// Version stamp of the bundle format itself.
pub const INTERNAL_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WriteStats {
    pub documents: usize,
    pub result_chunks: usize,
    pub definitions: usize,
    pub references: usize,
}

/// Write the bundle for a fully canonicalized and pruned state.
///
/// On failure the transaction rolls back, leaving no partial tables;
/// the caller is responsible for deleting the file itself, which is
/// also required when index creation fails after the commit.
pub fn write_bundle(
    state: &CorrelationState,
    filename: &Path,
    cancel: &CancelToken,
) -> Result<WriteStats> {
    let mut conn = db::open_bundle(filename)?;

    let tx = conn.transaction().context("begin bundle transaction")?;
    let stats = write_tables(state, &tx, cancel)?;
    tx.commit().context("commit bundle transaction")?;

    cancel.check()?;
    db::create_indexes(&conn)?;

    Ok(stats)
}

fn write_tables(
    state: &CorrelationState,
    tx: &Connection,
    cancel: &CancelToken,
) -> Result<WriteStats> {
    let chunk_count = num_result_chunks(state.definition_data.len() + state.reference_data.len());

    let mut meta = BatchInserter::new(
        tx,
        "meta",
        &["lsifVersion", "sourcegraphVersion", "numResultChunks"],
    );
    let mut documents = BatchInserter::new(tx, "documents", &["path", "data"]);
    let mut result_chunks = BatchInserter::new(tx, "resultChunks", &["id", "data"]);

    let row_columns = [
        "scheme",
        "identifier",
        "documentPath",
        "startLine",
        "startCharacter",
        "endLine",
        "endCharacter",
    ];
    let mut definitions = BatchInserter::new(tx, "definitions", &row_columns);
    let mut references = BatchInserter::new(tx, "references", &row_columns);

    meta.insert(vec![
        Value::Text(state.lsif_version.clone()),
        Value::Text(INTERNAL_VERSION.to_string()),
        Value::Integer(chunk_count as i64),
    ])?;

    let mut stats = WriteStats::default();
    stats.documents = populate_documents(state, &mut documents, cancel)?;
    stats.result_chunks = populate_result_chunks(state, chunk_count, &mut result_chunks, cancel)?;
    stats.definitions = populate_moniker_rows(
        state,
        &state.definition_data,
        definition_monikers(state),
        &mut definitions,
        cancel,
    )?;
    stats.references = populate_moniker_rows(
        state,
        &state.reference_data,
        reference_monikers(state),
        &mut references,
        cancel,
    )?;

    for inserter in [
        &mut meta,
        &mut documents,
        &mut result_chunks,
        &mut definitions,
        &mut references,
    ] {
        inserter.flush()?;
    }

    Ok(stats)
}

/// One blob per document: its ranges, plus the hovers, monikers, and
/// package information any of those ranges refer to.
fn populate_documents(
    state: &CorrelationState,
    inserter: &mut BatchInserter<'_>,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut count = 0;

    for doc in state.document_data.values() {
        cancel.check()?;
        if doc.uri.starts_with("..") {
            continue;
        }

        let data = document_blob(state, doc)?;
        inserter.insert(vec![Value::Text(doc.uri.clone()), Value::Blob(data)])?;
        count += 1;
    }

    Ok(count)
}

fn document_blob(state: &CorrelationState, doc: &crate::model::DocumentData) -> Result<Vec<u8>> {
    let mut ranges = Vec::new();
    let mut hover_results: BTreeMap<&str, &str> = BTreeMap::new();
    let mut monikers: BTreeMap<&str, &crate::model::MonikerData> = BTreeMap::new();
    let mut package_information = BTreeMap::new();

    for range_id in doc.contains.iter() {
        let Some(range) = state.range_data.get(range_id) else {
            continue;
        };

        if let Some(hover_id) = &range.hover_result_id {
            if let Some(hover) = state.hover_data.get(hover_id) {
                hover_results.insert(hover_id.as_str(), hover.as_str());
            }
        }

        for moniker_id in range.moniker_ids.iter() {
            let Some(moniker) = state.moniker_data.get(moniker_id) else {
                continue;
            };
            monikers.insert(moniker_id, moniker);

            if let Some(info_id) = &moniker.package_information_id {
                if let Some(info) = state.package_information_data.get(info_id) {
                    package_information.insert(info_id.as_str(), info);
                }
            }
        }

        let moniker_ids: Vec<&str> = range.moniker_ids.iter().collect();
        ranges.push(json!([range_id, {
            "startLine": range.start_line,
            "startCharacter": range.start_character,
            "endLine": range.end_line,
            "endCharacter": range.end_character,
            "definitionResultId": range.definition_result_id.as_deref().unwrap_or(""),
            "referenceResultId": range.reference_result_id.as_deref().unwrap_or(""),
            "hoverResultId": range.hover_result_id.as_deref().unwrap_or(""),
            "monikerIds": {"value": moniker_ids},
        }]));
    }

    let hover_results: Vec<_> = hover_results
        .into_iter()
        .map(|(id, text)| json!([id, text]))
        .collect();
    let monikers: Vec<_> = monikers
        .into_iter()
        .map(|(id, moniker)| {
            json!([id, {
                "kind": moniker.kind.as_str(),
                "scheme": moniker.scheme,
                "identifier": moniker.identifier,
                "packageInformationId": moniker.package_information_id.as_deref().unwrap_or(""),
            }])
        })
        .collect();
    let package_information: Vec<_> = package_information
        .into_iter()
        .map(|(id, info)| json!([id, {"name": info.name, "version": info.version}]))
        .collect();

    gzip_json(&json!({
        "ranges": {"value": ranges},
        "hoverResults": {"value": hover_results},
        "monikers": {"value": monikers},
        "packageInformation": {"value": package_information},
    }))
}

#[derive(Default)]
struct ResultChunk {
    /// document id -> document path
    paths: BTreeMap<String, String>,
    /// result id -> (document id, range id) pairs
    document_id_range_ids: BTreeMap<String, Vec<(String, String)>>,
}

fn populate_result_chunks(
    state: &CorrelationState,
    chunk_count: usize,
    inserter: &mut BatchInserter<'_>,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut chunks: Vec<ResultChunk> = Vec::new();
    chunks.resize_with(chunk_count, ResultChunk::default);

    add_to_chunks(state, &mut chunks, &state.definition_data);
    add_to_chunks(state, &mut chunks, &state.reference_data);

    let mut count = 0;
    for (index, chunk) in chunks.iter().enumerate() {
        cancel.check()?;
        if chunk.paths.is_empty() && chunk.document_id_range_ids.is_empty() {
            continue;
        }

        let paths: Vec<_> = chunk
            .paths
            .iter()
            .map(|(document_id, path)| json!([document_id, path]))
            .collect();
        let document_id_range_ids: Vec<_> = chunk
            .document_id_range_ids
            .iter()
            .map(|(result_id, pairs)| {
                let pairs: Vec<_> = pairs
                    .iter()
                    .map(|(document_id, range_id)| {
                        json!({"documentId": document_id, "rangeId": range_id})
                    })
                    .collect();
                json!([result_id, pairs])
            })
            .collect();

        let data = gzip_json(&json!({
            "documentPaths": {"value": paths},
            "documentIdRangeIds": {"value": document_id_range_ids},
        }))?;

        inserter.insert(vec![Value::Integer(index as i64), Value::Blob(data)])?;
        count += 1;
    }

    Ok(count)
}

fn add_to_chunks(
    state: &CorrelationState,
    chunks: &mut [ResultChunk],
    data: &BTreeMap<String, DefaultIdSetMap>,
) {
    for (result_id, document_ranges) in data {
        let chunk = &mut chunks[hash_key(result_id, chunks.len())];

        for (document_id, range_ids) in document_ranges.iter() {
            let Some(doc) = state.document_data.get(document_id) else {
                continue;
            };
            chunk.paths.insert(document_id.clone(), doc.uri.clone());

            for range_id in range_ids.iter() {
                chunk
                    .document_id_range_ids
                    .entry(result_id.clone())
                    .or_default()
                    .push((document_id.clone(), range_id.to_string()));
            }
        }
    }
}

fn definition_monikers(state: &CorrelationState) -> DefaultIdSetMap {
    let mut monikers = DefaultIdSetMap::new();
    for range in state.range_data.values() {
        if let Some(result_id) = &range.definition_result_id {
            if !range.moniker_ids.is_empty() {
                monikers.get_or_create(result_id).add_all(&range.moniker_ids);
            }
        }
    }
    monikers
}

fn reference_monikers(state: &CorrelationState) -> DefaultIdSetMap {
    let mut monikers = DefaultIdSetMap::new();
    for range in state.range_data.values() {
        if let Some(result_id) = &range.reference_result_id {
            if !range.moniker_ids.is_empty() {
                monikers.get_or_create(result_id).add_all(&range.moniker_ids);
            }
        }
    }
    monikers
}

/// One row per (moniker, location) pair of every result that has at
/// least one moniker attached through some range.
fn populate_moniker_rows(
    state: &CorrelationState,
    data: &BTreeMap<String, DefaultIdSetMap>,
    monikers: DefaultIdSetMap,
    inserter: &mut BatchInserter<'_>,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut count = 0;

    for (result_id, document_ranges) in data {
        let Some(moniker_ids) = monikers.get(result_id) else {
            continue;
        };

        for moniker_id in moniker_ids.iter() {
            let Some(moniker) = state.moniker_data.get(moniker_id) else {
                continue;
            };

            for (document_id, range_ids) in document_ranges.iter() {
                let Some(doc) = state.document_data.get(document_id) else {
                    continue;
                };
                if doc.uri.starts_with("..") {
                    continue;
                }

                for range_id in range_ids.iter() {
                    let Some(range) = state.range_data.get(range_id) else {
                        continue;
                    };

                    cancel.check()?;
                    inserter.insert(vec![
                        Value::Text(moniker.scheme.clone()),
                        Value::Text(moniker.identifier.clone()),
                        Value::Text(doc.uri.clone()),
                        Value::Integer(range.start_line),
                        Value::Integer(range.start_character),
                        Value::Integer(range.end_line),
                        Value::Integer(range.end_character),
                    ])?;
                    count += 1;
                }
            }
        }
    }

    Ok(count)
}

fn gzip_json(value: &serde_json::Value) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, value).context("encode blob json")?;
    encoder.finish().context("compress blob")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentData, MonikerData, MonikerKind, RangeData};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn read_blob(data: &[u8]) -> serde_json::Value {
        let mut decoder = GzDecoder::new(data);
        let mut json = String::new();
        decoder.read_to_string(&mut json).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    fn open(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("bundle.sqlite")
    }

    #[test]
    fn test_empty_dump_produces_minimal_bundle() {
        let mut state = CorrelationState::default();
        state.lsif_version = "0.4.3".to_string();

        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        let stats = write_bundle(&state, &path, &CancelToken::new()).unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.result_chunks, 0);

        let conn = Connection::open(&path).unwrap();
        let (lsif_version, internal_version, chunk_count): (String, String, i64) = conn
            .query_row(
                "SELECT lsifVersion, sourcegraphVersion, numResultChunks FROM meta",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(lsif_version, "0.4.3");
        assert_eq!(internal_version, INTERNAL_VERSION);
        assert_eq!(chunk_count, 1);

        for table in ["documents", "resultChunks", "definitions", "\"references\""] {
            let rows: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(rows, 0, "table {table}");
        }
    }

    fn small_state() -> CorrelationState {
        let mut state = CorrelationState::default();
        state.lsif_version = "0.4.3".to_string();

        state.document_data.insert(
            "d01".into(),
            DocumentData {
                uri: "foo.go".into(),
                contains: ["r01"].into_iter().collect(),
            },
        );
        state.range_data.insert(
            "r01".into(),
            RangeData {
                start_line: 1,
                start_character: 2,
                end_line: 3,
                end_character: 4,
                definition_result_id: Some("x01".into()),
                hover_result_id: Some("h01".into()),
                moniker_ids: ["m01"].into_iter().collect(),
                ..RangeData::default()
            },
        );
        state.hover_data.insert("h01".into(), "docs".into());
        state.moniker_data.insert(
            "m01".into(),
            MonikerData {
                kind: MonikerKind::Export,
                scheme: "gomod".into(),
                identifier: "pkg:F".into(),
                package_information_id: Some("p01".into()),
            },
        );
        state.package_information_data.insert(
            "p01".into(),
            crate::model::PackageInformationData {
                name: "pkg".into(),
                version: "v1.0.0".into(),
            },
        );

        let mut definitions = DefaultIdSetMap::new();
        definitions.get_or_create("d01").insert("r01");
        state.definition_data.insert("x01".into(), definitions);
        state
    }

    #[test]
    fn test_document_blob_shape() {
        let state = small_state();
        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        write_bundle(&state, &path, &CancelToken::new()).unwrap();

        let conn = Connection::open(&path).unwrap();
        let data: Vec<u8> = conn
            .query_row("SELECT data FROM documents WHERE path = 'foo.go'", [], |row| row.get(0))
            .unwrap();
        let blob = read_blob(&data);

        let ranges = &blob["ranges"]["value"];
        assert_eq!(ranges.as_array().unwrap().len(), 1);
        assert_eq!(ranges[0][0], "r01");
        assert_eq!(ranges[0][1]["startLine"], 1);
        assert_eq!(ranges[0][1]["definitionResultId"], "x01");
        assert_eq!(ranges[0][1]["referenceResultId"], "");
        assert_eq!(ranges[0][1]["monikerIds"]["value"][0], "m01");

        assert_eq!(blob["hoverResults"]["value"][0][0], "h01");
        assert_eq!(blob["hoverResults"]["value"][0][1], "docs");
        assert_eq!(blob["monikers"]["value"][0][1]["scheme"], "gomod");
        assert_eq!(blob["packageInformation"]["value"][0][1]["name"], "pkg");
    }

    #[test]
    fn test_result_chunk_contents() {
        let state = small_state();
        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        let stats = write_bundle(&state, &path, &CancelToken::new()).unwrap();
        assert_eq!(stats.result_chunks, 1);

        let conn = Connection::open(&path).unwrap();
        let (id, data): (i64, Vec<u8>) = conn
            .query_row("SELECT id, data FROM resultChunks", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(id, 0);

        let chunk = read_blob(&data);
        assert_eq!(chunk["documentPaths"]["value"][0][0], "d01");
        assert_eq!(chunk["documentPaths"]["value"][0][1], "foo.go");
        assert_eq!(chunk["documentIdRangeIds"]["value"][0][0], "x01");
        assert_eq!(
            chunk["documentIdRangeIds"]["value"][0][1][0],
            serde_json::json!({"documentId": "d01", "rangeId": "r01"})
        );
    }

    #[test]
    fn test_definition_rows() {
        let state = small_state();
        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        let stats = write_bundle(&state, &path, &CancelToken::new()).unwrap();
        assert_eq!(stats.definitions, 1);
        assert_eq!(stats.references, 0);

        let conn = Connection::open(&path).unwrap();
        let row: (String, String, String, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT scheme, identifier, documentPath, startLine, startCharacter, endLine, endCharacter FROM definitions",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(
            row,
            ("gomod".into(), "pkg:F".into(), "foo.go".into(), 1, 2, 3, 4)
        );
    }

    #[test]
    fn test_documents_outside_root_are_skipped() {
        let mut state = small_state();
        state.document_data.insert(
            "d02".into(),
            DocumentData {
                uri: "../escape.go".into(),
                contains: ["r02"].into_iter().collect(),
            },
        );
        state.range_data.insert(
            "r02".into(),
            RangeData {
                definition_result_id: Some("x02".into()),
                moniker_ids: ["m01"].into_iter().collect(),
                ..RangeData::default()
            },
        );
        let mut definitions = DefaultIdSetMap::new();
        definitions.get_or_create("d02").insert("r02");
        state.definition_data.insert("x02".into(), definitions);

        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        let stats = write_bundle(&state, &path, &CancelToken::new()).unwrap();
        assert_eq!(stats.documents, 1);
        // x02 has a moniker through r02, but its only location is in a
        // document outside the root, so no row is produced for it.
        assert_eq!(stats.definitions, 1);

        let conn = Connection::open(&path).unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM definitions WHERE documentPath LIKE '..%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_cancelled_write_fails() {
        let state = small_state();
        let dir = tempfile::tempdir().unwrap();
        let path = open(&dir);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(write_bundle(&state, &path, &cancel).is_err());
    }
}
